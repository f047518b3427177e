use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid, DATE_FORMAT, TIME_FORMAT};
use crate::db::DatabaseError;
use crate::models::enums::AppointmentStatus;
use crate::models::{Appointment, AppointmentWithContact};

/// Ownership predicate applied to every scoped read and write.
///
/// Scoped queries filter by id and owner in the same statement, so a row
/// that exists but belongs to someone else is indistinguishable from a
/// missing one.
#[derive(Debug, Clone, Copy)]
pub enum AppointmentScope<'a> {
    /// Rows booked by this patient.
    Patient(&'a Uuid),
    /// Rows assigned to a doctor record linked to this user. Rows whose
    /// doctor record was deleted fall back to the name snapshot.
    Doctor { user_id: &'a Uuid, name: &'a str },
    /// Every row (admin).
    Any,
}

impl AppointmentScope<'_> {
    /// SQL fragment over unqualified appointment columns, plus its bound values.
    fn clause(&self) -> (&'static str, Vec<String>) {
        match self {
            AppointmentScope::Patient(patient_id) => {
                ("patient_id = ?", vec![patient_id.to_string()])
            }
            AppointmentScope::Doctor { user_id, name } => (
                "(doctor_id IN (SELECT id FROM doctors WHERE user_id = ?)
                  OR (doctor_id IS NULL AND doctor_name = ?))",
                vec![user_id.to_string(), name.to_string()],
            ),
            AppointmentScope::Any => ("1 = 1", Vec::new()),
        }
    }
}

const SELECT_WITH_CONTACT: &str =
    "SELECT a.id, a.patient_id, a.patient_name, a.doctor_id, a.doctor_name,
            a.appointment_date, a.appointment_time, a.appointment_type, a.status,
            a.created_at, a.updated_at, u.email
     FROM appointments a
     JOIN users u ON a.patient_id = u.id";

const ORDER_NEWEST_SLOT_FIRST: &str =
    "ORDER BY a.appointment_date DESC, a.appointment_time DESC, a.created_at DESC";

struct AppointmentRow {
    id: String,
    patient_id: String,
    patient_name: String,
    doctor_id: Option<String>,
    doctor_name: String,
    date: String,
    time: String,
    appointment_type: String,
    status: String,
    created_at: String,
    updated_at: String,
    patient_email: String,
}

fn read_appointment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        doctor_id: row.get(3)?,
        doctor_name: row.get(4)?,
        date: row.get(5)?,
        time: row.get(6)?,
        appointment_type: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        patient_email: row.get(11)?,
    })
}

fn appointment_from_row(raw: AppointmentRow) -> Result<AppointmentWithContact, DatabaseError> {
    let date = NaiveDate::parse_from_str(&raw.date, DATE_FORMAT).map_err(|_| {
        DatabaseError::ConstraintViolation(format!("Invalid appointment date: {}", raw.date))
    })?;
    let time = NaiveTime::parse_from_str(&raw.time, TIME_FORMAT).map_err(|_| {
        DatabaseError::ConstraintViolation(format!("Invalid appointment time: {}", raw.time))
    })?;

    Ok(AppointmentWithContact {
        appointment: Appointment {
            id: parse_uuid(&raw.id)?,
            patient_id: parse_uuid(&raw.patient_id)?,
            patient_name: raw.patient_name,
            doctor_id: raw.doctor_id.as_deref().map(parse_uuid).transpose()?,
            doctor_name: raw.doctor_name,
            date,
            time,
            appointment_type: raw.appointment_type,
            status: AppointmentStatus::from_str(&raw.status)?,
            created_at: parse_timestamp(&raw.created_at)?,
            updated_at: parse_timestamp(&raw.updated_at)?,
        },
        patient_email: raw.patient_email,
    })
}

fn query_appointments(
    conn: &Connection,
    sql: &str,
    values: Vec<String>,
) -> Result<Vec<AppointmentWithContact>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), read_appointment_row)?;

    let mut appointments = Vec::new();
    for row in rows {
        appointments.push(appointment_from_row(row?)?);
    }
    Ok(appointments)
}

fn status_placeholders(statuses: &[AppointmentStatus]) -> String {
    vec!["?"; statuses.len()].join(", ")
}

pub fn insert_appointment(conn: &Connection, appt: &Appointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (id, patient_id, patient_name, doctor_id, doctor_name,
         appointment_date, appointment_time, appointment_type, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            appt.id.to_string(),
            appt.patient_id.to_string(),
            appt.patient_name,
            appt.doctor_id.map(|d| d.to_string()),
            appt.doctor_name,
            appt.date.format(DATE_FORMAT).to_string(),
            appt.time.format(TIME_FORMAT).to_string(),
            appt.appointment_type,
            appt.status.as_str(),
            format_timestamp(&appt.created_at),
            format_timestamp(&appt.updated_at),
        ],
    )?;
    Ok(())
}

/// Fetch one appointment visible under `scope`.
pub fn get_appointment_scoped(
    conn: &Connection,
    id: &Uuid,
    scope: AppointmentScope<'_>,
) -> Result<Option<AppointmentWithContact>, DatabaseError> {
    let (clause, scope_values) = scope.clause();
    let sql = format!("{SELECT_WITH_CONTACT} WHERE a.id = ? AND {clause}");

    let mut values = vec![id.to_string()];
    values.extend(scope_values);
    Ok(query_appointments(conn, &sql, values)?.into_iter().next())
}

/// Every appointment visible under `scope`, most recent slot first.
pub fn list_scoped(
    conn: &Connection,
    scope: AppointmentScope<'_>,
) -> Result<Vec<AppointmentWithContact>, DatabaseError> {
    let (clause, values) = scope.clause();
    let sql = format!("{SELECT_WITH_CONTACT} WHERE {clause} {ORDER_NEWEST_SLOT_FIRST}");
    query_appointments(conn, &sql, values)
}

pub fn list_by_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<Appointment>, DatabaseError> {
    Ok(list_scoped(conn, AppointmentScope::Patient(patient_id))?
        .into_iter()
        .map(|row| row.appointment)
        .collect())
}

/// Set `status` on a row visible under `scope` whose current status is one of
/// `allowed_from`. Returns the number of rows changed (0 or 1).
pub fn update_status_scoped(
    conn: &Connection,
    id: &Uuid,
    scope: AppointmentScope<'_>,
    status: AppointmentStatus,
    allowed_from: &[AppointmentStatus],
    now: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    if allowed_from.is_empty() {
        return Ok(0);
    }
    let (clause, scope_values) = scope.clause();
    let sql = format!(
        "UPDATE appointments SET status = ?, updated_at = ?
         WHERE id = ? AND {clause} AND status IN ({})",
        status_placeholders(allowed_from)
    );

    let mut values = vec![
        status.as_str().to_string(),
        format_timestamp(now),
        id.to_string(),
    ];
    values.extend(scope_values);
    values.extend(allowed_from.iter().map(|s| s.as_str().to_string()));

    Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}

/// Rewrite date, time and type on a row visible under `scope` whose status is
/// one of `editable`. Status is left untouched.
#[allow(clippy::too_many_arguments)]
pub fn update_details_scoped(
    conn: &Connection,
    id: &Uuid,
    scope: AppointmentScope<'_>,
    date: &NaiveDate,
    time: &NaiveTime,
    appointment_type: &str,
    editable: &[AppointmentStatus],
    now: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    if editable.is_empty() {
        return Ok(0);
    }
    let (clause, scope_values) = scope.clause();
    let sql = format!(
        "UPDATE appointments
         SET appointment_date = ?, appointment_time = ?, appointment_type = ?, updated_at = ?
         WHERE id = ? AND {clause} AND status IN ({})",
        status_placeholders(editable)
    );

    let mut values = vec![
        date.format(DATE_FORMAT).to_string(),
        time.format(TIME_FORMAT).to_string(),
        appointment_type.to_string(),
        format_timestamp(now),
        id.to_string(),
    ];
    values.extend(scope_values);
    values.extend(editable.iter().map(|s| s.as_str().to_string()));

    Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}

pub fn delete_scoped(
    conn: &Connection,
    id: &Uuid,
    scope: AppointmentScope<'_>,
) -> Result<usize, DatabaseError> {
    let (clause, scope_values) = scope.clause();
    let sql = format!("DELETE FROM appointments WHERE id = ? AND {clause}");

    let mut values = vec![id.to_string()];
    values.extend(scope_values);
    Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}

/// Appointment counts per status. Statuses with no rows are reported as 0.
pub fn count_by_status(
    conn: &Connection,
) -> Result<Vec<(AppointmentStatus, i64)>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM appointments GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

    let mut counts: Vec<(AppointmentStatus, i64)> =
        AppointmentStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for row in rows {
        let (status, count) = row?;
        let status = AppointmentStatus::from_str(&status)?;
        if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == status) {
            entry.1 = count;
        }
    }
    Ok(counts)
}

/// Number of distinct doctors referenced by appointments. Rows detached from
/// a deleted doctor record count by their name snapshot.
pub fn count_distinct_doctors(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(DISTINCT COALESCE(doctor_id, 'name:' || doctor_name)) FROM appointments",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::Doctor;

const DOCTOR_COLUMNS: &str =
    "id, user_id, external_doctor_id, name, specialty, available, created_at";

type DoctorRow = (String, Option<String>, Option<String>, String, String, bool, String);

fn read_doctor_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DoctorRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn doctor_from_row(raw: DoctorRow) -> Result<Doctor, DatabaseError> {
    let (id, user_id, external_doctor_id, name, specialty, available, created_at) = raw;
    Ok(Doctor {
        id: parse_uuid(&id)?,
        user_id: user_id.as_deref().map(parse_uuid).transpose()?,
        external_doctor_id,
        name,
        specialty,
        available,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn query_doctors(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Doctor>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, read_doctor_row)?;

    let mut doctors = Vec::new();
    for row in rows {
        doctors.push(doctor_from_row(row?)?);
    }
    Ok(doctors)
}

pub fn insert_doctor(conn: &Connection, doctor: &Doctor) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO doctors
             (id, user_id, external_doctor_id, name, specialty, available, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            doctor.id.to_string(),
            doctor.user_id.map(|u| u.to_string()),
            doctor.external_doctor_id,
            doctor.name,
            doctor.specialty,
            doctor.available,
            format_timestamp(&doctor.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_doctor(conn: &Connection, id: &Uuid) -> Result<Option<Doctor>, DatabaseError> {
    let raw = conn
        .query_row(
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE id = ?1"),
            params![id.to_string()],
            read_doctor_row,
        )
        .optional()?;
    raw.map(doctor_from_row).transpose()
}

pub fn get_doctor_by_external_id(
    conn: &Connection,
    external_doctor_id: &str,
) -> Result<Option<Doctor>, DatabaseError> {
    let raw = conn
        .query_row(
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE external_doctor_id = ?1"),
            params![external_doctor_id],
            read_doctor_row,
        )
        .optional()?;
    raw.map(doctor_from_row).transpose()
}

/// Directory listing ordered by name. `available_only` hides doctors closed to new bookings.
pub fn list_doctors(conn: &Connection, available_only: bool) -> Result<Vec<Doctor>, DatabaseError> {
    if available_only {
        query_doctors(
            conn,
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE available = 1 ORDER BY name"),
            [],
        )
    } else {
        query_doctors(
            conn,
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors ORDER BY name"),
            [],
        )
    }
}

/// Overwrite the editable directory fields. `user_id` and `created_at` are untouched.
pub fn update_doctor(conn: &Connection, doctor: &Doctor) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE doctors SET external_doctor_id = ?2, name = ?3, specialty = ?4, available = ?5
         WHERE id = ?1",
        params![
            doctor.id.to_string(),
            doctor.external_doctor_id,
            doctor.name,
            doctor.specialty,
            doctor.available,
        ],
    )?;
    Ok(updated > 0)
}

/// Attach a user account to an unlinked directory entry. Returns `false`
/// when the entry is missing or already linked.
pub fn link_doctor_user(
    conn: &Connection,
    doctor_id: &Uuid,
    user_id: &Uuid,
    name: &str,
    specialty: &str,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE doctors SET user_id = ?2, name = ?3, specialty = ?4
         WHERE id = ?1 AND user_id IS NULL",
        params![doctor_id.to_string(), user_id.to_string(), name, specialty],
    )?;
    Ok(updated > 0)
}

pub fn delete_doctor(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let deleted = conn.execute("DELETE FROM doctors WHERE id = ?1", params![id.to_string()])?;
    Ok(deleted > 0)
}

/// Returns `(total, available)`.
pub fn count_doctors(conn: &Connection) -> Result<(i64, i64), DatabaseError> {
    let counts = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(available), 0) FROM doctors",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_user;
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::Role;
    use crate::models::User;

    fn make_doctor(external: Option<&str>, name: &str, available: bool) -> Doctor {
        Doctor {
            id: Uuid::new_v4(),
            user_id: None,
            external_doctor_id: external.map(|s| s.to_string()),
            name: name.into(),
            specialty: "Neurology".into(),
            available,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn available_filter_hides_unavailable() {
        let conn = open_memory_database().unwrap();
        let all = list_doctors(&conn, false).unwrap();
        let available = list_doctors(&conn, true).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(available.len(), 3);
        assert!(available.iter().all(|d| d.available));
        assert!(all.iter().any(|d| d.name == "Dr. Brown" && !d.available));
    }

    #[test]
    fn external_id_lookup_and_uniqueness() {
        let conn = open_memory_database().unwrap();
        let found = get_doctor_by_external_id(&conn, "DOC002").unwrap().unwrap();
        assert_eq!(found.name, "Dr. Lee");

        let clone = make_doctor(Some("DOC002"), "Dr. Clone", true);
        let err = insert_doctor(&conn, &clone).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn doctors_without_external_id_do_not_collide() {
        let conn = open_memory_database().unwrap();
        insert_doctor(&conn, &make_doctor(None, "Dr. A", true)).unwrap();
        insert_doctor(&conn, &make_doctor(None, "Dr. B", true)).unwrap();
        assert_eq!(count_doctors(&conn).unwrap(), (6, 5));
    }

    #[test]
    fn link_only_once() {
        let conn = open_memory_database().unwrap();
        let user = User {
            id: Uuid::new_v4(),
            name: "Dr. Lee".into(),
            email: "lee@example.com".into(),
            password_hash: "hash".into(),
            role: Role::Doctor,
            created_at: chrono::Utc::now().naive_utc(),
        };
        insert_user(&conn, &user).unwrap();
        let doctor = get_doctor_by_external_id(&conn, "DOC002").unwrap().unwrap();

        assert!(link_doctor_user(&conn, &doctor.id, &user.id, "Dr. Lee", "Cardiology").unwrap());
        assert!(!link_doctor_user(&conn, &doctor.id, &user.id, "Dr. Lee", "Cardiology").unwrap());
        assert_eq!(get_doctor(&conn, &doctor.id).unwrap().unwrap().user_id, Some(user.id));
    }

    #[test]
    fn update_and_delete() {
        let conn = open_memory_database().unwrap();
        let mut doctor = make_doctor(Some("DOC050"), "Dr. Old", true);
        insert_doctor(&conn, &doctor).unwrap();

        doctor.name = "Dr. New".into();
        doctor.available = false;
        assert!(update_doctor(&conn, &doctor).unwrap());
        let stored = get_doctor(&conn, &doctor.id).unwrap().unwrap();
        assert_eq!(stored.name, "Dr. New");
        assert!(!stored.available);

        assert!(delete_doctor(&conn, &doctor.id).unwrap());
        assert!(!delete_doctor(&conn, &doctor.id).unwrap());
    }
}

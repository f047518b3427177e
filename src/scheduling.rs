//! Appointment lifecycle: booking, status transitions, edits and deletion.
//!
//! Every write is a single conditional statement whose WHERE clause carries
//! both the ownership predicate and, for transitions, the set of statuses the
//! target may be entered from. When nothing matches, a scoped re-read tells
//! "not visible to you" (`NotFound`) apart from "visible but not allowed now"
//! (`Conflict`). A broadcast follows every committed change.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::repository::{self, AppointmentScope, DATE_FORMAT};
use crate::db::DatabaseError;
use crate::error::ServiceError;
use crate::identity::Identity;
use crate::models::enums::{AppointmentStatus, Role};
use crate::models::{Appointment, AppointmentWithContact};
use crate::notifier::ChangeNotifier;

/// Statuses in which date, time and type may still be edited.
const EDITABLE: [AppointmentStatus; 2] = [AppointmentStatus::Pending, AppointmentStatus::Confirmed];

// ─── Types ────────────────────────────────────────────────────────────────────

/// Booking request. Patient fields are never read from the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAppointment {
    #[serde(default, alias = "doctorId")]
    pub doctor_id: String,
    /// Display name the client believed it was booking. The directory wins.
    #[serde(default, alias = "doctorName")]
    pub doctor_name: Option<String>,
    #[serde(default, alias = "appointment_date")]
    pub date: String,
    #[serde(default, alias = "appointment_time")]
    pub time: String,
    #[serde(default, alias = "type")]
    pub appointment_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentDetails {
    #[serde(default, alias = "appointment_date")]
    pub date: String,
    #[serde(default, alias = "appointment_time")]
    pub time: String,
    #[serde(default, alias = "type")]
    pub appointment_type: String,
}

// ─── Field parsing ────────────────────────────────────────────────────────────

fn required<'s>(field: &str, value: &'s str) -> Result<&'s str, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ServiceError::validation(field, "is required"))
    } else {
        Ok(trimmed)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, ServiceError> {
    let raw = required("date", value)?;
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| ServiceError::validation("date", "expected YYYY-MM-DD"))
}

/// Accepts `HH:MM` or `HH:MM:SS`; seconds are dropped.
fn parse_time(value: &str) -> Result<NaiveTime, ServiceError> {
    let raw = required("time", value)?;
    let parsed = NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ServiceError::validation("time", "expected HH:MM"))?;
    parsed
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| ServiceError::validation("time", "expected HH:MM"))
}

/// Case-insensitive parse of the four lifecycle statuses.
pub fn parse_status(value: &str) -> Result<AppointmentStatus, ServiceError> {
    let raw = value.trim().to_ascii_lowercase();
    AppointmentStatus::from_str(&raw).map_err(|_| {
        ServiceError::validation(
            "status",
            format!("must be one of pending, confirmed, completed, cancelled (got {value:?})"),
        )
    })
}

fn slot_taken(err: DatabaseError) -> ServiceError {
    if err.is_unique_violation() {
        ServiceError::Conflict("Doctor already has an appointment at that date and time".into())
    } else {
        err.into()
    }
}

fn appointment_not_found(id: &Uuid) -> ServiceError {
    ServiceError::NotFound(format!("appointment {id}"))
}

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

// ─── Service ──────────────────────────────────────────────────────────────────

pub struct SchedulingService<'a> {
    conn: &'a Connection,
    notifier: &'a ChangeNotifier,
}

impl<'a> SchedulingService<'a> {
    pub fn new(conn: &'a Connection, notifier: &'a ChangeNotifier) -> Self {
        Self { conn, notifier }
    }

    /// Rows the caller may read and transition.
    fn scope_for(identity: &Identity) -> AppointmentScope<'_> {
        match identity.role {
            Role::Patient => AppointmentScope::Patient(&identity.id),
            Role::Doctor => AppointmentScope::Doctor {
                user_id: &identity.id,
                name: &identity.name,
            },
            Role::Admin => AppointmentScope::Any,
        }
    }

    pub fn create_appointment(
        &self,
        identity: &Identity,
        input: NewAppointment,
    ) -> Result<Appointment, ServiceError> {
        identity.require_role(Role::Patient)?;

        let doctor_id = Uuid::parse_str(required("doctor_id", &input.doctor_id)?)
            .map_err(|_| ServiceError::validation("doctor_id", "is not a valid doctor id"))?;
        let date = parse_date(&input.date)?;
        let time = parse_time(&input.time)?;
        let appointment_type = required("appointment_type", &input.appointment_type)?.to_string();

        let doctor = repository::get_doctor(self.conn, &doctor_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("doctor {doctor_id}")))?;
        if !doctor.available {
            return Err(ServiceError::validation(
                "doctor_id",
                format!("{} is not accepting new appointments", doctor.name),
            ));
        }
        if let Some(claimed) = input.doctor_name.as_deref().map(str::trim) {
            if !claimed.is_empty() && claimed != doctor.name {
                tracing::debug!(
                    doctor_id = %doctor.id,
                    claimed,
                    "Client doctor name differs from directory, using directory"
                );
            }
        }

        let ts = now();
        let appt = Appointment {
            id: Uuid::new_v4(),
            patient_id: identity.id,
            patient_name: identity.name.clone(),
            doctor_id: Some(doctor.id),
            doctor_name: doctor.name,
            date,
            time,
            appointment_type,
            status: AppointmentStatus::Pending,
            created_at: ts,
            updated_at: ts,
        };
        repository::insert_appointment(self.conn, &appt).map_err(slot_taken)?;

        tracing::info!(
            appointment_id = %appt.id,
            patient_id = %appt.patient_id,
            doctor_id = %doctor.id,
            "Appointment booked"
        );
        self.notifier.appointments_changed();
        Ok(appt)
    }

    /// The caller's own bookings, most recent slot first.
    pub fn list_for_patient(&self, identity: &Identity) -> Result<Vec<Appointment>, ServiceError> {
        Ok(repository::list_by_patient(self.conn, &identity.id)?)
    }

    pub fn list_for_doctor(
        &self,
        identity: &Identity,
    ) -> Result<Vec<AppointmentWithContact>, ServiceError> {
        identity.require_role(Role::Doctor)?;
        Ok(repository::list_scoped(self.conn, Self::scope_for(identity))?)
    }

    pub fn list_all(
        &self,
        identity: &Identity,
    ) -> Result<Vec<AppointmentWithContact>, ServiceError> {
        identity.require_role(Role::Admin)?;
        Ok(repository::list_scoped(self.conn, AppointmentScope::Any)?)
    }

    pub fn get_appointment(
        &self,
        identity: &Identity,
        id: &Uuid,
    ) -> Result<AppointmentWithContact, ServiceError> {
        repository::get_appointment_scoped(self.conn, id, Self::scope_for(identity))?
            .ok_or_else(|| appointment_not_found(id))
    }

    /// Move an appointment along the lifecycle graph. Re-asserting the current
    /// status succeeds and refreshes `updated_at`.
    pub fn update_status(
        &self,
        identity: &Identity,
        id: &Uuid,
        raw_status: &str,
    ) -> Result<Appointment, ServiceError> {
        let status = parse_status(raw_status)?;
        let scope = Self::scope_for(identity);

        let changed = repository::update_status_scoped(
            self.conn,
            id,
            scope,
            status,
            &status.predecessors(),
            &now(),
        )
        .map_err(slot_taken)?;

        if changed == 0 {
            return match repository::get_appointment_scoped(self.conn, id, scope)? {
                None => Err(appointment_not_found(id)),
                Some(current) => {
                    let from = current.appointment.status;
                    tracing::warn!(
                        appointment_id = %id,
                        role = ?identity.role,
                        from = %from,
                        to = %status,
                        terminal = from.is_terminal(),
                        "Rejected status transition"
                    );
                    Err(ServiceError::Conflict(format!(
                        "invalid status transition from {from} to {status}"
                    )))
                }
            };
        }

        let updated = repository::get_appointment_scoped(self.conn, id, scope)?
            .ok_or_else(|| appointment_not_found(id))?;
        tracing::info!(
            appointment_id = %id,
            role = ?identity.role,
            status = %status,
            "Appointment status updated"
        );
        self.notifier.appointments_changed();
        Ok(updated.appointment)
    }

    /// Reschedule or retype an appointment. Patients edit their own rows,
    /// admins any row. Status is never touched.
    pub fn update_details(
        &self,
        identity: &Identity,
        id: &Uuid,
        details: AppointmentDetails,
    ) -> Result<Appointment, ServiceError> {
        let scope = match identity.role {
            Role::Patient => AppointmentScope::Patient(&identity.id),
            Role::Admin => AppointmentScope::Any,
            Role::Doctor => {
                return Err(ServiceError::Forbidden(
                    "doctors cannot edit appointment details".into(),
                ))
            }
        };

        let date = parse_date(&details.date)?;
        let time = parse_time(&details.time)?;
        let appointment_type = required("appointment_type", &details.appointment_type)?;

        let changed = repository::update_details_scoped(
            self.conn,
            id,
            scope,
            &date,
            &time,
            appointment_type,
            &EDITABLE,
            &now(),
        )
        .map_err(slot_taken)?;

        if changed == 0 {
            return match repository::get_appointment_scoped(self.conn, id, scope)? {
                None => Err(appointment_not_found(id)),
                Some(current) => Err(ServiceError::Conflict(format!(
                    "appointment is {} and can no longer be edited",
                    current.appointment.status
                ))),
            };
        }

        let updated = repository::get_appointment_scoped(self.conn, id, scope)?
            .ok_or_else(|| appointment_not_found(id))?;
        tracing::info!(appointment_id = %id, role = ?identity.role, "Appointment details updated");
        self.notifier.appointments_changed();
        Ok(updated.appointment)
    }

    /// Hard delete of one of the caller's own bookings.
    pub fn delete_appointment(&self, identity: &Identity, id: &Uuid) -> Result<(), ServiceError> {
        let deleted =
            repository::delete_scoped(self.conn, id, AppointmentScope::Patient(&identity.id))?;
        if deleted == 0 {
            return Err(appointment_not_found(id));
        }

        tracing::info!(appointment_id = %id, patient_id = %identity.id, "Appointment deleted");
        self.notifier.appointments_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::notifier::WsOutgoing;
    use crate::test_support::{seed_linked_doctor, seed_user, seeded_doctor};
    use tokio::sync::mpsc;

    struct Fixture {
        conn: Connection,
        notifier: ChangeNotifier,
        rx: mpsc::Receiver<WsOutgoing>,
    }

    impl Fixture {
        fn new() -> Self {
            let notifier = ChangeNotifier::new();
            let (tx, rx) = mpsc::channel(64);
            notifier.register("observer", Uuid::new_v4(), Role::Admin, tx);
            Self {
                conn: open_memory_database().unwrap(),
                notifier,
                rx,
            }
        }

        fn service(&self) -> SchedulingService<'_> {
            SchedulingService::new(&self.conn, &self.notifier)
        }

        fn broadcasts(&mut self) -> usize {
            let mut n = 0;
            while let Ok(msg) = self.rx.try_recv() {
                assert_eq!(msg, WsOutgoing::AppointmentsUpdate {});
                n += 1;
            }
            n
        }
    }

    fn booking(doctor_id: &Uuid, date: &str, time: &str) -> NewAppointment {
        NewAppointment {
            doctor_id: doctor_id.to_string(),
            doctor_name: None,
            date: date.into(),
            time: time.into(),
            appointment_type: "General Checkup".into(),
        }
    }

    fn details(date: &str, time: &str, kind: &str) -> AppointmentDetails {
        AppointmentDetails {
            date: date.into(),
            time: time.into(),
            appointment_type: kind.into(),
        }
    }

    #[test]
    fn booking_is_pending_and_owned_by_caller() {
        let mut fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");

        let body = serde_json::json!({
            "doctor_id": doctor.id.to_string(),
            "patient_id": Uuid::new_v4().to_string(),
            "patient_name": "Mallory",
            "doctor_name": "Dr. Someone Else",
            "appointment_date": "2025-06-25",
            "appointment_time": "10:00",
            "type": "General Checkup"
        });
        let input: NewAppointment = serde_json::from_value(body).unwrap();
        let appt = fx.service().create_appointment(&patient, input).unwrap();

        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.patient_id, patient.id);
        assert_eq!(appt.patient_name, "Pat");
        assert_eq!(appt.doctor_name, "Dr. Johnson");
        assert_eq!(appt.date.to_string(), "2025-06-25");
        assert_eq!(appt.time.format("%H:%M").to_string(), "10:00");
        assert_eq!(fx.broadcasts(), 1);
    }

    #[test]
    fn booking_then_listing_includes_it_once() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC002");

        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        let listed = fx.service().list_for_patient(&patient).unwrap();
        assert_eq!(listed.iter().filter(|a| a.id == appt.id).count(), 1);
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn booking_requires_patient_role() {
        let mut fx = Fixture::new();
        let (doc, doctor) = seed_linked_doctor(&fx.conn, "DOC001", "johnson@example.com");
        let err = fx
            .service()
            .create_appointment(&doc, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        assert_eq!(fx.broadcasts(), 0);
    }

    #[test]
    fn booking_validates_fields() {
        let mut fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let svc = fx.service();

        let valid = || booking(&doctor.id, "2025-06-25", "10:00");
        let cases = [
            (NewAppointment { doctor_id: String::new(), ..valid() }, "doctor_id"),
            (NewAppointment { doctor_id: "DOC001".into(), ..valid() }, "doctor_id"),
            (booking(&doctor.id, "", "10:00"), "date"),
            (booking(&doctor.id, "25/06/2025", "10:00"), "date"),
            (booking(&doctor.id, "2025-06-25", "  "), "time"),
            (booking(&doctor.id, "2025-06-25", "ten"), "time"),
            (NewAppointment { appointment_type: " ".into(), ..valid() }, "appointment_type"),
        ];
        for (input, expected_field) in cases {
            match svc.create_appointment(&patient, input) {
                Err(ServiceError::Validation { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected validation on {expected_field}, got {other:?}"),
            }
        }
        assert_eq!(fx.broadcasts(), 0);
    }

    #[test]
    fn booking_unknown_doctor_is_not_found() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let err = fx
            .service()
            .create_appointment(&patient, booking(&Uuid::new_v4(), "2025-06-25", "10:00"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn booking_unavailable_doctor_is_rejected() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let brown = seeded_doctor(&fx.conn, "DOC003");
        let err = fx
            .service()
            .create_appointment(&patient, booking(&brown.id, "2025-06-25", "10:00"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { ref field, .. } if field == "doctor_id"));
    }

    #[test]
    fn double_booking_conflicts_until_cancelled() {
        let fx = Fixture::new();
        let first = seed_user(&fx.conn, "First", "first@example.com", Role::Patient);
        let second = seed_user(&fx.conn, "Second", "second@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let svc = fx.service();

        let appt = svc
            .create_appointment(&first, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        let err = svc
            .create_appointment(&second, booking(&doctor.id, "2025-06-25", "10:00:00"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        svc.update_status(&first, &appt.id, "cancelled").unwrap();
        svc.create_appointment(&second, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
    }

    #[test]
    fn other_patient_gets_not_found_on_status_update() {
        let mut fx = Fixture::new();
        let owner = seed_user(&fx.conn, "Owner", "owner@example.com", Role::Patient);
        let intruder = seed_user(&fx.conn, "Intruder", "intruder@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let appt = fx
            .service()
            .create_appointment(&owner, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        fx.broadcasts();

        let err = fx
            .service()
            .update_status(&intruder, &appt.id, "cancelled")
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        // Same outcome as for an id that does not exist at all
        let missing = fx
            .service()
            .update_status(&intruder, &Uuid::new_v4(), "cancelled")
            .unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
        assert_eq!(fx.broadcasts(), 0);

        let stored = fx.service().get_appointment(&owner, &appt.id).unwrap();
        assert_eq!(stored.appointment.status, AppointmentStatus::Pending);
    }

    #[test]
    fn invalid_status_is_validation_and_no_mutation() {
        let mut fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        fx.broadcasts();

        for bad in ["rescheduled", "", "done", "pending!"] {
            let err = fx.service().update_status(&patient, &appt.id, bad).unwrap_err();
            assert!(matches!(err, ServiceError::Validation { ref field, .. } if field == "status"));
        }
        let stored = fx.service().get_appointment(&patient, &appt.id).unwrap();
        assert_eq!(stored.appointment, appt);
        assert_eq!(fx.broadcasts(), 0);
    }

    #[test]
    fn status_parse_ignores_case_and_whitespace() {
        assert_eq!(parse_status(" Confirmed ").unwrap(), AppointmentStatus::Confirmed);
        assert_eq!(parse_status("CANCELLED").unwrap(), AppointmentStatus::Cancelled);
    }

    #[test]
    fn confirming_twice_advances_updated_at_only() {
        let mut fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let (doc, doctor) = seed_linked_doctor(&fx.conn, "DOC002", "lee@example.com");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();

        let first = fx.service().update_status(&doc, &appt.id, "confirmed").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = fx.service().update_status(&doc, &appt.id, "confirmed").unwrap();

        assert_eq!(second.status, AppointmentStatus::Confirmed);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(fx.broadcasts(), 3);
    }

    #[test]
    fn terminal_status_cannot_move() {
        let mut fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let (doc, doctor) = seed_linked_doctor(&fx.conn, "DOC002", "lee@example.com");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        fx.service().update_status(&doc, &appt.id, "confirmed").unwrap();
        let done = fx.service().update_status(&doc, &appt.id, "completed").unwrap();
        fx.broadcasts();

        for next in ["pending", "confirmed", "cancelled"] {
            let err = fx.service().update_status(&doc, &appt.id, next).unwrap_err();
            assert!(matches!(err, ServiceError::Conflict(_)), "{next}");
        }
        let stored = fx.service().get_appointment(&doc, &appt.id).unwrap();
        assert_eq!(stored.appointment, done);
        assert_eq!(fx.broadcasts(), 0);
    }

    #[test]
    fn pending_cannot_skip_to_completed() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        let err = fx.service().update_status(&patient, &appt.id, "completed").unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn scenario_patient_books_general_checkup() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");

        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.doctor_name, doctor.name);
        assert_eq!(appt.appointment_type, "General Checkup");
    }

    #[test]
    fn scenario_only_assigned_doctor_can_confirm() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let (lee, lee_record) = seed_linked_doctor(&fx.conn, "DOC002", "lee@example.com");
        let (davis, _) = seed_linked_doctor(&fx.conn, "DOC004", "davis@example.com");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&lee_record.id, "2025-06-25", "10:00"))
            .unwrap();

        let err = fx.service().update_status(&davis, &appt.id, "confirmed").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let confirmed = fx.service().update_status(&lee, &appt.id, "confirmed").unwrap();
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

        let lee_view = fx.service().list_for_doctor(&lee).unwrap();
        assert_eq!(lee_view.len(), 1);
        assert_eq!(lee_view[0].patient_email, "pat@example.com");
        assert!(fx.service().list_for_doctor(&davis).unwrap().is_empty());
    }

    #[test]
    fn scenario_doctor_deletion_keeps_history() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC004");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();

        assert!(repository::delete_doctor(&fx.conn, &doctor.id).unwrap());

        let listed = fx.service().list_for_patient(&patient).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, appt.id);
        assert_eq!(listed[0].doctor_name, "Dr. Davis");
        assert_eq!(listed[0].doctor_id, None);
    }

    #[test]
    fn scenario_concurrent_confirm_and_cancel_last_valid_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");
        let conn = crate::db::sqlite::open_database(&path).unwrap();
        let notifier = ChangeNotifier::new();
        let patient = seed_user(&conn, "Pat", "pat@example.com", Role::Patient);
        let (doc, doctor) = seed_linked_doctor(&conn, "DOC002", "lee@example.com");
        let appt = SchedulingService::new(&conn, &notifier)
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        let appt_id = appt.id;

        let results: Vec<Result<Appointment, ServiceError>> = std::thread::scope(|s| {
            let handles: Vec<_> = [(doc.clone(), "confirmed"), (patient.clone(), "cancelled")]
                .into_iter()
                .map(|(who, status)| {
                    let path = &path;
                    let notifier = &notifier;
                    s.spawn(move || {
                        let conn = crate::db::sqlite::open_database(path).unwrap();
                        SchedulingService::new(&conn, notifier)
                            .update_status(&who, &appt_id, status)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Cancel always lands (legal from pending and confirmed); confirm may
        // be refused if it arrives after the cancel.
        assert!(results[1].is_ok());
        if let Err(err) = &results[0] {
            assert!(matches!(err, ServiceError::Conflict(_)));
        }
        let stored = SchedulingService::new(&conn, &notifier)
            .get_appointment(&patient, &appt.id)
            .unwrap();
        assert_eq!(stored.appointment.status, AppointmentStatus::Cancelled);
    }

    #[test]
    fn admin_can_transition_any_row() {
        let fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let admin = seed_user(&fx.conn, "Admin", "admin@example.com", Role::Admin);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();

        let updated = fx.service().update_status(&admin, &appt.id, "confirmed").unwrap();
        assert_eq!(updated.status, AppointmentStatus::Confirmed);
        assert_eq!(fx.service().list_all(&admin).unwrap().len(), 1);
        assert!(matches!(
            fx.service().list_all(&patient),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn details_edit_keeps_status_and_owner() {
        let mut fx = Fixture::new();
        let patient = seed_user(&fx.conn, "Pat", "pat@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let appt = fx
            .service()
            .create_appointment(&patient, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        fx.broadcasts();

        let updated = fx
            .service()
            .update_details(&patient, &appt.id, details("2025-07-02", "15:30", "Follow-up"))
            .unwrap();
        assert_eq!(updated.date.to_string(), "2025-07-02");
        assert_eq!(updated.appointment_type, "Follow-up");
        assert_eq!(updated.status, AppointmentStatus::Pending);
        assert_eq!(updated.patient_id, patient.id);
        assert_eq!(fx.broadcasts(), 1);
    }

    #[test]
    fn details_edit_rules() {
        let fx = Fixture::new();
        let owner = seed_user(&fx.conn, "Owner", "owner@example.com", Role::Patient);
        let other = seed_user(&fx.conn, "Other", "other@example.com", Role::Patient);
        let (doc, doctor) = seed_linked_doctor(&fx.conn, "DOC002", "lee@example.com");
        let svc = fx.service();
        let appt = svc
            .create_appointment(&owner, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        let new_details = || details("2025-07-02", "15:30", "Follow-up");

        assert!(matches!(
            svc.update_details(&other, &appt.id, new_details()),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            svc.update_details(&doc, &appt.id, new_details()),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            svc.update_details(&owner, &appt.id, details("", "15:30", "x")),
            Err(ServiceError::Validation { .. })
        ));

        svc.update_status(&owner, &appt.id, "cancelled").unwrap();
        assert!(matches!(
            svc.update_details(&owner, &appt.id, new_details()),
            Err(ServiceError::Conflict(_))
        ));
    }

    #[test]
    fn details_edit_into_taken_slot_conflicts() {
        let fx = Fixture::new();
        let a = seed_user(&fx.conn, "A", "a@example.com", Role::Patient);
        let b = seed_user(&fx.conn, "B", "b@example.com", Role::Patient);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let svc = fx.service();
        svc.create_appointment(&a, booking(&doctor.id, "2025-06-25", "10:00")).unwrap();
        let mine = svc.create_appointment(&b, booking(&doctor.id, "2025-06-25", "11:00")).unwrap();

        let err = svc
            .update_details(&b, &mine.id, details("2025-06-25", "10:00", "General Checkup"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn delete_by_non_owner_is_not_found_and_row_survives() {
        let mut fx = Fixture::new();
        let owner = seed_user(&fx.conn, "Owner", "owner@example.com", Role::Patient);
        let other = seed_user(&fx.conn, "Other", "other@example.com", Role::Patient);
        let admin = seed_user(&fx.conn, "Admin", "admin@example.com", Role::Admin);
        let doctor = seeded_doctor(&fx.conn, "DOC001");
        let appt = fx
            .service()
            .create_appointment(&owner, booking(&doctor.id, "2025-06-25", "10:00"))
            .unwrap();
        fx.broadcasts();

        for caller in [&other, &admin] {
            assert!(matches!(
                fx.service().delete_appointment(caller, &appt.id),
                Err(ServiceError::NotFound(_))
            ));
        }
        assert_eq!(fx.broadcasts(), 0);
        assert!(fx.service().get_appointment(&owner, &appt.id).is_ok());

        fx.service().delete_appointment(&owner, &appt.id).unwrap();
        assert_eq!(fx.broadcasts(), 1);
        assert!(fx.service().list_for_patient(&owner).unwrap().is_empty());
    }

    #[test]
    fn get_appointment_is_scoped() {
        let fx = Fixture::new();
        let owner = seed_user(&fx.conn, "Owner", "owner@example.com", Role::Patient);
        let other = seed_user(&fx.conn, "Other", "other@example.com", Role::Patient);
        let (lee, lee_record) = seed_linked_doctor(&fx.conn, "DOC002", "lee@example.com");
        let (davis, _) = seed_linked_doctor(&fx.conn, "DOC004", "davis@example.com");
        let admin = seed_user(&fx.conn, "Admin", "admin@example.com", Role::Admin);
        let appt = fx
            .service()
            .create_appointment(&owner, booking(&lee_record.id, "2025-06-25", "10:00"))
            .unwrap();

        for allowed in [&owner, &lee, &admin] {
            assert!(fx.service().get_appointment(allowed, &appt.id).is_ok());
        }
        for denied in [&other, &davis] {
            assert!(matches!(
                fx.service().get_appointment(denied, &appt.id),
                Err(ServiceError::NotFound(_))
            ));
        }
    }
}

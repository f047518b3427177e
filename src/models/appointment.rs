use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AppointmentStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    /// Cleared when the doctor record is deleted; `doctor_name` survives.
    pub doctor_id: Option<Uuid>,
    pub doctor_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub appointment_type: String,
    pub status: AppointmentStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Appointment joined with the owning patient's email, for doctor and admin views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentWithContact {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient_email: String,
}

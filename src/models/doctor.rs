use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directory entry for a bookable doctor. `user_id` is set once the doctor
/// registers an account; seeded entries start unlinked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub external_doctor_id: Option<String>,
    pub name: String,
    pub specialty: String,
    pub available: bool,
    pub created_at: NaiveDateTime,
}

//! Fixtures shared by unit tests across modules.

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository::{get_doctor_by_external_id, insert_user, link_doctor_user};
use crate::identity::Identity;
use crate::models::enums::Role;
use crate::models::{Doctor, User};

/// Insert a user row directly and return its identity.
pub fn seed_user(conn: &Connection, name: &str, email: &str, role: Role) -> Identity {
    let user = User {
        id: Uuid::new_v4(),
        name: name.into(),
        email: email.into(),
        password_hash: "unused".into(),
        role,
        created_at: chrono::Utc::now().naive_utc(),
    };
    insert_user(conn, &user).unwrap();
    Identity::from(&user)
}

/// Seeded directory entry by external id (`DOC001`..`DOC004`).
pub fn seeded_doctor(conn: &Connection, external_id: &str) -> Doctor {
    get_doctor_by_external_id(conn, external_id).unwrap().unwrap()
}

/// Create a doctor account and link it to a seeded directory entry.
pub fn seed_linked_doctor(conn: &Connection, external_id: &str, email: &str) -> (Identity, Doctor) {
    let doctor = seeded_doctor(conn, external_id);
    let identity = seed_user(conn, &doctor.name, email, Role::Doctor);
    let linked =
        link_doctor_user(conn, &doctor.id, &identity.id, &doctor.name, &doctor.specialty).unwrap();
    assert!(linked);
    (identity, doctor)
}

/// Initialized core state over a database file in a fresh temp directory.
/// Keep the returned guard alive for the duration of the test.
pub fn test_core() -> (std::sync::Arc<crate::core_state::CoreState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let settings = crate::config::Settings::for_tests(&dir.path().join("test.db"));
    let core = crate::core_state::CoreState::new(settings);
    core.initialize().unwrap();
    (std::sync::Arc::new(core), dir)
}

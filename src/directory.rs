//! Doctor directory, account registration and admin user management.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AdminBootstrap;
use crate::crypto::{hash_password, verify_password};
use crate::db::repository;
use crate::db::DatabaseError;
use crate::error::ServiceError;
use crate::identity::Identity;
use crate::models::enums::{AppointmentStatus, Role};
use crate::models::{Doctor, User};
use crate::notifier::ChangeNotifier;

pub const MIN_PASSWORD_LENGTH: usize = 8;

// ─── Types ────────────────────────────────────────────────────────────────────

fn default_available() -> bool {
    true
}

/// Admin-editable doctor fields.
#[derive(Debug, Clone, Deserialize)]
pub struct DoctorFields {
    #[serde(default, alias = "doctorId")]
    pub external_doctor_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub specialty: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterDoctor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "doctorId")]
    pub external_doctor_id: String,
    /// Keeps the directory's specialty when blank.
    #[serde(default)]
    pub specialty: String,
}

/// Admin dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    pub total_users: i64,
    pub patients: i64,
    pub doctor_accounts: i64,
    pub admins: i64,
    pub doctors: i64,
    pub available_doctors: i64,
    pub total_appointments: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub completed: i64,
    pub cancelled: i64,
    /// Distinct doctors referenced by at least one appointment.
    pub doctors_with_appointments: i64,
}

// ─── Validation ───────────────────────────────────────────────────────────────

fn required(field: &str, value: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ServiceError::validation(field, "is required"))
    } else {
        Ok(trimmed.to_string())
    }
}

fn validate_email(value: &str) -> Result<String, ServiceError> {
    let email = required("email", value)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ServiceError::validation("email", "is not a valid email address")),
    }
}

fn validate_password(value: &str) -> Result<(), ServiceError> {
    if value.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ServiceError::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }
    Ok(())
}

fn email_taken(err: DatabaseError) -> ServiceError {
    if err.is_unique_violation() {
        ServiceError::Conflict("Email already registered".into())
    } else {
        err.into()
    }
}

fn doctor_id_taken(err: DatabaseError) -> ServiceError {
    if err.is_unique_violation() {
        ServiceError::Conflict("Doctor ID already exists".into())
    } else {
        err.into()
    }
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

// ─── Service ──────────────────────────────────────────────────────────────────

pub struct DirectoryService<'a> {
    conn: &'a Connection,
    notifier: &'a ChangeNotifier,
    password_iterations: u32,
}

impl<'a> DirectoryService<'a> {
    pub fn new(
        conn: &'a Connection,
        notifier: &'a ChangeNotifier,
        password_iterations: u32,
    ) -> Self {
        Self {
            conn,
            notifier,
            password_iterations,
        }
    }

    fn new_user(&self, name: String, email: String, password: &str, role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash: hash_password(password, self.password_iterations),
            role,
            created_at: now(),
        }
    }

    // ── Doctors ─────────────────────────────────────────────

    /// Doctors open for booking. Public.
    pub fn list_available_doctors(&self) -> Result<Vec<Doctor>, ServiceError> {
        Ok(repository::list_doctors(self.conn, true)?)
    }

    pub fn list_doctors(&self, identity: &Identity) -> Result<Vec<Doctor>, ServiceError> {
        identity.require_role(Role::Admin)?;
        Ok(repository::list_doctors(self.conn, false)?)
    }

    /// Create (`id == None`) or overwrite a directory entry.
    pub fn upsert_doctor(
        &self,
        identity: &Identity,
        id: Option<&Uuid>,
        fields: DoctorFields,
    ) -> Result<Doctor, ServiceError> {
        identity.require_role(Role::Admin)?;

        let name = required("name", &fields.name)?;
        let specialty = required("specialty", &fields.specialty)?;
        let external_doctor_id = fields
            .external_doctor_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let doctor = match id {
            None => {
                let doctor = Doctor {
                    id: Uuid::new_v4(),
                    user_id: None,
                    external_doctor_id,
                    name,
                    specialty,
                    available: fields.available,
                    created_at: now(),
                };
                repository::insert_doctor(self.conn, &doctor).map_err(doctor_id_taken)?;
                tracing::info!(doctor_id = %doctor.id, "Doctor added to directory");
                doctor
            }
            Some(id) => {
                let existing = repository::get_doctor(self.conn, id)?
                    .ok_or_else(|| ServiceError::NotFound(format!("doctor {id}")))?;
                let doctor = Doctor {
                    external_doctor_id,
                    name,
                    specialty,
                    available: fields.available,
                    ..existing
                };
                if !repository::update_doctor(self.conn, &doctor).map_err(doctor_id_taken)? {
                    return Err(ServiceError::NotFound(format!("doctor {id}")));
                }
                tracing::info!(
                    doctor_id = %doctor.id,
                    available = doctor.available,
                    "Doctor updated"
                );
                doctor
            }
        };

        self.notifier.appointments_changed();
        Ok(doctor)
    }

    /// Hard delete. Appointments keep their doctor name snapshot.
    pub fn delete_doctor(&self, identity: &Identity, id: &Uuid) -> Result<(), ServiceError> {
        identity.require_role(Role::Admin)?;
        if !repository::delete_doctor(self.conn, id)? {
            return Err(ServiceError::NotFound(format!("doctor {id}")));
        }
        tracing::info!(doctor_id = %id, "Doctor removed from directory");
        self.notifier.appointments_changed();
        Ok(())
    }

    // ── Accounts ────────────────────────────────────────────

    pub fn register_patient(&self, input: RegisterUser) -> Result<User, ServiceError> {
        let name = required("name", &input.name)?;
        let email = validate_email(&input.email)?;
        validate_password(&input.password)?;

        let user = self.new_user(name, email, &input.password, Role::Patient);
        repository::insert_user(self.conn, &user).map_err(email_taken)?;
        tracing::info!(user_id = %user.id, "Patient registered");
        Ok(user)
    }

    /// Create a doctor account and claim the matching unlinked directory entry.
    pub fn register_doctor(&self, input: RegisterDoctor) -> Result<(User, Doctor), ServiceError> {
        let name = required("name", &input.name)?;
        let email = validate_email(&input.email)?;
        validate_password(&input.password)?;
        let external_id = required("external_doctor_id", &input.external_doctor_id)?;

        let tx = self.conn.unchecked_transaction().map_err(DatabaseError::from)?;

        let doctor = repository::get_doctor_by_external_id(&tx, &external_id)?
            .ok_or_else(|| ServiceError::validation("external_doctor_id", "Invalid Doctor ID"))?;
        if doctor.user_id.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Doctor ID {external_id} is already registered"
            )));
        }

        let specialty = match input.specialty.trim() {
            "" => doctor.specialty.clone(),
            given => given.to_string(),
        };
        let user = self.new_user(name, email, &input.password, Role::Doctor);
        repository::insert_user(&tx, &user).map_err(email_taken)?;
        if !repository::link_doctor_user(&tx, &doctor.id, &user.id, &user.name, &specialty)? {
            return Err(ServiceError::Conflict(format!(
                "Doctor ID {external_id} is already registered"
            )));
        }
        tx.commit().map_err(DatabaseError::from)?;

        let linked = Doctor {
            user_id: Some(user.id),
            name: user.name.clone(),
            specialty,
            ..doctor
        };
        tracing::info!(user_id = %user.id, doctor_id = %linked.id, "Doctor registered");
        self.notifier.appointments_changed();
        Ok((user, linked))
    }

    /// Check login credentials. Unknown email and wrong password are
    /// indistinguishable to the caller.
    pub fn authenticate_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        let user = repository::get_user_by_email(self.conn, email.trim())?
            .ok_or(ServiceError::Unauthenticated)?;
        verify_password(password, &user.password_hash).map_err(|_| {
            tracing::warn!(user_id = %user.id, "Failed login attempt");
            ServiceError::Unauthenticated
        })?;
        Ok(user)
    }

    pub fn list_users(&self, identity: &Identity) -> Result<Vec<User>, ServiceError> {
        identity.require_role(Role::Admin)?;
        Ok(repository::list_users(self.conn)?)
    }

    /// Delete an account (admin, or the account holder). The user's
    /// appointments go with it.
    pub fn delete_user(&self, identity: &Identity, id: &Uuid) -> Result<User, ServiceError> {
        if !identity.is_admin() && &identity.id != id {
            return Err(ServiceError::Forbidden(
                "cannot delete another user's account".into(),
            ));
        }
        let user = repository::get_user(self.conn, id)?
            .ok_or_else(|| ServiceError::NotFound(format!("user {id}")))?;
        if !repository::delete_user(self.conn, id)? {
            return Err(ServiceError::NotFound(format!("user {id}")));
        }

        tracing::info!(user_id = %id, by = %identity.id, "User deleted");
        self.notifier.appointments_changed();
        Ok(user)
    }

    pub fn stats(&self, identity: &Identity) -> Result<DirectoryStats, ServiceError> {
        identity.require_role(Role::Admin)?;

        let patients = repository::count_users_by_role(self.conn, Role::Patient)?;
        let doctor_accounts = repository::count_users_by_role(self.conn, Role::Doctor)?;
        let admins = repository::count_users_by_role(self.conn, Role::Admin)?;
        let (doctors, available_doctors) = repository::count_doctors(self.conn)?;

        let mut stats = DirectoryStats {
            total_users: patients + doctor_accounts + admins,
            patients,
            doctor_accounts,
            admins,
            doctors,
            available_doctors,
            doctors_with_appointments: repository::count_distinct_doctors(self.conn)?,
            ..DirectoryStats::default()
        };
        for (status, count) in repository::count_by_status(self.conn)? {
            stats.total_appointments += count;
            match status {
                AppointmentStatus::Pending => stats.pending = count,
                AppointmentStatus::Confirmed => stats.confirmed = count,
                AppointmentStatus::Completed => stats.completed = count,
                AppointmentStatus::Cancelled => stats.cancelled = count,
            }
        }
        Ok(stats)
    }

    /// Create the configured admin account if no user holds that email.
    /// Returns `true` when an account was created.
    pub fn ensure_admin(&self, admin: &AdminBootstrap) -> Result<bool, ServiceError> {
        let email = validate_email(&admin.email)?;
        if let Some(existing) = repository::get_user_by_email(self.conn, &email)? {
            if existing.role != Role::Admin {
                tracing::warn!(
                    user_id = %existing.id,
                    role = %existing.role,
                    "Configured admin email belongs to a non-admin account"
                );
            }
            return Ok(false);
        }

        validate_password(&admin.password)?;
        let name = required("name", &admin.name)?;
        let user = self.new_user(name, email, &admin.password, Role::Admin);
        repository::insert_user(self.conn, &user).map_err(email_taken)?;
        tracing::info!(user_id = %user.id, "Admin account created");
        Ok(true)
    }
}

use thiserror::Error;

use crate::db::DatabaseError;
use crate::identity::AuthError;

/// Failure classification raised by the scheduling and directory services.
/// The transport layer maps each variant to a response without
/// reinterpreting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Session expired")]
    Expired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        if err.is_unique_violation() {
            return ServiceError::Conflict(err.to_string());
        }
        match err {
            DatabaseError::NotFound { entity_type, id } => {
                ServiceError::NotFound(format!("{entity_type} {id}"))
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => ServiceError::Unauthenticated,
            AuthError::Expired => ServiceError::Expired,
        }
    }
}

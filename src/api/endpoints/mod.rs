//! API endpoint handlers.
//!
//! Each module groups the routes of one caller surface. Handlers open a
//! connection per request and delegate to the scheduling and directory
//! services.

pub mod admin;
pub mod appointments;
pub mod auth;
pub mod doctors;
pub mod health;
pub mod users;

use serde::Serialize;

use crate::api::error::ApiError;

/// Plain acknowledgement body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Run password-bound work (PBKDF2 hashing or verification) on the blocking
/// pool so it does not stall other tasks on this runtime worker.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
}

//! Process-wide application state shared by every request handler.
//!
//! Holds configuration, the bearer-token store and the realtime notifier.
//! Database access is per request: each call to [`CoreState::open_db`]
//! opens a fresh connection to the configured file.

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

use crate::config::Settings;
use crate::db;
use crate::directory::DirectoryService;
use crate::error::ServiceError;
use crate::identity::{Authenticator, SessionTokens};
use crate::notifier::ChangeNotifier;
use crate::scheduling::SchedulingService;

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

/// Shared application state, wrapped in `Arc` at startup.
pub struct CoreState {
    pub settings: Settings,
    /// Bearer sessions issued at login and registration.
    pub tokens: SessionTokens,
    /// Live realtime sessions receiving `appointments:update`.
    pub notifier: ChangeNotifier,
}

impl CoreState {
    pub fn new(settings: Settings) -> Self {
        Self {
            tokens: SessionTokens::new(settings.token_ttl),
            notifier: ChangeNotifier::new(),
            settings,
        }
    }

    /// Create the data directory, run migrations and bootstrap the admin
    /// account. Call once before serving.
    pub fn initialize(&self) -> Result<(), CoreError> {
        if let Some(parent) = self.settings.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = self.open_db()?;
        if let Some(admin) = &self.settings.admin {
            let created = self.directory(&conn).ensure_admin(admin)?;
            if created {
                tracing::info!(email = %admin.email, "Bootstrapped admin account");
            }
        }
        tracing::info!(db_path = %self.settings.db_path.display(), "Database ready");
        Ok(())
    }

    /// Open a database connection. Migrations are applied if pending.
    pub fn open_db(&self) -> Result<Connection, CoreError> {
        db::open_database(&self.settings.db_path).map_err(CoreError::Database)
    }

    pub fn db_path(&self) -> &Path {
        &self.settings.db_path
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        &self.tokens
    }

    pub fn scheduling<'a>(&'a self, conn: &'a Connection) -> SchedulingService<'a> {
        SchedulingService::new(conn, &self.notifier)
    }

    pub fn directory<'a>(&'a self, conn: &'a Connection) -> DirectoryService<'a> {
        DirectoryService::new(conn, &self.notifier, self.settings.password_iterations)
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Service(#[from] ServiceError),
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Service(inner) => inner,
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

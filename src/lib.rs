pub mod api;
pub mod config;
pub mod core_state;
pub mod crypto;
pub mod db;
pub mod directory; // Doctors and user accounts
pub mod error;
pub mod identity;
pub mod models;
pub mod notifier; // appointments:update fan-out
pub mod scheduling; // Appointment lifecycle

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Startup failed: {0}")]
    Core(#[from] core_state::CoreError),
    #[error("Server error: {0}")]
    Server(#[from] api::ServerError),
    #[error("Signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

/// Load settings from the environment, prepare the database and serve
/// until Ctrl-C.
pub async fn run() -> Result<(), RunError> {
    init_tracing();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let settings = config::Settings::from_env()?;
    let core = Arc::new(core_state::CoreState::new(settings));
    core.initialize()?;

    let mut server = api::ApiServer::start(core).await?;
    tracing::info!(addr = %server.session.server_addr, "Listening");

    tokio::signal::ctrl_c().await?;
    server.shutdown();
    server.stopped().await;
    Ok(())
}

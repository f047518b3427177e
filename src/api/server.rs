//! API server lifecycle: starts/stops the axum HTTP server.
//!
//! bind → spawn background task → return handle with shutdown channel.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::router::api_router;
use crate::core_state::CoreState;

// ═══════════════════════════════════════════════════════════
// Public types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address {addr:?}: {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Failed to get server address: {0}")]
    LocalAddr(std::io::Error),
}

/// Metadata for a running server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSession {
    pub session_id: String,
    pub server_addr: String,
    pub port: u16,
    pub started_at: String,
}

/// Handle to a running API server.
pub struct ApiServer {
    pub session: ServerSession,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Start on the configured `host:port`.
    pub async fn start(core: Arc<CoreState>) -> Result<Self, ServerError> {
        let raw = core.settings.bind_address();
        let addr: SocketAddr = raw
            .parse()
            .map_err(|source| ServerError::InvalidAddress { addr: raw, source })?;
        Self::start_on(core, addr).await
    }

    /// Start on an explicit address. Port 0 picks an ephemeral port.
    pub async fn start_on(core: Arc<CoreState>, addr: SocketAddr) -> Result<Self, ServerError> {
        // 1. Bind
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        // 2. Build the router (full middleware stack)
        let app = api_router(core);

        // 3. Session metadata
        let session = ServerSession {
            session_id: Uuid::new_v4().to_string(),
            server_addr: addr.to_string(),
            port: addr.port(),
            started_at: chrono::Utc::now().to_rfc3339(),
        };

        // 4. Shutdown signal
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        // 5. Spawn server in background task
        let task = tokio::spawn(async move {
            let shutdown_signal = async move {
                let _ = shutdown_rx.await;
                tracing::info!("API server received shutdown signal");
            };

            tracing::info!(%addr, "API server started");

            // Peer addresses feed the rate limiter.
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(shutdown_signal)
                .await
            {
                tracing::error!("API server error: {e}");
            }

            tracing::info!("API server stopped");
        });

        Ok(Self {
            session,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Shut down the server gracefully.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }

    /// Wait until the serve task has exited.
    pub async fn stopped(self) {
        if let Err(e) = self.task.await {
            tracing::error!("API server task failed: {e}");
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

//! HTTP API.
//!
//! Exposes the scheduling and directory services as JSON endpoints under
//! `/api/` plus the `/ws/connect` realtime channel. Protected routes run
//! behind a middleware stack: Rate Limit → Auth → Audit → Handler.
//!
//! The router is composable: `api_router()` returns a `Router` that can be
//! mounted on any axum server instance.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use router::api_router;
pub use server::{ApiServer, ServerError, ServerSession};
pub use types::ApiContext;

//! Audit logging middleware.
//!
//! Logs every protected API request with method, path, response status
//! and caller identity. Runs innermost (after auth has injected `Identity`).

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::identity::Identity;

pub async fn log_access(
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let caller = req
        .extensions()
        .get::<Identity>()
        .map(|identity| (identity.id, identity.role));

    let response = next.run(req).await;
    let status = response.status().as_u16();

    match caller {
        Some((user_id, role)) => tracing::info!(
            %method,
            %path,
            status,
            user_id = %user_id,
            role = %role,
            "API access"
        ),
        None => tracing::info!(%method, %path, status, "API access"),
    }

    response
}

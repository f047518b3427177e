//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`; the realtime channel lives at `/ws/connect`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter → 2. Auth validator → 3. Audit logger

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    let ctx = ApiContext::new(core);
    build_router(ctx)
}

/// Build router from pre-constructed `ApiContext`.
///
/// Used by tests that need access to the shared `ApiContext`
/// (e.g. to issue WS tickets directly).
#[cfg(test)]
pub(crate) fn router_with_ctx(ctx: ApiContext) -> Router {
    build_router(ctx)
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let origin = match HeaderValue::from_str(origin) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(origin, "Invalid client origin, CORS disabled");
            return None;
        }
    };
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}

fn build_router(ctx: ApiContext) -> Router {
    // Protected routes: require auth + full middleware stack
    //
    // Layers are applied from bottom (innermost) to top (outermost):
    //   Extension (outermost) → Rate limit → Auth → Audit (innermost) → Handler
    //
    // Extension must be outermost so all middleware can access ApiContext.
    // Routes with state: .with_state() converts Router<ApiContext> → Router<()>
    // so middleware layers (which use from_fn with state=()) are compatible.
    //
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        .route("/logout", post(endpoints::auth::logout))
        .route("/me", get(endpoints::auth::me))
        .route("/auth/ws-ticket", post(endpoints::auth::ws_ticket))
        .route(
            "/appointments",
            get(endpoints::appointments::list).post(endpoints::appointments::create),
        )
        .route(
            "/appointments/:id",
            get(endpoints::appointments::get)
                .put(endpoints::appointments::update)
                .delete(endpoints::appointments::delete),
        )
        .route(
            "/appointments/:id/status",
            put(endpoints::appointments::update_status),
        )
        .route(
            "/doctor/appointments",
            get(endpoints::appointments::list_for_doctor),
        )
        .route(
            "/doctor/appointments/:id/status",
            put(endpoints::appointments::doctor_update_status),
        )
        .route("/admin/users", get(endpoints::admin::list_users))
        .route(
            "/admin/appointments",
            get(endpoints::admin::list_appointments),
        )
        .route("/admin/stats", get(endpoints::admin::stats))
        .route(
            "/admin/doctors",
            get(endpoints::admin::list_doctors).post(endpoints::admin::create_doctor),
        )
        .route(
            "/admin/doctors/:id",
            put(endpoints::admin::update_doctor).delete(endpoints::admin::delete_doctor),
        )
        .route("/users/:id", axum::routing::delete(endpoints::users::delete))
        .with_state(ctx.clone())
        // Middleware stack (innermost first, outermost last):
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    // Unprotected routes (rate-limited only, no auth required)
    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/register", post(endpoints::auth::register))
        .route("/register/doctor", post(endpoints::auth::register_doctor))
        .route("/login", post(endpoints::auth::login))
        .route("/doctors", get(endpoints::doctors::list_available))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // WebSocket upgrade route (ticket-based auth, rate-limited)
    let ws_routes = Router::new()
        .route("/ws/connect", get(websocket::ws_upgrade))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    let app = Router::new()
        .nest("/api", protected)
        .nest("/api", unprotected)
        .merge(ws_routes);

    match cors_layer(&ctx.core.settings.client_origin) {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

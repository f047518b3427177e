//! Account and session endpoints.
//!
//! `POST /api/register`, `POST /api/register/doctor`, `POST /api/login` are
//! unprotected and return a fresh bearer token. `POST /api/logout`,
//! `GET /api/me` and `POST /api/auth/ws-ticket` require one.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::endpoints::{run_blocking, MessageResponse};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, BearerToken, WS_TICKET_TTL};
use crate::directory::{RegisterDoctor, RegisterUser};
use crate::identity::Identity;
use crate::models::{Doctor, User};

#[derive(Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub token: String,
    pub user: User,
}

#[derive(Serialize)]
pub struct DoctorAuthResponse {
    pub message: &'static str,
    pub token: String,
    pub user: User,
    pub doctor: Doctor,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: Identity,
}

/// `POST /api/register`: create a patient account.
pub async fn register(
    State(ctx): State<ApiContext>,
    Json(request): Json<RegisterUser>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let core = ctx.core.clone();
    let user = run_blocking(move || {
        let conn = core.open_db()?;
        let user = core.directory(&conn).register_patient(request)?;
        Ok(user)
    })
    .await?;
    let token = ctx.core.tokens.issue(Identity::from(&user));

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "Registration successful",
            token,
            user,
        }),
    ))
}

/// `POST /api/register/doctor`: claim a seeded doctor record with a new account.
pub async fn register_doctor(
    State(ctx): State<ApiContext>,
    Json(request): Json<RegisterDoctor>,
) -> Result<(StatusCode, Json<DoctorAuthResponse>), ApiError> {
    let core = ctx.core.clone();
    let (user, doctor) = run_blocking(move || {
        let conn = core.open_db()?;
        let registered = core.directory(&conn).register_doctor(request)?;
        Ok(registered)
    })
    .await?;
    let token = ctx.core.tokens.issue(Identity::from(&user));

    Ok((
        StatusCode::CREATED,
        Json(DoctorAuthResponse {
            message: "Doctor registration successful",
            token,
            user,
            doctor,
        }),
    ))
}

/// `POST /api/login`: exchange credentials for a bearer token.
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation {
            field: "email".into(),
            message: "Email and password required".into(),
        });
    }

    let core = ctx.core.clone();
    let user = run_blocking(move || {
        let conn = core.open_db()?;
        let user = core
            .directory(&conn)
            .authenticate_credentials(&request.email, &request.password)?;
        Ok(user)
    })
    .await?;
    let token = ctx.core.tokens.issue(Identity::from(&user));
    tracing::info!(user_id = %user.id, role = %user.role, "Login");

    Ok(Json(AuthResponse {
        message: "Login successful",
        token,
        user,
    }))
}

/// `POST /api/logout`: revoke the presented token.
pub async fn logout(
    State(ctx): State<ApiContext>,
    Extension(token): Extension<BearerToken>,
) -> Json<MessageResponse> {
    ctx.core.tokens.revoke(&token.0);
    Json(MessageResponse {
        message: "Logged out",
    })
}

/// `GET /api/me`: identity behind the presented token.
pub async fn me(Extension(identity): Extension<Identity>) -> Json<MeResponse> {
    Json(MeResponse { user: identity })
}

#[derive(Serialize)]
pub struct WsTicketResponse {
    pub ticket: String,
    pub expires_in: u64,
}

/// `POST /api/auth/ws-ticket`: Generate one-time WebSocket upgrade ticket.
///
/// Returns a ticket valid for 30 seconds, used in the WS upgrade query
/// param instead of exposing the bearer token in a URL.
pub async fn ws_ticket(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Json<WsTicketResponse> {
    let ticket = ctx
        .ws_tickets
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .issue(identity);

    Json(WsTicketResponse {
        ticket,
        expires_in: WS_TICKET_TTL.as_secs(),
    })
}

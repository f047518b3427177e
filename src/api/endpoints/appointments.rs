//! Appointment endpoints.
//!
//! - `POST /api/appointments`: book
//! - `GET /api/appointments`: caller's own bookings
//! - `GET|PUT|DELETE /api/appointments/:id`: read, edit details, delete
//! - `PUT /api/appointments/:id/status`: lifecycle transition
//! - `GET /api/doctor/appointments`: doctor's schedule
//! - `PUT /api/doctor/appointments/:id/status`: doctor-only transition

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::endpoints::MessageResponse;
use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext};
use crate::identity::Identity;
use crate::models::enums::Role;
use crate::models::{Appointment, AppointmentWithContact};
use crate::scheduling::{AppointmentDetails, NewAppointment};

#[derive(Serialize)]
pub struct AppointmentResponse {
    pub message: &'static str,
    pub appointment: Appointment,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub status: String,
}

/// `POST /api/appointments`: book a slot for the caller.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<NewAppointment>,
) -> Result<(StatusCode, Json<AppointmentResponse>), ApiError> {
    let conn = ctx.core.open_db()?;
    let appointment = ctx
        .core
        .scheduling(&conn)
        .create_appointment(&identity, request)?;

    Ok((
        StatusCode::CREATED,
        Json(AppointmentResponse {
            message: "Appointment created successfully",
            appointment,
        }),
    ))
}

/// `GET /api/appointments`: list the caller's own appointments.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let appointments = ctx.core.scheduling(&conn).list_for_patient(&identity)?;
    Ok(Json(appointments))
}

/// `GET /api/appointments/:id`: one appointment visible to the caller.
pub async fn get(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<String>,
) -> Result<Json<AppointmentWithContact>, ApiError> {
    let id = parse_id(&appointment_id, "Appointment")?;
    let conn = ctx.core.open_db()?;
    let appointment = ctx.core.scheduling(&conn).get_appointment(&identity, &id)?;
    Ok(Json(appointment))
}

/// `PUT /api/appointments/:id`: reschedule or retype.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<String>,
    Json(request): Json<AppointmentDetails>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let id = parse_id(&appointment_id, "Appointment")?;
    let conn = ctx.core.open_db()?;
    let appointment = ctx
        .core
        .scheduling(&conn)
        .update_details(&identity, &id, request)?;

    Ok(Json(AppointmentResponse {
        message: "Appointment updated successfully",
        appointment,
    }))
}

/// `PUT /api/appointments/:id/status`: transition within the caller's scope.
pub async fn update_status(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let id = parse_id(&appointment_id, "Appointment")?;
    let conn = ctx.core.open_db()?;
    let appointment = ctx
        .core
        .scheduling(&conn)
        .update_status(&identity, &id, &request.status)?;

    Ok(Json(AppointmentResponse {
        message: "Appointment status updated successfully",
        appointment,
    }))
}

/// `DELETE /api/appointments/:id`: owner-only hard delete.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&appointment_id, "Appointment")?;
    let conn = ctx.core.open_db()?;
    ctx.core.scheduling(&conn).delete_appointment(&identity, &id)?;

    Ok(Json(MessageResponse {
        message: "Appointment deleted successfully",
    }))
}

/// `GET /api/doctor/appointments`: appointments assigned to the calling doctor.
pub async fn list_for_doctor(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<AppointmentWithContact>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let appointments = ctx.core.scheduling(&conn).list_for_doctor(&identity)?;
    Ok(Json(appointments))
}

/// `PUT /api/doctor/appointments/:id/status`: same transition, doctors only.
pub async fn doctor_update_status(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    identity.require_role(Role::Doctor)?;
    update_status(
        State(ctx),
        Extension(identity),
        Path(appointment_id),
        Json(request),
    )
    .await
}

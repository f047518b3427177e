//! Admin endpoints: users, all appointments, stats, doctor directory.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::api::endpoints::MessageResponse;
use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext};
use crate::directory::{DirectoryStats, DoctorFields};
use crate::identity::Identity;
use crate::models::{AppointmentWithContact, Doctor, User};

/// `GET /api/admin/users`
pub async fn list_users(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<User>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(ctx.core.directory(&conn).list_users(&identity)?))
}

/// `GET /api/admin/appointments`
pub async fn list_appointments(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<AppointmentWithContact>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(ctx.core.scheduling(&conn).list_all(&identity)?))
}

/// `GET /api/admin/stats`
pub async fn stats(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<DirectoryStats>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(ctx.core.directory(&conn).stats(&identity)?))
}

/// `GET /api/admin/doctors`: every directory entry, available or not.
pub async fn list_doctors(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Doctor>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(ctx.core.directory(&conn).list_doctors(&identity)?))
}

/// `POST /api/admin/doctors`
pub async fn create_doctor(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Json(fields): Json<DoctorFields>,
) -> Result<(StatusCode, Json<Doctor>), ApiError> {
    let conn = ctx.core.open_db()?;
    let doctor = ctx.core.directory(&conn).upsert_doctor(&identity, None, fields)?;
    Ok((StatusCode::CREATED, Json(doctor)))
}

/// `PUT /api/admin/doctors/:id`
pub async fn update_doctor(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(doctor_id): Path<String>,
    Json(fields): Json<DoctorFields>,
) -> Result<Json<Doctor>, ApiError> {
    let id = parse_id(&doctor_id, "Doctor")?;
    let conn = ctx.core.open_db()?;
    let doctor = ctx
        .core
        .directory(&conn)
        .upsert_doctor(&identity, Some(&id), fields)?;
    Ok(Json(doctor))
}

/// `DELETE /api/admin/doctors/:id`: existing appointments keep the name snapshot.
pub async fn delete_doctor(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(doctor_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&doctor_id, "Doctor")?;
    let conn = ctx.core.open_db()?;
    ctx.core.directory(&conn).delete_doctor(&identity, &id)?;
    Ok(Json(MessageResponse {
        message: "Doctor deleted successfully",
    }))
}

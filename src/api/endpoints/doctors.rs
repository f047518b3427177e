//! Public doctor directory.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::Doctor;

/// `GET /api/doctors`: bookable doctors, by name.
pub async fn list_available(
    State(ctx): State<ApiContext>,
) -> Result<Json<Vec<Doctor>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let doctors = ctx.core.directory(&conn).list_available_doctors()?;
    Ok(Json(doctors))
}

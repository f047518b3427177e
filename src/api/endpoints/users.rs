//! Account deletion.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext};
use crate::identity::Identity;
use crate::models::User;

#[derive(Serialize)]
pub struct DeletedUserResponse {
    pub message: &'static str,
    pub user: User,
}

/// `DELETE /api/users/:id`: admin, or the account holder. Also drops the
/// user's bearer sessions.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<String>,
) -> Result<Json<DeletedUserResponse>, ApiError> {
    let id = parse_id(&user_id, "User")?;
    let conn = ctx.core.open_db()?;
    let user = ctx.core.directory(&conn).delete_user(&identity, &id)?;
    let revoked = ctx.core.tokens.revoke_user(&id);
    tracing::debug!(user_id = %id, revoked, "Revoked sessions of deleted user");

    Ok(Json(DeletedUserResponse {
        message: "Account deleted successfully",
        user,
    }))
}

use axum::{
    extract::{Query, State},
    routing::{get, put},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use tracing::instrument;

use super::dto::{ListUsersQuery, UpdateRoleRequest, UpdateRoleResponse, UserListResponse};
use super::services;
use crate::{
    auth::extractors::RequireAdmin,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/update-role", put(update_role))
}

#[instrument(skip_all, fields(admin_id = %admin.sub))]
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<UserListResponse>> {
    let page = services::list_users(state.store.as_ref(), query).await?;
    Ok(Json(page))
}

#[instrument(skip_all, fields(admin_id = %admin.sub))]
pub async fn update_role(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateRoleRequest>, AppError>,
) -> AppResult<Json<UpdateRoleResponse>> {
    let user = services::update_role(state.store.as_ref(), admin.sub, payload).await?;
    Ok(Json(UpdateRoleResponse {
        message: "User role updated successfully".into(),
        user: user.into(),
    }))
}

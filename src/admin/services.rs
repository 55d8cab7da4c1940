use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{ListUsersQuery, UpdateRoleRequest, UserListResponse};
use crate::{
    db::{CredentialStore, Role, User, UserListQuery},
    error::{AppError, AppResult},
};

pub const PAGE_SIZE: i64 = 10;

fn parse_page(raw: Option<&str>) -> i64 {
    raw.and_then(|p| p.trim().parse::<i64>().ok())
        .unwrap_or(1)
        .max(1)
}

/// One page of users, newest first.
///
/// `total_pages` is derived from the unfiltered user count, so while a search
/// is active it can exceed the number of pages the filter actually yields.
pub async fn list_users(
    store: &dyn CredentialStore,
    query: ListUsersQuery,
) -> AppResult<UserListResponse> {
    let page = parse_page(query.page.as_deref());
    let search = query
        .search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let users = store
        .list_users(&UserListQuery {
            search,
            limit: PAGE_SIZE,
            offset: (page - 1).saturating_mul(PAGE_SIZE),
        })
        .await
        .map_err(AppError::upstream("Failed to fetch users"))?;
    let total = store
        .count_users()
        .await
        .map_err(AppError::upstream("Failed to fetch users"))?;

    Ok(UserListResponse {
        users,
        total_pages: (total + PAGE_SIZE - 1) / PAGE_SIZE,
        current_page: page,
    })
}

/// Sets the role of another user. Every rejection happens before the store
/// is written.
pub async fn update_role(
    store: &dyn CredentialStore,
    actor: Uuid,
    req: UpdateRoleRequest,
) -> AppResult<User> {
    let user_id = req.user_id.as_deref().map(str::trim).unwrap_or_default();
    let role = req.role.as_deref().map(str::trim).unwrap_or_default();
    if user_id.is_empty() || role.is_empty() {
        return Err(AppError::Validation("User ID and role are required".into()));
    }

    let role = Role::parse(role).ok_or_else(|| {
        AppError::Validation(r#"Invalid role. Must be "admin" or "user""#.into())
    })?;

    let target = Uuid::parse_str(user_id).ok();
    if target == Some(actor) {
        warn!(%actor, "admin attempted to change own role");
        return Err(AppError::Forbidden("You cannot change your own role".into()));
    }
    let Some(target) = target else {
        return Err(AppError::NotFound("User not found".into()));
    };

    let updated = store
        .update_role(target, role)
        .await
        .map_err(AppError::upstream("Failed to update user role"))?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(%actor, target = %updated.id, role = %updated.role, "user role updated");
    Ok(updated)
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Role, User, UserSummary};

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    /// Kept as text; anything that is not a positive integer means page 1.
    pub page: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserSummary>,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
    #[serde(rename = "currentPage")]
    pub current_page: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RoleChangedUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
}

impl From<User> for RoleChangedUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            role: u.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateRoleResponse {
    pub message: String,
    pub user: RoleChangedUser,
}

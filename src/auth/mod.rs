use crate::state::AppState;
use axum::Router;

pub mod claims;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod identity;
pub mod jwt;
pub mod oauth;
pub mod password;
pub mod redirect;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}

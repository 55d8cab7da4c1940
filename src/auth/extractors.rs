use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::CookieJar;
use tracing::warn;

use super::claims::SessionClaims;
use super::jwt::{SessionKeys, SESSION_COOKIE};
use crate::{error::AppError, state::AppState};

/// Verified session from the session cookie or, failing that, a bearer token.
pub struct CurrentSession(pub SessionClaims);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        let token = session_token(parts).ok_or_else(AppError::unauthorized)?;

        match keys.verify_session(&token) {
            Ok(claims) => Ok(CurrentSession(claims)),
            Err(e) => {
                warn!(error = %e, "invalid or expired session");
                Err(AppError::unauthorized())
            }
        }
    }
}

fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::to_string)
}

/// The admin predicate: a session exists and its role claim is admin.
pub fn is_admin(session: Option<&SessionClaims>) -> bool {
    session.is_some_and(|s| s.role.is_admin())
}

/// Admin-only gate, evaluated on every request that extracts it.
///
/// Beyond the token's role claim, the acting user is re-read from the store
/// and must still be an admin there.
pub struct RequireAdmin(pub SessionClaims);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = CurrentSession::from_request_parts(parts, state)
            .await
            .ok()
            .map(|CurrentSession(claims)| claims);

        if !is_admin(session.as_ref()) {
            warn!(user_id = ?session.as_ref().map(|s| s.sub), "admin gate rejected session");
            return Err(AppError::unauthorized());
        }
        let Some(claims) = session else {
            return Err(AppError::unauthorized());
        };

        let current = state
            .store
            .find_user_by_id(claims.sub)
            .await
            .map_err(AppError::upstream("Internal server error"))?;
        match current {
            Some(user) if user.role.is_admin() => Ok(RequireAdmin(claims)),
            _ => {
                warn!(user_id = %claims.sub, "admin gate rejected stale admin session");
                Err(AppError::unauthorized())
            }
        }
    }
}

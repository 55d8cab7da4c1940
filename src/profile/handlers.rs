use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use axum_extra::extract::{CookieJar, WithRejection};
use tracing::instrument;

use super::dto::{UpdateProfileRequest, UpdateProfileResponse, UserDetails};
use super::services;
use crate::{
    auth::{extractors::CurrentSession, handlers::issue_session},
    error::{AppError, AppResult},
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/user/details", get(details))
        .route("/user/update", put(update))
}

#[instrument(skip_all, fields(user_id = %session.sub))]
pub async fn details(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<UserDetails>> {
    let details = services::details(state.store.as_ref(), session.sub).await?;
    Ok(Json(details))
}

/// The session is reissued so name and picture claims follow the edit.
#[instrument(skip_all, fields(user_id = %session.sub))]
pub async fn update(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateProfileRequest>, AppError>,
) -> AppResult<(CookieJar, Json<UpdateProfileResponse>)> {
    let user = services::update_profile(state.store.as_ref(), session.sub, payload).await?;
    let jar = issue_session(&state, jar, &user)?;
    Ok((
        jar,
        Json(UpdateProfileResponse {
            message: "Profile updated successfully".into(),
            user: (&user).into(),
        }),
    ))
}

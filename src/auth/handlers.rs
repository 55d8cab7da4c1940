use axum::{
    extract::{FromRef, Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{CookieJar, WithRejection};
use tracing::{error, info, instrument};

use crate::{
    auth::{
        dto::{
            LoginRequest, MessageResponse, OAuthCallbackQuery, OAuthStartQuery, RegisterRequest,
            SessionResponse,
        },
        extractors::CurrentSession,
        identity::{sign_in_with_oauth, Provider},
        jwt::{expired_oauth_flow_cookie, expired_session_cookie, SessionKeys, OAUTH_FLOW_COOKIE},
        redirect::safe_redirect,
        services::{authenticate, register as register_user},
    },
    db::User,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(session))
        .route("/auth/oauth/:provider", get(oauth_start))
        .route("/auth/oauth/:provider/callback", get(oauth_callback))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> AppResult<Json<MessageResponse>> {
    register_user(state.store.as_ref(), payload).await?;
    Ok(Json(MessageResponse::new("User created successfully")))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, AppError>,
) -> AppResult<(CookieJar, Json<SessionResponse>)> {
    let user = authenticate(state.store.as_ref(), payload.email.trim(), &payload.password)
        .await
        .map_err(AppError::upstream("Internal server error"))?
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".into()))?;

    let jar = issue_session(&state, jar, &user)?;
    Ok((
        jar,
        Json(SessionResponse {
            user: (&user).into(),
        }),
    ))
}

#[instrument(skip_all)]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    (
        jar.remove(expired_session_cookie()),
        Json(MessageResponse::new("Signed out")),
    )
}

#[instrument(skip_all)]
pub async fn session(CurrentSession(claims): CurrentSession) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: (&claims).into(),
    })
}

#[instrument(skip(state, jar))]
pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthStartQuery>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Redirect)> {
    let client = Provider::parse(&provider)
        .and_then(|p| state.oauth.get(p))
        .ok_or_else(|| AppError::NotFound("Unknown sign-in provider".into()))?;

    let pending = client
        .authorization_url()
        .map_err(AppError::upstream("Internal server error"))?;

    let keys = SessionKeys::from_ref(&state);
    let flow = keys
        .sign_oauth_flow(
            client.provider(),
            pending.csrf,
            pending.pkce_verifier,
            query.callback_url,
        )
        .map_err(AppError::upstream("Internal server error"))?;

    Ok((
        jar.add(keys.oauth_flow_cookie(flow)),
        Redirect::to(&pending.url),
    ))
}

/// Never surfaces the failure cause to the browser; every failure lands on
/// the sign-in page with a generic error code.
#[instrument(skip(state, jar, query))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let jar_without_flow = jar.clone().remove(expired_oauth_flow_cookie());

    match complete_oauth(&state, &provider, query, &jar).await {
        Ok((user, callback_url)) => match issue_session(&state, jar_without_flow.clone(), &user) {
            Ok(jar) => {
                let target = safe_redirect(
                    callback_url.as_deref().unwrap_or("/"),
                    &state.config.base_url,
                );
                (jar, Redirect::to(&target))
            }
            Err(e) => {
                error!(error = %e, "session issue after oauth sign-in failed");
                (jar_without_flow, signin_error(&state))
            }
        },
        Err(e) => {
            error!(error = ?e, %provider, "oauth sign-in rejected");
            (jar_without_flow, signin_error(&state))
        }
    }
}

async fn complete_oauth(
    state: &AppState,
    provider: &str,
    query: OAuthCallbackQuery,
    jar: &CookieJar,
) -> anyhow::Result<(User, Option<String>)> {
    if let Some(err) = query.error {
        anyhow::bail!("provider returned error: {err}");
    }
    let provider = Provider::parse(provider)
        .ok_or_else(|| anyhow::anyhow!("unknown provider {provider:?}"))?;
    let client = state
        .oauth
        .get(provider)
        .ok_or_else(|| anyhow::anyhow!("provider {provider} is not enabled"))?;

    let flow_token = jar
        .get(OAUTH_FLOW_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| anyhow::anyhow!("missing oauth flow cookie"))?;
    let flow = SessionKeys::from_ref(state).verify_oauth_flow(&flow_token)?;
    if flow.provider != provider {
        anyhow::bail!("flow was started for {}", flow.provider);
    }
    if query.state.as_deref() != Some(flow.csrf.as_str()) {
        anyhow::bail!("csrf state mismatch");
    }
    let code = query
        .code
        .ok_or_else(|| anyhow::anyhow!("callback without code"))?;

    let tokens = client
        .exchange_code(&state.http, &code, &flow.pkce_verifier)
        .await?;
    let identity = client.fetch_identity(&state.http, tokens).await?;
    let user = sign_in_with_oauth(state.store.as_ref(), identity).await?;
    Ok((user, flow.callback_url))
}

fn signin_error(state: &AppState) -> Redirect {
    Redirect::to(&format!(
        "{}/auth/signin?error=OAuthSignin",
        state.config.base_url
    ))
}

/// Mints a session for `user` and sets it on `jar`.
pub(crate) fn issue_session(state: &AppState, jar: CookieJar, user: &User) -> AppResult<CookieJar> {
    let keys = SessionKeys::from_ref(state);
    let token = keys
        .sign_session(user)
        .map_err(AppError::upstream("Internal server error"))?;
    info!(user_id = %user.id, role = %user.role, "session issued");
    Ok(jar.add(keys.session_cookie(token)))
}

use axum::extract::FromRef;
use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::{
    auth::{
        claims::{OAuthFlowClaims, SessionClaims, TokenKind},
        identity::Provider,
    },
    config::SessionConfig,
    db::User,
    state::AppState,
};

pub const SESSION_COOKIE: &str = "session_token";
pub const OAUTH_FLOW_COOKIE: &str = "oauth_flow";

const OAUTH_FLOW_PATH: &str = "/auth/oauth";
const OAUTH_FLOW_TTL: Duration = Duration::minutes(10);

/// Signing material plus cookie policy for session and OAuth-flow tokens.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    secure_cookies: bool,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        SessionKeys::new(
            &state.config.session,
            state.config.environment.is_production(),
        )
    }
}

impl SessionKeys {
    pub fn new(config: &SessionConfig, secure_cookies: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: Duration::days(config.ttl_days),
            secure_cookies,
        }
    }

    /// Mints a session token for `user`, carrying its current role.
    pub fn sign_session(&self, user: &User) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            sub: user.id,
            role: user.role,
            email: user.email.clone(),
            name: user.name.clone(),
            picture: user.avatar_url.clone(),
            iat: now.unix_timestamp() as usize,
            exp: (now + self.ttl).unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Session,
        };
        let token = self.sign(&claims)?;
        debug!(user_id = %user.id, role = %user.role, "session signed");
        Ok(token)
    }

    pub fn verify_session(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let claims: SessionClaims = self.verify(token)?;
        if claims.kind != TokenKind::Session {
            anyhow::bail!("not a session token");
        }
        debug!(user_id = %claims.sub, "session verified");
        Ok(claims)
    }

    pub fn sign_oauth_flow(
        &self,
        provider: Provider,
        csrf: String,
        pkce_verifier: String,
        callback_url: Option<String>,
    ) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = OAuthFlowClaims {
            provider,
            csrf,
            pkce_verifier,
            callback_url,
            iat: now.unix_timestamp() as usize,
            exp: (now + OAUTH_FLOW_TTL).unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::OauthFlow,
        };
        self.sign(&claims)
    }

    pub fn verify_oauth_flow(&self, token: &str) -> anyhow::Result<OAuthFlowClaims> {
        let claims: OAuthFlowClaims = self.verify(token)?;
        if claims.kind != TokenKind::OauthFlow {
            anyhow::bail!("not an oauth flow token");
        }
        Ok(claims)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> anyhow::Result<String> {
        Ok(encode(&Header::default(), claims, &self.encoding)?)
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> anyhow::Result<T> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<T>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .path("/")
            .max_age(self.ttl)
            .build()
    }

    pub fn oauth_flow_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((OAUTH_FLOW_COOKIE, token))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .path(OAUTH_FLOW_PATH)
            .max_age(OAUTH_FLOW_TTL)
            .build()
    }
}

/// Removal cookies must match the original path to take effect.
pub fn expired_session_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

pub fn expired_oauth_flow_cookie() -> Cookie<'static> {
    Cookie::build(OAUTH_FLOW_COOKIE).path(OAUTH_FLOW_PATH).build()
}

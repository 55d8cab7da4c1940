use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::identity::Provider;
use crate::db::{Role, User};

/// Which of the signed artifacts a token is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Session,
    OauthFlow,
}

/// Session token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,      // user ID
    pub role: Role,     // role at issue time
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

/// Short-lived state carried across the provider round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthFlowClaims {
    pub provider: Provider,
    pub csrf: String,
    pub pkce_verifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

/// What the browser sees of its own session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionView {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub role: Role,
}

impl From<&SessionClaims> for SessionView {
    fn from(c: &SessionClaims) -> Self {
        Self {
            id: c.sub,
            email: c.email.clone(),
            name: c.name.clone(),
            image: c.picture.clone(),
            role: c.role,
        }
    }
}

impl From<&User> for SessionView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            image: u.avatar_url.clone(),
            role: u.role,
        }
    }
}

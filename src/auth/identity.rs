//! Identity resolution for OAuth sign-in.
//!
//! A provider callback produces an [`OAuthIdentity`]: a verified email, the
//! provider account id, the tokens the provider handed out and the provider's
//! own profile as a tagged variant. [`sign_in_with_oauth`] maps it onto a local
//! user, creating the user on first sign-in, and refreshes the provider link.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::{CredentialStore, NewUser, ProviderLink, StoreError, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    #[serde(rename = "github")]
    GitHub,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "github" => Some(Provider::GitHub),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Google OpenID Connect userinfo.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// GitHub `/user`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubProfile {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProviderProfile {
    Google(GoogleProfile),
    GitHub(GitHubProfile),
}

impl ProviderProfile {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderProfile::Google(_) => Provider::Google,
            ProviderProfile::GitHub(_) => Provider::GitHub,
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            ProviderProfile::Google(p) => p.name.as_deref(),
            ProviderProfile::GitHub(p) => p.name.as_deref(),
        }
    }

    fn picture(&self) -> Option<&str> {
        match self {
            ProviderProfile::Google(p) => p.picture.as_deref(),
            ProviderProfile::GitHub(_) => None,
        }
    }

    fn avatar_url(&self) -> Option<&str> {
        match self {
            ProviderProfile::Google(_) => None,
            ProviderProfile::GitHub(p) => p.avatar_url.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

/// A provider-verified identity assertion.
#[derive(Debug, Clone)]
pub struct OAuthIdentity {
    pub provider_account_id: String,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub tokens: ProviderTokens,
    pub profile: ProviderProfile,
}

type FieldSource = fn(&OAuthIdentity) -> Option<&str>;

fn asserted_name(i: &OAuthIdentity) -> Option<&str> {
    i.name.as_deref()
}

fn profile_name(i: &OAuthIdentity) -> Option<&str> {
    i.profile.name()
}

fn asserted_image(i: &OAuthIdentity) -> Option<&str> {
    i.image.as_deref()
}

fn profile_picture(i: &OAuthIdentity) -> Option<&str> {
    i.profile.picture()
}

fn profile_avatar_url(i: &OAuthIdentity) -> Option<&str> {
    i.profile.avatar_url()
}

const NAME_SOURCES: &[FieldSource] = &[asserted_name, profile_name];

/// Neither typed profile has a separate `image` field; a provider-supplied
/// image arrives as the asserted image, so three sources cover the chain.
const AVATAR_SOURCES: &[FieldSource] = &[asserted_image, profile_picture, profile_avatar_url];

/// First source yielding a non-blank value wins.
fn first_present(identity: &OAuthIdentity, sources: &[FieldSource]) -> Option<String> {
    sources
        .iter()
        .filter_map(|source| source(identity))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

impl OAuthIdentity {
    pub fn provider(&self) -> Provider {
        self.profile.provider()
    }

    pub fn display_name(&self) -> Option<String> {
        first_present(self, NAME_SOURCES)
    }

    pub fn avatar_url(&self) -> Option<String> {
        first_present(self, AVATAR_SOURCES)
    }
}

/// Resolves `identity` to a local user and records the provider link.
///
/// Name and avatar only seed a newly created user; an existing user keeps
/// what they have. The role is never touched here. User creation and link
/// are one store operation, so a rejected link leaves no user behind.
pub async fn sign_in_with_oauth(
    store: &dyn CredentialStore,
    identity: OAuthIdentity,
) -> Result<User, StoreError> {
    let provider = identity.provider();
    let new = NewUser {
        email: identity.email.clone(),
        password_hash: None,
        name: identity.display_name(),
        avatar_url: identity.avatar_url(),
    };
    let link = ProviderLink {
        provider: provider.as_str().to_string(),
        provider_id: identity.provider_account_id,
        access_token: identity.tokens.access_token,
        refresh_token: identity.tokens.refresh_token,
        token_expiry: identity.tokens.expires_at,
    };

    let (user, account, created) = store.link_oauth_user(new, link).await.inspect_err(|e| {
        if matches!(e, StoreError::ProviderAccountTaken) {
            warn!(%provider, "provider account already linked to another user");
        }
    })?;

    info!(
        user_id = %user.id,
        %provider,
        provider_account = %account.provider_id,
        token_expiry = ?account.token_expiry,
        linked_at = %account.updated_at,
        created,
        "oauth sign-in resolved"
    );
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory::MemoryStore, AuthType, Role};

    fn google(picture: Option<&str>, name: Option<&str>) -> OAuthIdentity {
        OAuthIdentity {
            provider_account_id: "g-123".into(),
            email: "bob@x.com".into(),
            name: None,
            image: None,
            tokens: ProviderTokens {
                access_token: Some("at-1".into()),
                refresh_token: Some("rt-1".into()),
                expires_at: None,
            },
            profile: ProviderProfile::Google(GoogleProfile {
                sub: "g-123".into(),
                email: Some("bob@x.com".into()),
                email_verified: true,
                name: name.map(String::from),
                picture: picture.map(String::from),
            }),
        }
    }

    fn github(avatar: Option<&str>) -> OAuthIdentity {
        OAuthIdentity {
            provider_account_id: "42".into(),
            email: "bob@x.com".into(),
            name: Some("bobby".into()),
            image: None,
            tokens: ProviderTokens::default(),
            profile: ProviderProfile::GitHub(GitHubProfile {
                id: 42,
                login: "bobby".into(),
                name: None,
                avatar_url: avatar.map(String::from),
            }),
        }
    }

    #[test]
    fn avatar_prefers_asserted_image() {
        let mut id = google(Some("https://g/pic.png"), None);
        id.image = Some("https://asserted/img.png".into());
        assert_eq!(id.avatar_url().as_deref(), Some("https://asserted/img.png"));
    }

    #[test]
    fn avatar_falls_back_through_provider_fields() {
        assert_eq!(
            google(Some("https://g/pic.png"), None).avatar_url().as_deref(),
            Some("https://g/pic.png")
        );
        assert_eq!(
            github(Some("https://gh/av.png")).avatar_url().as_deref(),
            Some("https://gh/av.png")
        );
        assert_eq!(github(None).avatar_url(), None);
    }

    #[test]
    fn blank_values_do_not_win() {
        let mut id = google(Some("https://g/pic.png"), Some("Bob"));
        id.image = Some("  ".into());
        id.name = Some(String::new());
        assert_eq!(id.avatar_url().as_deref(), Some("https://g/pic.png"));
        assert_eq!(id.display_name().as_deref(), Some("Bob"));
    }

    #[test]
    fn name_falls_back_to_profile_then_absent() {
        assert_eq!(google(None, Some("Bob")).display_name().as_deref(), Some("Bob"));
        assert_eq!(google(None, None).display_name(), None);
        assert_eq!(github(None).display_name().as_deref(), Some("bobby"));
    }

    #[tokio::test]
    async fn first_sign_in_creates_user_with_default_role() {
        let store = MemoryStore::new();
        let user = sign_in_with_oauth(&store, google(Some("https://g/pic.png"), Some("Bob")))
            .await
            .unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.name.as_deref(), Some("Bob"));
        assert_eq!(user.avatar_url.as_deref(), Some("https://g/pic.png"));
        assert!(user.password_hash.is_none());
        assert_eq!(store.auth_type(user.id).await.unwrap(), AuthType::OAuth);
    }

    #[tokio::test]
    async fn repeat_sign_in_refreshes_tokens_without_duplicating_link() {
        let store = MemoryStore::new();
        let first = sign_in_with_oauth(&store, google(None, None)).await.unwrap();

        let mut again = google(None, None);
        again.tokens.access_token = Some("at-2".into());
        again.tokens.refresh_token = Some("rt-2".into());
        let second = sign_in_with_oauth(&store, again).await.unwrap();

        assert_eq!(first.id, second.id);
        let links = store.list_oauth_accounts(first.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].access_token.as_deref(), Some("at-2"));
        assert_eq!(links[0].refresh_token.as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn second_provider_links_to_same_user() {
        let store = MemoryStore::new();
        let a = sign_in_with_oauth(&store, google(None, None)).await.unwrap();
        let b = sign_in_with_oauth(&store, github(None)).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_oauth_accounts(a.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn existing_credential_user_keeps_profile_and_role() {
        let store = MemoryStore::new();
        let existing = store
            .insert_user(NewUser {
                email: "bob@x.com".into(),
                password_hash: Some("hash".into()),
                name: Some("Robert".into()),
                avatar_url: None,
            })
            .await
            .unwrap();
        store.set_role(existing.id, Role::Admin).await;

        let user = sign_in_with_oauth(&store, google(Some("https://g/pic.png"), Some("Bob")))
            .await
            .unwrap();
        assert_eq!(user.id, existing.id);
        assert_eq!(user.name.as_deref(), Some("Robert"));
        assert_eq!(user.avatar_url, None);
        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn provider_account_owned_by_another_user_is_rejected() {
        let store = MemoryStore::new();
        let owner = sign_in_with_oauth(&store, github(None)).await.unwrap();

        // same GitHub account, but its primary email has since changed
        let mut moved = github(None);
        moved.email = "new-primary@x.com".into();
        let err = sign_in_with_oauth(&store, moved).await.unwrap_err();
        assert!(matches!(err, StoreError::ProviderAccountTaken));

        assert!(store
            .find_user_by_email("new-primary@x.com")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.count_users().await.unwrap(), 1);
        let links = store.list_oauth_accounts(owner.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].provider_id, "42");
    }

    #[tokio::test]
    async fn provider_account_cannot_attach_to_existing_other_user() {
        let store = MemoryStore::new();
        sign_in_with_oauth(&store, github(None)).await.unwrap();
        let other = store
            .insert_user(NewUser {
                email: "carol@x.com".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut hijack = github(None);
        hijack.email = "carol@x.com".into();
        assert!(matches!(
            sign_in_with_oauth(&store, hijack).await,
            Err(StoreError::ProviderAccountTaken)
        ));
        assert_eq!(
            store.auth_type(other.id).await.unwrap(),
            AuthType::EmailPassword
        );
    }

    #[test]
    fn provider_names_round_trip() {
        assert_eq!(Provider::parse("github"), Some(Provider::GitHub));
        assert_eq!(Provider::parse("gitlab"), None);
        assert_eq!(serde_json::to_string(&Provider::GitHub).unwrap(), "\"github\"");
    }
}

//! Authorization-code flow against the supported providers.
//!
//! - `GET /auth/oauth/{provider}` redirects to the provider with CSRF state and
//!   a PKCE challenge; the verifier travels in a signed, short-lived cookie.
//! - `GET /auth/oauth/{provider}/callback` exchanges the code, fetches the
//!   profile and hands a verified [`OAuthIdentity`] to the identity resolver.

use anyhow::{bail, Context};
use oauth2::{
    basic::{BasicClient, BasicTokenType},
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EmptyExtraTokenFields,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, StandardTokenResponse,
    TokenResponse, TokenUrl,
};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::{
    auth::identity::{
        GitHubProfile, GoogleProfile, OAuthIdentity, Provider, ProviderProfile, ProviderTokens,
    },
    config::{AppConfig, OAuthClientConfig},
};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_SCOPES: &[&str] = &["openid", "email", "profile"];

const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";
const GITHUB_SCOPES: &[&str] = &["read:user", "user:email"];

type ProviderTokenResponse = StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>;

/// Values the callback needs to finish the flow.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub url: String,
    pub csrf: String,
    pub pkce_verifier: String,
}

#[derive(Debug, Clone)]
pub struct ProviderClient {
    provider: Provider,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl ProviderClient {
    fn new(provider: Provider, creds: &OAuthClientConfig, base_url: &str) -> anyhow::Result<Self> {
        let redirect_url = format!("{base_url}/auth/oauth/{provider}/callback");
        RedirectUrl::new(redirect_url.clone())
            .with_context(|| format!("invalid {provider} redirect URL"))?;
        Ok(Self {
            provider,
            client_id: creds.client_id.clone(),
            client_secret: creds.client_secret.clone(),
            redirect_url,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn endpoints(&self) -> (&'static str, &'static str, &'static [&'static str]) {
        match self.provider {
            Provider::Google => (GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_SCOPES),
            Provider::GitHub => (GITHUB_AUTH_URL, GITHUB_TOKEN_URL, GITHUB_SCOPES),
        }
    }

    pub fn authorization_url(&self) -> anyhow::Result<PendingAuthorization> {
        let (auth_url, _, scopes) = self.endpoints();
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(auth_url.to_string())?)
            .set_redirect_uri(RedirectUrl::new(self.redirect_url.clone())?);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);
        for scope in scopes {
            request = request.add_scope(Scope::new((*scope).to_string()));
        }
        let (url, csrf) = request.url();

        Ok(PendingAuthorization {
            url: url.to_string(),
            csrf: csrf.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
        })
    }

    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        pkce_verifier: &str,
    ) -> anyhow::Result<ProviderTokens> {
        let (_, token_url, _) = self.endpoints();
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(TokenUrl::new(token_url.to_string())?)
            .set_redirect_uri(RedirectUrl::new(self.redirect_url.clone())?);

        let token: ProviderTokenResponse = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(http)
            .await
            .map_err(|e| anyhow::anyhow!("token exchange failed: {e}"))?;

        Ok(ProviderTokens {
            access_token: Some(token.access_token().secret().clone()),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_at: token.expires_in().map(|d| {
                OffsetDateTime::now_utc() + Duration::seconds(d.as_secs() as i64)
            }),
        })
    }

    /// Fetches the provider profile with the fresh access token.
    pub async fn fetch_identity(
        &self,
        http: &reqwest::Client,
        tokens: ProviderTokens,
    ) -> anyhow::Result<OAuthIdentity> {
        let access_token = tokens
            .access_token
            .clone()
            .context("provider returned no access token")?;

        match self.provider {
            Provider::Google => {
                let profile: GoogleProfile = http
                    .get(GOOGLE_USERINFO_URL)
                    .bearer_auth(&access_token)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await
                    .context("decode google userinfo")?;
                google_identity(profile, tokens)
            }
            Provider::GitHub => {
                let profile: GitHubProfile = http
                    .get(GITHUB_USER_URL)
                    .bearer_auth(&access_token)
                    .header(reqwest::header::ACCEPT, "application/vnd.github+json")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await
                    .context("decode github user")?;
                let emails: Vec<GitHubEmail> = http
                    .get(GITHUB_EMAILS_URL)
                    .bearer_auth(&access_token)
                    .header(reqwest::header::ACCEPT, "application/vnd.github+json")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await
                    .context("decode github emails")?;
                github_identity(profile, &emails, tokens)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

pub(crate) fn google_identity(
    profile: GoogleProfile,
    tokens: ProviderTokens,
) -> anyhow::Result<OAuthIdentity> {
    let email = match &profile.email {
        Some(e) if profile.email_verified && !e.is_empty() => e.clone(),
        Some(_) => bail!("google email is not verified"),
        None => bail!("google profile has no email"),
    };
    Ok(OAuthIdentity {
        provider_account_id: profile.sub.clone(),
        email,
        name: profile.name.clone(),
        image: profile.picture.clone(),
        tokens,
        profile: ProviderProfile::Google(profile),
    })
}

/// GitHub only reports verification on `/user/emails`; the primary verified
/// address is used, the public profile email never on its own.
pub(crate) fn github_identity(
    profile: GitHubProfile,
    emails: &[GitHubEmail],
    tokens: ProviderTokens,
) -> anyhow::Result<OAuthIdentity> {
    let email = emails
        .iter()
        .find(|e| e.primary && e.verified)
        .map(|e| e.email.clone())
        .context("github account has no primary verified email")?;
    Ok(OAuthIdentity {
        provider_account_id: profile.id.to_string(),
        email,
        name: profile.name.clone().or_else(|| Some(profile.login.clone())),
        image: profile.avatar_url.clone(),
        tokens,
        profile: ProviderProfile::GitHub(profile),
    })
}

/// Configured providers. A provider without credentials is disabled.
#[derive(Debug, Clone, Default)]
pub struct OAuthProviders {
    google: Option<ProviderClient>,
    github: Option<ProviderClient>,
}

impl OAuthProviders {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let build = |provider, creds: &Option<OAuthClientConfig>| {
            creds
                .as_ref()
                .map(|c| ProviderClient::new(provider, c, &config.base_url))
                .transpose()
        };
        Ok(Self {
            google: build(Provider::Google, &config.oauth.google)?,
            github: build(Provider::GitHub, &config.oauth.github)?,
        })
    }

    pub fn get(&self, provider: Provider) -> Option<&ProviderClient> {
        match provider {
            Provider::Google => self.google.as_ref(),
            Provider::GitHub => self.github.as_ref(),
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = Provider> + '_ {
        [self.google.as_ref(), self.github.as_ref()]
            .into_iter()
            .flatten()
            .map(ProviderClient::provider)
    }
}

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Client credentials for one OAuth provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    pub google: Option<OAuthClientConfig>,
    pub github: Option<OAuthClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub oauth: OAuthConfig,
    /// Deployed origin, e.g. `https://console.example.com`. No trailing slash.
    pub base_url: String,
    pub environment: Environment,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = StoreConfig {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            max_connections: parsed_var("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
            timeout_secs: parsed_var("STORE_TIMEOUT_SECS").unwrap_or(5),
        };
        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET").context("SESSION_SECRET is not set")?,
            issuer: std::env::var("SESSION_ISSUER").unwrap_or_else(|_| "rolegate".into()),
            audience: std::env::var("SESSION_AUDIENCE").unwrap_or_else(|_| "rolegate-web".into()),
            ttl_days: parsed_var("SESSION_TTL_DAYS").unwrap_or(7),
        };
        let oauth = OAuthConfig {
            google: client_from_env("GOOGLE"),
            github: client_from_env("GITHUB"),
        };
        let base_url = std::env::var("APP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).context("APP_BASE_URL is not a valid URL")?;

        let environment = match std::env::var("APP_ENV") {
            Ok(v) => Environment::parse(&v)
                .with_context(|| format!("APP_ENV has unknown value {v:?}"))?,
            Err(_) => Environment::Development,
        };

        Ok(Self {
            store,
            session,
            oauth,
            base_url,
            environment,
        })
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

fn client_from_env(prefix: &str) -> Option<OAuthClientConfig> {
    let client_id = std::env::var(format!("{prefix}_CLIENT_ID")).ok()?;
    let client_secret = std::env::var(format!("{prefix}_CLIENT_SECRET")).ok()?;
    if client_id.is_empty() || client_secret.is_empty() {
        return None;
    }
    Some(OAuthClientConfig {
        client_id,
        client_secret,
    })
}

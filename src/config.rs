//! Configuration management

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default Microsoft Graph host
const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com";

/// Default identity provider authority host
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Default port the host adapter listens on
const DEFAULT_PORT: u16 = 3978;

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend relay base URL (`BASE_URL`)
    pub backend_base_url: String,

    /// Identity graph base URL
    pub graph_base_url: String,

    /// Identity provider settings
    pub identity: IdentityConfig,

    /// Link sent with sign-in prompts (derived from `BOT_DOMAIN`)
    pub sign_in_link: Option<String>,

    /// Host adapter bind address
    pub bind_addr: SocketAddr,

    /// Per-request timeout for relay and graph calls
    pub request_timeout: Duration,

    /// Base delay between a failed call and its retry
    pub retry_backoff: Duration,
}

/// Identity provider (OAuth) settings for silent token refresh
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub authority_host: String,
    pub tenant_id: String,
    /// Scopes requested on every refresh
    pub scopes: Vec<String>,
    /// Tokens closer than this to expiry are refreshed before use
    pub refresh_skew: Duration,
}

impl IdentityConfig {
    /// Token endpoint for the configured tenant
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

/// Scopes the bot asks for: the graph profile plus the backend's chat API
pub fn default_scopes(backend_client_id: Option<&str>) -> Vec<String> {
    let mut scopes = vec!["User.Read".to_string()];
    if let Some(id) = backend_client_id {
        scopes.push(format!("api://{}/Apis.Chat", id));
    }
    scopes
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let backend_base_url = std::env::var("BASE_URL").context("BASE_URL must be set")?;

        let graph_base_url = std::env::var("GRAPH_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GRAPH_BASE_URL.to_string());

        let client_id =
            std::env::var("AAD_APP_CLIENT_ID").context("AAD_APP_CLIENT_ID must be set")?;
        let tenant_id =
            std::env::var("AAD_APP_TENANT_ID").context("AAD_APP_TENANT_ID must be set")?;
        let client_secret = std::env::var("AAD_APP_CLIENT_SECRET").ok();
        let authority_host = std::env::var("AAD_APP_OAUTH_AUTHORITY_HOST")
            .unwrap_or_else(|_| DEFAULT_AUTHORITY_HOST.to_string());
        let backend_client_id = std::env::var("BACKEND_CLIENT_ID").ok();

        let sign_in_link = std::env::var("BOT_DOMAIN")
            .ok()
            .map(|domain| format!("https://{}/auth-start.html", domain));

        let port = env_parse("PORT").unwrap_or(DEFAULT_PORT);
        let request_timeout = Duration::from_secs(env_parse("RELAY_TIMEOUT_SECS").unwrap_or(30));
        let retry_backoff =
            Duration::from_millis(env_parse("RELAY_RETRY_BACKOFF_MS").unwrap_or(500));
        let refresh_skew =
            Duration::from_secs(env_parse("TOKEN_REFRESH_SKEW_SECS").unwrap_or(300));

        Ok(Self {
            backend_base_url: backend_base_url.trim_end_matches('/').to_string(),
            graph_base_url: graph_base_url.trim_end_matches('/').to_string(),
            identity: IdentityConfig {
                client_id,
                client_secret,
                authority_host,
                tenant_id,
                scopes: default_scopes(backend_client_id.as_deref()),
                refresh_skew,
            },
            sign_in_link,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            request_timeout,
            retry_backoff,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_include_backend_api() {
        let scopes = default_scopes(Some("abc-123"));
        assert_eq!(scopes, vec!["User.Read", "api://abc-123/Apis.Chat"]);
        assert_eq!(default_scopes(None), vec!["User.Read"]);
    }

    #[test]
    fn test_token_url_joins_authority_and_tenant() {
        let identity = IdentityConfig {
            client_id: "client".into(),
            client_secret: None,
            authority_host: "https://login.example.com/".into(),
            tenant_id: "tenant-1".into(),
            scopes: vec![],
            refresh_skew: Duration::from_secs(60),
        };
        assert_eq!(
            identity.token_url(),
            "https://login.example.com/tenant-1/oauth2/v2.0/token"
        );
    }
}

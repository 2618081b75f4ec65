//! Credential Provider
//!
//! Cache-first, silent bearer token acquisition for the active user.
//!
//! Interactive sign-in belongs to the external auth flow. Once that flow reports a
//! successful sign-in it registers an [`Account`] here, and from then on every
//! authenticated call goes through [`CredentialProvider::acquire_token`], which hands
//! out the cached token or refreshes it silently through a [`TokenSource`].

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use moka::future::Cache;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;

/// Lifetime assumed when neither the grant nor the token states an expiry
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Upper bound on cached tokens (one per signed-in user)
const MAX_CACHED_TOKENS: u64 = 10_000;

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No active user")]
    NoActiveUser,

    #[error("User {0} is not signed in")]
    NotSignedIn(String),

    #[error("Silent token acquisition rejected: {0}")]
    SilentRejected(String),

    #[error("Sign-in failed: {0}")]
    SignInFailed(String),

    #[error("Identity provider unavailable: {0}")]
    Provider(String),
}

impl AuthError {
    /// Text shown to the user; external sign-in failures keep the provider's wording
    pub fn user_message(&self) -> String {
        match self {
            AuthError::SignInFailed(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Bearer token with its expiry
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Build a token from an access token string.
    ///
    /// `expires_in` (seconds) wins when the identity provider sends it; otherwise the
    /// JWT `exp` claim is read without verification, and failing that the token is
    /// assumed to live for an hour.
    pub fn from_access_token(raw: impl Into<String>, expires_in: Option<i64>) -> Self {
        let raw = raw.into();
        let expires_at = match expires_in {
            Some(secs) => Utc::now() + ChronoDuration::seconds(secs),
            None => jwt_expiry(&raw).unwrap_or_else(|| {
                Utc::now() + ChronoDuration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
            }),
        };
        Self {
            secret: raw,
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True while the token is valid for at least `skew` more
    pub fn is_fresh(&self, skew: Duration) -> bool {
        let skew = ChronoDuration::from_std(skew).unwrap_or_else(|_| ChronoDuration::zero());
        self.expires_at - skew > Utc::now()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Read `exp` from a JWT payload. Signature and audience are not checked.
fn jwt_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let header = decode_header(raw).ok()?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(raw, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(data.claims.exp, 0)
}

/// A user the external sign-in flow has authenticated
#[derive(Clone)]
pub struct Account {
    pub user_id: String,
    pub display_name: Option<String>,
    refresh_token: String,
}

impl Account {
    pub fn new(user_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            refresh_token: refresh_token.into(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Result of a silent refresh
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: Token,
    /// Rotated refresh token, when the provider issued one
    pub refresh_token: Option<String>,
}

/// Silent token acquisition against an identity provider
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn refresh(&self, account: &Account) -> Result<TokenGrant, AuthError>;
}

/// Per-user token cache in front of a [`TokenSource`]
pub struct CredentialProvider {
    source: Arc<dyn TokenSource>,
    accounts: RwLock<HashMap<String, Account>>,
    tokens: Cache<String, Token>,
    refresh_skew: Duration,
}

impl CredentialProvider {
    pub fn new(source: Arc<dyn TokenSource>, refresh_skew: Duration) -> Self {
        Self {
            source,
            accounts: RwLock::new(HashMap::new()),
            tokens: Cache::builder().max_capacity(MAX_CACHED_TOKENS).build(),
            refresh_skew,
        }
    }

    /// Register (or replace) a signed-in account. Any token cached for the user is dropped.
    pub async fn register_account(&self, account: Account) {
        let user_id = account.user_id.clone();
        self.accounts.write().insert(user_id.clone(), account);
        self.tokens.invalidate(&user_id).await;
        info!("Account registered: {}", user_id);
    }

    pub fn is_signed_in(&self, user_id: &str) -> bool {
        self.accounts.read().contains_key(user_id)
    }

    /// Get a valid token for the active user, refreshing silently when needed
    pub async fn acquire_token(&self, active_user: Option<&str>) -> Result<Token, AuthError> {
        let user_id = active_user
            .filter(|u| !u.is_empty())
            .ok_or(AuthError::NoActiveUser)?;

        let account = self
            .accounts
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| AuthError::NotSignedIn(user_id.to_string()))?;

        if let Some(token) = self.tokens.get(user_id).await {
            if token.is_fresh(self.refresh_skew) {
                debug!("Token cache HIT: {}", user_id);
                return Ok(token);
            }
            debug!("Token cache STALE: {}", user_id);
        }

        let grant = match self.source.refresh(&account).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!("Silent token acquisition failed for {}: {}", user_id, e);
                self.tokens.invalidate(user_id).await;
                return Err(e);
            }
        };

        if let Some(rotated) = grant.refresh_token {
            let mut accounts = self.accounts.write();
            if let Some(stored) = accounts.get_mut(user_id) {
                stored.refresh_token = rotated;
            }
        }

        self.tokens
            .insert(user_id.to_string(), grant.token.clone())
            .await;
        debug!(
            "Token refreshed for {} (expires {})",
            user_id,
            grant.token.expires_at()
        );

        Ok(grant.token)
    }

    /// Forget the user's account and cached token
    pub async fn sign_out(&self, user_id: &str) -> bool {
        let removed = self.accounts.write().remove(user_id).is_some();
        self.tokens.invalidate(user_id).await;
        info!("Signed out {} (had session: {})", user_id, removed);
        removed
    }
}

/// Token endpoint success body
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Token endpoint error body
#[derive(Debug, Default, Deserialize)]
struct TokenEndpointError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth 2.0 refresh-token grant against the tenant's token endpoint
pub struct OAuthRefreshSource {
    client: reqwest::Client,
    config: IdentityConfig,
}

impl OAuthRefreshSource {
    pub fn new(client: reqwest::Client, config: IdentityConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TokenSource for OAuthRefreshSource {
    async fn refresh(&self, account: &Account) -> Result<TokenGrant, AuthError> {
        let scope = self.config.scopes.join(" ");
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", account.refresh_token()),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(self.config.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body: TokenEndpointError = response.json().await.unwrap_or_default();
            let reason = body
                .error_description
                .filter(|d| !d.is_empty())
                .unwrap_or(body.error);
            return Err(AuthError::SilentRejected(reason));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::Provider(format!("{}: {}", status, text)));
        }

        let body: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        Ok(TokenGrant {
            token: Token::from_access_token(body.access_token, body.expires_in),
            refresh_token: body.refresh_token,
        })
    }
}

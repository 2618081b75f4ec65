//! Identity Graph Client
//!
//! Direct calls to the identity graph (Microsoft Graph) with the user's token:
//! the signed-in profile for `/graphme` and file search for `/search`. These
//! bypass the backend relay but share its error type and retry policy. Both are
//! read-only, so timeouts are retried too.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::Token;
use crate::cards::{ProfileResult, SearchResultSet};
use crate::relay::{http_client, read_response, RelayError, RetryPolicy};

/// Identity graph seam used by the turn router
#[async_trait]
pub trait IdentityGraph: Send + Sync {
    /// `GET /v1.0/me`
    async fn me(&self, token: &Token) -> Result<ProfileResult, RelayError>;

    /// `POST /v1.0/search/query` for drive items matching `terms`
    async fn search(&self, token: &Token, terms: &str) -> Result<SearchResultSet, RelayError>;
}

#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(client: Client, base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Result<Self, RelayError> {
        let client = http_client(config.request_timeout)?;
        Ok(Self::new(
            client,
            config.graph_base_url.clone(),
            RetryPolicy {
                max_retries: 1,
                backoff: config.retry_backoff,
            },
        ))
    }

    /// Search request body for one drive-item query
    fn search_body(terms: &str) -> Value {
        json!({
            "requests": [{
                "entityTypes": ["driveItem"],
                "query": { "queryString": terms }
            }]
        })
    }
}

#[async_trait]
impl IdentityGraph for GraphClient {
    async fn me(&self, token: &Token) -> Result<ProfileResult, RelayError> {
        let url = format!("{}/v1.0/me", self.base_url);
        debug!("Graph GET {}", url);

        let (_, body) = self
            .retry
            .run("graph /me", true, || async {
                let response = self
                    .client
                    .get(&url)
                    .bearer_auth(token.secret())
                    .send()
                    .await?;
                read_response(response).await
            })
            .await?;

        ProfileResult::from_value(&body).map_err(|e| RelayError::Decode(e.to_string()))
    }

    async fn search(&self, token: &Token, terms: &str) -> Result<SearchResultSet, RelayError> {
        let url = format!("{}/v1.0/search/query", self.base_url);
        let request_body = Self::search_body(terms);
        debug!("Graph POST {} terms={:?}", url, terms);

        let (_, body) = self
            .retry
            .run("graph /search", true, || async {
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(token.secret())
                    .json(&request_body)
                    .send()
                    .await?;
                read_response(response).await
            })
            .await?;

        SearchResultSet::from_value(&body).map_err(|e| RelayError::Decode(e.to_string()))
    }
}

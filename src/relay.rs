//! Backend Relay Client
//!
//! Authenticated calls to the backend reasoning service (`echo`, `chat`,
//! `resetchat`, `me`). Every call carries the caller's bearer token; non-2xx
//! answers come back as [`RelayError::Status`] and the caller decides how to
//! word them for the user.
//!
//! Calls are bounded by a per-request timeout and retried once, with backoff,
//! on transport failures and gateway-style statuses (502/503/504). A timed-out
//! request may already have reached the backend, so timeouts are only retried
//! for idempotent endpoints.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::Token;

/// Relay errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl RelayError {
    /// Failures worth a second attempt for a request with the given idempotency
    pub fn is_retryable(&self, idempotent: bool) -> bool {
        match self {
            RelayError::Timeout(_) => idempotent,
            RelayError::Transport(_) => true,
            RelayError::Status { status, .. } => matches!(status, 502..=504),
            RelayError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RelayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::Timeout(e.to_string())
        } else {
            RelayError::Transport(e.to_string())
        }
    }
}

/// Logical backend endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Echo,
    Chat,
    ResetChat,
    Me,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Echo => "/echo",
            Endpoint::Chat => "/chat",
            Endpoint::ResetChat => "/resetchat",
            Endpoint::Me => "/me",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Endpoint::Me => Method::GET,
            _ => Method::POST,
        }
    }

    /// Whether the endpoint takes a `{question}` body
    pub fn takes_question(&self) -> bool {
        matches!(self, Endpoint::Echo | Endpoint::Chat)
    }

    /// Safe to send twice
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Endpoint::Me)
    }
}

/// One authenticated backend call
#[derive(Debug, Clone)]
pub struct RelayRequest<'a> {
    pub endpoint: Endpoint,
    pub payload: Option<&'a str>,
    pub token: &'a Token,
}

impl<'a> RelayRequest<'a> {
    pub fn new(endpoint: Endpoint, token: &'a Token) -> Self {
        Self {
            endpoint,
            payload: None,
            token,
        }
    }

    pub fn with_question(mut self, question: &'a str) -> Self {
        self.payload = Some(question);
        self
    }
}

/// Successful backend answer
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Serialize)]
struct QuestionBody<'a> {
    question: &'a str,
}

/// Backend relay seam used by the turn router
#[async_trait]
pub trait Relay: Send + Sync {
    async fn call(&self, request: RelayRequest<'_>) -> Result<RelayResponse, RelayError>;
}

/// Timeout and retry settings shared by the outbound clients
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op`, retrying retryable failures with linear backoff
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        idempotent: bool,
        mut op: F,
    ) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RelayError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(e) if e.is_retryable(idempotent) && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff * attempt;
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        label, e, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Build an HTTP client with the request timeout applied
pub fn http_client(timeout: Duration) -> Result<Client, RelayError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RelayError::Transport(e.to_string()))
}

/// Turn a response into `(status, json)` or a `Status` error for non-2xx.
///
/// Empty bodies read as `null`; bodies that are not JSON are kept as a string.
pub(crate) async fn read_response(response: Response) -> Result<(u16, Value), RelayError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(RelayError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok((status.as_u16(), body))
}

/// HTTP client for the backend relay
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RelayClient {
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
            config.backend_base_url.clone(),
            RetryPolicy {
                max_retries: 1,
                backoff: config.retry_backoff,
            },
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(&self, request: &RelayRequest<'_>) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, request.endpoint.path());
        let builder = self
            .client
            .request(request.endpoint.method(), url)
            .bearer_auth(request.token.secret());

        match (request.endpoint.takes_question(), request.payload) {
            // .json() also sets Content-Type: application/json
            (true, Some(question)) => builder.json(&QuestionBody { question }),
            (true, None) => builder.json(&QuestionBody { question: "" }),
            (false, _) => builder,
        }
    }
}

#[async_trait]
impl Relay for RelayClient {
    async fn call(&self, request: RelayRequest<'_>) -> Result<RelayResponse, RelayError> {
        let label = request.endpoint.path();
        debug!("Relay {} {}{}", request.endpoint.method(), self.base_url, label);

        let (status, body) = self
            .retry
            .run(label, request.endpoint.is_idempotent(), || async {
                let response = self.build(&request).send().await?;
                read_response(response).await
            })
            .await?;

        debug!("Relay {} -> {}", label, status);
        Ok(RelayResponse { status, body })
    }
}

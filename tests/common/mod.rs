//! Shared fakes for router and server tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use labbybot::auth::TokenGrant;
use labbybot::{
    Account, AuthError, CredentialProvider, Endpoint, IdentityGraph, ProfileResult, Relay,
    RelayError, RelayRequest, RelayResponse, SearchResultSet, Token, TokenSource, TurnRouter,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const USER: &str = "user-1";

/// Token source that always issues `token-for-<user>`, valid for an hour
#[derive(Default)]
pub struct StaticSource {
    pub refreshes: AtomicU32,
    pub reject: Mutex<Option<AuthError>>,
}

#[async_trait]
impl TokenSource for StaticSource {
    async fn refresh(&self, account: &Account) -> Result<TokenGrant, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.reject.lock().clone() {
            return Err(e);
        }
        Ok(TokenGrant {
            token: Token::new(
                format!("token-for-{}", account.user_id),
                Utc::now() + ChronoDuration::hours(1),
            ),
            refresh_token: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: Endpoint,
    pub payload: Option<String>,
    pub token: String,
}

/// Backend stand-in: records calls, answers with canned bodies unless overridden
#[derive(Default)]
pub struct FakeRelay {
    calls: Mutex<Vec<RecordedCall>>,
    overrides: Mutex<HashMap<Endpoint, Result<RelayResponse, RelayError>>>,
}

impl FakeRelay {
    pub fn respond(&self, endpoint: Endpoint, result: Result<RelayResponse, RelayError>) {
        self.overrides.lock().insert(endpoint, result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn call(&self, request: RelayRequest<'_>) -> Result<RelayResponse, RelayError> {
        self.calls.lock().push(RecordedCall {
            endpoint: request.endpoint,
            payload: request.payload.map(str::to_string),
            token: request.token.secret().to_string(),
        });

        if let Some(result) = self.overrides.lock().get(&request.endpoint) {
            return result.clone();
        }

        let question = request.payload.unwrap_or_default();
        let body = match request.endpoint {
            Endpoint::Chat => json!({ "result": format!("You asked: {}", question) }),
            Endpoint::Echo => json!({ "question": question }),
            Endpoint::Me => json!({ "name": "Ada", "oid": "42" }),
            Endpoint::ResetChat => Value::Null,
        };
        Ok(RelayResponse { status: 200, body })
    }
}

/// Identity graph stand-in
pub struct FakeGraph {
    pub profile: Value,
    pub search: Value,
    pub panic_on_me: bool,
}

impl Default for FakeGraph {
    fn default() -> Self {
        Self {
            profile: json!({
                "displayName": "Ada Lovelace",
                "mail": "ada@example.com",
                "preferredLanguage": "en-GB"
            }),
            search: scenario_a(),
            panic_on_me: false,
        }
    }
}

#[async_trait]
impl IdentityGraph for FakeGraph {
    async fn me(&self, _token: &Token) -> Result<ProfileResult, RelayError> {
        if self.panic_on_me {
            panic!("profile handler blew up");
        }
        ProfileResult::from_value(&self.profile).map_err(|e| RelayError::Decode(e.to_string()))
    }

    async fn search(&self, _token: &Token, _terms: &str) -> Result<SearchResultSet, RelayError> {
        SearchResultSet::from_value(&self.search).map_err(|e| RelayError::Decode(e.to_string()))
    }
}

pub fn scenario_a() -> Value {
    json!({
        "value": [{
            "searchTerms": "labby",
            "hitsContainers": [{
                "total": 1,
                "hits": [{
                    "resource": {
                        "name": "VM1",
                        "webUrl": "http://x",
                        "lastModifiedDateTime": "2024-01-01",
                        "lastModifiedBy": { "user": { "displayName": "Alice" } }
                    },
                    "summary": "a vm"
                }]
            }]
        }]
    })
}

pub struct Harness {
    pub router: TurnRouter,
    pub source: Arc<StaticSource>,
    pub relay: Arc<FakeRelay>,
}

/// Router wired to fakes, with `USER` already signed in
pub async fn harness(graph: FakeGraph) -> Harness {
    let source = Arc::new(StaticSource::default());
    let credentials = Arc::new(CredentialProvider::new(
        source.clone(),
        Duration::from_secs(300),
    ));
    credentials
        .register_account(Account::new(USER, "refresh-1"))
        .await;

    let relay = Arc::new(FakeRelay::default());
    let router = TurnRouter::new(credentials, relay.clone(), Arc::new(graph))
        .with_sign_in_link("https://bot.example.com/auth-start.html");

    Harness {
        router,
        source,
        relay,
    }
}

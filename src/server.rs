//! Bot HTTP host
//!
//! Axum front end for the turn router. Every turn runs in its own task while
//! holding its conversation's turn lock, so turns in one conversation apply in
//! arrival order and a panicking handler cannot take the server down.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::{Account, AuthError};
use crate::bot::{failure_activities, Activity, TurnContext, TurnRouter};
use crate::turn_lock::TurnLocks;

/// Inbound message from the conversational surface
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub text: String,
}

/// Completed external sign-in
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInSuccessRequest {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub refresh_token: String,
}

/// Failed external sign-in
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInFailureRequest {
    pub conversation_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub activities: Vec<Activity>,
}

/// Shared state behind every route
pub struct AppState {
    router: TurnRouter,
    locks: TurnLocks,
}

impl AppState {
    pub fn new(router: TurnRouter) -> Self {
        Self {
            router,
            locks: TurnLocks::new(),
        }
    }

    pub fn router(&self) -> &TurnRouter {
        &self.router
    }

    pub fn turn_locks(&self) -> &TurnLocks {
        &self.locks
    }

    /// Run one message turn
    pub async fn run_turn(self: &Arc<Self>, ctx: TurnContext) -> Vec<Activity> {
        let conversation_id = ctx.conversation_id.clone();
        self.run_locked(conversation_id, move |state| async move {
            state.router.run_turn(&ctx).await
        })
        .await
    }

    /// Run `work` in its own task while holding the conversation's turn lock.
    /// A panic inside `work` is answered with the generic failure replies.
    pub async fn run_locked<F, Fut>(self: &Arc<Self>, conversation_id: String, work: F) -> Vec<Activity>
    where
        F: FnOnce(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = Vec<Activity>> + Send + 'static,
    {
        let state = Arc::clone(self);
        let lock_id = conversation_id.clone();

        let task = tokio::spawn(async move {
            let _permit = match state.locks.acquire(&lock_id).await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("{}", e);
                    return failure_activities();
                }
            };
            work(state).await
        });

        let activities = match task.await {
            Ok(activities) => activities,
            Err(e) => {
                error!("[turn error] turn task for {} aborted: {}", conversation_id, e);
                self.router.conversations().release_token(&conversation_id);
                failure_activities()
            }
        };

        self.locks.prune_idle();
        activities
    }
}

/// Build the axum app
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/messages", post(messages_handler))
        .route("/api/auth/success", post(sign_in_success_handler))
        .route("/api/auth/failure", post(sign_in_failure_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessageRequest>,
) -> Json<TurnResponse> {
    let ctx = TurnContext {
        conversation_id: request.conversation_id,
        user_id: request.user_id,
        text: request.text,
    };
    let activities = state.run_turn(ctx).await;
    Json(TurnResponse { activities })
}

async fn sign_in_success_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignInSuccessRequest>,
) -> Json<TurnResponse> {
    let mut account = Account::new(request.user_id, request.refresh_token);
    if let Some(name) = request.display_name {
        account = account.with_display_name(name);
    }

    let conversation_id = request.conversation_id;
    let activities = state
        .run_locked(conversation_id.clone(), move |state| async move {
            state
                .router
                .on_sign_in_success(&conversation_id, account)
                .await
        })
        .await;
    Json(TurnResponse { activities })
}

async fn sign_in_failure_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignInFailureRequest>,
) -> Json<TurnResponse> {
    let conversation_id = request.conversation_id;
    let error = AuthError::SignInFailed(request.error);
    let activities = state
        .run_locked(conversation_id.clone(), move |state| async move {
            state.router.on_sign_in_failure(&conversation_id, &error)
        })
        .await;
    Json(TurnResponse { activities })
}

/// Serve until Ctrl+C or SIGTERM
pub async fn run(router: TurnRouter, addr: SocketAddr) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(router));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Bot listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Bot server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

//! Turn Router
//!
//! Maps each inbound message to exactly one handler and turns the outcome into a
//! list of outbound activities. Commands are matched on the raw text, exactly and
//! case-sensitively, in a fixed priority order:
//!
//! | Text | Handler |
//! |------|---------|
//! | `/reset` | reset backend chat, delete conversation state |
//! | `/signout` | forget the user's session |
//! | `/me` | backend `/me`, raw JSON |
//! | `/graphme` | identity graph profile card |
//! | anything else | count the message, relay it to backend `/chat` |
//!
//! Sign-in success and failure arrive from the external auth flow, not from
//! messages, and have their own entry points.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::auth::{Account, AuthError, CredentialProvider, Token};
use crate::cards::{render_profile, Attachment, Card, RenderError};
use crate::conversation::ConversationStore;
use crate::graph::IdentityGraph;
use crate::relay::{Endpoint, Relay, RelayError, RelayRequest};

/// Replies sent when a turn fails for an unexpected reason
pub const FAILURE_MESSAGES: [&str; 2] = [
    "The bot encountered an error or bug.",
    "Please try again in a moment.",
];

/// Outbound effect of a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    Text { text: String },
    Card { attachment: Attachment },
    SignIn { url: String },
}

impl Activity {
    pub fn text(text: impl Into<String>) -> Self {
        Activity::Text { text: text.into() }
    }

    pub fn card(card: Card) -> Self {
        Activity::Card {
            attachment: Attachment::adaptive_card(card),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Activity::Text { text } => Some(text),
            _ => None,
        }
    }
}

pub fn failure_activities() -> Vec<Activity> {
    FAILURE_MESSAGES.iter().map(|m| Activity::text(*m)).collect()
}

/// Parsed inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Reset,
    SignOut,
    Me,
    GraphMe,
    Chat(&'a str),
}

impl<'a> Command<'a> {
    /// First match wins; no trimming, no case folding
    pub fn parse(text: &'a str) -> Self {
        match text {
            "/reset" => Command::Reset,
            "/signout" => Command::SignOut,
            "/me" => Command::Me,
            "/graphme" => Command::GraphMe,
            _ => Command::Chat(text),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Reset => "reset",
            Command::SignOut => "signout",
            Command::Me => "me",
            Command::GraphMe => "graphme",
            Command::Chat(_) => "chat",
        }
    }
}

/// One inbound message
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub conversation_id: String,
    /// Active user, when the surface knows one
    pub user_id: Option<String>,
    pub text: String,
}

impl TurnContext {
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: Option<&str>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.map(str::to_string),
            text: text.into(),
        }
    }
}

/// Anything a handler can fail with
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Dispatches turns and sign-in callbacks
pub struct TurnRouter {
    credentials: Arc<CredentialProvider>,
    relay: Arc<dyn Relay>,
    graph: Arc<dyn IdentityGraph>,
    conversations: ConversationStore,
    sign_in_link: Option<String>,
}

impl TurnRouter {
    pub fn new(
        credentials: Arc<CredentialProvider>,
        relay: Arc<dyn Relay>,
        graph: Arc<dyn IdentityGraph>,
    ) -> Self {
        Self {
            credentials,
            relay,
            graph,
            conversations: ConversationStore::new(),
            sign_in_link: None,
        }
    }

    /// Link attached to sign-in prompts when a turn needs a token it cannot get
    pub fn with_sign_in_link(mut self, link: impl Into<String>) -> Self {
        self.sign_in_link = Some(link.into());
        self
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn credentials(&self) -> &CredentialProvider {
        &self.credentials
    }

    /// Process one message. Errors are reported to the user, never propagated,
    /// so the conversation carries on with the next turn.
    pub async fn run_turn(&self, ctx: &TurnContext) -> Vec<Activity> {
        let result = self.dispatch(ctx).await;
        self.conversations.release_token(&ctx.conversation_id);

        match result {
            Ok(activities) => activities,
            Err(e) => self.report(ctx, e),
        }
    }

    async fn dispatch(&self, ctx: &TurnContext) -> Result<Vec<Activity>, TurnError> {
        let command = Command::parse(&ctx.text);
        info!(
            "Turn {} [{}]: {}",
            ctx.conversation_id,
            ctx.user_id.as_deref().unwrap_or("-"),
            command.name()
        );

        match command {
            Command::Reset => self.handle_reset(ctx).await,
            Command::SignOut => self.handle_sign_out(ctx).await,
            Command::Me => self.handle_me(ctx).await,
            Command::GraphMe => self.handle_graph_me(ctx).await,
            Command::Chat(question) => self.handle_chat(ctx, question).await,
        }
    }

    /// Token for this turn, attached to the conversation until the turn ends
    async fn turn_token(&self, ctx: &TurnContext) -> Result<Token, AuthError> {
        let token = self
            .credentials
            .acquire_token(ctx.user_id.as_deref())
            .await?;
        self.conversations
            .attach_token(&ctx.conversation_id, token.clone());
        Ok(token)
    }

    async fn handle_reset(&self, ctx: &TurnContext) -> Result<Vec<Activity>, TurnError> {
        let token = self.turn_token(ctx).await?;

        let status = match self
            .relay
            .call(RelayRequest::new(Endpoint::ResetChat, &token))
            .await
        {
            Ok(response) => response.status,
            Err(RelayError::Status { status, body }) => {
                warn!("Backend reset returned {}: {}", status, body);
                status
            }
            Err(e) => return Err(e.into()),
        };

        self.conversations.delete(&ctx.conversation_id);

        Ok(vec![Activity::text(format!(
            "Ok I've deleted the current conversation state. ({})",
            status
        ))])
    }

    async fn handle_sign_out(&self, ctx: &TurnContext) -> Result<Vec<Activity>, TurnError> {
        if let Some(user_id) = ctx.user_id.as_deref() {
            self.credentials.sign_out(user_id).await;
        }
        Ok(vec![Activity::text("You have signed out")])
    }

    async fn handle_me(&self, ctx: &TurnContext) -> Result<Vec<Activity>, TurnError> {
        let token = self.turn_token(ctx).await?;
        let response = self
            .relay
            .call(RelayRequest::new(Endpoint::Me, &token))
            .await?;
        debug!("Backend /me -> {}", response.status);
        Ok(vec![Activity::text(response.body.to_string())])
    }

    async fn handle_graph_me(&self, ctx: &TurnContext) -> Result<Vec<Activity>, TurnError> {
        let token = self.turn_token(ctx).await?;
        let profile = self.graph.me(&token).await?;
        Ok(vec![Activity::card(render_profile(&profile))])
    }

    async fn handle_chat(
        &self,
        ctx: &TurnContext,
        question: &str,
    ) -> Result<Vec<Activity>, TurnError> {
        let count = self.conversations.increment(&ctx.conversation_id);
        debug!("Conversation {} message #{}", ctx.conversation_id, count);

        let token = self.turn_token(ctx).await?;
        let response = self
            .relay
            .call(RelayRequest::new(Endpoint::Chat, &token).with_question(question))
            .await?;

        Ok(vec![Activity::text(chat_result_text(&response.body))])
    }

    fn report(&self, ctx: &TurnContext, error: TurnError) -> Vec<Activity> {
        match error {
            TurnError::Auth(e) => {
                warn!("Turn {}: no token: {}", ctx.conversation_id, e);
                let mut activities = vec![Activity::text(format!("Unable to sign you in: {}", e))];
                if let Some(url) = &self.sign_in_link {
                    activities.push(Activity::SignIn { url: url.clone() });
                }
                activities
            }
            TurnError::Relay(RelayError::Status { status, body }) => {
                error!(
                    "Turn {}: backend returned {}: {}",
                    ctx.conversation_id, status, body
                );
                vec![Activity::text(format!(
                    "The backend request failed ({}): {}",
                    status, body
                ))]
            }
            other => {
                error!("[turn error] {}: {}", ctx.conversation_id, other);
                failure_activities()
            }
        }
    }

    /// External auth flow reported a successful sign-in
    pub async fn on_sign_in_success(&self, conversation_id: &str, account: Account) -> Vec<Activity> {
        let user_id = account.user_id.clone();
        self.credentials.register_account(account).await;

        match self.credentials.acquire_token(Some(&user_id)).await {
            Ok(token) => {
                info!("Sign-in complete for {} in {}", user_id, conversation_id);
                vec![
                    Activity::text("Successfully logged in"),
                    Activity::text(format!("Token string length: {}", token.secret().len())),
                    Activity::text("How can I be of assistance?"),
                ]
            }
            Err(e) => self.on_sign_in_failure(conversation_id, &e),
        }
    }

    /// Sign-in could not complete. The external flow reports this as
    /// [`AuthError::SignInFailed`], whose message is relayed verbatim.
    pub fn on_sign_in_failure(&self, conversation_id: &str, error: &AuthError) -> Vec<Activity> {
        warn!("Sign-in failed in {}: {}", conversation_id, error);
        vec![
            Activity::text("Failed to login"),
            Activity::text(format!("Error message: {}", error.user_message())),
        ]
    }
}

/// Text of the backend's `result` field
fn chat_result_text(body: &Value) -> String {
    match body.get("result") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "(no result)".to_string(),
        Some(other) => other.to_string(),
    }
}

//! Labby Bot
//!
//! Conversational front end for the Labby backend. Each inbound chat message is
//! routed to a command handler, which acquires the user's token, relays the
//! request to the backend or the identity graph, and answers with text or an
//! Adaptive Card.
//!
//! # Architecture
//!
//! ```text
//! Chat surface ──► server ──► TurnRouter ──► RelayClient ──► Backend API
//!   (HTTP)          │            │
//!                   │            ├── CredentialProvider (token cache + refresh)
//!                   │            ├── GraphClient (profile, search)
//!                   │            ├── ConversationStore (per-thread state)
//!                   │            └── cards (Adaptive Card rendering)
//!                   └── TurnLocks (one turn per conversation at a time)
//! ```

pub mod auth;
pub mod bot;
pub mod cards;
pub mod config;
pub mod conversation;
pub mod graph;
pub mod relay;
pub mod server;
pub mod turn_lock;

pub use auth::{Account, AuthError, CredentialProvider, OAuthRefreshSource, Token, TokenSource};
pub use bot::{Activity, Command, TurnContext, TurnError, TurnRouter};
pub use cards::{render_profile, render_search_results, Card, ProfileResult, SearchResultSet};
pub use config::Config;
pub use conversation::{ConversationRecord, ConversationStore};
pub use graph::{GraphClient, IdentityGraph};
pub use relay::{Endpoint, Relay, RelayClient, RelayError, RelayRequest, RelayResponse, RetryPolicy};
pub use turn_lock::TurnLocks;

//! Conversation State Store
//!
//! One small record per chat thread, keyed by conversation id. Records are
//! created lazily on first access and removed outright on reset; a later access
//! builds a brand-new record (new `instance`) rather than reusing the old one.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Token;

/// Per-conversation state
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    /// Non-command messages seen since the record was created
    pub message_count: u64,
    /// Token attached for the turn in progress
    pub auth_token: Option<Token>,
    /// Identity of this record; changes when the record is re-created
    pub instance: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            message_count: 0,
            auth_token: None,
            instance: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

/// In-memory conversation store
#[derive(Default)]
pub struct ConversationStore {
    records: Mutex<HashMap<String, ConversationRecord>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the record, creating a zeroed one on first access
    pub fn get(&self, id: &str) -> ConversationRecord {
        self.records
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!("Conversation record created: {}", id);
                ConversationRecord::new(id)
            })
            .clone()
    }

    /// Bump the message counter, returning the new value
    pub fn increment(&self, id: &str) -> u64 {
        let mut records = self.records.lock();
        let record = records
            .entry(id.to_string())
            .or_insert_with(|| ConversationRecord::new(id));
        record.message_count = record.message_count.saturating_add(1);
        record.message_count
    }

    /// Remove the record entirely
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.records.lock().remove(id).is_some();
        info!("Conversation state deleted: {} (existed: {})", id, removed);
        removed
    }

    pub fn attach_token(&self, id: &str, token: Token) {
        let mut records = self.records.lock();
        let record = records
            .entry(id.to_string())
            .or_insert_with(|| ConversationRecord::new(id));
        record.auth_token = Some(token);
    }

    /// Drop the turn token. Does not create a record.
    pub fn release_token(&self, id: &str) {
        if let Some(record) = self.records.lock().get_mut(id) {
            record.auth_token = None;
        }
    }

}

//! Trait abstractions for runtime I/O
//!
//! These traits let the executor run against SQLite, memory, or test doubles.

use crate::db::{ConversationRecord, Database, DbError, InstanceRecord, TurnWrites};
use async_trait::async_trait;
use std::sync::Arc;

/// Durable storage of conversation trees
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// The open conversation, if any
    async fn get_conversation(&self, conv_id: &str) -> Result<Option<ConversationRecord>, String>;

    /// Delete the conversation and every instance in it
    async fn close_conversation(&self, conv_id: &str) -> Result<(), String>;

    /// All live instances, in creation order
    async fn load_instances(&self, conv_id: &str) -> Result<Vec<InstanceRecord>, String>;

    /// Apply one turn's writes atomically. Opening fails if the
    /// conversation is already open; deleting a missing instance does not.
    async fn apply_turn(&self, conv_id: &str, writes: &TurnWrites) -> Result<(), String>;
}

/// Outbound side of the transport
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn send_activity(&self, conv_id: &str, text: &str) -> Result<(), String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: InstanceStore + ?Sized> InstanceStore for Arc<T> {
    async fn get_conversation(&self, conv_id: &str) -> Result<Option<ConversationRecord>, String> {
        (**self).get_conversation(conv_id).await
    }

    async fn close_conversation(&self, conv_id: &str) -> Result<(), String> {
        (**self).close_conversation(conv_id).await
    }

    async fn load_instances(&self, conv_id: &str) -> Result<Vec<InstanceRecord>, String> {
        (**self).load_instances(conv_id).await
    }

    async fn apply_turn(&self, conv_id: &str, writes: &TurnWrites) -> Result<(), String> {
        (**self).apply_turn(conv_id, writes).await
    }
}

#[async_trait]
impl<T: ActivitySink + ?Sized> ActivitySink for Arc<T> {
    async fn send_activity(&self, conv_id: &str, text: &str) -> Result<(), String> {
        (**self).send_activity(conv_id, text).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as an `InstanceStore`
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl InstanceStore for DatabaseStore {
    async fn get_conversation(&self, conv_id: &str) -> Result<Option<ConversationRecord>, String> {
        match self.db.get_conversation(conv_id) {
            Ok(record) => Ok(Some(record)),
            Err(DbError::ConversationNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn close_conversation(&self, conv_id: &str) -> Result<(), String> {
        self.db.close_conversation(conv_id).map_err(|e| e.to_string())
    }

    async fn load_instances(&self, conv_id: &str) -> Result<Vec<InstanceRecord>, String> {
        self.db.load_instances(conv_id).map_err(|e| e.to_string())
    }

    async fn apply_turn(&self, conv_id: &str, writes: &TurnWrites) -> Result<(), String> {
        self.db.apply_turn(conv_id, writes).map_err(|e| e.to_string())
    }
}

//! In-memory instance store

use super::traits::InstanceStore;
use crate::db::{ConversationRecord, InstanceRecord, TurnWrites};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredConversation {
    record: ConversationRecord,
    /// Creation order
    instances: Vec<InstanceRecord>,
}

/// Process-local store; contents are lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, StoredConversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredConversation>>, String> {
        self.conversations
            .lock()
            .map_err(|_| "memory store lock poisoned".to_string())
    }

    /// Ids of every open conversation
    pub fn conversation_ids(&self) -> Result<Vec<String>, String> {
        let mut ids: Vec<_> = self.lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get_conversation(&self, conv_id: &str) -> Result<Option<ConversationRecord>, String> {
        Ok(self.lock()?.get(conv_id).map(|c| c.record.clone()))
    }

    async fn close_conversation(&self, conv_id: &str) -> Result<(), String> {
        self.lock()?
            .remove(conv_id)
            .map(|_| ())
            .ok_or_else(|| format!("Conversation not found: {conv_id}"))
    }

    async fn load_instances(&self, conv_id: &str) -> Result<Vec<InstanceRecord>, String> {
        Ok(self
            .lock()?
            .get(conv_id)
            .map(|c| c.instances.clone())
            .unwrap_or_default())
    }

    async fn apply_turn(&self, conv_id: &str, writes: &TurnWrites) -> Result<(), String> {
        let mut conversations = self.lock()?;

        if writes.close {
            return conversations
                .remove(conv_id)
                .map(|_| ())
                .ok_or_else(|| format!("Conversation not found: {conv_id}"));
        }

        // Stage on a copy; the map only changes once every write succeeded
        let mut conversation = match &writes.open {
            Some(_) if conversations.contains_key(conv_id) => {
                return Err(format!("Conversation already open: {conv_id}"));
            }
            Some(record) => StoredConversation {
                record: record.clone(),
                instances: Vec::new(),
            },
            None => conversations
                .get(conv_id)
                .cloned()
                .ok_or_else(|| format!("Conversation not found: {conv_id}"))?,
        };

        for record in &writes.persist {
            match conversation.instances.iter_mut().find(|i| i.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => conversation.instances.push(record.clone()),
            }
        }
        conversation
            .instances
            .retain(|i| !writes.delete.contains(&i.id));
        conversation.record.updated_at = Utc::now();

        conversations.insert(conv_id.to_string(), conversation);
        Ok(())
    }
}

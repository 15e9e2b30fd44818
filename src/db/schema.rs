//! Database schema and persisted record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    root_instance_id TEXT NOT NULL,
    root_topic TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS topic_instances (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    topic_name TEXT NOT NULL,
    parent_id TEXT,
    state TEXT NOT NULL,
    child_instance_id TEXT,
    return_args TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_instances_conversation ON topic_instances(conversation_id, created_at);
";

/// One open conversation and the root of its topic tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub root_instance_id: String,
    pub root_topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(
        conversation_id: impl Into<String>,
        root_instance_id: impl Into<String>,
        root_topic: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            root_instance_id: root_instance_id.into(),
            root_topic: root_topic.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted shape of one topic instance
///
/// `parent_id` is the completion continuation: when the instance returns,
/// the runtime hands `return_args` to the parent's `on_child_return`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub topic_name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub state: Value,
    #[serde(default)]
    pub child_instance_id: Option<String>,
    #[serde(default)]
    pub return_args: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Whether the instance has already handed a result to its invoker
    pub fn has_returned(&self) -> bool {
        self.return_args.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A conversation together with every live instance in its tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSnapshot {
    pub conversation: ConversationRecord,
    pub instances: Vec<InstanceRecord>,
}

impl ConversationSnapshot {
    pub fn instance(&self, id: &str) -> Option<&InstanceRecord> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn root(&self) -> Option<&InstanceRecord> {
        self.instance(&self.conversation.root_instance_id)
    }

    /// Walk child links from the root down to the deepest active instance
    pub fn active_leaf(&self) -> Option<&InstanceRecord> {
        let mut current = self.root()?;
        while let Some(child_id) = &current.child_instance_id {
            match self.instance(child_id) {
                Some(child) => current = child,
                None => break,
            }
        }
        Some(current)
    }
}

/// Every store write of one turn, applied all or nothing
///
/// `close` drops the whole conversation; a closing batch carries no other
/// writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnWrites {
    pub open: Option<ConversationRecord>,
    pub persist: Vec<InstanceRecord>,
    pub delete: Vec<String>,
    pub close: bool,
}

impl TurnWrites {
    pub fn is_empty(&self) -> bool {
        self.open.is_none() && self.persist.is_empty() && self.delete.is_empty() && !self.close
    }
}

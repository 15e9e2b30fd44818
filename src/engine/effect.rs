//! Effects produced by a finished turn

use crate::db::{ConversationRecord, InstanceRecord};
use serde_json::Value;

/// Effects to be executed once a turn has run to completion
///
/// Topic callbacks never touch the store or the transport directly; the
/// runtime applies these in order after the synchronous pass succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Record a newly started conversation and its root
    OpenConversation { record: ConversationRecord },

    /// Persist a created or changed instance
    PersistInstance { record: InstanceRecord },

    /// Remove an instance that returned to its parent
    DeleteInstance { instance_id: String },

    /// The root returned; drop the whole tree
    CloseConversation { return_args: Value },

    /// Send a message back through the transport
    SendActivity { text: String },
}

impl Effect {
    pub fn send(text: impl Into<String>) -> Self {
        Effect::SendActivity { text: text.into() }
    }

    /// Text payload if this is an outbound message
    pub fn outbound_text(&self) -> Option<&str> {
        match self {
            Effect::SendActivity { text } => Some(text),
            _ => None,
        }
    }

    /// Whether the effect writes to the instance store
    pub fn touches_store(&self) -> bool {
        !matches!(self, Effect::SendActivity { .. })
    }
}

//! Inbound activities delivered to a conversation

use serde::{Deserialize, Serialize};

/// Kind of inbound activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[default]
    Message,
    ConversationUpdate,
    Event,
}

/// One inbound turn from the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default)]
    pub kind: ActivityKind,
    #[serde(default)]
    pub text: Option<String>,
}

impl Activity {
    /// A user message carrying text
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: ActivityKind::Message,
            text: Some(text.into()),
        }
    }

    /// A non-message activity (typing, membership change, ...)
    pub fn of_kind(kind: ActivityKind) -> Self {
        Self { kind, text: None }
    }

    pub fn is_message(&self) -> bool {
        self.kind == ActivityKind::Message
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

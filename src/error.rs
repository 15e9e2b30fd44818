//! Error types for topic execution
//!
//! Every error raised while a turn is being processed is fatal to that turn:
//! the runtime discards the turn's working set and surfaces the error to
//! whoever called `dispatch`.

use thiserror::Error;

/// Result alias used by topic callbacks
pub type TopicResult<T> = Result<T, TopicError>;

/// Errors raised by topics and the turn machinery
#[derive(Debug, Error)]
pub enum TopicError {
    /// A schema field carries a type tag that has no validator
    #[error("not expecting type \"{0}\"")]
    UnsupportedFieldType(String),

    /// Orchestration logic broke one of its own invariants
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// A prompt used its whole turn budget without a valid reply
    #[error("Prompt for field `{field}` exhausted after {turns} turns")]
    PromptExhausted { field: String, turns: u32 },

    #[error("Topic not registered: {0}")]
    UnknownTopic(String),

    #[error("Topic already registered: {0}")]
    DuplicateTopic(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Persisted state did not match the topic's state type
    #[error("State codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TopicError {
    /// Short classification used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            TopicError::UnsupportedFieldType(_) => "schema",
            TopicError::Protocol(_) => "protocol",
            TopicError::PromptExhausted { .. } => "prompt_exhausted",
            TopicError::UnknownTopic(_) | TopicError::DuplicateTopic(_) => "registry",
            TopicError::InstanceNotFound(_) => "missing_instance",
            TopicError::Codec(_) => "codec",
        }
    }
}

/// Invariant breaches inside the orchestration itself, never caused by user input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("instance {instance_id} received a turn with no active child")]
    NoActiveChild { instance_id: String },

    #[error("instance {instance_id} already returned to its parent")]
    AlreadyReturned { instance_id: String },

    #[error("instance {instance_id} returned while child {child_id} is still active")]
    ReturnedWithActiveChild {
        instance_id: String,
        child_id: String,
    },

    #[error("instance {instance_id} already has active child {existing}")]
    ChildAlreadySet {
        instance_id: String,
        existing: String,
    },

    #[error("topic {parent} has no handler for returns from {child}")]
    UnhandledChildReturn { parent: String, child: String },

    #[error("child returned a value for unknown field `{field}`")]
    UnknownField { field: String },

    #[error("prompt {instance_id} is not awaiting a reply (phase: {phase})")]
    PromptNotAwaiting { instance_id: String, phase: String },
}

//! Topical - hierarchical, turn-based dialog composition
//!
//! Dialogs are trees of topic instances. Each inbound activity is dispatched
//! to the deepest active child; children hand results back to their parents,
//! which decide what to do next within the same turn. Instance state is
//! persisted between turns so a conversation can resume in a fresh process.

pub mod composite;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod form;
pub mod prompt;
pub mod runtime;
pub mod topic;

pub use composite::{ChildReturns, CompletedChild};
pub use config::EngineConfig;
pub use db::{ConversationRecord, ConversationSnapshot, Database, InstanceRecord, TurnWrites};
pub use engine::{Activity, ActivityKind, Turn};
pub use error::{ProtocolViolation, TopicError, TopicResult};
pub use form::{FieldMetadata, FieldType, Schema, SimpleForm, SimpleFormInitArgs, SimpleFormReturn};
pub use prompt::{Prompt, PromptResult, PromptReturn, TextPrompt, TextValidator, Validator};
pub use runtime::{
    ActivitySink, ConversationHandle, ConversationRuntime, DatabaseStore, InstanceStore,
    MemoryStore, RuntimeError, RuntimeManager, TurnOutcome,
};
pub use topic::{AnyTopic, Instance, Topic, TopicInstance, TopicRegistry};

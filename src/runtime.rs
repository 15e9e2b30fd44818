//! Runtime for executing conversations
//!
//! One tokio task per conversation serializes its turns; conversations run
//! independently of each other.

mod executor;
mod memory;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use memory::MemoryStore;
pub use traits::*;

use crate::config::EngineConfig;
use crate::db::ConversationSnapshot;
use crate::engine::Activity;
use crate::error::TopicError;
use crate::topic::TopicRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Errors surfaced to whoever drives a conversation
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("No open conversation: {0}")]
    NoActiveConversation(String),

    #[error("Conversation already open: {0}")]
    ConversationActive(String),

    #[error("Conversation runtime stopped")]
    RuntimeStopped,
}

/// What one turn produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Messages sent through the sink, in order
    pub sent: Vec<String>,
    /// Messages not sent because the sink failed; the turn itself committed
    pub undelivered: Vec<String>,
    pub delivery_error: Option<String>,
    /// Root return value when the conversation finished this turn
    pub completed: Option<Value>,
}

impl TurnOutcome {
    pub fn is_complete(&self) -> bool {
        self.completed.is_some()
    }

    /// Whether every outbound message reached the sink
    pub fn is_delivered(&self) -> bool {
        self.delivery_error.is_none()
    }

    /// Decode the root's return value
    pub fn completed_as<R: DeserializeOwned>(&self) -> Result<Option<R>, serde_json::Error> {
        self.completed
            .clone()
            .map(serde_json::from_value)
            .transpose()
    }
}

/// Requests served by a conversation task
#[derive(Debug)]
pub enum TurnRequest {
    Start {
        topic_name: String,
        init_args: Value,
        reply: oneshot::Sender<Result<TurnOutcome, RuntimeError>>,
    },
    Deliver {
        activity: Activity,
        reply: oneshot::Sender<Result<TurnOutcome, RuntimeError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<Option<ConversationSnapshot>, RuntimeError>>,
    },
}

/// Handle to interact with a running conversation
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    conversation_id: String,
    request_tx: mpsc::Sender<TurnRequest>,
}

impl ConversationHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn start(
        &self,
        topic_name: &str,
        init_args: Value,
    ) -> Result<TurnOutcome, RuntimeError> {
        self.request(|reply| TurnRequest::Start {
            topic_name: topic_name.to_string(),
            init_args,
            reply,
        })
        .await?
    }

    pub async fn deliver(&self, activity: Activity) -> Result<TurnOutcome, RuntimeError> {
        self.request(|reply| TurnRequest::Deliver { activity, reply })
            .await?
    }

    pub async fn reset(&self) -> Result<(), RuntimeError> {
        self.request(|reply| TurnRequest::Reset { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<Option<ConversationSnapshot>, RuntimeError> {
        self.request(|reply| TurnRequest::Snapshot { reply }).await?
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> TurnRequest,
    ) -> Result<T, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RuntimeError::RuntimeStopped)?;
        reply_rx.await.map_err(|_| RuntimeError::RuntimeStopped)
    }
}

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    registry: Arc<TopicRegistry>,
    store: Arc<dyn InstanceStore>,
    sink: Arc<dyn ActivitySink>,
    config: EngineConfig,
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
}

impl RuntimeManager {
    pub fn new(
        registry: TopicRegistry,
        store: Arc<dyn InstanceStore>,
        sink: Arc<dyn ActivitySink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            sink,
            config,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Get or create the runtime task for a conversation
    pub async fn get_or_create(&self, conversation_id: &str) -> ConversationHandle {
        if let Some(handle) = self.runtimes.read().await.get(conversation_id) {
            return handle.clone();
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have won the race for the write lock
        if let Some(handle) = runtimes.get(conversation_id) {
            return handle.clone();
        }

        let (request_tx, request_rx) = mpsc::channel(self.config.channel_capacity);
        let runtime = ConversationRuntime::new(
            conversation_id,
            self.registry.clone(),
            self.store.clone(),
            self.sink.clone(),
        )
        .with_reset_on_error(self.config.reset_on_error);

        let conv_id = conversation_id.to_string();
        tokio::spawn(async move {
            runtime.run(request_rx).await;
            tracing::debug!(conv_id = %conv_id, "Conversation task finished");
        });

        let handle = ConversationHandle {
            conversation_id: conversation_id.to_string(),
            request_tx,
        };
        runtimes.insert(conversation_id.to_string(), handle.clone());
        handle
    }

    /// Start `topic_name` as the root of a new conversation
    pub async fn start(
        &self,
        conversation_id: &str,
        topic_name: &str,
        init_args: Value,
    ) -> Result<TurnOutcome, RuntimeError> {
        let handle = self.get_or_create(conversation_id).await;
        let result = handle.start(topic_name, init_args).await;
        self.settle(conversation_id, &result).await;
        result
    }

    /// Deliver an inbound activity to a conversation
    pub async fn deliver(
        &self,
        conversation_id: &str,
        activity: Activity,
    ) -> Result<TurnOutcome, RuntimeError> {
        let handle = self.get_or_create(conversation_id).await;
        let result = handle.deliver(activity).await;
        self.settle(conversation_id, &result).await;
        result
    }

    /// Discard a conversation's tree and stop its task
    pub async fn reset(&self, conversation_id: &str) -> Result<(), RuntimeError> {
        let handle = self.get_or_create(conversation_id).await;
        let result = handle.reset().await;
        self.evict(conversation_id).await;
        result
    }

    pub async fn snapshot(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSnapshot>, RuntimeError> {
        self.get_or_create(conversation_id).await.snapshot().await
    }

    /// Conversations with a running task, sorted
    pub async fn active_conversations(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.runtimes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop the task once its conversation can no longer be open. A turn
    /// whose messages were not delivered still committed, so it only closes
    /// the conversation if the root completed.
    async fn settle(&self, conversation_id: &str, result: &Result<TurnOutcome, RuntimeError>) {
        let closed = match result {
            Ok(outcome) => outcome.is_complete(),
            Err(RuntimeError::Topic(_)) => self.config.reset_on_error,
            Err(RuntimeError::RuntimeStopped) => true,
            Err(_) => false,
        };
        if closed {
            self.evict(conversation_id).await;
        }
    }

    async fn evict(&self, conversation_id: &str) {
        if self.runtimes.write().await.remove(conversation_id).is_some() {
            tracing::debug!(conv_id = %conversation_id, "Evicted conversation runtime");
        }
    }
}

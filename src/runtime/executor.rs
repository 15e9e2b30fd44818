//! Conversation runtime executor

use super::traits::{ActivitySink, InstanceStore};
use super::{RuntimeError, TurnOutcome, TurnRequest};
use crate::db::{ConversationRecord, ConversationSnapshot, InstanceRecord, TurnWrites};
use crate::engine::{Activity, Effect, Turn, TurnResult};
use crate::error::{TopicError, TopicResult};
use crate::topic::TopicRegistry;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Runs turns for one conversation against any store and sink
pub struct ConversationRuntime<S, A>
where
    S: InstanceStore + 'static,
    A: ActivitySink + 'static,
{
    conversation_id: String,
    registry: Arc<TopicRegistry>,
    store: S,
    sink: A,
    /// Drop the whole tree when a turn fails
    reset_on_error: bool,
}

impl<S, A> ConversationRuntime<S, A>
where
    S: InstanceStore + 'static,
    A: ActivitySink + 'static,
{
    pub fn new(
        conversation_id: impl Into<String>,
        registry: Arc<TopicRegistry>,
        store: S,
        sink: A,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            registry,
            store,
            sink,
            reset_on_error: true,
        }
    }

    #[must_use]
    pub fn with_reset_on_error(mut self, reset_on_error: bool) -> Self {
        self.reset_on_error = reset_on_error;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Serve requests in arrival order until every sender is gone
    pub async fn run(self, mut request_rx: mpsc::Receiver<TurnRequest>) {
        tracing::info!(conv_id = %self.conversation_id, "Starting conversation runtime");

        while let Some(request) = request_rx.recv().await {
            match request {
                TurnRequest::Start {
                    topic_name,
                    init_args,
                    reply,
                } => {
                    let _ = reply.send(self.start(&topic_name, init_args).await);
                }
                TurnRequest::Deliver { activity, reply } => {
                    let _ = reply.send(self.deliver(activity).await);
                }
                TurnRequest::Reset { reply } => {
                    let _ = reply.send(self.reset().await);
                }
                TurnRequest::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot().await);
                }
            }
        }

        tracing::info!(conv_id = %self.conversation_id, "Conversation runtime stopped");
    }

    /// Create the root topic and run its first turn
    pub async fn start(
        &self,
        topic_name: &str,
        init_args: Value,
    ) -> Result<TurnOutcome, RuntimeError> {
        if self.open_conversation().await?.is_some() {
            return Err(RuntimeError::ConversationActive(self.conversation_id.clone()));
        }

        tracing::info!(
            conv_id = %self.conversation_id,
            topic = %topic_name,
            "Starting conversation"
        );
        match self.run_start(topic_name, init_args) {
            Ok(result) => self.execute_effects(result).await,
            // Nothing was stored yet, so there is no tree to reset
            Err(e) => {
                tracing::error!(
                    conv_id = %self.conversation_id,
                    kind = e.kind(),
                    error = %e,
                    "Starting turn failed"
                );
                Err(e.into())
            }
        }
    }

    /// Deliver one inbound activity to the open conversation
    pub async fn deliver(&self, activity: Activity) -> Result<TurnOutcome, RuntimeError> {
        let conversation = self
            .open_conversation()
            .await?
            .ok_or_else(|| RuntimeError::NoActiveConversation(self.conversation_id.clone()))?;
        let records = self
            .store
            .load_instances(&self.conversation_id)
            .await
            .map_err(RuntimeError::Store)?;

        tracing::debug!(
            conv_id = %self.conversation_id,
            instances = records.len(),
            kind = ?activity.kind,
            "Delivering activity"
        );
        match self.run_receive(&conversation.root_instance_id, records, activity) {
            Ok(result) => self.execute_effects(result).await,
            Err(e) => Err(self.fail_turn(e).await),
        }
    }

    /// Discard the open conversation and its whole tree
    pub async fn reset(&self) -> Result<(), RuntimeError> {
        if self.open_conversation().await?.is_none() {
            return Err(RuntimeError::NoActiveConversation(self.conversation_id.clone()));
        }
        self.store
            .close_conversation(&self.conversation_id)
            .await
            .map_err(RuntimeError::Store)?;
        tracing::info!(conv_id = %self.conversation_id, "Conversation reset");
        Ok(())
    }

    /// The persisted tree, if a conversation is open
    pub async fn snapshot(&self) -> Result<Option<ConversationSnapshot>, RuntimeError> {
        let Some(conversation) = self.open_conversation().await? else {
            return Ok(None);
        };
        let instances = self
            .store
            .load_instances(&self.conversation_id)
            .await
            .map_err(RuntimeError::Store)?;
        Ok(Some(ConversationSnapshot {
            conversation,
            instances,
        }))
    }

    async fn open_conversation(&self) -> Result<Option<ConversationRecord>, RuntimeError> {
        self.store
            .get_conversation(&self.conversation_id)
            .await
            .map_err(RuntimeError::Store)
    }

    fn run_start(&self, topic_name: &str, init_args: Value) -> TopicResult<TurnResult> {
        let mut turn = Turn::starting(self.conversation_id.clone(), &self.registry);
        turn.start_root(topic_name, init_args)?;
        Ok(turn.finish())
    }

    fn run_receive(
        &self,
        root_id: &str,
        records: Vec<InstanceRecord>,
        activity: Activity,
    ) -> TopicResult<TurnResult> {
        let mut turn = Turn::receiving(
            self.conversation_id.clone(),
            &self.registry,
            records,
            activity,
        );
        turn.receive(root_id)?;
        Ok(turn.finish())
    }

    /// Log a failed turn and apply the reset policy
    async fn fail_turn(&self, error: TopicError) -> RuntimeError {
        tracing::error!(
            conv_id = %self.conversation_id,
            kind = error.kind(),
            error = %error,
            reset = self.reset_on_error,
            "Turn failed"
        );
        if self.reset_on_error {
            if let Err(e) = self.store.close_conversation(&self.conversation_id).await {
                tracing::warn!(
                    conv_id = %self.conversation_id,
                    error = %e,
                    "Failed to reset conversation"
                );
            }
        }
        error.into()
    }

    /// Commit the turn's writes in one batch, then send its messages
    ///
    /// Once the writes are committed the turn has happened. A sink failure
    /// stops sending and is reported in the outcome along with the unsent
    /// texts, in order.
    async fn execute_effects(&self, result: TurnResult) -> Result<TurnOutcome, RuntimeError> {
        let conv_id = self.conversation_id.as_str();
        let mut writes = TurnWrites::default();
        let mut outbound = Vec::new();

        for effect in result.effects {
            match effect {
                Effect::OpenConversation { record } => writes.open = Some(record),
                Effect::PersistInstance { record } => writes.persist.push(record),
                Effect::DeleteInstance { instance_id } => writes.delete.push(instance_id),
                Effect::CloseConversation { .. } => writes.close = true,
                Effect::SendActivity { text } => outbound.push(text),
            }
        }

        if !writes.is_empty() {
            self.store
                .apply_turn(conv_id, &writes)
                .await
                .map_err(RuntimeError::Store)?;
        }
        if result.completed.is_some() {
            tracing::info!(conv_id = %conv_id, "Conversation completed");
        }

        let mut outcome = TurnOutcome {
            completed: result.completed,
            ..TurnOutcome::default()
        };
        let mut outbound = outbound.into_iter();
        for text in outbound.by_ref() {
            if let Err(e) = self.sink.send_activity(conv_id, &text).await {
                tracing::warn!(
                    conv_id = %conv_id,
                    error = %e,
                    "Failed to send activity, turn already committed"
                );
                outcome.undelivered.push(text);
                outcome.delivery_error = Some(e);
                break;
            }
            outcome.sent.push(text);
        }
        outcome.undelivered.extend(outbound);
        Ok(outcome)
    }
}

//! Test doubles and fixtures
//!
//! Sinks and stores for driving the executor, a synchronous turn driver for
//! engine tests, and small topics that exercise the child protocol.

use super::memory::MemoryStore;
use super::traits::{ActivitySink, InstanceStore};
use crate::composite::{ChildReturns, CompletedChild};
use crate::db::{ConversationRecord, ConversationSnapshot, InstanceRecord, TurnWrites};
use crate::engine::{Activity, Effect, Turn, TurnResult};
use crate::error::TopicResult;
use crate::form::{FieldMetadata, Schema, SimpleFormInitArgs};
use crate::topic::{AnyTopic, Instance, Topic, TopicRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fixtures
// ============================================================================

pub fn name_city_schema() -> Schema {
    Schema::new()
        .field("name", FieldMetadata::string("What is your name?"))
        .field("city", FieldMetadata::string("What city?"))
}

pub fn form_init_args() -> Value {
    serde_json::to_value(SimpleFormInitArgs {
        schema: name_city_schema(),
    })
    .unwrap()
}

// ============================================================================
// Sinks
// ============================================================================

/// Sink that records every outbound message
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent to one conversation, in order
    pub fn texts(&self, conv_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == conv_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ActivitySink for RecordingSink {
    async fn send_activity(&self, conv_id: &str, text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((conv_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Sink whose transport is gone
pub struct FailingSink;

#[async_trait]
impl ActivitySink for FailingSink {
    async fn send_activity(&self, _conv_id: &str, _text: &str) -> Result<(), String> {
        Err("transport closed".to_string())
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Store where every call fails
pub struct FailingStore;

#[async_trait]
impl InstanceStore for FailingStore {
    async fn get_conversation(&self, _conv_id: &str) -> Result<Option<ConversationRecord>, String> {
        Err("store unavailable".to_string())
    }

    async fn close_conversation(&self, _conv_id: &str) -> Result<(), String> {
        Err("store unavailable".to_string())
    }

    async fn load_instances(&self, _conv_id: &str) -> Result<Vec<InstanceRecord>, String> {
        Err("store unavailable".to_string())
    }

    async fn apply_turn(&self, _conv_id: &str, _writes: &TurnWrites) -> Result<(), String> {
        Err("store unavailable".to_string())
    }
}

/// Memory store whose `fail_on`-th write batch fails, counting from one
pub struct FlakyStore {
    inner: MemoryStore,
    fail_on: usize,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_on(fail_on: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InstanceStore for FlakyStore {
    async fn get_conversation(&self, conv_id: &str) -> Result<Option<ConversationRecord>, String> {
        self.inner.get_conversation(conv_id).await
    }

    async fn close_conversation(&self, conv_id: &str) -> Result<(), String> {
        self.inner.close_conversation(conv_id).await
    }

    async fn load_instances(&self, conv_id: &str) -> Result<Vec<InstanceRecord>, String> {
        self.inner.load_instances(conv_id).await
    }

    async fn apply_turn(&self, conv_id: &str, writes: &TurnWrites) -> Result<(), String> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err("disk full".to_string());
        }
        self.inner.apply_turn(conv_id, writes).await
    }
}

// ============================================================================
// Turn Driver
// ============================================================================

/// Runs turns synchronously and applies their effects to an in-memory tree
///
/// A failed turn leaves the tree untouched, like the runtime without reset.
pub struct TurnDriver<'a> {
    registry: &'a TopicRegistry,
    conversation: Option<ConversationRecord>,
    instances: Vec<InstanceRecord>,
    sent: Vec<String>,
}

impl<'a> TurnDriver<'a> {
    pub const CONVERSATION_ID: &'static str = "conv";

    pub fn new(registry: &'a TopicRegistry) -> Self {
        Self {
            registry,
            conversation: None,
            instances: Vec::new(),
            sent: Vec::new(),
        }
    }

    pub fn start(&mut self, topic_name: &str, args: Value) -> TopicResult<TurnResult> {
        let mut turn = Turn::starting(Self::CONVERSATION_ID, self.registry);
        turn.start_root(topic_name, args)?;
        let result = turn.finish();
        self.apply(&result);
        Ok(result)
    }

    pub fn deliver(&mut self, activity: Activity) -> TopicResult<TurnResult> {
        let root_id = self
            .root_id()
            .expect("no open conversation to deliver to")
            .to_string();
        let mut turn = Turn::receiving(
            Self::CONVERSATION_ID,
            self.registry,
            self.instances.clone(),
            activity,
        );
        turn.receive(&root_id)?;
        let result = turn.finish();
        self.apply(&result);
        Ok(result)
    }

    pub fn say(&mut self, text: &str) -> TopicResult<TurnResult> {
        self.deliver(Activity::message(text))
    }

    /// Every message sent so far
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    pub fn instances(&self) -> Vec<InstanceRecord> {
        self.instances.clone()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.conversation
            .as_ref()
            .map(|c| c.root_instance_id.as_str())
    }

    pub fn snapshot(&self) -> Option<ConversationSnapshot> {
        self.conversation.clone().map(|conversation| ConversationSnapshot {
            conversation,
            instances: self.instances.clone(),
        })
    }

    pub fn root(&self) -> Option<InstanceRecord> {
        self.snapshot()?.root().cloned()
    }

    pub fn active_leaf(&self) -> Option<InstanceRecord> {
        self.snapshot()?.active_leaf().cloned()
    }

    fn apply(&mut self, result: &TurnResult) {
        for effect in &result.effects {
            match effect {
                Effect::OpenConversation { record } => self.conversation = Some(record.clone()),
                Effect::PersistInstance { record } => {
                    match self.instances.iter_mut().find(|i| i.id == record.id) {
                        Some(existing) => *existing = record.clone(),
                        None => self.instances.push(record.clone()),
                    }
                }
                Effect::DeleteInstance { instance_id } => {
                    self.instances.retain(|i| &i.id != instance_id);
                }
                Effect::CloseConversation { .. } => {
                    self.conversation = None;
                    self.instances.clear();
                }
                Effect::SendActivity { text } => self.sent.push(text.clone()),
            }
        }
    }
}

// ============================================================================
// Topics
// ============================================================================

/// Leaf that returns its init args straight away
pub struct ImmediateTopic;

impl ImmediateTopic {
    pub const NAME: &'static str = "immediate";
}

impl Topic for ImmediateTopic {
    type InitArgs = Value;
    type State = ();
    type ReturnArgs = Value;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn init(
        &self,
        turn: &mut Turn<'_>,
        instance: &mut Instance<Self>,
        args: Value,
    ) -> TopicResult<()> {
        turn.return_to_parent(instance, args)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoArgs {
    pub echo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Echoed {
    pub echoed: String,
}

/// Composite that spawns an [`ImmediateTopic`] and returns what it got back
pub struct NestingTopic {
    child: Arc<ImmediateTopic>,
    child_returns: ChildReturns<NestingTopic>,
}

impl NestingTopic {
    pub const NAME: &'static str = "nesting";

    pub fn new() -> Self {
        Self {
            child: Arc::new(ImmediateTopic),
            child_returns: ChildReturns::new()
                .on_child_return(ImmediateTopic::NAME, echo_back),
        }
    }
}

fn echo_back(
    _topic: &NestingTopic,
    turn: &mut Turn<'_>,
    instance: &mut Instance<NestingTopic>,
    child: CompletedChild,
) -> TopicResult<()> {
    assert_eq!(instance.child_id(), Some(child.id.as_str()));
    let echoed: String = child.args()?;
    instance.clear_child();
    turn.return_to_parent(instance, Echoed { echoed })
}

impl Topic for NestingTopic {
    type InitArgs = EchoArgs;
    type State = ();
    type ReturnArgs = Echoed;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn init(
        &self,
        turn: &mut Turn<'_>,
        instance: &mut Instance<Self>,
        args: EchoArgs,
    ) -> TopicResult<()> {
        let child_id = turn.create_instance(
            self.child.as_ref(),
            Some(instance.id()),
            Value::String(args.echo),
        )?;
        instance.set_child(child_id)?;
        Ok(())
    }

    fn on_child_return(
        &self,
        turn: &mut Turn<'_>,
        instance: &mut Instance<Self>,
        child: CompletedChild,
    ) -> TopicResult<()> {
        self.child_returns.invoke(self, turn, instance, child)
    }

    fn child_topics(&self) -> Vec<Arc<dyn AnyTopic>> {
        let child: Arc<dyn AnyTopic> = self.child.clone();
        vec![child]
    }
}

//! One turn of a conversation
//!
//! A turn owns the conversation's instance tree in memory. Inbound dispatch
//! runs first, then the continuation queue is drained (child returns, `next`
//! steps) until nothing is left. Only a fully successful turn is turned into
//! [`Effect`]s; a failing one is dropped without touching the store.

use super::{Activity, Effect};
use crate::composite::CompletedChild;
use crate::db::{ConversationRecord, InstanceRecord};
use crate::error::{ProtocolViolation, TopicError, TopicResult};
use crate::topic::{AnyTopic, Instance, Topic, TopicInstance, TopicRegistry};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Work queued by callbacks, drained before the turn ends
#[derive(Debug, Clone, PartialEq, Eq)]
enum Continuation {
    /// Re-run the instance's `next` step
    Next { instance_id: String },
    /// The instance called `return_to_parent`
    Returned { instance_id: String },
}

/// Output of a finished turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub effects: Vec<Effect>,
    /// Return value of the root, if it completed during this turn
    pub completed: Option<Value>,
}

/// Context handed to every topic callback
pub struct Turn<'a> {
    conversation_id: String,
    registry: &'a TopicRegistry,
    activity: Option<Activity>,
    /// Live instances; an instance is absent while its own callback runs
    instances: HashMap<String, InstanceRecord>,
    /// Instances as they were when the turn began
    loaded: HashMap<String, InstanceRecord>,
    /// Load / creation order, for deterministic persistence
    order: Vec<String>,
    removed: Vec<String>,
    outbound: Vec<String>,
    pending: VecDeque<Continuation>,
    opened: Option<ConversationRecord>,
    completed: Option<Value>,
}

impl<'a> Turn<'a> {
    /// Turn that creates a new root topic
    pub(crate) fn starting(
        conversation_id: impl Into<String>,
        registry: &'a TopicRegistry,
    ) -> Self {
        Self::with_records(conversation_id.into(), registry, Vec::new(), None)
    }

    /// Turn that delivers `activity` to an existing tree
    pub(crate) fn receiving(
        conversation_id: impl Into<String>,
        registry: &'a TopicRegistry,
        records: Vec<InstanceRecord>,
        activity: Activity,
    ) -> Self {
        Self::with_records(conversation_id.into(), registry, records, Some(activity))
    }

    fn with_records(
        conversation_id: String,
        registry: &'a TopicRegistry,
        records: Vec<InstanceRecord>,
        activity: Option<Activity>,
    ) -> Self {
        let order = records.iter().map(|r| r.id.clone()).collect();
        let instances: HashMap<_, _> = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            conversation_id,
            registry,
            activity,
            loaded: instances.clone(),
            instances,
            order,
            removed: Vec::new(),
            outbound: Vec::new(),
            pending: VecDeque::new(),
            opened: None,
            completed: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The inbound activity; `None` while a conversation is being started
    pub fn activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    /// Queue an outbound message; sent once the turn has succeeded
    pub fn send_activity(&mut self, text: impl Into<String>) {
        self.outbound.push(text.into());
    }

    // ==================== Instance Lifecycle ====================

    /// Create an instance of `topic`, running its `init` exactly once.
    ///
    /// `parent_id` is the instance that will receive the result through its
    /// `on_child_return`; `None` creates a root.
    pub fn create_instance<T: Topic>(
        &mut self,
        topic: &T,
        parent_id: Option<&str>,
        args: T::InitArgs,
    ) -> TopicResult<String> {
        if !self.registry.contains(topic.name()) {
            return Err(TopicError::UnknownTopic(topic.name().to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();
        let mut instance = Instance::<T>::new(
            id.clone(),
            topic.name(),
            parent_id.map(String::from),
            T::State::default(),
        );

        tracing::debug!(
            conv_id = %self.conversation_id,
            instance_id = %id,
            topic = %topic.name(),
            parent_id = ?parent_id,
            "Creating topic instance"
        );
        // Parents precede children created during their own init
        self.order.push(id.clone());
        topic.init(self, &mut instance, args)?;

        let mut record = instance.to_record()?;
        record.created_at = created_at;
        self.instances.insert(id.clone(), record);
        Ok(id)
    }

    /// Hand `args` to whoever created `instance`. Allowed once per instance,
    /// and only after its active child has been cleared.
    pub fn return_to_parent<S, R>(
        &mut self,
        instance: &mut TopicInstance<S, R>,
        args: R,
    ) -> TopicResult<()> {
        if instance.has_returned() {
            return Err(ProtocolViolation::AlreadyReturned {
                instance_id: instance.id().to_string(),
            }
            .into());
        }
        if let Some(child_id) = instance.child_id() {
            return Err(ProtocolViolation::ReturnedWithActiveChild {
                instance_id: instance.id().to_string(),
                child_id: child_id.to_string(),
            }
            .into());
        }
        instance.set_return_args(args);
        self.pending.push_back(Continuation::Returned {
            instance_id: instance.id().to_string(),
        });
        Ok(())
    }

    // ==================== Dispatch ====================

    /// Run `on_receive` for one instance. Composites forward to their child,
    /// so dispatching the root reaches the deepest active leaf.
    pub fn dispatch(&mut self, instance_id: &str) -> TopicResult<()> {
        let (topic, mut record) = self.checkout(instance_id)?;
        tracing::debug!(
            conv_id = %self.conversation_id,
            instance_id = %instance_id,
            topic = %record.topic_name,
            "Dispatching turn"
        );
        let result = topic.on_receive_erased(self, &mut record);
        self.checkin(record);
        result
    }

    /// Forward the turn to the active child. `false` means no child is linked
    /// and nothing consumed the turn.
    pub fn dispatch_to_child<S, R>(&mut self, instance: &TopicInstance<S, R>) -> TopicResult<bool> {
        match instance.child_id() {
            Some(child_id) => {
                let child_id = child_id.to_string();
                self.dispatch(&child_id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Schedule the instance's `next` step within this same turn
    pub fn do_next<S, R>(&mut self, instance: &TopicInstance<S, R>) {
        self.pending.push_back(Continuation::Next {
            instance_id: instance.id().to_string(),
        });
    }

    // ==================== Runtime Entry Points ====================

    /// Create the root of a new conversation and settle its first turn
    pub(crate) fn start_root(&mut self, topic_name: &str, args: Value) -> TopicResult<String> {
        let topic = self.topic(topic_name)?;
        let root_id = topic.create_erased(self, None, args)?;
        self.opened = Some(ConversationRecord::new(
            self.conversation_id.clone(),
            root_id.clone(),
            topic_name,
        ));
        self.run_continuations()?;
        Ok(root_id)
    }

    /// Deliver the inbound activity to the tree rooted at `root_id`
    pub(crate) fn receive(&mut self, root_id: &str) -> TopicResult<()> {
        self.dispatch(root_id)?;
        self.run_continuations()
    }

    fn run_continuations(&mut self) -> TopicResult<()> {
        while let Some(continuation) = self.pending.pop_front() {
            match continuation {
                Continuation::Next { instance_id } => self.run_next(&instance_id)?,
                Continuation::Returned { instance_id } => self.complete(&instance_id)?,
            }
        }
        Ok(())
    }

    fn run_next(&mut self, instance_id: &str) -> TopicResult<()> {
        match self.instances.get(instance_id) {
            Some(record) if !record.has_returned() => {}
            _ => {
                tracing::debug!(instance_id = %instance_id, "Skipping next for completed instance");
                return Ok(());
            }
        }

        let (topic, mut record) = self.checkout(instance_id)?;
        let result = topic.next_erased(self, &mut record);
        self.checkin(record);
        result
    }

    /// Reconcile a returned instance with its parent, then drop it
    fn complete(&mut self, instance_id: &str) -> TopicResult<()> {
        let record = self
            .instances
            .remove(instance_id)
            .ok_or_else(|| TopicError::InstanceNotFound(instance_id.to_string()))?;
        self.removed.push(record.id.clone());
        let return_args = record.return_args.unwrap_or(Value::Null);

        let Some(parent_id) = record.parent_id else {
            tracing::info!(
                conv_id = %self.conversation_id,
                instance_id = %record.id,
                topic = %record.topic_name,
                "Root topic returned"
            );
            self.completed = Some(return_args);
            return Ok(());
        };

        let (topic, mut parent) = self.checkout(&parent_id)?;
        tracing::debug!(
            conv_id = %self.conversation_id,
            parent_id = %parent_id,
            child_id = %record.id,
            child_topic = %record.topic_name,
            "Child returned to parent"
        );
        let child = CompletedChild {
            id: record.id,
            topic_name: record.topic_name,
            return_args,
        };
        let result = topic.on_child_return_erased(self, &mut parent, child);
        self.checkin(parent);
        result
    }

    fn topic(&self, name: &str) -> TopicResult<Arc<dyn AnyTopic>> {
        self.registry
            .get(name)
            .ok_or_else(|| TopicError::UnknownTopic(name.to_string()))
    }

    /// Take an instance out of the working set while its own callback runs
    fn checkout(&mut self, instance_id: &str) -> TopicResult<(Arc<dyn AnyTopic>, InstanceRecord)> {
        let topic_name = self
            .instances
            .get(instance_id)
            .map(|r| r.topic_name.clone())
            .ok_or_else(|| TopicError::InstanceNotFound(instance_id.to_string()))?;
        let topic = self.topic(&topic_name)?;
        let record = self
            .instances
            .remove(instance_id)
            .ok_or_else(|| TopicError::InstanceNotFound(instance_id.to_string()))?;
        Ok((topic, record))
    }

    fn checkin(&mut self, record: InstanceRecord) {
        self.instances.insert(record.id.clone(), record);
    }

    // ==================== Completion ====================

    /// Convert the settled turn into effects
    ///
    /// Store writes come before outbound messages. The runtime commits all of
    /// a turn's writes as one batch, so a parent's new child link is never
    /// stored without the child it points at.
    pub(crate) fn finish(self) -> TurnResult {
        let mut effects = Vec::new();

        if let Some(return_args) = &self.completed {
            if !self.loaded.is_empty() {
                effects.push(Effect::CloseConversation {
                    return_args: return_args.clone(),
                });
            }
        } else {
            if let Some(record) = self.opened {
                effects.push(Effect::OpenConversation { record });
            }
            for id in &self.order {
                if let Some(record) = self.instances.get(id) {
                    if self.loaded.get(id) != Some(record) {
                        effects.push(Effect::PersistInstance {
                            record: record.clone(),
                        });
                    }
                }
            }
            for id in &self.removed {
                if self.loaded.contains_key(id) {
                    effects.push(Effect::DeleteInstance {
                        instance_id: id.clone(),
                    });
                }
            }
        }

        effects.extend(self.outbound.into_iter().map(Effect::send));

        TurnResult {
            effects,
            completed: self.completed,
        }
    }
}

//! Topic definitions
//!
//! A topic is a named, stateless unit of dialog logic. All of its durable data
//! lives in [`TopicInstance`]s; the topic only supplies the lifecycle callbacks
//! that the turn machinery invokes.

mod instance;
mod registry;

pub use instance::TopicInstance;
pub use registry::TopicRegistry;

use crate::composite::CompletedChild;
use crate::db::InstanceRecord;
use crate::engine::Turn;
use crate::error::{ProtocolViolation, TopicResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Instance type a topic `T` operates on
pub type Instance<T> = TopicInstance<<T as Topic>::State, <T as Topic>::ReturnArgs>;

/// Lifecycle contract every topic implements
pub trait Topic: Send + Sync + 'static {
    type InitArgs: DeserializeOwned;
    type State: Serialize + DeserializeOwned + Default;
    type ReturnArgs: Serialize + DeserializeOwned;

    /// Registry key; also stored on every instance as `topic_name`
    fn name(&self) -> &str;

    /// Seed `instance.state` from `args`. Runs exactly once, before the
    /// instance is usable. May return to the parent straight away.
    fn init(
        &self,
        turn: &mut Turn<'_>,
        instance: &mut Instance<Self>,
        args: Self::InitArgs,
    ) -> TopicResult<()>;

    /// Re-evaluate what the instance should do given its current state.
    ///
    /// Must be safe to call again when nothing changed.
    fn next(&self, _turn: &mut Turn<'_>, _instance: &mut Instance<Self>) -> TopicResult<()> {
        Ok(())
    }

    /// Handle the inbound activity while this instance is on the active path.
    ///
    /// The default is composite behaviour: forward to the active child and
    /// treat a missing child as a protocol violation. Leaves override this.
    fn on_receive(&self, turn: &mut Turn<'_>, instance: &mut Instance<Self>) -> TopicResult<()> {
        if turn.dispatch_to_child(instance)? {
            Ok(())
        } else {
            Err(ProtocolViolation::NoActiveChild {
                instance_id: instance.id().to_string(),
            }
            .into())
        }
    }

    /// A child created by this instance returned
    fn on_child_return(
        &self,
        _turn: &mut Turn<'_>,
        _instance: &mut Instance<Self>,
        child: CompletedChild,
    ) -> TopicResult<()> {
        Err(ProtocolViolation::UnhandledChildReturn {
            parent: self.name().to_string(),
            child: child.topic_name,
        }
        .into())
    }

    /// Topic definitions this topic spawns as children
    fn child_topics(&self) -> Vec<Arc<dyn AnyTopic>> {
        Vec::new()
    }
}

/// Object-safe face of [`Topic`], working on persisted records
///
/// Implemented for every `Topic`; the registry and the turn machinery only
/// ever see topics through this trait.
pub trait AnyTopic: Send + Sync {
    fn topic_name(&self) -> &str;

    /// Create an instance from JSON init args
    fn create_erased(
        &self,
        turn: &mut Turn<'_>,
        parent_id: Option<&str>,
        args: Value,
    ) -> TopicResult<String>;

    fn next_erased(&self, turn: &mut Turn<'_>, record: &mut InstanceRecord) -> TopicResult<()>;

    fn on_receive_erased(&self, turn: &mut Turn<'_>, record: &mut InstanceRecord)
        -> TopicResult<()>;

    fn on_child_return_erased(
        &self,
        turn: &mut Turn<'_>,
        record: &mut InstanceRecord,
        child: CompletedChild,
    ) -> TopicResult<()>;

    fn child_topics_erased(&self) -> Vec<Arc<dyn AnyTopic>>;
}

impl<T: Topic> AnyTopic for T {
    fn topic_name(&self) -> &str {
        self.name()
    }

    fn create_erased(
        &self,
        turn: &mut Turn<'_>,
        parent_id: Option<&str>,
        args: Value,
    ) -> TopicResult<String> {
        let args: T::InitArgs = serde_json::from_value(args)?;
        turn.create_instance(self, parent_id, args)
    }

    fn next_erased(&self, turn: &mut Turn<'_>, record: &mut InstanceRecord) -> TopicResult<()> {
        with_instance::<T>(record, |instance| self.next(turn, instance))
    }

    fn on_receive_erased(
        &self,
        turn: &mut Turn<'_>,
        record: &mut InstanceRecord,
    ) -> TopicResult<()> {
        with_instance::<T>(record, |instance| self.on_receive(turn, instance))
    }

    fn on_child_return_erased(
        &self,
        turn: &mut Turn<'_>,
        record: &mut InstanceRecord,
        child: CompletedChild,
    ) -> TopicResult<()> {
        with_instance::<T>(record, |instance| {
            self.on_child_return(turn, instance, child)
        })
    }

    fn child_topics_erased(&self) -> Vec<Arc<dyn AnyTopic>> {
        self.child_topics()
    }
}

/// Decode, run a callback, write back. The record is updated even when the
/// callback fails so the caller sees exactly what the topic did.
fn with_instance<T: Topic>(
    record: &mut InstanceRecord,
    f: impl FnOnce(&mut Instance<T>) -> TopicResult<()>,
) -> TopicResult<()> {
    let mut instance = Instance::<T>::from_record(record)?;
    let result = f(&mut instance);
    instance.write_to(record)?;
    result
}

impl std::fmt::Debug for dyn AnyTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyTopic")
            .field("name", &self.topic_name())
            .finish()
    }
}

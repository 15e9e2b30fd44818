//! Parent/child plumbing for composite topics
//!
//! The child link itself lives on [`TopicInstance`](crate::topic::TopicInstance);
//! this module covers what happens when the child comes back.

use crate::engine::Turn;
use crate::error::{ProtocolViolation, TopicResult};
use crate::topic::{Instance, Topic};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// A child instance that has returned, as seen by its parent
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedChild {
    pub id: String,
    pub topic_name: String,
    pub return_args: Value,
}

impl CompletedChild {
    /// Decode the child's return value into the type its topic returns
    pub fn args<R: DeserializeOwned>(&self) -> TopicResult<R> {
        Ok(serde_json::from_value(self.return_args.clone())?)
    }
}

/// Handler invoked on the parent when a child of one topic returns
pub type ChildReturnHandler<T> =
    fn(&T, &mut Turn<'_>, &mut Instance<T>, CompletedChild) -> TopicResult<()>;

/// Child-topic-name to return-handler table for one composite topic
pub struct ChildReturns<T: Topic> {
    handlers: HashMap<String, ChildReturnHandler<T>>,
}

impl<T: Topic> Default for ChildReturns<T> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<T: Topic> ChildReturns<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for returns from `child_topic`.
    ///
    /// # Panics
    ///
    /// If `child_topic` already has a handler. Tables are built once when the
    /// topic is constructed, so this is a wiring bug.
    #[must_use]
    pub fn on_child_return(
        mut self,
        child_topic: impl Into<String>,
        handler: ChildReturnHandler<T>,
    ) -> Self {
        let child_topic = child_topic.into();
        assert!(
            !self.handlers.contains_key(&child_topic),
            "return handler for child topic `{child_topic}` registered twice"
        );
        self.handlers.insert(child_topic, handler);
        self
    }

    pub fn handles(&self, child_topic: &str) -> bool {
        self.handlers.contains_key(child_topic)
    }

    /// Route `child` to the handler registered for its topic
    pub fn invoke(
        &self,
        topic: &T,
        turn: &mut Turn<'_>,
        instance: &mut Instance<T>,
        child: CompletedChild,
    ) -> TopicResult<()> {
        match self.handlers.get(&child.topic_name) {
            Some(handler) => handler(topic, turn, instance, child),
            None => Err(ProtocolViolation::UnhandledChildReturn {
                parent: topic.name().to_string(),
                child: child.topic_name,
            }
            .into()),
        }
    }
}

impl<T: Topic> std::fmt::Debug for ChildReturns<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut children: Vec<_> = self.handlers.keys().collect();
        children.sort();
        f.debug_struct("ChildReturns")
            .field("children", &children)
            .finish()
    }
}

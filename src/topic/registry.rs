//! Registry of topic definitions, keyed by topic name

use super::{AnyTopic, Topic};
use crate::error::{TopicError, TopicResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Every topic a conversation tree may contain
///
/// Instances only store their `topic_name`; the runtime resolves callbacks
/// through this registry on every turn.
#[derive(Default, Clone)]
pub struct TopicRegistry {
    topics: HashMap<String, Arc<dyn AnyTopic>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic together with every child topic it spawns
    pub fn register(&mut self, topic: Arc<dyn AnyTopic>) -> TopicResult<()> {
        let name = topic.topic_name().to_string();
        if self.topics.contains_key(&name) {
            return Err(TopicError::DuplicateTopic(name));
        }

        let children = topic.child_topics_erased();
        self.topics.insert(name, topic);
        for child in children {
            self.register(child)?;
        }
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_topic<T: Topic>(mut self, topic: T) -> TopicResult<Self> {
        self.register(Arc::new(topic))?;
        Ok(self)
    }

    /// Get a topic by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn AnyTopic>> {
        self.topics.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    /// List all registered topic names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.topics.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.names())
            .finish()
    }
}

//! Typed view over a persisted topic instance

use crate::db::InstanceRecord;
use crate::error::{ProtocolViolation, TopicResult};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The instance a topic callback operates on
///
/// Decoded from an [`InstanceRecord`] before the callback runs and written back
/// afterwards. `id`, `topic_name` and `parent_id` are immutable; `state` belongs
/// to the owning topic; the child link and `return_args` only change through the
/// composite operations and `Turn::return_to_parent`.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInstance<S, R> {
    id: String,
    topic_name: String,
    parent_id: Option<String>,
    pub state: S,
    child_instance_id: Option<String>,
    return_args: Option<R>,
}

impl<S, R> TopicInstance<S, R> {
    pub(crate) fn new(
        id: impl Into<String>,
        topic_name: impl Into<String>,
        parent_id: Option<String>,
        state: S,
    ) -> Self {
        Self {
            id: id.into(),
            topic_name: topic_name.into(),
            parent_id,
            state,
            child_instance_id: None,
            return_args: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn return_args(&self) -> Option<&R> {
        self.return_args.as_ref()
    }

    pub fn has_returned(&self) -> bool {
        self.return_args.is_some()
    }

    // ==================== Child Link ====================

    /// Record the active child. At most one child may be linked at a time.
    pub fn set_child(&mut self, child_id: impl Into<String>) -> Result<(), ProtocolViolation> {
        if let Some(existing) = &self.child_instance_id {
            return Err(ProtocolViolation::ChildAlreadySet {
                instance_id: self.id.clone(),
                existing: existing.clone(),
            });
        }
        self.child_instance_id = Some(child_id.into());
        Ok(())
    }

    pub fn clear_child(&mut self) {
        self.child_instance_id = None;
    }

    pub fn has_child(&self) -> bool {
        self.child_instance_id.is_some()
    }

    pub fn child_id(&self) -> Option<&str> {
        self.child_instance_id.as_deref()
    }

    /// Write-once; the caller checks for a previous return
    pub(crate) fn set_return_args(&mut self, args: R) {
        self.return_args = Some(args);
    }
}

impl<S, R> TopicInstance<S, R>
where
    S: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    pub(crate) fn from_record(record: &InstanceRecord) -> TopicResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            topic_name: record.topic_name.clone(),
            parent_id: record.parent_id.clone(),
            state: serde_json::from_value(record.state.clone())?,
            child_instance_id: record.child_instance_id.clone(),
            return_args: record
                .return_args
                .clone()
                .map(serde_json::from_value)
                .transpose()?,
        })
    }

    pub(crate) fn to_record(&self) -> TopicResult<InstanceRecord> {
        let now = Utc::now();
        Ok(InstanceRecord {
            id: self.id.clone(),
            topic_name: self.topic_name.clone(),
            parent_id: self.parent_id.clone(),
            state: serde_json::to_value(&self.state)?,
            child_instance_id: self.child_instance_id.clone(),
            return_args: self
                .return_args
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Copy mutable parts back; `updated_at` only moves when something changed
    pub(crate) fn write_to(&self, record: &mut InstanceRecord) -> TopicResult<()> {
        let state = serde_json::to_value(&self.state)?;
        let return_args = self
            .return_args
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        if record.state != state
            || record.child_instance_id != self.child_instance_id
            || record.return_args != return_args
        {
            record.state = state;
            record.child_instance_id.clone_from(&self.child_instance_id);
            record.return_args = return_args;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Counter = TopicInstance<u32, String>;

    #[test]
    fn test_second_child_is_rejected() {
        let mut instance = Counter::new("parent", "counter", None, 0);

        instance.set_child("child-a").unwrap();
        let err = instance.set_child("child-b").unwrap_err();

        assert_eq!(
            err,
            ProtocolViolation::ChildAlreadySet {
                instance_id: "parent".to_string(),
                existing: "child-a".to_string(),
            }
        );
        assert_eq!(instance.child_id(), Some("child-a"));
    }

    #[test]
    fn test_clear_child_is_idempotent() {
        let mut instance = Counter::new("parent", "counter", None, 0);
        instance.clear_child();
        instance.set_child("child-a").unwrap();
        instance.clear_child();
        instance.clear_child();

        assert!(!instance.has_child());
        instance.set_child("child-b").unwrap();
        assert_eq!(instance.child_id(), Some("child-b"));
    }

    #[test]
    fn test_record_round_trip_keeps_identity() {
        let mut instance = Counter::new("abc", "counter", Some("root".to_string()), 7);
        instance.set_child("kid").unwrap();
        instance.set_return_args("done".to_string());

        let record = instance.to_record().unwrap();
        assert_eq!(record.state, json!(7));
        assert_eq!(record.return_args, Some(json!("done")));

        let decoded = Counter::from_record(&record).unwrap();
        assert_eq!(decoded, instance);
    }

    #[test]
    fn test_write_to_leaves_timestamp_when_unchanged() {
        let instance = Counter::new("abc", "counter", None, 1);
        let mut record = instance.to_record().unwrap();
        let before = record.updated_at;

        instance.write_to(&mut record).unwrap();

        assert_eq!(record.updated_at, before);
    }

    #[test]
    fn test_state_type_mismatch_is_codec_error() {
        let mut record = Counter::new("abc", "counter", None, 1)
            .to_record()
            .unwrap();
        record.state = json!({ "not": "a number" });

        let result = Counter::from_record(&record);
        assert!(matches!(result, Err(crate::error::TopicError::Codec(_))));
    }
}

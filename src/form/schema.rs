//! Form schema: ordered field definitions

use super::FormData;
use crate::error::{TopicError, TopicResult};
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// How a reply for a field is validated and coerced
///
/// Unknown tags deserialize into `Unsupported` so they survive until the form
/// scans its schema and can be reported by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Unsupported(String),
}

impl FieldType {
    pub fn tag(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Unsupported(tag) => tag,
        }
    }

    pub fn ensure_supported(&self) -> TopicResult<()> {
        match self {
            FieldType::String => Ok(()),
            FieldType::Unsupported(tag) => Err(TopicError::UnsupportedFieldType(tag.clone())),
        }
    }

    /// Turn a validated reply into the stored value
    pub fn coerce(&self, reply: String) -> TopicResult<String> {
        self.ensure_supported()?;
        Ok(reply)
    }
}

impl From<String> for FieldType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "string" => FieldType::String,
            _ => FieldType::Unsupported(tag),
        }
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String => "string".to_string(),
            FieldType::Unsupported(tag) => tag,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub prompt: String,
}

impl FieldMetadata {
    pub fn string(prompt: impl Into<String>) -> Self {
        Self {
            field_type: FieldType::String,
            prompt: prompt.into(),
        }
    }
}

/// Field name to metadata, in the order fields are asked
///
/// Serializes as an array of `{name, type, prompt}` so order survives a trip
/// through `serde_json::Value`. Deserializes from that array or from a JSON
/// object read straight from text, keeping document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(String, FieldMetadata)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, or replace the metadata of an existing one in place
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, metadata: FieldMetadata) -> Self {
        self.insert(name.into(), metadata);
        self
    }

    fn insert(&mut self, name: String, metadata: FieldMetadata) {
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = metadata,
            None => self.fields.push((name, metadata)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldMetadata)> {
        self.fields.iter().map(|(n, m)| (n.as_str(), m))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// View of `form` that serializes as an object in field order
    pub fn ordered<'a>(&'a self, form: &'a FormData) -> OrderedForm<'a> {
        OrderedForm { schema: self, form }
    }

    /// Fail on the first field whose type has no validator
    pub fn ensure_supported(&self) -> TopicResult<()> {
        self.fields
            .iter()
            .try_for_each(|(_, metadata)| metadata.field_type.ensure_supported())
    }
}

#[derive(Serialize)]
struct FieldEntryRef<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    field_type: &'a FieldType,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct FieldEntry {
    name: String,
    #[serde(flatten)]
    metadata: FieldMetadata,
}

impl Serialize for Schema {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.collect_seq(self.fields.iter().map(|(name, metadata)| FieldEntryRef {
            name,
            field_type: &metadata.field_type,
            prompt: &metadata.prompt,
        }))
    }
}

/// Answers keyed by field, written in schema order; unanswered fields are
/// left out
#[derive(Debug, Clone, Copy)]
pub struct OrderedForm<'a> {
    schema: &'a Schema,
    form: &'a FormData,
}

impl Serialize for OrderedForm<'_> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.collect_map(
            self.schema
                .names()
                .filter_map(|name| self.form.get(name).map(|value| (name, value))),
        )
    }
}

struct SchemaVisitor;

impl<'de> Visitor<'de> for SchemaVisitor {
    type Value = Schema;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of field name to {type, prompt} or an array of {name, type, prompt}")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Schema, A::Error> {
        let mut schema = Schema::new();
        while let Some((name, metadata)) = map.next_entry::<String, FieldMetadata>()? {
            schema.insert(name, metadata);
        }
        Ok(schema)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Schema, A::Error> {
        let mut schema = Schema::new();
        while let Some(entry) = seq.next_element::<FieldEntry>()? {
            schema.insert(entry.name, entry.metadata);
        }
        Ok(schema)
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SchemaVisitor)
    }
}

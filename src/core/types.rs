use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A document identifier, monotonically assigned by the engine and dense
/// within a batch/version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u64);

impl DocId {
    pub fn new(id: u64) -> Self {
        DocId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DocId {
    fn from(id: u64) -> Self {
        DocId(id)
    }
}

/// A field name interned per-collection to a 64-bit id. The mapping is
/// append-only: once a key gets an id, that id is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId(pub u64);

/// Any comparable primitive a document field may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(i64), // milliseconds since epoch, UTC
}

/// The type tag stored alongside each value's block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Integer = 1,
    Float = 2,
    Text = 3,
    Timestamp = 4,
}

impl ValueType {
    pub fn from_tag(tag: u8) -> crate::core::error::Result<Self> {
        match tag {
            1 => Ok(ValueType::Integer),
            2 => Ok(ValueType::Float),
            3 => Ok(ValueType::Text),
            4 => Ok(ValueType::Timestamp),
            other => Err(crate::core::error::Error::DataMisaligned(format!(
                "corrupt value type tag: {other}"
            ))),
        }
    }
}

impl FieldValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            FieldValue::Integer(_) => ValueType::Integer,
            FieldValue::Float(_) => ValueType::Float,
            FieldValue::Text(_) => ValueType::Text,
            FieldValue::Timestamp(_) => ValueType::Timestamp,
        }
    }

    /// Render as a string the way a single indexed token for this value
    /// would appear in a term tree (used for `_`-prefixed single-token
    /// fields and for range-query comparisons).
    ///
    /// Timestamps render as a fixed-width RFC 3339 string rather than raw
    /// millis: `range` on the trie is lexicographic (§4.4), and the query
    /// grammar's `\...\` escape (§4.8, "used for timestamps containing :")
    /// is itself an RFC 3339 literal, so both sides of a range comparison
    /// must share the same fixed-width textual encoding for lexicographic
    /// order to agree with chronological order.
    pub fn as_token(&self) -> String {
        match self {
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Text(v) => v.clone(),
            FieldValue::Timestamp(v) => Utc
                .timestamp_millis_opt(*v)
                .single()
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_else(|| v.to_string()),
        }
    }
}

/// A location in the value store: `(offset, length, type_tag)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueAddress {
    pub offset: u64,
    pub length: u32,
    pub type_tag: u8,
}

/// The prefix sigils that mark engine-managed (`__`) and single-token (`_`)
/// fields. Plain field names are tokenized normally.
pub fn is_engine_managed(field: &str) -> bool {
    field.starts_with("__")
}

pub fn is_single_token(field: &str) -> bool {
    field.starts_with('_') && !is_engine_managed(field)
}

/// A record as it arrives from an ingest caller: an ordered mapping from
/// field name to value. Field order is preserved into the doc-map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub fields: Vec<(String, FieldValue)>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_token_is_fixed_width_rfc3339_and_orders_chronologically() {
        let earlier = FieldValue::Timestamp(1_700_000_000_000).as_token();
        let later = FieldValue::Timestamp(1_700_000_060_000).as_token();
        assert_eq!(earlier.len(), later.len());
        assert!(earlier < later);
        assert!(earlier.ends_with('Z'));
    }
}

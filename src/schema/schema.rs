use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-collection schema: which field (if any) is the primary key used by
/// `CombineTakingLatestVersion` (§3, §4.9), and which named analyzer (from
/// `analysis::analyzer::AnalyzerRegistry`) each text field should use. Field
/// presence/type is otherwise dynamic — the engine does not reject a
/// document for having unknown fields; see `Document` in `core::types`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub primary_key_field: Option<String>,
    field_analyzers: HashMap<String, String>,
    pub default_analyzer: String,
}

impl CollectionSchema {
    pub fn new() -> Self {
        CollectionSchema {
            primary_key_field: None,
            field_analyzers: HashMap::new(),
            default_analyzer: "standard".to_string(),
        }
    }

    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key_field = Some(field.into());
        self
    }

    pub fn with_field_analyzer(mut self, field: impl Into<String>, analyzer: impl Into<String>) -> Self {
        self.field_analyzers.insert(field.into(), analyzer.into());
        self
    }

    /// The analyzer name for `field`, falling back to `default_analyzer`.
    pub fn analyzer_for_field(&self, field: &str) -> &str {
        self.field_analyzers
            .get(field)
            .map(String::as_str)
            .unwrap_or(&self.default_analyzer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_field_falls_back_to_default_analyzer() {
        let schema = CollectionSchema::new().with_field_analyzer("title", "vietnamese");
        assert_eq!(schema.analyzer_for_field("title"), "vietnamese");
        assert_eq!(schema.analyzer_for_field("body"), "standard");
    }

    #[test]
    fn primary_key_is_unset_by_default() {
        let schema = CollectionSchema::new();
        assert!(schema.primary_key_field.is_none());
        let schema = schema.with_primary_key("_id");
        assert_eq!(schema.primary_key_field.as_deref(), Some("_id"));
    }
}

use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::types::{Document, FieldValue};
use crate::plugins::registry::MediaTypePlugin;

/// The one concrete media-type plugin this crate ships (§6: "Content type
/// selects the media-specific writer/reader/tokenizer plugin" — JSON is the
/// payload format the write-session tests exercise). A JSON object's scalar
/// members become document fields; numbers with a fractional part or
/// exponent become `Float`, otherwise `Integer`; everything else becomes
/// `Text` via `to_string()`.
pub struct JsonPlugin;

impl MediaTypePlugin for JsonPlugin {
    fn media_type(&self) -> &str {
        "application/json"
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<Document>> {
        let value: Value = serde_json::from_slice(body).map_err(|e| Error::Parse(e.to_string()))?;
        let records = match value {
            Value::Array(items) => items,
            single @ Value::Object(_) => vec![single],
            _ => return Err(Error::Parse("JSON payload must be an object or array of objects".into())),
        };

        records.into_iter().map(record_to_document).collect()
    }

    fn write(&self, docs: &[Document]) -> Result<Vec<u8>> {
        let values: Vec<Value> = docs.iter().map(document_to_value).collect();
        serde_json::to_vec(&values).map_err(|e| Error::Parse(e.to_string()))
    }
}

fn record_to_document(value: Value) -> Result<Document> {
    let Value::Object(map) = value else {
        return Err(Error::Parse("each record must be a JSON object".into()));
    };

    let mut doc = Document::new();
    for (name, field) in map {
        doc = doc.with_field(name, json_to_field_value(field)?);
    }
    Ok(doc)
}

fn json_to_field_value(value: Value) -> Result<FieldValue> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(FieldValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(FieldValue::Float(f))
            } else {
                Err(Error::Parse(format!("unrepresentable JSON number: {n}")))
            }
        }
        Value::String(s) => Ok(FieldValue::Text(s)),
        Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
        other => Ok(FieldValue::Text(other.to_string())),
    }
}

fn document_to_value(doc: &Document) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in &doc.fields {
        let json_value = match value {
            FieldValue::Integer(i) => Value::Number((*i).into()),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Timestamp(t) => Value::Number((*t).into()),
        };
        map.insert(name.clone(), json_value);
    }
    Value::Object(map)
}

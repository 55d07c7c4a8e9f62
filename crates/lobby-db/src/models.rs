use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

/// Database row type: one JSON document of one collection.
pub struct DocumentRow {
    pub seq: i64,
    pub id: String,
    pub data: String,
}

/// A schema-less document. `data` never contains the `id` key; the id lives
/// beside it and is injected on decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub(crate) fn from_row(row: DocumentRow) -> StoreResult<Self> {
        match serde_json::from_str(&row.data)? {
            Value::Object(data) => Ok(Self { id: row.id, data }),
            _ => Err(StoreError::Malformed(format!("document {} is not an object", row.id))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Decode into a typed model, with `id` filled from the document key.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let mut data = self.data.clone();
        data.insert("id".into(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(data)).map_err(|e| {
            StoreError::Malformed(format!("document {}: {}", self.id, e))
        })
    }
}

/// Serialize a model into document fields, dropping the `id` key.
pub fn encode<T: Serialize>(value: &T) -> StoreResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(mut data) => {
            data.remove("id");
            Ok(data)
        }
        _ => Err(StoreError::Malformed("model did not serialize to an object".into())),
    }
}

/// Result set delivered by a listener or a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub docs: Vec<Document>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn first(&self) -> Option<&Document> {
        self.docs.first()
    }

    pub fn decode_all<T: DeserializeOwned>(&self) -> StoreResult<Vec<T>> {
        self.docs.iter().map(Document::decode).collect()
    }
}

/// A single field mutation. Every update is applied atomically per document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(String, Value),
    /// Add `delta` to a numeric field (missing counts as 0).
    Increment(String, i64),
    /// Append each value not already present in the array field.
    ArrayUnion(String, Vec<Value>),
}

impl FieldUpdate {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Self::Set(field.to_string(), value.into())
    }

    pub fn increment(field: &str, delta: i64) -> Self {
        Self::Increment(field.to_string(), delta)
    }

    pub fn array_union(field: &str, values: Vec<Value>) -> Self {
        Self::ArrayUnion(field.to_string(), values)
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Set(f, _) | Self::Increment(f, _) | Self::ArrayUnion(f, _) => f,
        }
    }

    pub(crate) fn apply(&self, data: &mut Map<String, Value>) -> StoreResult<()> {
        match self {
            Self::Set(field, value) => {
                data.insert(field.clone(), value.clone());
            }
            Self::Increment(field, delta) => {
                let current = match data.get(field) {
                    None | Some(Value::Null) => 0,
                    Some(v) => v.as_i64().ok_or_else(|| {
                        StoreError::Malformed(format!("field {field} is not an integer"))
                    })?,
                };
                data.insert(field.clone(), Value::from(current + delta));
            }
            Self::ArrayUnion(field, values) => {
                let entry = data
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if entry.is_null() {
                    *entry = Value::Array(Vec::new());
                }
                let Value::Array(items) = entry else {
                    return Err(StoreError::Malformed(format!("field {field} is not an array")));
                };
                for v in values {
                    if !items.contains(v) {
                        items.push(v.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_increment_missing_field_starts_at_zero() {
        let mut data = doc(json!({ "title": "x" }));
        FieldUpdate::increment("participantsCount", 1).apply(&mut data).unwrap();
        FieldUpdate::increment("participantsCount", 1).apply(&mut data).unwrap();
        FieldUpdate::increment("participantsCount", -1).apply(&mut data).unwrap();
        assert_eq!(data["participantsCount"], json!(1));
    }

    #[test]
    fn test_array_union_is_set_like() {
        let mut data = doc(json!({ "members": ["a"] }));
        FieldUpdate::array_union("members", vec![json!("a"), json!("b")])
            .apply(&mut data)
            .unwrap();
        FieldUpdate::array_union("members", vec![json!("b")])
            .apply(&mut data)
            .unwrap();
        assert_eq!(data["members"], json!(["a", "b"]));
    }

    #[test]
    fn test_array_union_rejects_non_array() {
        let mut data = doc(json!({ "members": "a" }));
        let err = FieldUpdate::array_union("members", vec![json!("b")])
            .apply(&mut data)
            .unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_encode_strips_id() {
        #[derive(Serialize)]
        struct Thing {
            id: String,
            name: String,
        }
        let data = encode(&Thing { id: "abc".into(), name: "n".into() }).unwrap();
        assert!(!data.contains_key("id"));
        assert_eq!(data["name"], json!("n"));
    }
}

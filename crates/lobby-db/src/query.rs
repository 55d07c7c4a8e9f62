use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde_json::Value;

use crate::models::Document;

/// Upper bound appended to a prefix to build a prefix range.
pub const PREFIX_END: char = '\u{f8ff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    ArrayContains,
}

impl FilterOp {
    fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::ArrayContains)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
            FilterOp::Gt => compare_same_type(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_same_type(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_same_type(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_same_type(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A filtered, sorted, limited query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn where_contains(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::ArrayContains, value)
    }

    /// `field` starts with `prefix` (string range `[prefix, prefix + U+F8FF]`).
    pub fn where_prefix(self, field: &str, prefix: &str) -> Self {
        self.filter(field, FilterOp::Gte, prefix)
            .filter(field, FilterOp::Lte, format!("{prefix}{PREFIX_END}"))
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Same filters, without ordering or limit. Used as a fallback while a
    /// composite index is missing.
    pub fn unordered(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            filters: self.filters.clone(),
            order_by: None,
            limit: None,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filter, sort and trim documents given in store order. Documents that
    /// lack the ordering field are excluded; ties keep store order.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();

        if let Some((field, direction)) = &self.order_by {
            out.retain(|d| d.get(field).is_some());
            out.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                );
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        if let Some(n) = self.limit {
            out.truncate(n);
        }
        out
    }

    /// The composite index this query needs, if any.
    ///
    /// Queries touching a single field are served by automatic single-field
    /// indexes. Equality filters combined with a range or ordering on a
    /// different field need a composite index.
    pub fn required_index(&self) -> Option<CompositeIndex> {
        let equality: BTreeSet<&str> = self
            .filters
            .iter()
            .filter(|f| f.op.is_equality())
            .map(|f| f.field.as_str())
            .collect();

        let ranged = self
            .filters
            .iter()
            .find(|f| !f.op.is_equality())
            .map(|f| f.field.as_str());
        let ordered = self.order_by.as_ref().map(|(f, _)| f.as_str());
        let tail = ordered.or(ranged)?;

        if equality.is_empty() || (equality.len() == 1 && equality.contains(tail)) {
            return None;
        }

        let mut fields: Vec<String> = equality
            .into_iter()
            .filter(|f| *f != tail)
            .map(str::to_string)
            .collect();
        fields.push(tail.to_string());
        Some(CompositeIndex {
            collection: self.collection.clone(),
            fields,
        })
    }
}

/// Declared composite index: equality fields (sorted) followed by the
/// range/order field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeIndex {
    pub collection: String,
    pub fields: Vec<String>,
}

impl CompositeIndex {
    pub fn new(collection: &str, fields: &[&str]) -> Self {
        Self {
            collection: collection.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// SQLite JSON path for a top-level field, or `None` when the name is not a
/// plain identifier and cannot be inlined into SQL.
pub(crate) fn json_path(field: &str) -> Option<String> {
    let plain = !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    plain.then(|| format!("$.{field}"))
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting: type rank first, then value.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    compare_same_type(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

/// Ordering between two values of the same type; `None` across types, which
/// range filters treat as "no match".
fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Document {
        let Value::Object(data) = value else { unreachable!() };
        Document { id: id.to_string(), data }
    }

    #[test]
    fn test_filters_and_ordering() {
        let docs = vec![
            doc("a", json!({ "chatId": "c1", "createdAt": 30 })),
            doc("b", json!({ "chatId": "c2", "createdAt": 10 })),
            doc("c", json!({ "chatId": "c1", "createdAt": 10 })),
            doc("d", json!({ "chatId": "c1", "createdAt": 20 })),
        ];
        let q = Query::collection("messages")
            .where_eq("chatId", "c1")
            .order_by("createdAt", Direction::Desc)
            .limit(2);
        let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[test]
    fn test_order_by_excludes_documents_missing_the_field() {
        let docs = vec![
            doc("a", json!({ "eventId": "e" })),
            doc("b", json!({ "eventId": "e", "hotelNameLower": "ritz" })),
        ];
        let q = Query::collection("events").order_by("hotelNameLower", Direction::Asc);
        let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_null_sorts_before_numbers() {
        let docs = vec![
            doc("a", json!({ "lastMessageAt": 5 })),
            doc("b", json!({ "lastMessageAt": null })),
        ];
        let q = Query::collection("chats").order_by("lastMessageAt", Direction::Desc);
        let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_prefix_range() {
        let docs = vec![
            doc("a", json!({ "hotelNameLower": "ritz paris" })),
            doc("b", json!({ "hotelNameLower": "royal" })),
            doc("c", json!({ "hotelNameLower": "ri" })),
        ];
        let q = Query::collection("events").where_prefix("hotelNameLower", "ritz");
        let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_array_contains() {
        let d = doc("a", json!({ "members": ["u1", "u2"] }));
        assert!(Query::collection("chats").where_contains("members", "u2").matches(&d));
        assert!(!Query::collection("chats").where_contains("members", "u3").matches(&d));
    }

    #[test]
    fn test_range_filter_ignores_other_types() {
        let d = doc("a", json!({ "createdAt": "yesterday" }));
        let q = Query::collection("events").filter("createdAt", FilterOp::Gte, 0);
        assert!(!q.matches(&d));
    }

    #[test]
    fn test_required_index() {
        let single = Query::collection("messages").order_by("createdAt", Direction::Asc);
        assert_eq!(single.required_index(), None);

        let equality_only = Query::collection("chats")
            .where_eq("eventId", "e1")
            .where_eq("type", "event");
        assert_eq!(equality_only.required_index(), None);

        let mixed = Query::collection("chats")
            .where_eq("type", "private")
            .where_contains("members", "u1")
            .order_by("lastMessageAt", Direction::Desc);
        assert_eq!(
            mixed.required_index(),
            Some(CompositeIndex::new("chats", &["members", "type", "lastMessageAt"]))
        );

        let ranged = Query::collection("events")
            .where_eq("organizerId", "u1")
            .filter("createdAt", FilterOp::Gte, 0)
            .filter("createdAt", FilterOp::Lt, 10);
        assert_eq!(
            ranged.required_index(),
            Some(CompositeIndex::new("events", &["organizerId", "createdAt"]))
        );
    }
}

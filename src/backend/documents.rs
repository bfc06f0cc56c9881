use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::query::SubscriptionHandle;

use super::{ErrorCallback, ValueCallback};

/// A stored record: an opaque id plus whatever fields the writer put there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Equality constraint on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates the query over an in-memory collection.
    ///
    /// Ordering by a field also drops documents that lack it, the way the
    /// hosted store does.
    pub fn apply(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|doc| {
                self.filters
                    .iter()
                    .all(|filter| doc.get(&filter.field) == Some(&filter.value))
            })
            .collect();

        if let Some((field, direction)) = &self.order_by {
            matched.retain(|doc| doc.get(field).is_some());
            matched.sort_by(|a, b| {
                let ordering = compare_values(a.get(field), b.get(field));
                match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// Orders values by type first (null, bool, number, string, other), then by value.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == rank(b) => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A partial write to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    /// Appends each element not already present.
    ArrayUnion(Vec<Value>),
    /// Removes every occurrence of each element.
    ArrayRemove(Vec<Value>),
    Delete,
}

impl FieldUpdate {
    /// New value of the field given its current value; `None` deletes it.
    pub fn apply(&self, current: Option<Value>) -> Option<Value> {
        match self {
            FieldUpdate::Set(value) => Some(value.clone()),
            FieldUpdate::Delete => None,
            FieldUpdate::ArrayUnion(elements) => {
                let mut items = match current {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                for element in elements {
                    if !items.contains(element) {
                        items.push(element.clone());
                    }
                }
                Some(Value::Array(items))
            }
            FieldUpdate::ArrayRemove(elements) => {
                let mut items = match current {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                items.retain(|item| !elements.contains(item));
                Some(Value::Array(items))
            }
        }
    }
}

/// Applies `updates` in order to `fields`.
pub fn apply_updates(fields: &mut Map<String, Value>, updates: &[(String, FieldUpdate)]) {
    for (field, update) in updates {
        let current = fields.remove(field);
        if let Some(next) = update.apply(current) {
            fields.insert(field.clone(), next);
        }
    }
}

/// Hosted document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, collection: &str, query: &DocumentQuery) -> Result<Vec<Document>>;

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Applies a partial update. Fails if the document does not exist.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<()>;

    /// Pushes the document (or `None` once it is missing) on registration and
    /// after every write to it.
    fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
        on_value: ValueCallback<Option<Document>>,
        on_error: ErrorCallback,
    ) -> SubscriptionHandle;
}

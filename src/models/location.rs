use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::Document;

/// A campus place. Only `id` and `capacity` matter to this core; everything
/// else the location document carries stays in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Location {
    pub fn from_document(document: Document) -> Self {
        let mut fields = document.fields;
        let capacity = fields.remove("capacity").and_then(|value| value.as_f64());
        // A stored "id" field would shadow the document id when flattened.
        fields.remove("id");
        Self {
            id: document.id,
            capacity,
            fields,
        }
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.text("name")
    }

    pub fn kind(&self) -> Option<&str> {
        self.text("type")
    }

    pub fn address(&self) -> Option<&str> {
        self.text("address")
    }

    /// Case-insensitive substring match over name, address and type.
    pub fn matches_search(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        [self.name(), self.address(), self.kind()]
            .into_iter()
            .flatten()
            .any(|value| value.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn location(fields: Value) -> Location {
        let Value::Object(fields) = fields else {
            panic!("fields must be an object");
        };
        Location::from_document(Document::new("lib", fields))
    }

    #[test]
    fn capacity_is_lifted_out_of_fields() {
        let loc = location(json!({ "name": "Main Library", "capacity": 250, "floor": 2 }));

        assert_eq!(loc.capacity, Some(250.0));
        assert_eq!(loc.name(), Some("Main Library"));
        assert!(!loc.fields.contains_key("capacity"));
        assert_eq!(loc.fields["floor"], json!(2));
    }

    #[test]
    fn non_numeric_capacity_is_absent() {
        let loc = location(json!({ "capacity": "big" }));
        assert_eq!(loc.capacity, None);
    }

    #[test]
    fn search_covers_name_address_and_type() {
        let loc = location(json!({
            "name": "Main Library",
            "address": "East Campus",
            "type": "Study"
        }));

        assert!(loc.matches_search("library"));
        assert!(loc.matches_search("EAST"));
        assert!(loc.matches_search("stu"));
        assert!(!loc.matches_search("gym"));
    }
}

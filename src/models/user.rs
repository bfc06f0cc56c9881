use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::AuthUser;

/// The signed-in user as screens see it: the auth account merged with its
/// `users/<uid>` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    #[serde(default)]
    pub fav_locations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Map<String, Value>>,
}

impl UserProfile {
    /// Profile derived from the auth account alone.
    pub fn from_auth(user: &AuthUser, avatar_base_url: &str) -> Self {
        let email = user.email.clone().unwrap_or_default();
        let name = email
            .split('@')
            .next()
            .filter(|local| !local.is_empty())
            .unwrap_or("User")
            .to_string();

        Self {
            id: user.uid.clone(),
            avatar: format!("{avatar_base_url}{name}"),
            name,
            email,
            fav_locations: Vec::new(),
            preferences: None,
        }
    }

    /// Overlays the stored profile document. Fields of the wrong type are ignored.
    pub fn merge_document(mut self, fields: &Map<String, Value>) -> Self {
        if let Some(name) = fields.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(email) = fields.get("email").and_then(Value::as_str) {
            self.email = email.to_string();
        }
        if let Some(avatar) = fields.get("avatar").and_then(Value::as_str) {
            self.avatar = avatar.to_string();
        }
        if let Some(Value::Array(items)) = fields.get("favLocations") {
            self.fav_locations = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(Value::Object(preferences)) = fields.get("preferences") {
            self.preferences = Some(preferences.clone());
        }
        self
    }

    pub fn is_favorite(&self, location_id: &str) -> bool {
        self.fav_locations.iter().any(|id| id == location_id)
    }
}

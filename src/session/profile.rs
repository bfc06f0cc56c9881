use std::sync::Arc;

use crate::{
    backend::{AuthUser, DocumentStore},
    log_warn,
    models::UserProfile,
};

const ENABLE_LOGS: bool = true;

/// Builds [`UserProfile`]s from auth accounts and their `users/<uid>` documents.
#[derive(Clone)]
pub(crate) struct ProfileLoader {
    store: Arc<dyn DocumentStore>,
    users_collection: String,
    avatar_base_url: String,
}

impl ProfileLoader {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        users_collection: impl Into<String>,
        avatar_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            users_collection: users_collection.into(),
            avatar_base_url: avatar_base_url.into(),
        }
    }

    pub fn users_collection(&self) -> &str {
        &self.users_collection
    }

    /// Never fails: a missing or unreadable document leaves the base profile.
    pub async fn load(&self, user: &AuthUser) -> UserProfile {
        let base = UserProfile::from_auth(user, &self.avatar_base_url);
        match self.store.get_by_id(&self.users_collection, &user.uid).await {
            Ok(Some(document)) => base.merge_document(&document.fields),
            Ok(None) => base,
            Err(err) => {
                log_warn!("Failed to fetch user profile {}: {err:#}", user.uid);
                base
            }
        }
    }
}

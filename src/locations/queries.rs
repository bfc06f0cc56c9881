use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{DocumentQuery, DocumentStore, SortDirection},
    models::{Location, UserProfile},
};

/// Filter value meaning "every type".
pub const ALL_TYPES: &str = "All";
pub const DEFAULT_LATEST_LIMIT: usize = 5;

const CREATED_AT: &str = "createdAt";

/// Parameters of a location list query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationFilter {
    /// Exact `type` to match; `None` or [`ALL_TYPES`] matches everything.
    pub filter: Option<String>,
    /// Case-insensitive search over name, address and type, applied after the
    /// limit.
    pub query: Option<String>,
    pub limit: Option<usize>,
}

impl LocationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.filter = Some(kind.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_query(&self) -> DocumentQuery {
        let mut query = DocumentQuery::new();
        if let Some(kind) = self.filter.as_deref().filter(|kind| *kind != ALL_TYPES) {
            query = query.where_eq("type", kind);
        }
        query = query.order_by(CREATED_AT, SortDirection::Descending);
        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            query = query.limit(limit);
        }
        query
    }
}

/// Reads of the locations collection.
#[derive(Clone)]
pub struct LocationQueries {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl LocationQueries {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Newest first.
    pub async fn get_locations(&self, filter: &LocationFilter) -> Result<Vec<Location>> {
        let documents = self
            .store
            .query(&self.collection, &filter.to_query())
            .await?;

        let mut locations: Vec<Location> =
            documents.into_iter().map(Location::from_document).collect();
        if let Some(search) = filter.query.as_deref().filter(|q| !q.is_empty()) {
            locations.retain(|location| location.matches_search(search));
        }
        Ok(locations)
    }

    /// Oldest first.
    pub async fn get_latest_locations(&self, limit: usize) -> Result<Vec<Location>> {
        let query = DocumentQuery::new()
            .order_by(CREATED_AT, SortDirection::Ascending)
            .limit(limit);
        let documents = self.store.query(&self.collection, &query).await?;
        Ok(documents.into_iter().map(Location::from_document).collect())
    }

    pub async fn get_location_by_id(&self, id: &str) -> Result<Option<Location>> {
        let document = self.store.get_by_id(&self.collection, id).await?;
        Ok(document.map(Location::from_document))
    }
}

/// The locations the user marked as favorites, in list order.
pub fn favorite_locations(profile: Option<&UserProfile>, locations: &[Location]) -> Vec<Location> {
    let Some(profile) = profile else {
        return Vec::new();
    };
    locations
        .iter()
        .filter(|location| profile.is_favorite(&location.id))
        .cloned()
        .collect()
}

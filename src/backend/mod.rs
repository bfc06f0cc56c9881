//! Interfaces of the managed backend this core talks to.
//!
//! Screens never reach the provider SDKs directly; everything goes through
//! these traits so the local backend in [`crate::db`] can stand in for the
//! hosted one.

pub mod auth;
pub mod documents;
pub mod error;
pub mod realtime;

use std::sync::Arc;

pub use auth::{sign_up, AuthService, AuthUser};
pub use documents::{
    Document, DocumentQuery, DocumentStore, FieldFilter, FieldUpdate, SortDirection,
};
pub use error::AuthError;
pub use realtime::RealtimeStore;

/// Listener invoked with every value a source pushes.
pub type ValueCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Listener invoked when a source fails.
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

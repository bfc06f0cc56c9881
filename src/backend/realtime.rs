use serde_json::Value;

use crate::query::SubscriptionHandle;

use super::{ErrorCallback, ValueCallback};

/// Hosted realtime key-value tree.
pub trait RealtimeStore: Send + Sync {
    /// Pushes the children stored directly at `path` (`None` when there are
    /// none) on registration and after every write or clear of that exact
    /// path. Writes to deeper paths do not notify `path`.
    fn subscribe(
        &self,
        path: &str,
        on_value: ValueCallback<Option<Value>>,
        on_error: ErrorCallback,
    ) -> SubscriptionHandle;
}

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    backend::{ErrorCallback, ValueCallback},
    query::SubscriptionHandle,
    utils::lock,
};

struct Listener<T> {
    key: String,
    on_value: ValueCallback<T>,
    on_error: ErrorCallback,
}

/// Callbacks registered against string keys (a document path, a realtime
/// path). Callbacks are always invoked outside the registry lock.
pub(crate) struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Listener<T>>>,
}

impl<T> Listeners<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Adds a listener; the returned handle removes it again.
    pub fn register(
        self: &Arc<Self>,
        key: impl Into<String>,
        on_value: ValueCallback<T>,
        on_error: ErrorCallback,
    ) -> (u64, SubscriptionHandle) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).insert(
            id,
            Listener {
                key: key.into(),
                on_value,
                on_error,
            },
        );

        let registry = Arc::downgrade(self);
        let handle = SubscriptionHandle::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry.entries).remove(&id);
            }
        });
        (id, handle)
    }

    /// Sends `value` to one listener if it is still registered.
    pub fn deliver(&self, id: u64, value: T) {
        let callback = lock(&self.entries)
            .get(&id)
            .map(|listener| listener.on_value.clone());
        if let Some(callback) = callback {
            callback(value);
        }
    }

    /// Reports `message` to one listener if it is still registered.
    pub fn fail(&self, id: u64, message: String) {
        let callback = lock(&self.entries)
            .get(&id)
            .map(|listener| listener.on_error.clone());
        if let Some(callback) = callback {
            callback(message);
        }
    }

    /// Sends `value` to every listener registered under `key`.
    pub fn notify(&self, key: &str, value: T) {
        let callbacks: Vec<ValueCallback<T>> = lock(&self.entries)
            .values()
            .filter(|listener| listener.key == key)
            .map(|listener| listener.on_value.clone())
            .collect();
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (ValueCallback<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ValueCallback<u32> =
            Arc::new(move |value: u32| sink.lock().unwrap().push(value));
        (callback, seen)
    }

    #[test]
    fn notify_reaches_matching_keys_until_released() {
        let listeners = Listeners::<u32>::new();
        let (on_a, seen_a) = recorder();
        let (on_b, seen_b) = recorder();

        let (_, handle_a) = listeners.register("a", on_a, Arc::new(|_| {}));
        let (_, _handle_b) = listeners.register("b", on_b, Arc::new(|_| {}));

        listeners.notify("a", 1);
        handle_a.release();
        listeners.notify("a", 2);
        listeners.notify("b", 3);

        assert_eq!(*seen_a.lock().unwrap(), vec![1]);
        assert_eq!(*seen_b.lock().unwrap(), vec![3]);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn deliver_skips_released_listener() {
        let listeners = Listeners::<u32>::new();
        let (on_value, seen) = recorder();
        let (id, handle) = listeners.register("a", on_value, Arc::new(|_| {}));

        listeners.deliver(id, 7);
        drop(handle);
        listeners.deliver(id, 8);

        assert_eq!(listeners.len(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}

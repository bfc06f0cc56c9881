use std::fmt;
use std::sync::Mutex;

use crate::utils::lock;

type Teardown = Box<dyn FnOnce() + Send + 'static>;

/// Owns one listener registration with an external source.
///
/// The teardown runs at most once: on the first `release()` or when the
/// handle is dropped, whichever comes first.
pub struct SubscriptionHandle {
    teardown: Mutex<Option<Teardown>>,
}

impl SubscriptionHandle {
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A handle with nothing to release, for sources that never registered.
    pub fn noop() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Runs the teardown if it has not run yet. Returns whether this call ran it.
    pub fn release(&self) -> bool {
        let teardown = lock(&self.teardown).take();
        match teardown {
            Some(teardown) => {
                teardown();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        lock(&self.teardown).is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_handle() -> (SubscriptionHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = SubscriptionHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handle, calls)
    }

    #[test]
    fn release_runs_teardown_once() {
        let (handle, calls) = counting_handle();

        assert!(handle.release());
        assert!(!handle.release());
        assert!(handle.is_released());
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_unreleased_handle() {
        let (handle, calls) = counting_handle();
        drop(handle);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_handle_is_already_released() {
        let handle = SubscriptionHandle::noop();
        assert!(handle.is_released());
        assert!(!handle.release());
    }
}

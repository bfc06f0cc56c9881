use std::{
    fmt::Display,
    sync::{Arc, Mutex},
};

use tokio::sync::watch;

use crate::utils::lock;

use super::{QueryState, SubscriptionHandle};

// Set to true to log stale pushes and subscription errors
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

pub type SubscribeFn<T, D> = Arc<dyn Fn(&D, Sink<T>) -> SubscriptionHandle + Send + Sync>;

struct Shared<T> {
    /// Identifies the registration allowed to write state. Pushes are applied
    /// while holding this lock so a teardown cannot interleave with one.
    epoch: Mutex<u64>,
    state: watch::Sender<QueryState<T>>,
}

/// Callback side of one registration, handed to the push source.
///
/// Once the registration it belongs to is torn down, every call is ignored.
pub struct Sink<T> {
    epoch: u64,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            shared: self.shared.clone(),
        }
    }
}

impl<T> Sink<T> {
    /// Replaces the current data. Returns false if the registration is stale.
    pub fn next(&self, value: T) -> bool {
        let epoch = lock(&self.shared.epoch);
        if *epoch != self.epoch {
            log_debug!("dropping push from stale subscription {}", self.epoch);
            return false;
        }
        self.shared.state.send_modify(|state| {
            state.data = Some(value);
            state.loading = false;
            state.error = None;
        });
        true
    }

    /// Records a source failure. Returns false if the registration is stale.
    pub fn error(&self, err: impl Display) -> bool {
        let epoch = lock(&self.shared.epoch);
        if *epoch != self.epoch {
            log_debug!("dropping error from stale subscription {}: {err}", self.epoch);
            return false;
        }
        log_error!("subscription {} failed: {err}", self.epoch);
        let message = err.to_string();
        self.shared.state.send_modify(|state| {
            state.loading = false;
            state.error = Some(message);
        });
        true
    }

    pub fn is_current(&self) -> bool {
        *lock(&self.shared.epoch) == self.epoch
    }
}

struct Active<D> {
    deps: D,
    epoch: u64,
    /// `None` while the subscribe callback for this epoch is still running.
    handle: Option<SubscriptionHandle>,
}

impl<D> Active<D> {
    fn release(self) {
        if let Some(handle) = self.handle {
            handle.release();
        }
    }
}

/// Bridges a push source into [`QueryState`], re-registering whenever the
/// dependency value changes.
///
/// At most one registration is live. Switching dependencies invalidates the old
/// sink before its handle is released, so late pushes from the old source
/// never land. The subscribe callback runs without any adapter lock held, so
/// it may call back into the adapter.
pub struct SubscriptionAdapter<T, D> {
    subscribe: SubscribeFn<T, D>,
    shared: Arc<Shared<T>>,
    current: Mutex<Option<Active<D>>>,
}

impl<T, D> SubscriptionAdapter<T, D>
where
    T: Clone + Send + Sync + 'static,
    D: PartialEq + Clone,
{
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(&D, Sink<T>) -> SubscriptionHandle + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(QueryState::idle());
        Self {
            subscribe: Arc::new(subscribe),
            shared: Arc::new(Shared {
                epoch: Mutex::new(0),
                state,
            }),
            current: Mutex::new(None),
        }
    }

    /// Subscribes for `deps` unless already subscribed for an equal value.
    /// Returns whether a new registration was made.
    pub fn set_deps(&self, deps: D) -> bool {
        let (epoch, previous) = {
            let mut current = lock(&self.current);
            if let Some(active) = current.as_ref() {
                if active.deps == deps {
                    return false;
                }
            }

            let epoch = {
                let mut epoch = lock(&self.shared.epoch);
                *epoch += 1;
                *epoch
            };
            let previous = current.replace(Active {
                deps: deps.clone(),
                epoch,
                handle: None,
            });

            // Data from the previous dependency value does not describe the new one.
            self.shared.state.send_replace(QueryState::pending());
            (epoch, previous)
        };

        if let Some(previous) = previous {
            previous.release();
        }

        let sink = Sink {
            epoch,
            shared: self.shared.clone(),
        };
        let handle = (self.subscribe)(&deps, sink);

        let superseded = {
            let mut current = lock(&self.current);
            match current.as_mut() {
                Some(active) if active.epoch == epoch => {
                    active.handle = Some(handle);
                    None
                }
                _ => Some(handle),
            }
        };
        if let Some(handle) = superseded {
            handle.release();
        }
        true
    }

    /// Releases the live registration, if any, and clears loading.
    pub fn deactivate(&self) {
        let previous = lock(&self.current).take();
        {
            let mut epoch = lock(&self.shared.epoch);
            *epoch += 1;
        }
        if let Some(previous) = previous {
            previous.release();
        }
        self.shared.state.send_modify(|state| state.loading = false);
    }

    pub fn deps(&self) -> Option<D> {
        lock(&self.current).as_ref().map(|active| active.deps.clone())
    }

    pub fn is_active(&self) -> bool {
        lock(&self.current).is_some()
    }

    pub fn state(&self) -> QueryState<T> {
        self.shared.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.shared.state.subscribe()
    }
}

impl<T, D> Drop for SubscriptionAdapter<T, D> {
    fn drop(&mut self) {
        let previous = lock(&self.current).take();
        *lock(&self.shared.epoch) += 1;
        if let Some(previous) = previous {
            previous.release();
        }
    }
}

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::{
    backend::RealtimeStore,
    models::LogSnapshot,
    query::{QueryState, Sink, SubscriptionAdapter, SubscriptionHandle},
    utils::lock,
};

use super::derive::{crowd_percentage, latest_without_count, usable_capacity, CrowdLevel};

// Set to true to log crowd log (un)subscriptions
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrowdState {
    pub level: CrowdLevel,
    pub loading: bool,
    pub error: Option<String>,
}

impl CrowdState {
    fn disabled() -> Self {
        Self {
            level: CrowdLevel::Unknown,
            loading: false,
            error: None,
        }
    }
}

/// Live crowd level for one location at a time.
///
/// Holds a subscription to `<log_root>/<locationId>` while both a location and
/// a usable capacity are set. Changing the location re-subscribes; changing
/// only the capacity keeps the registration and re-derives from the latest
/// snapshot.
pub struct CrowdTracker {
    logs: SubscriptionAdapter<LogSnapshot, String>,
    capacity: Mutex<Option<f64>>,
}

impl CrowdTracker {
    pub fn new(realtime: Arc<dyn RealtimeStore>, log_root: impl Into<String>) -> Self {
        let log_root = log_root.into();
        let logs = SubscriptionAdapter::new(move |location_id: &String, sink: Sink<LogSnapshot>| {
            let path = format!("{log_root}/{location_id}");
            log_info!("subscribing to crowd log {path}");

            let values = sink.clone();
            let pushed_path = path.clone();
            let registration = realtime.subscribe(
                &path,
                Arc::new(move |value: Option<Value>| {
                    let snapshot = LogSnapshot::from_value(value.as_ref());
                    // Once per push; reads of the derived level stay quiet.
                    if let Some(key) = latest_without_count(&snapshot) {
                        log_warn!("latest entry {key} under {pushed_path} has no usable count");
                    }
                    values.next(snapshot);
                }),
                Arc::new(move |err: String| {
                    sink.error(err);
                }),
            );

            SubscriptionHandle::new(move || {
                log_info!("unsubscribing from crowd log {path}");
                registration.release();
            })
        });

        Self {
            logs,
            capacity: Mutex::new(None),
        }
    }

    /// Points the tracker at a location. Either input missing (or a capacity
    /// that is not positive) drops the subscription and reports unknown.
    pub fn update(&self, location_id: Option<&str>, capacity: Option<f64>) {
        let capacity = usable_capacity(capacity);
        *lock(&self.capacity) = capacity;

        match (location_id.filter(|id| !id.is_empty()), capacity) {
            (Some(location_id), Some(_)) => {
                self.logs.set_deps(location_id.to_string());
            }
            _ => self.logs.deactivate(),
        }
    }

    pub fn state(&self) -> CrowdState {
        if !self.logs.is_active() {
            return CrowdState::disabled();
        }

        let capacity = *lock(&self.capacity);
        let logs = self.logs.state();
        let level = logs
            .data
            .as_ref()
            .map(|snapshot| crowd_percentage(snapshot, capacity))
            .unwrap_or(CrowdLevel::Unknown);

        CrowdState {
            level,
            loading: logs.loading,
            error: logs.error,
        }
    }

    pub fn location_id(&self) -> Option<String> {
        self.logs.deps()
    }

    pub fn capacity(&self) -> Option<f64> {
        *lock(&self.capacity)
    }

    /// Fires whenever a new log snapshot or error lands. Call [`state`] to get
    /// the derived level.
    ///
    /// [`state`]: CrowdTracker::state
    pub fn changes(&self) -> watch::Receiver<QueryState<LogSnapshot>> {
        self.logs.watch()
    }

    pub fn stop(&self) {
        self.logs.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ErrorCallback, ValueCallback};
    use serde_json::json;

    struct Registration {
        path: String,
        on_value: ValueCallback<Option<Value>>,
        on_error: ErrorCallback,
    }

    #[derive(Default)]
    struct FakeRealtime {
        registrations: Mutex<Vec<Registration>>,
        released: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRealtime {
        fn push(&self, index: usize, value: Value) {
            let on_value = self.registrations.lock().unwrap()[index].on_value.clone();
            on_value(Some(value));
        }

        fn fail(&self, index: usize, message: &str) {
            let on_error = self.registrations.lock().unwrap()[index].on_error.clone();
            on_error(message.to_string());
        }

        fn paths(&self) -> Vec<String> {
            self.registrations
                .lock()
                .unwrap()
                .iter()
                .map(|registration| registration.path.clone())
                .collect()
        }
    }

    impl RealtimeStore for FakeRealtime {
        fn subscribe(
            &self,
            path: &str,
            on_value: ValueCallback<Option<Value>>,
            on_error: ErrorCallback,
        ) -> SubscriptionHandle {
            self.registrations.lock().unwrap().push(Registration {
                path: path.to_string(),
                on_value,
                on_error,
            });
            let released = self.released.clone();
            let path = path.to_string();
            SubscriptionHandle::new(move || released.lock().unwrap().push(path))
        }
    }

    fn tracker() -> (CrowdTracker, Arc<FakeRealtime>) {
        let realtime = Arc::new(FakeRealtime::default());
        (CrowdTracker::new(realtime.clone(), "logs"), realtime)
    }

    #[test]
    fn missing_inputs_never_subscribe() {
        let (tracker, realtime) = tracker();

        tracker.update(None, Some(50.0));
        tracker.update(Some("lib"), None);
        tracker.update(Some("lib"), Some(0.0));

        assert!(realtime.paths().is_empty());
        assert_eq!(tracker.state(), CrowdState::disabled());
    }

    #[test]
    fn derives_from_latest_entry() {
        let (tracker, realtime) = tracker();
        tracker.update(Some("lib"), Some(50.0));

        assert_eq!(realtime.paths(), vec!["logs/lib"]);
        assert!(tracker.state().loading);

        realtime.push(
            0,
            json!({
                "-k2": { "count": 40, "timestamp": 200 },
                "-k1": { "count": 10, "timestamp": 100 }
            }),
        );

        let state = tracker.state();
        assert_eq!(state.level, CrowdLevel::Known(80));
        assert!(!state.loading);
    }

    #[test]
    fn capacity_change_rederives_without_resubscribing() {
        let (tracker, realtime) = tracker();
        tracker.update(Some("lib"), Some(50.0));
        realtime.push(0, json!({ "-k": { "count": 40, "timestamp": 1 } }));

        tracker.update(Some("lib"), Some(80.0));

        assert_eq!(realtime.paths().len(), 1);
        assert_eq!(tracker.state().level, CrowdLevel::Known(50));
    }

    #[test]
    fn location_change_ignores_old_source() {
        let (tracker, realtime) = tracker();
        tracker.update(Some("lib"), Some(10.0));
        tracker.update(Some("gym"), Some(10.0));

        assert_eq!(realtime.paths(), vec!["logs/lib", "logs/gym"]);
        assert_eq!(realtime.released.lock().unwrap().as_slice(), &["logs/lib"]);

        realtime.push(1, json!({ "-k": { "count": 2, "timestamp": 1 } }));
        realtime.push(0, json!({ "-k": { "count": 9, "timestamp": 9 } }));

        assert_eq!(tracker.state().level, CrowdLevel::Known(20));
        assert_eq!(tracker.location_id().as_deref(), Some("gym"));
    }

    #[test]
    fn empty_log_is_unknown_but_loaded() {
        let (tracker, realtime) = tracker();
        tracker.update(Some("lib"), Some(10.0));

        let on_value = realtime.registrations.lock().unwrap()[0].on_value.clone();
        on_value(None);

        let state = tracker.state();
        assert_eq!(state.level, CrowdLevel::Unknown);
        assert!(!state.loading);
    }

    #[test]
    fn bad_latest_count_reads_as_unknown_every_time() {
        let (tracker, realtime) = tracker();
        tracker.update(Some("lib"), Some(10.0));
        realtime.push(
            0,
            json!({
                "-k1": { "count": 4, "timestamp": 1 },
                "-k2": { "count": -3, "timestamp": 2 }
            }),
        );

        for _ in 0..3 {
            let state = tracker.state();
            assert_eq!(state.level, CrowdLevel::Unknown);
            assert!(!state.loading);
        }

        tracker.update(Some("lib"), Some(20.0));
        assert_eq!(tracker.state().level, CrowdLevel::Unknown);
        assert_eq!(realtime.paths().len(), 1);
    }

    #[test]
    fn source_errors_surface_as_state() {
        let (tracker, realtime) = tracker();
        tracker.update(Some("lib"), Some(10.0));

        realtime.fail(0, "permission denied");

        let state = tracker.state();
        assert_eq!(state.level, CrowdLevel::Unknown);
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("permission denied"));
    }

    #[test]
    fn stop_releases_subscription() {
        let (tracker, realtime) = tracker();
        tracker.update(Some("lib"), Some(10.0));
        tracker.stop();

        assert_eq!(realtime.released.lock().unwrap().as_slice(), &["logs/lib"]);
        assert_eq!(tracker.state(), CrowdState::disabled());
    }
}

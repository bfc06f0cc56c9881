use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{Document, DocumentStore, RealtimeStore},
    crowd::{CrowdState, CrowdTracker},
    log_debug,
    models::Location,
    query::{Sink, SubscriptionAdapter},
    settings::AppSettings,
    utils::lock,
};

const ENABLE_LOGS: bool = false;

/// Everything the location detail screen renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationView {
    pub location: Option<Location>,
    pub crowd: CrowdState,
    pub loading: bool,
    pub error: Option<String>,
}

/// Live view of one location: its document plus the crowd level derived from
/// its occupancy log and current capacity.
pub struct LocationMonitor {
    location_id: String,
    document: Arc<SubscriptionAdapter<Option<Location>, String>>,
    crowd: Arc<CrowdTracker>,
    view: Arc<watch::Sender<LocationView>>,
    cancel_token: CancellationToken,
    /// Held while the task re-points the tracker, so `stop` cannot interleave.
    gate: Arc<Mutex<()>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LocationMonitor {
    /// Subscribes and starts publishing. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        realtime: Arc<dyn RealtimeStore>,
        settings: &AppSettings,
        location_id: &str,
    ) -> Self {
        let collection = settings.collections.locations.clone();
        let document = Arc::new(SubscriptionAdapter::new(
            move |id: &String, sink: Sink<Option<Location>>| {
                let values = sink.clone();
                store.subscribe_document(
                    &collection,
                    id,
                    Arc::new(move |document: Option<Document>| {
                        values.next(document.map(Location::from_document));
                    }),
                    Arc::new(move |err: String| {
                        sink.error(err);
                    }),
                )
            },
        ));
        let crowd = Arc::new(CrowdTracker::new(realtime, settings.log_root.clone()));

        let (view, _) = watch::channel(LocationView {
            location: None,
            crowd: crowd.state(),
            loading: true,
            error: None,
        });
        let view = Arc::new(view);

        document.set_deps(location_id.to_string());

        let cancel_token = CancellationToken::new();
        let gate = Arc::new(Mutex::new(()));
        let handle = tokio::spawn(monitor_loop(
            document.clone(),
            crowd.clone(),
            view.clone(),
            gate.clone(),
            cancel_token.clone(),
        ));

        Self {
            location_id: location_id.to_string(),
            document,
            crowd,
            view,
            cancel_token,
            gate,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    pub fn view(&self) -> LocationView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<LocationView> {
        self.view.subscribe()
    }

    /// Releases both subscriptions and stops publishing.
    pub fn stop(&self) {
        {
            let _gate = lock(&self.gate);
            self.cancel_token.cancel();
        }
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
        self.document.deactivate();
        self.crowd.stop();
    }
}

impl Drop for LocationMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn monitor_loop(
    document: Arc<SubscriptionAdapter<Option<Location>, String>>,
    crowd: Arc<CrowdTracker>,
    view: Arc<watch::Sender<LocationView>>,
    gate: Arc<Mutex<()>>,
    cancel_token: CancellationToken,
) {
    let mut document_rx = document.watch();
    let mut crowd_rx = crowd.changes();

    loop {
        {
            let _gate = lock(&gate);
            if cancel_token.is_cancelled() {
                break;
            }

            let state = document.state();
            let location = state.data.flatten();
            crowd.update(
                location.as_ref().map(|location| location.id.as_str()),
                location.as_ref().and_then(|location| location.capacity),
            );

            view.send_replace(LocationView {
                crowd: crowd.state(),
                location,
                loading: state.loading,
                error: state.error,
            });
        }

        tokio::select! {
            changed = document_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = crowd_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_debug!("location monitor shutting down");
                break;
            }
        }
    }
}

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
};

use tokio::{sync::watch, task::JoinHandle};

use crate::utils::lock;

use super::{Notifier, QueryState};

// Set to true to log discarded fetch results
const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub type FetchFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'static>>;
pub type FetchFn<T, P> = Arc<dyn Fn(P) -> FetchFuture<T> + Send + Sync>;

struct FetchControl<P> {
    params: P,
    /// Bumped on every initiated fetch and on deactivation; an outcome is only
    /// applied if the counter still matches the value it started with.
    generation: u64,
    active: bool,
}

/// One-shot query wrapper that exposes a fetch's lifecycle as [`QueryState`].
///
/// Only the most recently initiated fetch may write state. Outcomes of
/// superseded fetches, and of fetches that finish after [`deactivate`], are
/// dropped when they arrive.
///
/// [`deactivate`]: FetchAdapter::deactivate
pub struct FetchAdapter<T, P> {
    fetcher: FetchFn<T, P>,
    notifier: Arc<dyn Notifier>,
    skip: bool,
    control: Arc<Mutex<FetchControl<P>>>,
    state: Arc<watch::Sender<QueryState<T>>>,
}

impl<T, P> Clone for FetchAdapter<T, P> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            notifier: self.notifier.clone(),
            skip: self.skip,
            control: self.control.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T, P> FetchAdapter<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + 'static,
{
    pub fn new<F, Fut>(fetcher: F, params: P, skip: bool, notifier: Arc<dyn Notifier>) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let fetcher: FetchFn<T, P> =
            Arc::new(move |params: P| -> FetchFuture<T> { Box::pin(fetcher(params)) });
        let initial = if skip {
            QueryState::idle()
        } else {
            QueryState::pending()
        };
        let (state, _) = watch::channel(initial);

        Self {
            fetcher,
            notifier,
            skip,
            control: Arc::new(Mutex::new(FetchControl {
                params,
                generation: 0,
                active: false,
            })),
            state: Arc::new(state),
        }
    }

    /// Runs the initial fetch with the construction parameters unless the
    /// adapter was created with `skip`.
    pub async fn activate(&self) {
        let params = {
            let mut control = lock(&self.control);
            if self.skip {
                control.active = true;
                return;
            }
            control.params.clone()
        };
        self.run(params).await;
    }

    /// Fetches again with `params`, or with the last-used parameters when `None`.
    pub async fn refetch(&self, params: Option<P>) {
        let params = {
            let mut control = lock(&self.control);
            if let Some(params) = params {
                control.params = params;
            }
            control.params.clone()
        };
        self.run(params).await;
    }

    /// Like [`refetch`](Self::refetch) but runs on the tokio runtime.
    pub fn spawn_refetch(&self, params: Option<P>) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.refetch(params).await })
    }

    /// Stops applying results. Fetches still in flight complete but are ignored.
    pub fn deactivate(&self) {
        let mut control = lock(&self.control);
        control.active = false;
        control.generation += 1;
        self.state.send_modify(|state| state.loading = false);
    }

    pub fn state(&self) -> QueryState<T> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.state.subscribe()
    }

    pub fn params(&self) -> P {
        lock(&self.control).params.clone()
    }

    async fn run(&self, params: P) {
        // Loading is set under the same lock as the generation bump.
        let generation = {
            let mut control = lock(&self.control);
            control.active = true;
            control.generation += 1;
            self.state.send_modify(|state| {
                state.loading = true;
                state.error = None;
            });
            control.generation
        };

        let outcome = (self.fetcher)(params).await;

        let control = lock(&self.control);
        if !control.active || control.generation != generation {
            log_debug!(
                "discarding fetch result from generation {generation} (current {}, active {})",
                control.generation,
                control.active
            );
            return;
        }

        match outcome {
            Ok(data) => {
                self.state.send_modify(|state| {
                    state.data = Some(data);
                    state.loading = false;
                    state.error = None;
                });
            }
            Err(err) => {
                let message = err.to_string();
                self.state.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(message.clone());
                });
                drop(control);
                self.notifier.alert("Error", &message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    type Reply = Result<Vec<String>, String>;

    #[derive(Default)]
    struct Gates {
        pending: Mutex<HashMap<u32, oneshot::Receiver<Reply>>>,
        calls: Mutex<Vec<u32>>,
    }

    impl Gates {
        fn open(&self, key: u32) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().insert(key, rx);
            tx
        }

        fn calls(&self) -> Vec<u32> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn alert(&self, title: &str, message: &str) {
            self.alerts
                .lock()
                .unwrap()
                .push((title.to_string(), message.to_string()));
        }
    }

    fn gated_adapter(
        skip: bool,
    ) -> (
        FetchAdapter<Vec<String>, u32>,
        Arc<Gates>,
        Arc<RecordingNotifier>,
    ) {
        let gates = Arc::new(Gates::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let fetch_gates = gates.clone();
        let adapter = FetchAdapter::new(
            move |key: u32| {
                fetch_gates.calls.lock().unwrap().push(key);
                let rx = fetch_gates.pending.lock().unwrap().remove(&key);
                async move {
                    let rx = rx.ok_or_else(|| anyhow!("no gate for {key}"))?;
                    match rx.await {
                        Ok(Ok(items)) => Ok(items),
                        Ok(Err(message)) => Err(anyhow!(message)),
                        Err(_) => Err(anyhow!("gate dropped")),
                    }
                }
            },
            1,
            skip,
            notifier.clone(),
        );
        (adapter, gates, notifier)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn resolves_after_delay() {
        let (adapter, gates, notifier) = gated_adapter(false);
        let tx = gates.open(1);

        let runner = adapter.clone();
        let task = tokio::spawn(async move { runner.activate().await });
        tokio::task::yield_now().await;

        let before = adapter.state();
        assert!(before.loading);
        assert_eq!(before.data, None);

        tx.send(Ok(strings(&["a", "b"]))).unwrap();
        task.await.unwrap();

        let after = adapter.state();
        assert!(!after.loading);
        assert_eq!(after.data, Some(strings(&["a", "b"])));
        assert_eq!(after.error, None);
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_is_stored_and_alerted() {
        let (adapter, gates, notifier) = gated_adapter(false);
        let tx = gates.open(1);
        tx.send(Err("network down".to_string())).unwrap();

        adapter.activate().await;

        let state = adapter.state();
        assert!(!state.loading);
        assert_eq!(state.data, None);
        assert_eq!(state.error.as_deref(), Some("network down"));
        assert_eq!(
            notifier.alerts.lock().unwrap().as_slice(),
            &[("Error".to_string(), "network down".to_string())]
        );
    }

    #[tokio::test]
    async fn skip_performs_no_fetch() {
        let (adapter, gates, _) = gated_adapter(true);
        assert!(!adapter.state().loading);

        adapter.activate().await;

        assert!(gates.calls().is_empty());
        assert_eq!(adapter.state(), QueryState::idle());
    }

    #[tokio::test]
    async fn refetch_reuses_last_params() {
        let (adapter, gates, _) = gated_adapter(false);
        gates.open(7).send(Ok(strings(&["x"]))).unwrap();
        adapter.refetch(Some(7)).await;

        gates.open(7).send(Ok(strings(&["y"]))).unwrap();
        adapter.refetch(None).await;

        assert_eq!(gates.calls(), vec![7, 7]);
        assert_eq!(adapter.params(), 7);
        assert_eq!(adapter.state().data, Some(strings(&["y"])));
    }

    #[tokio::test]
    async fn stale_result_after_newer_completion_is_discarded() {
        let (adapter, gates, _) = gated_adapter(false);
        let tx_old = gates.open(1);
        let tx_new = gates.open(2);

        let old = adapter.spawn_refetch(Some(1));
        tokio::task::yield_now().await;
        let new = adapter.spawn_refetch(Some(2));
        tokio::task::yield_now().await;

        tx_new.send(Ok(strings(&["new"]))).unwrap();
        new.await.unwrap();
        assert_eq!(adapter.state().data, Some(strings(&["new"])));
        assert!(!adapter.state().loading);

        tx_old.send(Ok(strings(&["old"]))).unwrap();
        old.await.unwrap();
        assert_eq!(adapter.state().data, Some(strings(&["new"])));
    }

    #[tokio::test]
    async fn stale_result_before_newer_completion_keeps_loading() {
        let (adapter, gates, notifier) = gated_adapter(false);
        let tx_old = gates.open(1);
        let tx_new = gates.open(2);

        let old = adapter.spawn_refetch(Some(1));
        tokio::task::yield_now().await;
        let new = adapter.spawn_refetch(Some(2));
        tokio::task::yield_now().await;

        tx_old.send(Err("timed out".to_string())).unwrap();
        old.await.unwrap();
        let state = adapter.state();
        assert!(state.loading);
        assert_eq!(state.error, None);
        assert!(notifier.alerts.lock().unwrap().is_empty());

        tx_new.send(Ok(strings(&["new"]))).unwrap();
        new.await.unwrap();
        assert_eq!(adapter.state().data, Some(strings(&["new"])));
        assert!(!adapter.state().loading);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deactivate_never_leaves_loading_set() {
        let notifier = Arc::new(RecordingNotifier::default());
        let adapter = FetchAdapter::new(
            |key: u32| async move { Ok::<_, anyhow::Error>(vec![key.to_string()]) },
            1,
            false,
            notifier,
        );

        for round in 0..200 {
            let fetch = adapter.spawn_refetch(Some(round));
            let stopper = adapter.clone();
            let stop = tokio::spawn(async move { stopper.deactivate() });

            fetch.await.unwrap();
            stop.await.unwrap();

            assert!(
                !adapter.state().loading,
                "loading still set after round {round} with nothing in flight"
            );
        }
    }

    #[tokio::test]
    async fn results_after_deactivate_are_ignored() {
        let (adapter, gates, _) = gated_adapter(false);
        let tx = gates.open(1);

        let task = adapter.spawn_refetch(None);
        tokio::task::yield_now().await;
        adapter.deactivate();

        tx.send(Ok(strings(&["late"]))).unwrap();
        task.await.unwrap();

        let state = adapter.state();
        assert_eq!(state.data, None);
        assert!(!state.loading);
    }
}

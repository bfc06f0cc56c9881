pub mod backend;
pub mod crowd;
pub mod db;
pub mod locations;
pub mod models;
pub mod query;
pub mod session;
pub mod settings;
mod utils;

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};

use crowd::CrowdTracker;
use db::LocalBackend;
use locations::{favorite_locations, LocationFilter, LocationQueries};
use models::Location;
use query::{FetchAdapter, LogNotifier};
use session::SessionController;
use settings::{data_dir, SettingsStore};

const SUMMARY_INTERVAL_SECS: u64 = 30;

/// Long-lived services of one running client.
pub struct AppState {
    pub backend: LocalBackend,
    pub settings: SettingsStore,
    pub session: Arc<SessionController>,
    pub locations: LocationQueries,
}

impl AppState {
    /// Opens the settings file and local database under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;

        let settings = SettingsStore::new(dir.join("settings.json"))?;
        let backend = LocalBackend::open(dir.join("bilcount.sqlite3"))?;
        Ok(Self::with_backend(backend, settings))
    }

    pub fn with_backend(backend: LocalBackend, settings: SettingsStore) -> Self {
        let current = settings.get();
        let session = Arc::new(SessionController::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            &current,
        ));
        let locations =
            LocationQueries::new(Arc::new(backend.clone()), current.collections.locations);

        Self {
            backend,
            settings,
            session,
            locations,
        }
    }
}

struct TrackedLocation {
    location: Location,
    tracker: CrowdTracker,
}

/// Headless client: keeps crowd levels of the listed locations live and logs
/// them until interrupted.
pub fn run() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("BilCount starting up...");

    let state = AppState::open(&data_dir())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(&state))
}

async fn serve(state: &AppState) -> Result<()> {
    state.session.start()?;
    let settings = state.settings.get();

    let queries = state.locations.clone();
    let listing = FetchAdapter::new(
        move |filter: LocationFilter| {
            let queries = queries.clone();
            async move { queries.get_locations(&filter).await }
        },
        LocationFilter::all().with_limit(settings.crowd_refresh_limit),
        false,
        Arc::new(LogNotifier),
    );
    listing.activate().await;

    let tracked: Vec<TrackedLocation> = listing
        .state()
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|location| {
            let tracker =
                CrowdTracker::new(Arc::new(state.backend.clone()), settings.log_root.clone());
            tracker.update(Some(location.id.as_str()), location.capacity);
            TrackedLocation { location, tracker }
        })
        .collect();
    info!("Monitoring crowd levels of {} locations", tracked.len());

    let mut ticker = tokio::time::interval(Duration::from_secs(SUMMARY_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = ticker.tick() => log_summary(state, &tracked),
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("Failed to listen for shutdown signal: {err}");
                }
                break;
            }
        }
    }

    info!("Shutting down");
    listing.deactivate();
    for entry in &tracked {
        entry.tracker.stop();
    }
    state.session.shutdown().await
}

fn log_summary(state: &AppState, tracked: &[TrackedLocation]) {
    let session = state.session.snapshot();
    match &session.user {
        Some(profile) => {
            let locations: Vec<Location> =
                tracked.iter().map(|entry| entry.location.clone()).collect();
            let favorites = favorite_locations(Some(profile), &locations);
            info!(
                "Signed in as {} with {} favorite locations",
                profile.email,
                favorites.len()
            );
        }
        None if session.loading => info!("Waiting for auth state"),
        None => info!("Signed out"),
    }

    for entry in tracked {
        let crowd = entry.tracker.state();
        let name = entry.location.name().unwrap_or(entry.location.id.as_str());
        match (crowd.level.percentage(), crowd.error) {
            (_, Some(err)) => warn!("{name}: crowd log unavailable ({err})"),
            (Some(percent), None) => info!("{name}: {percent}% ({:?})", crowd.level.band()),
            (None, None) if crowd.loading => info!("{name}: loading"),
            (None, None) => info!("{name}: unknown"),
        }
    }
}

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{
        auth::{check_email_domain, check_password_strength},
        sign_up, AuthError, AuthService, AuthUser, DocumentStore, FieldUpdate,
    },
    log_debug, log_info, log_warn,
    models::UserProfile,
    query::SubscriptionHandle,
    settings::{AppSettings, AuthSettings},
    utils::lock,
};

use super::{
    profile::ProfileLoader,
    state::{FavoriteChange, SessionSnapshot},
    worker::session_loop,
};

const ENABLE_LOGS: bool = true;

const FAVORITES_FIELD: &str = "favLocations";

struct Worker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
    auth_listener: SubscriptionHandle,
}

/// Who is signed in, plus the account operations screens call.
///
/// Pass it around by `Arc`; call [`start`](Self::start) once inside a tokio
/// runtime and [`shutdown`](Self::shutdown) when done.
pub struct SessionController {
    auth: Arc<dyn AuthService>,
    store: Arc<dyn DocumentStore>,
    profiles: ProfileLoader,
    auth_settings: AuthSettings,
    state: Arc<watch::Sender<SessionSnapshot>>,
    worker: Mutex<Option<Worker>>,
}

impl SessionController {
    pub fn new(
        auth: Arc<dyn AuthService>,
        store: Arc<dyn DocumentStore>,
        settings: &AppSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::starting());
        Self {
            profiles: ProfileLoader::new(
                store.clone(),
                settings.collections.users.clone(),
                settings.avatar_base_url.clone(),
            ),
            auth,
            store,
            auth_settings: settings.auth.clone(),
            state: Arc::new(state),
            worker: Mutex::new(None),
        }
    }

    /// Subscribes to auth changes and starts the worker that turns them into
    /// profiles.
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            bail!("session already started");
        }

        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let auth_listener = self
            .auth
            .on_auth_state_changed(Arc::new(move |user: Option<AuthUser>| {
                // Closed only after shutdown, when pushes no longer matter.
                let _ = auth_tx.send(user);
            }));

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(session_loop(
            auth_rx,
            self.profiles.clone(),
            self.state.clone(),
            cancel_token.clone(),
        ));

        *worker = Some(Worker {
            handle,
            cancel_token,
            auth_listener,
        });
        log_info!("session started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let worker = lock(&self.worker).take();
        let Some(worker) = worker else {
            return Ok(());
        };

        worker.auth_listener.release();
        worker.cancel_token.cancel();
        worker
            .handle
            .await
            .context("session loop task failed to join")
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in()
    }

    pub fn current_profile(&self) -> Option<UserProfile> {
        self.state.borrow().user.clone()
    }

    /// Creates an account. Only addresses in the configured domain get as far
    /// as the auth provider.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingFields);
        }
        check_email_domain(email, &self.auth_settings.allowed_domain)?;
        check_password_strength(password, self.auth_settings.min_password_length)?;

        sign_up(
            self.auth.as_ref(),
            email,
            password,
            &self.auth_settings.allowed_domain,
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingFields);
        }
        self.auth.login(email, password).await
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.auth.logout().await
    }

    /// Reloads the profile of whoever the auth provider says is signed in.
    ///
    /// The result is published only if that user is still signed in once the
    /// load finishes; otherwise the session is left to the auth worker and
    /// `None` is returned.
    pub async fn refetch(&self) -> Option<UserProfile> {
        let user = self.signed_in_user();
        let uid = user.as_ref().map(|user| user.uid.clone());
        let profile = match user {
            Some(user) => Some(self.profiles.load(&user).await),
            None => None,
        };

        let published = profile.clone();
        let mut current = true;
        // Checked under the snapshot lock the auth worker also writes through.
        self.state.send_if_modified(|snapshot| {
            current = self.signed_in_user().map(|user| user.uid) == uid;
            if !current {
                return false;
            }
            snapshot.user = published;
            true
        });

        if current {
            profile
        } else {
            log_debug!("dropping refetched profile for a user who is no longer signed in");
            None
        }
    }

    fn signed_in_user(&self) -> Option<AuthUser> {
        self.auth.current_user().filter(|user| user.email.is_some())
    }

    /// Adds `location_id` to the signed-in user's favorites, or removes it if
    /// already there. On failure the stored and in-memory lists are unchanged.
    pub async fn toggle_favorite(&self, location_id: &str) -> Result<FavoriteChange> {
        let Some(profile) = self.current_profile() else {
            return Ok(FavoriteChange::SignedOut);
        };

        let was_favorite = profile.is_favorite(location_id);
        let element = vec![Value::String(location_id.to_string())];
        let update = if was_favorite {
            FieldUpdate::ArrayRemove(element)
        } else {
            FieldUpdate::ArrayUnion(element)
        };

        if let Err(err) = self
            .store
            .update(
                self.profiles.users_collection(),
                &profile.id,
                vec![(FAVORITES_FIELD.to_string(), update)],
            )
            .await
        {
            log_warn!("Failed to toggle favorite {location_id}: {err:#}");
            return Err(err);
        }

        self.state.send_modify(|snapshot| {
            let Some(user) = snapshot.user.as_mut() else {
                return;
            };
            if user.id != profile.id {
                return;
            }
            if was_favorite {
                user.fav_locations.retain(|id| id != location_id);
            } else if !user.is_favorite(location_id) {
                user.fav_locations.push(location_id.to_string());
            }
        });

        Ok(if was_favorite {
            FavoriteChange::Removed
        } else {
            FavoriteChange::Added
        })
    }
}

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{backend::AuthUser, log_debug, log_info};

use super::{profile::ProfileLoader, SessionSnapshot};

const ENABLE_LOGS: bool = true;

/// Applies auth pushes one at a time, so a slow profile load for an older
/// push cannot overwrite a newer sign-in or sign-out.
pub(crate) async fn session_loop(
    mut auth_rx: mpsc::UnboundedReceiver<Option<AuthUser>>,
    profiles: ProfileLoader,
    state: Arc<watch::Sender<SessionSnapshot>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            pushed = auth_rx.recv() => {
                let Some(user) = pushed else {
                    log_debug!("auth stream closed");
                    break;
                };
                apply_auth_change(user, &profiles, &state, &cancel_token).await;
            }
            _ = cancel_token.cancelled() => {
                log_info!("session loop shutting down");
                break;
            }
        }
    }
}

async fn apply_auth_change(
    user: Option<AuthUser>,
    profiles: &ProfileLoader,
    state: &watch::Sender<SessionSnapshot>,
    cancel_token: &CancellationToken,
) {
    let profile = match user.filter(|user| user.email.is_some()) {
        Some(user) => {
            log_debug!("auth state: signed in as {}", user.uid);
            tokio::select! {
                profile = profiles.load(&user) => Some(profile),
                _ = cancel_token.cancelled() => return,
            }
        }
        None => {
            log_debug!("auth state: signed out");
            None
        }
    };

    state.send_replace(SessionSnapshot {
        user: profile,
        loading: false,
    });
}

use serde::Serialize;

use crate::models::UserProfile;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    /// True until the first auth push has been handled.
    pub loading: bool,
}

impl SessionSnapshot {
    pub fn starting() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }
}

/// Outcome of [`SessionController::toggle_favorite`](super::SessionController::toggle_favorite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FavoriteChange {
    Added,
    Removed,
    /// Nobody is signed in; nothing was written.
    SignedOut,
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::query::SubscriptionHandle;

use super::{AuthError, ValueCallback};

/// The signed-in account as reported by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

/// Hosted email/password authentication.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Creates an account and signs it in.
    async fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn login(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn logout(&self) -> Result<(), AuthError>;

    fn current_user(&self) -> Option<AuthUser>;

    /// Pushes the current user right away and again on every sign-in/out.
    fn on_auth_state_changed(
        &self,
        callback: ValueCallback<Option<AuthUser>>,
    ) -> SubscriptionHandle;
}

/// Creates an account for `email` if it belongs to `allowed_domain`.
///
/// The domain is checked before the provider is contacted.
pub async fn sign_up(
    auth: &dyn AuthService,
    email: &str,
    password: &str,
    allowed_domain: &str,
) -> Result<AuthUser, AuthError> {
    check_email_domain(email, allowed_domain)?;
    auth.create_user(email, password).await
}

pub fn check_email_domain(email: &str, allowed_domain: &str) -> Result<(), AuthError> {
    let suffix = format!("@{}", allowed_domain.to_ascii_lowercase());
    if email.to_ascii_lowercase().ends_with(&suffix) {
        Ok(())
    } else {
        Err(AuthError::EmailDomainRejected {
            domain: allowed_domain.to_string(),
        })
    }
}

pub fn check_password_strength(password: &str, min_length: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_length {
        return Err(AuthError::WeakPassword { min_length });
    }
    Ok(())
}

/// Loose `local@domain.tld` shape check, matching what the provider rejects
/// as malformed.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

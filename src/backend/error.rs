/// Authentication failures. The `Display` text is what the sign-in and
/// sign-up forms show inline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Email must be a {domain} address")]
    EmailDomainRejected { domain: String },

    #[error("Password must be at least {min_length} characters.")]
    WeakPassword { min_length: usize },

    #[error("This email is already registered. Try logging in.")]
    EmailInUse,

    #[error("The email address format is invalid.")]
    InvalidEmail,

    #[error("Please enter both email and password.")]
    MissingFields,

    #[error("The password you entered is incorrect. Please try again.")]
    WrongPassword,

    #[error("No account found with this email address.")]
    UserNotFound,

    #[error("Too many failed login attempts. Please try again later.")]
    TooManyRequests,

    #[error("Network error. Please check your connection.")]
    Network { detail: String },

    #[error("Authentication failed: {0}")]
    Backend(String),
}

impl AuthError {
    /// Wraps an unexpected provider failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        AuthError::Backend(err.to_string())
    }
}

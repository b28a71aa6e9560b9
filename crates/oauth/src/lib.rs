pub mod login;
pub mod manager;
pub mod pkce;
pub mod store;

use llm_relay_core::error::RelayError;

/// Errors raised by the OAuth subsystem.
#[derive(Debug, thiserror::Error)]
pub enum OauthError {
    #[error("provider {0} is not authenticated; run the login flow first")]
    NotAuthenticated(String),

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("authorization state mismatch")]
    StateMismatch,

    #[error("token exchange failed (status {status}): {body}")]
    ExchangeFailed { status: u16, body: String },

    #[error("login timed out waiting for the callback")]
    Timeout,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("network error: {0}")]
    Network(String),
}

impl From<OauthError> for RelayError {
    fn from(e: OauthError) -> Self {
        match e {
            OauthError::NotAuthenticated(provider) => RelayError::NoCredentials(provider),
            OauthError::Storage(msg) => RelayError::Internal(msg),
            OauthError::Network(msg) => RelayError::Network(msg),
            other => RelayError::Auth(other.to_string()),
        }
    }
}

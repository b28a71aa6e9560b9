use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for all relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("provider refused credential: {0}")]
    Forbidden(String),

    #[error("unknown provider: {0}")]
    ProviderNotFound(String),

    #[error("no credentials available for provider {0}")]
    NoCredentials(String),

    #[error("upstream error (status {status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Internal(_) | Self::Translation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoCredentials(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => match *status {
                401 | 403 => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable error type string for the Anthropic error envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::Auth(_) => "authentication_error",
            Self::Forbidden(_) => "permission_error",
            Self::ProviderNotFound(_) => "not_found_error",
            Self::NoCredentials(_) => "overloaded_error",
            Self::UpstreamTimeout(_) => "timeout_error",
            Self::Upstream { status, .. } => match *status {
                401 | 403 => "permission_error",
                _ => "api_error",
            },
            _ => "api_error",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // For upstream errors, pass through the original JSON body when it is
        // well-formed so clients see the provider's own error detail.
        if let Self::Upstream { body, .. } = &self
            && serde_json::from_str::<serde_json::Value>(body).is_ok()
        {
            return (status, [("content-type", "application/json")], body.clone()).into_response();
        }

        let body = json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });

        (
            status,
            [("content-type", "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout(e.to_string())
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Translation(format!("JSON error: {e}"))
    }
}

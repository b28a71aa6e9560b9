pub mod count_tokens;
pub mod health;
pub mod messages;
pub mod models;

use axum::http::HeaderMap;

pub(crate) fn anthropic_version(headers: &HeaderMap) -> Option<String> {
    headers
        .get("anthropic-version")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

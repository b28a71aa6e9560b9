use crate::AppState;
use crate::dispatch::{DispatchRequest, dispatch};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bytes::Bytes;
use llm_relay_core::error::RelayError;

/// Anthropic Messages endpoint (/v1/messages), blocking or streaming.
pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, RelayError> {
    dispatch(
        &state,
        DispatchRequest {
            body,
            anthropic_version: super::anthropic_version(&headers),
        },
    )
    .await
}

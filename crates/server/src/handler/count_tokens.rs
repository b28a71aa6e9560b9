use axum::Json;
use axum::response::IntoResponse;
use bytes::Bytes;
use llm_relay_core::error::RelayError;
use serde_json::{Value, json};

/// Character-based token estimate (~4 chars per token) over the flattened
/// request text. Count requests carry no max_tokens, so this parses the
/// body loosely instead of through the full Messages schema.
pub async fn count_tokens(body: Bytes) -> Result<impl IntoResponse, RelayError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| RelayError::BadRequest(format!("invalid request body: {e}")))?;

    let mut chars = 0usize;

    if let Some(system) = value.get("system") {
        chars += text_len(system);
    }
    if let Some(messages) = value.get("messages").and_then(|m| m.as_array()) {
        for message in messages {
            if let Some(content) = message.get("content") {
                chars += text_len(content);
            }
        }
    }

    let input_tokens = chars.div_ceil(4);
    Ok(Json(json!({"input_tokens": input_tokens})))
}

fn text_len(content: &Value) -> usize {
    match content {
        Value::String(s) => s.chars().count(),
        Value::Array(blocks) => blocks
            .iter()
            .map(|block| {
                block
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(|s| s.chars().count())
                    .or_else(|| block.get("content").map(text_len))
                    .unwrap_or(0)
            })
            .sum(),
        _ => 0,
    }
}

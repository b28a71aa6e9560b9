use llm_relay_core::error::RelayError;
use serde_json::{Value, json};

/// Map an OpenAI finish_reason to the Anthropic stop_reason vocabulary.
pub fn map_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "stop_sequence",
        _ => "end_turn",
    }
}

/// Translate a unary OpenAI Chat Completions response into an Anthropic
/// Messages response for the given client-facing model name.
pub fn translate_response(response: &Value, model: &str) -> Result<Value, RelayError> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| RelayError::Translation("no choices in upstream response".into()))?;
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let mut content: Vec<Value> = Vec::new();

    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        content.push(json!({"type": "text", "text": text}));
    }

    if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let function = tc.get("function").cloned().unwrap_or(Value::Null);
            let name = function
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let arguments = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");

            let input: Value = serde_json::from_str(arguments).unwrap_or_else(|e| {
                tracing::warn!(
                    tool_call = id,
                    error = %e,
                    "tool arguments are not valid JSON, substituting empty object"
                );
                json!({})
            });

            content.push(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }));
        }
    }

    if content.is_empty() {
        content.push(json!({"type": "text", "text": ""}));
    }

    let stop_reason = map_stop_reason(
        choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("stop"),
    );

    let usage = response.get("usage").cloned().unwrap_or(Value::Null);
    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let id = match response.get("id").and_then(|v| v.as_str()) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("msg_{}", uuid::Uuid::new_v4().simple()),
    };

    Ok(json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_response() {
        let upstream = json!({
            "id": "cmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1}
        });
        let out = translate_response(&upstream, "gpt-4o").unwrap();

        assert_eq!(out["content"], json!([{"type": "text", "text": "hi"}]));
        assert_eq!(out["stop_reason"], "end_turn");
        assert_eq!(out["usage"]["input_tokens"], 5);
        assert_eq!(out["usage"]["output_tokens"], 1);
        assert_eq!(out["model"], "gpt-4o");
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let upstream = json!({
            "id": "cmpl-2",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\":1,\"b\":2}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let out = translate_response(&upstream, "m").unwrap();

        assert_eq!(
            out["content"][0],
            json!({"type": "tool_use", "id": "c1", "name": "add", "input": {"a": 1, "b": 2}})
        );
        assert_eq!(out["stop_reason"], "tool_use");
    }

    #[test]
    fn malformed_arguments_fall_back_to_empty_object() {
        let upstream = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "f", "arguments": "{not json"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let out = translate_response(&upstream, "m").unwrap();
        assert_eq!(out["content"][0]["input"], json!({}));
    }

    #[test]
    fn stop_reason_mapping_table() {
        assert_eq!(map_stop_reason("stop"), "end_turn");
        assert_eq!(map_stop_reason("length"), "max_tokens");
        assert_eq!(map_stop_reason("tool_calls"), "tool_use");
        assert_eq!(map_stop_reason("function_call"), "tool_use");
        assert_eq!(map_stop_reason("content_filter"), "stop_sequence");
        assert_eq!(map_stop_reason("anything-else"), "end_turn");
    }

    #[test]
    fn missing_usage_and_id_are_tolerated() {
        let upstream = json!({
            "choices": [{"message": {"role": "assistant", "content": "x"}}]
        });
        let out = translate_response(&upstream, "m").unwrap();
        assert_eq!(out["usage"]["input_tokens"], 0);
        assert_eq!(out["usage"]["output_tokens"], 0);
        assert!(out["id"].as_str().unwrap().starts_with("msg_"));
    }

    #[test]
    fn empty_choices_is_a_translation_error() {
        let upstream = json!({"choices": []});
        assert!(translate_response(&upstream, "m").is_err());
    }

    #[test]
    fn empty_message_yields_empty_text_block() {
        let upstream = json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        });
        let out = translate_response(&upstream, "m").unwrap();
        assert_eq!(out["content"], json!([{"type": "text", "text": ""}]));
    }
}

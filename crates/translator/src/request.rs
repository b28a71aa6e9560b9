use llm_relay_core::error::RelayError;
use llm_relay_core::types::claude::{
    ClaudeContent, ClaudeMessage, ClaudeMessageContent, ClaudeMessagesRequest, ClaudeSystem,
};
use serde_json::{Value, json};

/// Translate an Anthropic Messages request into an OpenAI Chat Completions
/// body for the given resolved model.
pub fn translate_request(
    request: &ClaudeMessagesRequest,
    model: &str,
    max_tokens_cap: Option<u64>,
) -> Result<Value, RelayError> {
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = &request.system {
        let text = flatten_system(system);
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    for message in &request.messages {
        convert_message(message, &mut messages)?;
    }

    let max_tokens = match max_tokens_cap {
        Some(cap) => request.max_tokens.min(cap),
        None => request.max_tokens,
    };

    let mut out = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
    });

    if let Some(tools) = &request.tools {
        let converted: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description.as_deref().unwrap_or(""),
                        "parameters": tool
                            .input_schema
                            .clone()
                            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                    }
                })
            })
            .collect();
        if !converted.is_empty() {
            out["tools"] = Value::Array(converted);
        }
    }

    if let Some(tool_choice) = &request.tool_choice {
        out["tool_choice"] = convert_tool_choice(tool_choice);
    }

    if let Some(temperature) = request.temperature {
        out["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        out["top_p"] = json!(top_p);
    }
    if let Some(stops) = &request.stop_sequences
        && !stops.is_empty()
    {
        out["stop"] = json!(stops);
    }

    if request.is_streaming() {
        out["stream"] = json!(true);
        // Usage only arrives on the terminal chunk when explicitly requested.
        out["stream_options"] = json!({"include_usage": true});
    }

    Ok(out)
}

fn flatten_system(system: &ClaudeSystem) -> String {
    match system {
        ClaudeSystem::Text(text) => text.clone(),
        ClaudeSystem::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ClaudeContent::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn convert_message(message: &ClaudeMessage, out: &mut Vec<Value>) -> Result<(), RelayError> {
    match (message.role.as_str(), &message.content) {
        ("assistant", ClaudeMessageContent::Text(text)) => {
            out.push(json!({"role": "assistant", "content": text}));
        }
        ("assistant", ClaudeMessageContent::Blocks(blocks)) => {
            out.push(convert_assistant_blocks(blocks)?);
        }
        (_, ClaudeMessageContent::Text(text)) => {
            out.push(json!({"role": "user", "content": text}));
        }
        (_, ClaudeMessageContent::Blocks(blocks)) => {
            convert_user_blocks(blocks, out);
        }
    }
    Ok(())
}

/// Tool results become standalone `role=tool` messages in the same
/// positional slot, keeping them adjacent to the assistant turn that
/// issued the paired tool_calls. Remaining parts form a user message.
fn convert_user_blocks(blocks: &[ClaudeContent], out: &mut Vec<Value>) {
    let mut parts: Vec<Value> = Vec::new();

    for block in blocks {
        match block {
            ClaudeContent::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": stringify_tool_result(content.as_ref()),
                }));
            }
            ClaudeContent::Text { text, .. } => {
                parts.push(json!({"type": "text", "text": text}));
            }
            ClaudeContent::Image { source } => {
                if let Some(part) = convert_image(source) {
                    parts.push(part);
                }
            }
            ClaudeContent::ToolUse { .. } => {}
        }
    }

    match parts.len() {
        0 => {}
        1 if parts[0]["type"] == "text" => {
            out.push(json!({"role": "user", "content": parts[0]["text"]}));
        }
        _ => out.push(json!({"role": "user", "content": parts})),
    }
}

fn convert_assistant_blocks(blocks: &[ClaudeContent]) -> Result<Value, RelayError> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in blocks {
        match block {
            ClaudeContent::Text { text, .. } => text_parts.push(text),
            ClaudeContent::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(input)
                    .map_err(|e| RelayError::Translation(format!("tool input: {e}")))?;
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                }));
            }
            _ => {}
        }
    }

    let text = text_parts.concat();
    let content = if text.is_empty() && !tool_calls.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };

    let mut message = json!({"role": "assistant", "content": content});
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    Ok(message)
}

fn convert_image(source: &llm_relay_core::types::claude::ImageSource) -> Option<Value> {
    let url = match source.source_type.as_str() {
        "base64" => {
            let media_type = source.media_type.as_deref()?;
            let data = source.data.as_deref()?;
            format!("data:{media_type};base64,{data}")
        }
        "url" => source.url.clone()?,
        _ => return None,
    };
    Some(json!({"type": "image_url", "image_url": {"url": url}}))
}

fn stringify_tool_result(content: Option<&ClaudeMessageContent>) -> String {
    match content {
        None => String::new(),
        Some(ClaudeMessageContent::Text(text)) => text.clone(),
        Some(ClaudeMessageContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ClaudeContent::Text { text, .. } => Some(text.clone()),
                other => serde_json::to_string(other).ok(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn convert_tool_choice(tool_choice: &Value) -> Value {
    match tool_choice.get("type").and_then(|t| t.as_str()) {
        Some("auto") => json!("auto"),
        Some("any") => json!("required"),
        Some("none") => json!("none"),
        Some("tool") => match tool_choice.get("name").and_then(|n| n.as_str()) {
            Some(name) => json!({"type": "function", "function": {"name": name}}),
            None => json!("auto"),
        },
        _ => json!("auto"),
    }
}

use crate::error::RelayError;
use crate::middleware::{Middleware, RequestCtx, StreamSummary};
use crate::signature::{SignatureCache, ThoughtSignatureEntry};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Reflects Gemini reasoning artifacts back on follow-up tool calls.
///
/// On the way out, cached signatures are attached to each assistant
/// tool_call as `extra_body.google.thought_signature`. On the way back,
/// signatures are harvested from
/// `choices[0].message.tool_calls[i].extra_content.google.thought_signature`
/// (with the legacy message-level `reasoning_details` as fallback) and
/// stored keyed by the response's tool-call id set.
pub struct ThoughtSignatureMiddleware {
    cache: Arc<SignatureCache>,
}

impl ThoughtSignatureMiddleware {
    pub fn new(cache: Arc<SignatureCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Middleware for ThoughtSignatureMiddleware {
    fn name(&self) -> &str {
        "thought-signature"
    }

    fn applies_to(&self, _provider: &str, model: &str) -> bool {
        model.to_ascii_lowercase().contains("gemini")
    }

    async fn before_request(&self, ctx: &mut RequestCtx) -> Result<(), RelayError> {
        let conversation = ctx.conversation_id.clone();
        let Some(messages) = ctx.payload.get_mut("messages").and_then(|m| m.as_array_mut())
        else {
            return Ok(());
        };

        for message in messages {
            if message.get("role").and_then(|r| r.as_str()) != Some("assistant") {
                continue;
            }
            let Some(tool_calls) = message.get_mut("tool_calls").and_then(|t| t.as_array_mut())
            else {
                continue;
            };

            let ids: HashSet<String> = tool_calls
                .iter()
                .filter_map(|tc| tc.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect();
            if ids.is_empty() {
                continue;
            }

            let Some(signatures) = self.cache.retrieve(&ids, conversation.as_deref()) else {
                continue;
            };

            for tc in tool_calls {
                let signature = tc
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|id| signatures.get(id))
                    .cloned();
                if let Some(signature) = signature {
                    tc["extra_body"]["google"]["thought_signature"] = json!(signature);
                }
            }
            tracing::debug!(
                request_id = %ctx.request_id,
                count = signatures.len(),
                "attached thought signatures to outbound tool calls"
            );
        }
        Ok(())
    }

    async fn after_response(
        &self,
        ctx: &RequestCtx,
        response: &mut Value,
    ) -> Result<(), RelayError> {
        let message = extract_message(response);
        let signatures = extract_signatures(&message);
        if signatures.is_empty() {
            return Ok(());
        }

        let tool_call_ids = extract_tool_call_ids(&message);
        let message_id = response
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        self.cache.insert(ThoughtSignatureEntry {
            message_id,
            signatures,
            tool_call_ids,
            conversation_id: ctx.conversation_id.clone(),
        });
        Ok(())
    }

    async fn on_stream_complete(&self, ctx: &RequestCtx, summary: &StreamSummary) {
        if summary.tool_signatures.is_empty() {
            return;
        }
        self.cache.insert(ThoughtSignatureEntry {
            message_id: summary.message_id.clone().unwrap_or_default(),
            signatures: summary.tool_signatures.clone(),
            tool_call_ids: summary.tool_call_ids.iter().cloned().collect(),
            conversation_id: ctx.conversation_id.clone(),
        });
    }
}

/// Normalize response shapes to an OpenAI-style message object.
fn extract_message(response: &Value) -> Value {
    if let Some(message) = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
    {
        return message.clone();
    }
    response.get("message").cloned().unwrap_or(Value::Null)
}

/// Pull signatures from tool_calls, falling back to the legacy
/// message-level `reasoning_details` location.
fn extract_signatures(message: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();

    if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            let signature = tc
                .get("extra_content")
                .and_then(|e| e.get("google"))
                .and_then(|g| g.get("thought_signature"))
                .and_then(|s| s.as_str());
            if let (Some(id), Some(signature)) =
                (tc.get("id").and_then(|v| v.as_str()), signature)
            {
                out.insert(id.to_string(), signature.to_string());
            }
        }
    }
    if !out.is_empty() {
        return out;
    }

    if let Some(details) = message.get("reasoning_details").and_then(|d| d.as_array()) {
        for detail in details {
            let Some(signature) = detail.get("thought_signature").and_then(|s| s.as_str()) else {
                continue;
            };
            if let Some(ids) = detail.get("tool_call_ids").and_then(|v| v.as_array()) {
                for id in ids.iter().filter_map(|v| v.as_str()) {
                    out.insert(id.to_string(), signature.to_string());
                }
            }
        }
    }
    out
}

fn extract_tool_call_ids(message: &Value) -> HashSet<String> {
    message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| tc.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

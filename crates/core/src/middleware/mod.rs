pub mod thought_signature;

use crate::error::RelayError;
use crate::types::claude::{ClaudeStreamEvent, ClaudeUsage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-request context handed to middleware hooks.
///
/// `payload` is the wire-side body: for OpenAI-format upstreams the already
/// translated Chat Completions request, for Anthropic-format upstreams the
/// inbound Messages request.
#[derive(Debug)]
pub struct RequestCtx {
    pub provider: String,
    pub model: String,
    pub request_id: String,
    pub conversation_id: Option<String>,
    pub stream: bool,
    pub payload: Value,
}

/// Accumulated view of a finished (or aborted) stream.
#[derive(Debug, Default, Clone)]
pub struct StreamSummary {
    pub message_id: Option<String>,
    pub stop_reason: Option<String>,
    pub usage: ClaudeUsage,
    pub tool_call_ids: Vec<String>,
    /// Signatures collected from stream deltas, keyed by tool-call id.
    pub tool_signatures: HashMap<String, String>,
    pub cancelled: bool,
}

/// Hook set for observing and mutating requests, responses, and stream
/// chunks. Default implementations are no-ops so middleware implement only
/// the hooks they need.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, _provider: &str, _model: &str) -> bool {
        true
    }

    /// May mutate the outbound payload. Errors abort the request.
    async fn before_request(&self, _ctx: &mut RequestCtx) -> Result<(), RelayError> {
        Ok(())
    }

    /// Unary path only, on the raw upstream response body. Errors abort.
    async fn after_response(
        &self,
        _ctx: &RequestCtx,
        _response: &mut Value,
    ) -> Result<(), RelayError> {
        Ok(())
    }

    /// Per translated chunk. Errors are logged and the chunk forwarded
    /// unchanged to protect stream integrity.
    async fn on_stream_chunk(
        &self,
        _ctx: &RequestCtx,
        _event: &mut ClaudeStreamEvent,
    ) -> Result<(), RelayError> {
        Ok(())
    }

    /// Exactly once per stream, after the terminal event, an error, or a
    /// client cancel.
    async fn on_stream_complete(&self, _ctx: &RequestCtx, _summary: &StreamSummary) {}
}

/// Ordered middleware pipeline. Iteration is linear in registration order.
#[derive(Default)]
pub struct MiddlewareChain {
    entries: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.push(middleware);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn active<'a>(
        &'a self,
        provider: &'a str,
        model: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn Middleware>> {
        self.entries
            .iter()
            .filter(move |m| m.applies_to(provider, model))
    }

    pub async fn process_request(&self, ctx: &mut RequestCtx) -> Result<(), RelayError> {
        let (provider, model) = (ctx.provider.clone(), ctx.model.clone());
        for middleware in self.active(&provider, &model) {
            middleware.before_request(ctx).await.map_err(|e| {
                RelayError::Internal(format!("middleware {} failed: {e}", middleware.name()))
            })?;
        }
        Ok(())
    }

    pub async fn process_response(
        &self,
        ctx: &RequestCtx,
        response: &mut Value,
    ) -> Result<(), RelayError> {
        for middleware in self.active(&ctx.provider, &ctx.model) {
            middleware.after_response(ctx, response).await.map_err(|e| {
                RelayError::Internal(format!("middleware {} failed: {e}", middleware.name()))
            })?;
        }
        Ok(())
    }

    pub async fn process_chunk(&self, ctx: &RequestCtx, event: &mut ClaudeStreamEvent) {
        for middleware in self.active(&ctx.provider, &ctx.model) {
            if let Err(e) = middleware.on_stream_chunk(ctx, event).await {
                tracing::warn!(
                    middleware = middleware.name(),
                    error = %e,
                    "stream chunk hook failed, forwarding chunk unchanged"
                );
            }
        }
    }

    pub async fn process_complete(&self, ctx: &RequestCtx, summary: &StreamSummary) {
        for middleware in self.active(&ctx.provider, &ctx.model) {
            middleware.on_stream_complete(ctx, summary).await;
        }
    }
}

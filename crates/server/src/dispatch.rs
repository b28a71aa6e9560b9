use crate::AppState;
use crate::streaming::{OutFrame, sse_response};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use llm_relay_core::error::RelayError;
use llm_relay_core::middleware::{RequestCtx, StreamSummary};
use llm_relay_core::provider::{ApiFormat, ProviderAuth, ProviderDescriptor};
use llm_relay_core::types::claude::{ClaudeErrorDetail, ClaudeMessagesRequest, ClaudeStreamEvent};
use llm_relay_provider::sse::FrameStream;
use llm_relay_provider::{Credential, UpstreamClient, UpstreamRequest, is_retryable};
use llm_relay_translator::{StreamMachine, translate_request, translate_response};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// Everything the orchestrator needs from the inbound HTTP request.
pub struct DispatchRequest {
    pub body: Bytes,
    pub anthropic_version: Option<String>,
}

/// Per-request state machine: parse → resolve → authenticate → translate →
/// middleware → dispatch → deliver → finalize.
pub async fn dispatch(state: &AppState, req: DispatchRequest) -> Result<Response, RelayError> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let parsed: ClaudeMessagesRequest = serde_json::from_slice(&req.body)
        .map_err(|e| RelayError::BadRequest(format!("invalid request body: {e}")))?;
    let streaming = parsed.is_streaming();

    let (descriptor, model) = state.registry.resolve(&parsed.model)?;
    let credential = resolve_credential(state, &descriptor).await?;

    let payload = build_outbound_payload(&req.body, &parsed, &descriptor, &model)?;

    let mut ctx = RequestCtx {
        provider: descriptor.name.clone(),
        model: model.clone(),
        request_id: request_id.clone(),
        conversation_id: parsed.conversation_id().map(str::to_string),
        stream: streaming,
        payload,
    };
    state.middleware.process_request(&mut ctx).await?;

    let upstream_request = UpstreamRequest {
        payload: Bytes::from(serde_json::to_vec(&ctx.payload)?),
        anthropic_version: req.anthropic_version,
    };
    let client = state.upstreams.for_format(descriptor.api_format);

    if streaming {
        let frames =
            match open_stream_with_retry(client, &descriptor, &credential, &upstream_request).await
            {
                Ok(frames) => frames,
                Err(e) => {
                    // Streams that fail before the first byte still owe the
                    // middleware their terminal hook.
                    state
                        .middleware
                        .process_complete(&ctx, &StreamSummary::default())
                        .await;
                    log_completion(&ctx, started, Some(&e), None);
                    return Err(e);
                }
            };
        let response = match descriptor.api_format {
            ApiFormat::Openai => {
                spawn_translated_stream(state.clone(), ctx, frames, &descriptor, parsed.model)
            }
            ApiFormat::Anthropic | ApiFormat::Passthrough => {
                spawn_passthrough_stream(state.clone(), ctx, frames, &descriptor)
            }
        };
        Ok(response)
    } else {
        let result = execute_with_retry(client, &descriptor, &credential, &upstream_request).await;
        finalize_unary(state, &ctx, &descriptor, &parsed.model, result, started).await
    }
}

async fn resolve_credential(
    state: &AppState,
    descriptor: &ProviderDescriptor,
) -> Result<Credential, RelayError> {
    match &descriptor.auth {
        ProviderAuth::StaticKeys(keys) => {
            Ok(Credential::ApiKey(state.rotator.next(&descriptor.name, keys)))
        }
        ProviderAuth::Oauth(settings) => {
            let (token, _account) = state
                .tokens
                .access_token(&descriptor.name, settings)
                .await?;
            Ok(Credential::Bearer(token))
        }
        ProviderAuth::None => Ok(Credential::None),
    }
}

/// Shape the wire-side payload for the target provider. OpenAI targets get
/// the translated body; Anthropic targets the original body with the model
/// rewritten; passthrough targets the original body untouched.
fn build_outbound_payload(
    body: &Bytes,
    parsed: &ClaudeMessagesRequest,
    descriptor: &ProviderDescriptor,
    model: &str,
) -> Result<Value, RelayError> {
    match descriptor.api_format {
        ApiFormat::Openai => translate_request(parsed, model, descriptor.max_tokens_cap),
        ApiFormat::Anthropic => {
            let mut value: Value = serde_json::from_slice(body)?;
            value["model"] = json!(model);
            Ok(value)
        }
        ApiFormat::Passthrough => Ok(serde_json::from_slice(body)?),
    }
}

// ─── Retry (pre-body network errors only) ──────────────────────────────────

async fn execute_with_retry(
    client: &dyn UpstreamClient,
    descriptor: &ProviderDescriptor,
    credential: &Credential,
    request: &UpstreamRequest,
) -> Result<Bytes, RelayError> {
    let mut attempt = 0u32;
    loop {
        match client.execute(descriptor, credential, request).await {
            Ok(body) => return Ok(body),
            Err(e) if is_retryable(&e) && attempt < descriptor.retries => {
                attempt += 1;
                backoff(descriptor, attempt, &e).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Streaming bootstrap retry: once any frame has been produced, failures
/// are delivered in-stream and never retried.
async fn open_stream_with_retry(
    client: &dyn UpstreamClient,
    descriptor: &ProviderDescriptor,
    credential: &Credential,
    request: &UpstreamRequest,
) -> Result<FrameStream, RelayError> {
    let mut attempt = 0u32;
    loop {
        match client.execute_stream(descriptor, credential, request).await {
            Ok(frames) => return Ok(frames),
            Err(e) if is_retryable(&e) && attempt < descriptor.retries => {
                attempt += 1;
                backoff(descriptor, attempt, &e).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn backoff(descriptor: &ProviderDescriptor, attempt: u32, error: &RelayError) {
    let cap = std::cmp::min(1u64 << attempt, 8) as f64;
    let jittered = rand::random::<f64>() * cap;
    tracing::warn!(
        provider = %descriptor.name,
        attempt,
        error = %error,
        "retrying after network error"
    );
    tokio::time::sleep(Duration::from_secs_f64(jittered)).await;
}

// ─── Unary delivery ────────────────────────────────────────────────────────

async fn finalize_unary(
    state: &AppState,
    ctx: &RequestCtx,
    descriptor: &ProviderDescriptor,
    client_model: &str,
    result: Result<Bytes, RelayError>,
    started: Instant,
) -> Result<Response, RelayError> {
    let body = match result {
        Ok(body) => body,
        Err(e) => {
            // Middleware that saw before_request still observes a terminal
            // hook on the error path.
            let mut envelope = json!({
                "type": "error",
                "error": {"type": e.error_type(), "message": e.to_string()},
            });
            let _ = state.middleware.process_response(ctx, &mut envelope).await;
            log_completion(ctx, started, Some(&e), None);
            return Err(e);
        }
    };

    let mut upstream_value: Value = serde_json::from_slice(&body)
        .map_err(|e| RelayError::Internal(format!("upstream returned invalid JSON: {e}")))?;

    state
        .middleware
        .process_response(ctx, &mut upstream_value)
        .await?;

    let client_body = if descriptor.api_format.is_anthropic_wire() {
        upstream_value
    } else {
        translate_response(&upstream_value, client_model)?
    };

    log_completion(ctx, started, None, Some(&client_body));

    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        client_body.to_string(),
    )
        .into_response())
}

fn log_completion(
    ctx: &RequestCtx,
    started: Instant,
    error: Option<&RelayError>,
    response: Option<&Value>,
) {
    let (input_tokens, output_tokens) = response
        .and_then(|r| r.get("usage"))
        .map(|u| {
            (
                u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        })
        .unwrap_or((0, 0));

    tracing::info!(
        request_id = %ctx.request_id,
        provider = %ctx.provider,
        model = %ctx.model,
        stream = ctx.stream,
        duration_ms = started.elapsed().as_millis() as u64,
        input_tokens,
        output_tokens,
        error = ?error,
        "request complete"
    );
}

// ─── Streaming delivery ────────────────────────────────────────────────────

/// Drive an OpenAI upstream stream through the translator state machine.
///
/// The driver task owns the upstream connection; when the client
/// disconnects, channel sends fail, the task stops reading (aborting the
/// upstream body), and the completion hook still fires exactly once with
/// the cancellation marker.
fn spawn_translated_stream(
    state: AppState,
    ctx: RequestCtx,
    mut frames: FrameStream,
    descriptor: &ProviderDescriptor,
    client_model: String,
) -> Response {
    let read_timeout = Duration::from_secs(descriptor.timeouts.stream_read_secs);
    let (tx, rx) = mpsc::channel::<OutFrame>(32);

    tokio::spawn(async move {
        let started = Instant::now();
        let mut machine = StreamMachine::new(&client_model);
        let mut cancelled = false;
        let mut stream_error: Option<RelayError> = None;

        'read: loop {
            let next = tokio::time::timeout(read_timeout, frames.next()).await;
            let frame = match next {
                Err(_) => {
                    stream_error = Some(RelayError::UpstreamTimeout(
                        "stream read timed out".into(),
                    ));
                    break 'read;
                }
                Ok(None) => break 'read,
                Ok(Some(Err(e))) => {
                    stream_error = Some(e);
                    break 'read;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            for mut event in machine.ingest(&frame.data) {
                state.middleware.process_chunk(&ctx, &mut event).await;
                if tx.send(event.into()).await.is_err() {
                    cancelled = true;
                    break 'read;
                }
            }
            if machine.is_finished() {
                break 'read;
            }
        }

        if !cancelled {
            if let Some(e) = &stream_error {
                tracing::warn!(request_id = %ctx.request_id, error = %e, "stream failed mid-flight");
                let _ = tx
                    .send(
                        ClaudeStreamEvent::Error {
                            error: ClaudeErrorDetail {
                                error_type: e.error_type().to_string(),
                                message: e.to_string(),
                            },
                        }
                        .into(),
                    )
                    .await;
            } else if !machine.is_finished() {
                for mut event in machine.finish() {
                    state.middleware.process_chunk(&ctx, &mut event).await;
                    if tx.send(event.into()).await.is_err() {
                        cancelled = true;
                        break;
                    }
                }
            }
        }
        drop(frames);

        let mut summary = machine.summary();
        summary.cancelled = cancelled;
        state.middleware.process_complete(&ctx, &summary).await;

        tracing::info!(
            request_id = %ctx.request_id,
            provider = %ctx.provider,
            model = %ctx.model,
            stream = true,
            cancelled,
            duration_ms = started.elapsed().as_millis() as u64,
            stop_reason = summary.stop_reason.as_deref(),
            input_tokens = summary.usage.input_tokens,
            output_tokens = summary.usage.output_tokens,
            error = ?stream_error,
            "request complete"
        );
    });

    sse_response(ReceiverStream::new(rx))
}

/// Forward an Anthropic upstream stream frame-for-frame, parsing each frame
/// so middleware can observe deltas. Malformed frames are forwarded
/// unchanged but not routed to middleware.
fn spawn_passthrough_stream(
    state: AppState,
    ctx: RequestCtx,
    mut frames: FrameStream,
    descriptor: &ProviderDescriptor,
) -> Response {
    let read_timeout = Duration::from_secs(descriptor.timeouts.stream_read_secs);
    let (tx, rx) = mpsc::channel::<OutFrame>(32);

    tokio::spawn(async move {
        let started = Instant::now();
        let mut summary = StreamSummary::default();
        let mut cancelled = false;
        let mut stream_error: Option<RelayError> = None;

        'read: loop {
            let next = tokio::time::timeout(read_timeout, frames.next()).await;
            let frame = match next {
                Err(_) => {
                    stream_error = Some(RelayError::UpstreamTimeout(
                        "stream read timed out".into(),
                    ));
                    break 'read;
                }
                Ok(None) => break 'read,
                Ok(Some(Err(e))) => {
                    stream_error = Some(e);
                    break 'read;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let out = match serde_json::from_str::<ClaudeStreamEvent>(&frame.data) {
                Ok(mut event) => {
                    state.middleware.process_chunk(&ctx, &mut event).await;
                    observe_passthrough_event(&mut summary, &event);
                    let finished = matches!(event, ClaudeStreamEvent::MessageStop);
                    if tx.send(event.into()).await.is_err() {
                        cancelled = true;
                        break 'read;
                    }
                    if finished {
                        break 'read;
                    }
                    continue;
                }
                // Tolerate upstream oddities: forward, skip middleware.
                Err(_) => OutFrame::Raw {
                    event: frame.event.clone(),
                    data: frame.data.clone(),
                },
            };
            if tx.send(out).await.is_err() {
                cancelled = true;
                break 'read;
            }
        }

        if !cancelled
            && let Some(e) = &stream_error
        {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "stream failed mid-flight");
            let _ = tx
                .send(
                    ClaudeStreamEvent::Error {
                        error: ClaudeErrorDetail {
                            error_type: e.error_type().to_string(),
                            message: e.to_string(),
                        },
                    }
                    .into(),
                )
                .await;
        }
        drop(frames);

        summary.cancelled = cancelled;
        state.middleware.process_complete(&ctx, &summary).await;

        tracing::info!(
            request_id = %ctx.request_id,
            provider = %ctx.provider,
            model = %ctx.model,
            stream = true,
            cancelled,
            duration_ms = started.elapsed().as_millis() as u64,
            stop_reason = summary.stop_reason.as_deref(),
            input_tokens = summary.usage.input_tokens,
            output_tokens = summary.usage.output_tokens,
            error = ?stream_error,
            "request complete"
        );
    });

    sse_response(ReceiverStream::new(rx))
}

fn observe_passthrough_event(summary: &mut StreamSummary, event: &ClaudeStreamEvent) {
    match event {
        ClaudeStreamEvent::MessageStart { message } => {
            summary.message_id = Some(message.id.clone());
            summary.usage.input_tokens = message.usage.input_tokens;
        }
        ClaudeStreamEvent::ContentBlockStart {
            content_block: llm_relay_core::types::claude::ClaudeContent::ToolUse { id, .. },
            ..
        } => {
            summary.tool_call_ids.push(id.clone());
        }
        ClaudeStreamEvent::MessageDelta { delta, usage } => {
            summary.stop_reason = delta.stop_reason.clone();
            if let Some(usage) = usage {
                summary.usage.output_tokens = usage.output_tokens;
            }
        }
        _ => {}
    }
}

use axum::Router;
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use llm_relay_core::config::{Config, ProviderEntry};
use llm_relay_core::keys::KeyRotator;
use llm_relay_core::middleware::thought_signature::ThoughtSignatureMiddleware;
use llm_relay_core::middleware::{Middleware, MiddlewareChain, RequestCtx, StreamSummary};
use llm_relay_core::provider::{ApiFormat, OauthSettings, Timeouts};
use llm_relay_core::registry::Registry;
use llm_relay_core::signature::SignatureCache;
use llm_relay_oauth::manager::TokenManager;
use llm_relay_oauth::store::{CredentialRecord, CredentialStore};
use llm_relay_provider::UpstreamFactory;
use llm_relay_server::{AppState, build_router};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;

// ─── Harness ───────────────────────────────────────────────────────────────

/// Records every captured upstream request body.
type CapturedRequests = Arc<Mutex<Vec<Value>>>;

/// Middleware recording stream completions, for the coverage guarantees.
struct CompletionRecorder {
    summaries: Arc<Mutex<Vec<StreamSummary>>>,
    notify: Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl Middleware for CompletionRecorder {
    fn name(&self) -> &str {
        "completion-recorder"
    }

    async fn on_stream_complete(&self, _ctx: &RequestCtx, summary: &StreamSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
        self.notify.notify_one();
    }
}

struct TestHarness {
    relay_url: String,
    summaries: Arc<Mutex<Vec<StreamSummary>>>,
    notify: Arc<tokio::sync::Notify>,
}

struct HarnessOptions {
    api_format: ApiFormat,
    models: Vec<String>,
    proxy_key: Option<String>,
    oauth: Option<OauthSettings>,
    credentials_dir: Option<String>,
    stream_read_secs: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            api_format: ApiFormat::Openai,
            models: vec![],
            proxy_key: None,
            oauth: None,
            credentials_dir: None,
            stream_read_secs: 5,
        }
    }
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_relay(upstream_url: &str, options: HarnessOptions) -> TestHarness {
    let entry = ProviderEntry {
        name: "primary".into(),
        api_format: Some(options.api_format),
        base_url: upstream_url.to_string(),
        api_keys: if options.oauth.is_some() {
            vec![]
        } else {
            vec!["upstream-key".into()]
        },
        oauth: options.oauth,
        timeouts: Timeouts {
            connect_secs: 5,
            request_secs: 10,
            stream_read_secs: options.stream_read_secs,
        },
        retries: 0,
        max_tokens_cap: None,
        extra_headers: Default::default(),
        models: options.models,
    };

    let config = Config {
        api_key: options.proxy_key,
        credentials_dir: options.credentials_dir,
        default_provider: Some("primary".into()),
        providers: vec![entry],
        ..Default::default()
    };

    let registry = Arc::new(Registry::from_config(&config).unwrap());
    let cache = Arc::new(SignatureCache::new(Duration::from_secs(60), 100));
    let summaries: Arc<Mutex<Vec<StreamSummary>>> = Arc::new(Mutex::new(Vec::new()));
    let notify = Arc::new(tokio::sync::Notify::new());

    let mut chain = MiddlewareChain::new();
    chain.add(Arc::new(ThoughtSignatureMiddleware::new(cache)));
    chain.add(Arc::new(CompletionRecorder {
        summaries: summaries.clone(),
        notify: notify.clone(),
    }));

    let tokens = TokenManager::new(CredentialStore::new(config.credentials_root()), false);

    let state = AppState {
        config: Arc::new(config),
        registry,
        rotator: Arc::new(KeyRotator::new()),
        tokens: Arc::new(tokens),
        upstreams: Arc::new(UpstreamFactory::new()),
        middleware: Arc::new(chain),
    };

    TestHarness {
        relay_url: spawn_server(build_router(state)).await,
        summaries,
        notify,
    }
}

fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|record| {
            let mut event = None;
            let mut data = None;
            for line in record.lines() {
                if let Some(value) = line.strip_prefix("event: ") {
                    event = Some(value.to_string());
                } else if let Some(value) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(value).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}

// ─── Unary scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn plain_text_unary_round_trip() {
    let upstream = Router::new().route(
        "/chat/completions",
        post(|| async {
            axum::Json(json!({
                "id": "cmpl-1",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "hi"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1}
            }))
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(&upstream_url, HarnessOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "gpt-4o",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "Say hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"], json!([{"type": "text", "text": "hi"}]));
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 5);
    assert_eq!(body["usage"]["output_tokens"], 1);
    assert_eq!(body["model"], "gpt-4o");
}

#[tokio::test]
async fn tool_use_unary_preserves_ids_and_input() {
    let captured: CapturedRequests = Arc::new(Mutex::new(Vec::new()));
    let captured_for_handler = captured.clone();
    let upstream = Router::new().route(
        "/chat/completions",
        post(move |body: axum::Json<Value>| {
            let captured = captured_for_handler.clone();
            async move {
                captured.lock().unwrap().push(body.0);
                axum::Json(json!({
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
                }))
            }
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(&upstream_url, HarnessOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "gpt-4o",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "add 1 and 2"}],
            "tools": [{"name": "add", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "tool", "name": "add"}
        }))
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["content"][0],
        json!({"type": "tool_use", "id": "c1", "name": "add", "input": {"a": 1, "b": 2}})
    );
    assert_eq!(body["stop_reason"], "tool_use");

    let sent = captured.lock().unwrap();
    assert_eq!(
        sent[0]["tool_choice"],
        json!({"type": "function", "function": {"name": "add"}})
    );
    assert_eq!(sent[0]["tools"][0]["function"]["name"], "add");
}

#[tokio::test]
async fn upstream_error_body_passes_through() {
    let upstream = Router::new().route(
        "/chat/completions",
        post(|| async {
            (
                axum::http::StatusCode::IM_A_TEAPOT,
                axum::Json(json!({"error": {"message": "nope", "type": "teapot"}})),
            )
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(&upstream_url, HarnessOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "m", "max_tokens": 1,
            "messages": [{"role": "user", "content": "q"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "nope");
}

#[tokio::test]
async fn request_validation_errors() {
    let harness = spawn_relay("http://127.0.0.1:1", HarnessOptions::default()).await;
    let client = reqwest::Client::new();

    // Missing max_tokens
    let response = client
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown provider prefix
    let response = client
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "nope:m", "max_tokens": 1,
            "messages": [{"role": "user", "content": "q"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "not_found_error");
}

#[tokio::test]
async fn proxy_key_is_enforced() {
    let harness = spawn_relay(
        "http://127.0.0.1:1",
        HarnessOptions {
            proxy_key: Some("proxy-secret".into()),
            ..Default::default()
        },
    )
    .await;
    let client = reqwest::Client::new();
    let request = json!({
        "model": "m", "max_tokens": 1,
        "messages": [{"role": "user", "content": "q"}]
    });

    let response = client
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .post(format!("{}/v1/messages", harness.relay_url))
        .header("x-api-key", "wrong")
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Correct key reaches dispatch (502 from the dead upstream, not 401).
    let response = client
        .post(format!("{}/v1/messages", harness.relay_url))
        .header("x-api-key", "proxy-secret")
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_ne!(response.status(), 401);
}

// ─── Streaming scenarios ───────────────────────────────────────────────────

fn sse_body(frames: &[&str]) -> Response {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
        .into_response()
}

#[tokio::test]
async fn streaming_text_then_tool_event_sequence() {
    let upstream = Router::new().route(
        "/chat/completions",
        post(|| async {
            sse_body(&[
                r#"{"choices":[{"delta":{"role":"assistant","content":"he"},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{"content":"llo"},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"f","arguments":"{\"x\":"}}]},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":7,"completion_tokens":4}}"#,
                "[DONE]",
            ])
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(&upstream_url, HarnessOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "gpt-4o", "max_tokens": 64, "stream": true,
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();
    let events = sse_events(&text);

    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    assert_eq!(events[1].1["content_block"]["type"], "text");
    assert_eq!(events[2].1["delta"]["text"], "he");
    assert_eq!(events[5].1["content_block"]["type"], "tool_use");
    assert_eq!(events[5].1["content_block"]["id"], "c1");
    assert_eq!(events[5].1["index"], 1);
    assert_eq!(events[6].1["delta"]["partial_json"], "{\"x\":");
    assert_eq!(events[7].1["delta"]["partial_json"], "1}");
    assert_eq!(events[9].1["delta"]["stop_reason"], "tool_use");
    assert_eq!(events[9].1["usage"]["input_tokens"], 7);

    // One stream, one completion.
    harness.notify.notified().await;
    let summaries = harness.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(!summaries[0].cancelled);
    assert_eq!(summaries[0].stop_reason.as_deref(), Some("tool_use"));
}

#[tokio::test]
async fn anthropic_passthrough_stream_forwards_frames() {
    let upstream = Router::new().route(
        "/v1/messages",
        post(|| async {
            let body = concat!(
                "event: message_start\n",
                "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"claude-x\",\"content\":[],\"stop_reason\":null,\"usage\":{\"input_tokens\":3,\"output_tokens\":0}}}\n\n",
                "event: content_block_start\n",
                "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
                "event: content_block_delta\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
                "event: content_block_stop\n",
                "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
                "event: message_delta\n",
                "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
                "event: message_stop\n",
                "data: {\"type\":\"message_stop\"}\n\n",
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(
        &upstream_url,
        HarnessOptions {
            api_format: ApiFormat::Anthropic,
            ..Default::default()
        },
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "claude-x", "max_tokens": 8, "stream": true,
            "messages": [{"role": "user", "content": "q"}]
        }))
        .send()
        .await
        .unwrap();
    let text = response.text().await.unwrap();
    let events = sse_events(&text);

    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    harness.notify.notified().await;
    let summaries = harness.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].message_id.as_deref(), Some("msg_1"));
    assert_eq!(summaries[0].stop_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn client_cancel_fires_completion_exactly_once() {
    // Endless upstream stream; the client walks away mid-read.
    let upstream = Router::new().route(
        "/chat/completions",
        post(|| async {
            let frames = futures::stream::unfold(0u64, |i| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let chunk = format!(
                    "data: {{\"choices\":[{{\"delta\":{{\"content\":\"x{i}\"}},\"finish_reason\":null}}]}}\n\n"
                );
                Some((Ok::<_, Infallible>(Bytes::from(chunk)), i + 1))
            });
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(frames),
            )
                .into_response()
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(&upstream_url, HarnessOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "m", "max_tokens": 8, "stream": true,
            "messages": [{"role": "user", "content": "q"}]
        }))
        .send()
        .await
        .unwrap();

    let mut body = response.bytes_stream();
    let _first = body.next().await.unwrap().unwrap();
    drop(body); // client disconnects

    tokio::time::timeout(Duration::from_secs(5), harness.notify.notified())
        .await
        .expect("on_stream_complete must fire after cancel");
    // Allow any stragglers to double-fire before asserting exactly-once.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let summaries = harness.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].cancelled);
}

#[tokio::test]
async fn stream_read_timeout_yields_error_event() {
    // Upstream sends one delta then stalls past the read timeout.
    let upstream = Router::new().route(
        "/chat/completions",
        post(|| async {
            let frames = futures::stream::unfold(0u64, |i| async move {
                if i == 0 {
                    let chunk =
                        "data: {\"choices\":[{\"delta\":{\"content\":\"x\"},\"finish_reason\":null}]}\n\n";
                    Some((Ok::<_, Infallible>(Bytes::from(chunk)), 1))
                } else {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    None
                }
            });
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(frames),
            )
                .into_response()
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(
        &upstream_url,
        HarnessOptions {
            stream_read_secs: 1,
            ..Default::default()
        },
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "m", "max_tokens": 8, "stream": true,
            "messages": [{"role": "user", "content": "q"}]
        }))
        .send()
        .await
        .unwrap();
    let text = response.text().await.unwrap();
    let events = sse_events(&text);

    let (name, data) = events.last().unwrap();
    assert_eq!(name, "error");
    assert_eq!(data["error"]["type"], "timeout_error");

    harness.notify.notified().await;
    assert_eq!(harness.summaries.lock().unwrap().len(), 1);
}

// ─── OAuth (S5) ────────────────────────────────────────────────────────────

#[tokio::test]
async fn oauth_refresh_on_the_fly_injects_new_token() {
    let token_hits = Arc::new(Mutex::new(0u32));
    let token_hits_handler = token_hits.clone();
    let auth_headers: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let auth_headers_handler = auth_headers.clone();

    let upstream = Router::new()
        .route(
            "/token",
            post(move || {
                let hits = token_hits_handler.clone();
                async move {
                    *hits.lock().unwrap() += 1;
                    axum::Json(json!({
                        "access_token": "fresh-token",
                        "refresh_token": "rt-2",
                        "expires_in": 3600
                    }))
                }
            }),
        )
        .route(
            "/chat/completions",
            post(move |headers: axum::http::HeaderMap| {
                let seen = auth_headers_handler.clone();
                async move {
                    seen.lock().unwrap().push(
                        headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string(),
                    );
                    axum::Json(json!({
                        "id": "cmpl-1",
                        "choices": [{
                            "message": {"role": "assistant", "content": "ok"},
                            "finish_reason": "stop"
                        }]
                    }))
                }
            }),
        );
    let upstream_url = spawn_server(upstream).await;

    // Stored record expires within the refresh threshold.
    let credentials = tempfile::tempdir().unwrap();
    CredentialStore::new(credentials.path())
        .save(
            "primary",
            &CredentialRecord {
                access_token: "stale-token".into(),
                refresh_token: "rt-1".into(),
                id_token: None,
                account_id: None,
                expires_at: Some(chrono::Utc::now() + chrono::Duration::seconds(120)),
                last_refresh: Some(chrono::Utc::now()),
            },
        )
        .unwrap();

    let harness = spawn_relay(
        &upstream_url,
        HarnessOptions {
            oauth: Some(OauthSettings {
                client_id: "cid".into(),
                authorize_url: format!("{upstream_url}/authorize"),
                token_url: format!("{upstream_url}/token"),
                scopes: vec![],
                callback_port: 0,
            }),
            credentials_dir: Some(credentials.path().to_string_lossy().into_owned()),
            ..Default::default()
        },
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "m", "max_tokens": 8,
            "messages": [{"role": "user", "content": "q"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(*token_hits.lock().unwrap(), 1);
    let seen = auth_headers.lock().unwrap();
    assert_eq!(seen.as_slice(), ["Bearer fresh-token"]);
}

// ─── Thought signatures (S6) ───────────────────────────────────────────────

#[tokio::test]
async fn thought_signature_round_trip_across_requests() {
    let captured: CapturedRequests = Arc::new(Mutex::new(Vec::new()));
    let captured_handler = captured.clone();
    let upstream = Router::new().route(
        "/chat/completions",
        post(move |body: axum::Json<Value>| {
            let captured = captured_handler.clone();
            async move {
                captured.lock().unwrap().push(body.0);
                axum::Json(json!({
                    "id": "cmpl-g",
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "c1",
                                "type": "function",
                                "function": {"name": "f", "arguments": "{}"},
                                "extra_content": {"google": {"thought_signature": "T"}}
                            }]
                        },
                        "finish_reason": "tool_calls"
                    }]
                }))
            }
        }),
    );
    let upstream_url = spawn_server(upstream).await;
    let harness = spawn_relay(&upstream_url, HarnessOptions::default()).await;
    let client = reqwest::Client::new();

    // First turn: Gemini responds with a signed tool call.
    client
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "gemini-2.5-pro", "max_tokens": 64,
            "messages": [{"role": "user", "content": "go"}],
            "tools": [{"name": "f", "input_schema": {"type": "object"}}]
        }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    // Follow-up replays the assistant tool_use and returns the result.
    client
        .post(format!("{}/v1/messages", harness.relay_url))
        .json(&json!({
            "model": "gemini-2.5-pro", "max_tokens": 64,
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "c1", "name": "f", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "c1", "content": "done"}
                ]}
            ]
        }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let sent = captured.lock().unwrap();
    assert_eq!(sent.len(), 2);
    let follow_up_messages = sent[1]["messages"].as_array().unwrap();
    let assistant = follow_up_messages
        .iter()
        .find(|m| m["role"] == "assistant")
        .unwrap();
    assert_eq!(
        assistant["tool_calls"][0]["extra_body"]["google"]["thought_signature"],
        "T"
    );
}

// ─── Thin endpoints ────────────────────────────────────────────────────────

#[tokio::test]
async fn count_tokens_estimates_from_characters() {
    let harness = spawn_relay("http://127.0.0.1:1", HarnessOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!(
            "{}/v1/messages/count_tokens",
            harness.relay_url
        ))
        .json(&json!({
            "model": "m",
            "messages": [{"role": "user", "content": "12345678"}]
        }))
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["input_tokens"], 2);
}

#[tokio::test]
async fn models_endpoint_formats_and_filters() {
    let harness = spawn_relay(
        "http://127.0.0.1:1",
        HarnessOptions {
            models: vec!["gpt-4o".into(), "gpt-4o-mini".into()],
            ..Default::default()
        },
    )
    .await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/v1/models", harness.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"][0]["type"], "model");
    assert_eq!(body["has_more"], false);

    let body: Value = client
        .get(format!("{}/v1/models?format=openai", harness.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["owned_by"], "primary");

    let body: Value = client
        .get(format!("{}/v1/models?format=raw", harness.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["primary"], json!(["gpt-4o", "gpt-4o-mini"]));

    let response = client
        .get(format!("{}/v1/models?provider=ghost", harness.relay_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn health_and_test_connection() {
    let harness = spawn_relay("http://127.0.0.1:1", HarnessOptions::default()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/health", harness.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    let body: Value = client
        .get(format!("{}/test-connection", harness.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["default_provider"], "primary");
    assert_eq!(body["providers"][0]["auth"], "static-keys");
    assert_eq!(body["providers"][0]["credentialed"], true);
}

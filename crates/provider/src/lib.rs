pub mod anthropic;
pub mod common;
pub mod openai;
pub mod sse;

use crate::sse::FrameStream;
use async_trait::async_trait;
use bytes::Bytes;
use llm_relay_core::error::RelayError;
use llm_relay_core::provider::{ApiFormat, ProviderDescriptor};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Credential resolved for one upstream call. The header is injected per
/// call, so OAuth refresh never invalidates pooled connections.
#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(String),
    Bearer(String),
    None,
}

/// A request ready to go upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub payload: Bytes,
    /// Client-supplied `anthropic-version`, forwarded on Anthropic wires.
    pub anthropic_version: Option<String>,
}

/// One pooled `reqwest::Client` per provider, configured with the
/// descriptor's connect and overall-request timeouts.
#[derive(Default)]
pub struct ClientPool {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_for(&self, descriptor: &ProviderDescriptor) -> Result<reqwest::Client, RelayError> {
        let mut clients = self.clients.lock().expect("client pool lock poisoned");
        if let Some(client) = clients.get(&descriptor.name) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(descriptor.timeouts.connect_secs))
            .timeout(Duration::from_secs(descriptor.timeouts.request_secs))
            .build()
            .map_err(|e| RelayError::Internal(format!("failed to build HTTP client: {e}")))?;
        clients.insert(descriptor.name.clone(), client.clone());
        Ok(client)
    }
}

/// Forwards requests to one upstream wire shape.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// The wire format this client speaks.
    fn wire_format(&self) -> ApiFormat;

    async fn execute(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        request: &UpstreamRequest,
    ) -> Result<Bytes, RelayError>;

    async fn execute_stream(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        request: &UpstreamRequest,
    ) -> Result<FrameStream, RelayError>;
}

/// Produces the upstream client matching a descriptor's api format.
pub struct UpstreamFactory {
    anthropic: anthropic::AnthropicUpstream,
    openai: openai::OpenAiUpstream,
}

impl UpstreamFactory {
    pub fn new() -> Self {
        let pool = std::sync::Arc::new(ClientPool::new());
        Self {
            anthropic: anthropic::AnthropicUpstream::new(pool.clone()),
            openai: openai::OpenAiUpstream::new(pool),
        }
    }

    pub fn for_format(&self, format: ApiFormat) -> &dyn UpstreamClient {
        match format {
            ApiFormat::Openai => &self.openai,
            ApiFormat::Anthropic | ApiFormat::Passthrough => &self.anthropic,
        }
    }
}

impl Default for UpstreamFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the dispatch retry loop may try this error again: only
/// pre-body network failures qualify, never HTTP statuses.
pub fn is_retryable(error: &RelayError) -> bool {
    matches!(error, RelayError::Network(_))
}

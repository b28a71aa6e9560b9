use crate::sse::FrameStream;
use crate::{ClientPool, Credential, UpstreamClient, UpstreamRequest, common};
use async_trait::async_trait;
use bytes::Bytes;
use llm_relay_core::error::RelayError;
use llm_relay_core::provider::{ApiFormat, ProviderDescriptor};
use std::sync::Arc;

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Upstream client for Anthropic-wire providers. The inbound Messages body
/// is forwarded (verbatim in passthrough mode) to `{base_url}/v1/messages`.
pub struct AnthropicUpstream {
    pool: Arc<ClientPool>,
}

impl AnthropicUpstream {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    fn build_request(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        request: &UpstreamRequest,
    ) -> Result<reqwest::RequestBuilder, RelayError> {
        let client = self.pool.client_for(descriptor)?;
        let url = format!("{}/v1/messages", descriptor.base_url_trimmed());

        let version = request
            .anthropic_version
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION);

        let mut req = client
            .post(&url)
            .header("content-type", "application/json")
            .header("anthropic-version", version);

        req = match credential {
            Credential::ApiKey(key) => req.header("x-api-key", key),
            Credential::Bearer(token) => req.header("authorization", format!("Bearer {token}")),
            Credential::None => req,
        };

        req = common::apply_extra_headers(req, descriptor);
        Ok(req.body(request.payload.to_vec()))
    }
}

#[async_trait]
impl UpstreamClient for AnthropicUpstream {
    fn wire_format(&self) -> ApiFormat {
        ApiFormat::Anthropic
    }

    async fn execute(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        request: &UpstreamRequest,
    ) -> Result<Bytes, RelayError> {
        let req = self.build_request(descriptor, credential, request)?;
        common::handle_response(req.send().await?).await
    }

    async fn execute_stream(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        request: &UpstreamRequest,
    ) -> Result<FrameStream, RelayError> {
        let req = self.build_request(descriptor, credential, request)?;
        common::handle_stream_response(req.send().await?).await
    }
}

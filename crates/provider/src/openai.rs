use crate::sse::FrameStream;
use crate::{ClientPool, Credential, UpstreamClient, UpstreamRequest, common};
use async_trait::async_trait;
use bytes::Bytes;
use llm_relay_core::error::RelayError;
use llm_relay_core::provider::{ApiFormat, ProviderDescriptor};
use std::sync::Arc;

/// Upstream client for OpenAI-wire providers. Accepts a pre-translated
/// Chat Completions body and posts it to `{base_url}/chat/completions`.
pub struct OpenAiUpstream {
    pool: Arc<ClientPool>,
}

impl OpenAiUpstream {
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
        let url = format!("{}/chat/completions", descriptor.base_url_trimmed());

        let mut req = client.post(&url).header("content-type", "application/json");

        req = match credential {
            Credential::ApiKey(key) | Credential::Bearer(key) => {
                req.header("authorization", format!("Bearer {key}"))
            }
            Credential::None => req,
        };

        req = common::apply_extra_headers(req, descriptor);
        Ok(req.body(request.payload.to_vec()))
    }
}

#[async_trait]
impl UpstreamClient for OpenAiUpstream {
    fn wire_format(&self) -> ApiFormat {
        ApiFormat::Openai
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

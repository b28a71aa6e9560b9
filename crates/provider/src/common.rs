use crate::sse::{FrameStream, frame_stream};
use bytes::Bytes;
use llm_relay_core::error::RelayError;
use llm_relay_core::provider::ProviderDescriptor;

/// Apply a provider's configured constant headers to a request builder.
pub fn apply_extra_headers(
    mut req: reqwest::RequestBuilder,
    descriptor: &ProviderDescriptor,
) -> reqwest::RequestBuilder {
    for (k, v) in &descriptor.extra_headers {
        req = req.header(k.as_str(), v.as_str());
    }
    req
}

/// Await a unary response: non-2xx becomes `RelayError::Upstream` carrying
/// the upstream body verbatim.
pub async fn handle_response(resp: reqwest::Response) -> Result<Bytes, RelayError> {
    let status = resp.status().as_u16();
    let body = resp.bytes().await?;

    if status >= 400 {
        return Err(RelayError::Upstream {
            status,
            body: String::from_utf8_lossy(&body).to_string(),
        });
    }
    Ok(body)
}

/// Open a streaming response: non-2xx is read fully and surfaced as an
/// upstream error before any frame reaches the caller.
pub async fn handle_stream_response(resp: reqwest::Response) -> Result<FrameStream, RelayError> {
    let status = resp.status().as_u16();
    if status >= 400 {
        let body = resp.bytes().await?;
        return Err(RelayError::Upstream {
            status,
            body: String::from_utf8_lossy(&body).to_string(),
        });
    }
    Ok(frame_stream(resp.bytes_stream()))
}

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire format a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFormat {
    /// Anthropic Messages wire format; the relay rewrites the model field.
    Anthropic,
    /// OpenAI Chat Completions wire format; requests are translated.
    Openai,
    /// Anthropic wire format, body forwarded byte-for-byte.
    Passthrough,
}

impl ApiFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Passthrough => "passthrough",
        }
    }

    /// Whether the upstream body is Anthropic-shaped (no response translation).
    pub fn is_anthropic_wire(&self) -> bool {
        matches!(self, Self::Anthropic | Self::Passthrough)
    }
}

impl std::fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth endpoints and client registration for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OauthSettings {
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Loopback port for the login callback server.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
}

fn default_callback_port() -> u16 {
    1455
}

/// How the relay authenticates to a provider.
#[derive(Debug, Clone)]
pub enum ProviderAuth {
    /// Round-robin rotation over a non-empty key list.
    StaticKeys(Vec<String>),
    /// OAuth credentials managed by the token store.
    Oauth(OauthSettings),
    /// No relay-side credential.
    None,
}

impl ProviderAuth {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StaticKeys(_) => "static-keys",
            Self::Oauth(_) => "oauth",
            Self::None => "none",
        }
    }
}

/// Per-provider timeouts, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Timeouts {
    pub connect_secs: u64,
    pub request_secs: u64,
    pub stream_read_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            request_secs: 600,
            stream_read_secs: 120,
        }
    }
}

/// Immutable description of one upstream provider, validated at load.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub api_format: ApiFormat,
    pub base_url: String,
    pub auth: ProviderAuth,
    pub timeouts: Timeouts,
    pub retries: u32,
    pub max_tokens_cap: Option<u64>,
    pub extra_headers: HashMap<String, String>,
    /// Models advertised through /v1/models.
    pub models: Vec<String>,
}

impl ProviderDescriptor {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.name.is_empty() {
            return Err(RelayError::Config("provider name must not be empty".into()));
        }
        if self.name.contains(':') {
            return Err(RelayError::Config(format!(
                "provider name '{}' must not contain ':'",
                self.name
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(RelayError::Config(format!(
                "provider '{}': base-url must be an absolute http(s) URL",
                self.name
            )));
        }
        if let ProviderAuth::StaticKeys(keys) = &self.auth
            && keys.is_empty()
        {
            return Err(RelayError::Config(format!(
                "provider '{}': api-keys must not be empty",
                self.name
            )));
        }
        Ok(())
    }

    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

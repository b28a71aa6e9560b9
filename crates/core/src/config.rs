use crate::error::RelayError;
use crate::provider::{ApiFormat, OauthSettings, ProviderAuth, ProviderDescriptor, Timeouts};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    /// Proxy-side client key; when set, requests must present it.
    pub api_key: Option<String>,

    /// Root directory for persisted OAuth credentials.
    pub credentials_dir: Option<String>,

    /// Name of the provider used for unprefixed model strings.
    pub default_provider: Option<String>,

    /// Request body size limit (MB).
    pub body_limit_mb: usize,

    /// Thought-signature cache tuning.
    pub signature_cache: SignatureCacheConfig,

    pub providers: Vec<ProviderEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8402,
            api_key: None,
            credentials_dir: None,
            default_provider: None,
            body_limit_mb: 10,
            signature_cache: SignatureCacheConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a YAML file, sanitize, and validate.
    pub fn load(path: &str) -> Result<Self, RelayError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("cannot read {path}: {e}")))?;
        let mut config: Config = serde_yml::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("cannot parse {path}: {e}")))?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.providers.is_empty() {
            return Err(RelayError::Config("no providers configured".into()));
        }
        for entry in &self.providers {
            entry.to_descriptor()?.validate()?;
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        for entry in &mut self.providers {
            while entry.base_url.ends_with('/') {
                entry.base_url.pop();
            }
            entry.api_keys.retain(|k| !k.is_empty());
            let headers: HashMap<String, String> = entry
                .extra_headers
                .drain()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect();
            entry.extra_headers = headers;
        }
    }

    /// Resolve the credential root, defaulting to `~/.llm-relay`.
    pub fn credentials_root(&self) -> PathBuf {
        if let Some(ref dir) = self.credentials_dir {
            return PathBuf::from(shellexpand_home(dir));
        }
        dirs_home().join(".llm-relay")
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("{}/{}", dirs_home().display(), rest);
    }
    path.to_string()
}

// ─── Sub-configs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SignatureCacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
}

impl Default for SignatureCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 1000,
            sweep_interval_secs: 300,
        }
    }
}

// ─── Provider entry ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProviderEntry {
    pub name: String,
    pub api_format: Option<ApiFormat>,
    pub base_url: String,
    pub api_keys: Vec<String>,
    pub oauth: Option<OauthSettings>,
    pub timeouts: Timeouts,
    pub retries: u32,
    pub max_tokens_cap: Option<u64>,
    pub extra_headers: HashMap<String, String>,
    pub models: Vec<String>,
}

impl Default for ProviderEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            api_format: None,
            base_url: String::new(),
            api_keys: Vec::new(),
            oauth: None,
            timeouts: Timeouts::default(),
            retries: 2,
            max_tokens_cap: None,
            extra_headers: HashMap::new(),
            models: Vec::new(),
        }
    }
}

impl ProviderEntry {
    /// Build the immutable descriptor, enforcing the one-auth-source invariant.
    pub fn to_descriptor(&self) -> Result<ProviderDescriptor, RelayError> {
        let auth = match (&self.oauth, self.api_keys.is_empty()) {
            (Some(_), false) => {
                return Err(RelayError::Config(format!(
                    "provider '{}': api-keys and oauth are mutually exclusive",
                    self.name
                )));
            }
            (Some(settings), true) => ProviderAuth::Oauth(settings.clone()),
            (None, false) => ProviderAuth::StaticKeys(self.api_keys.clone()),
            (None, true) => ProviderAuth::None,
        };

        Ok(ProviderDescriptor {
            name: self.name.clone(),
            api_format: self.api_format.unwrap_or(ApiFormat::Openai),
            base_url: self.base_url.clone(),
            auth,
            timeouts: self.timeouts,
            retries: self.retries,
            max_tokens_cap: self.max_tokens_cap,
            extra_headers: self.extra_headers.clone(),
            models: self.models.clone(),
        })
    }
}

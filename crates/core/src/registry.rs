use crate::config::Config;
use crate::error::RelayError;
use crate::provider::ProviderDescriptor;
use std::collections::HashMap;
use std::sync::Arc;

/// Where the default provider came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultSource {
    Configured,
    Fallback,
}

/// Validated provider descriptors, immutable after initialization.
pub struct Registry {
    providers: HashMap<String, Arc<ProviderDescriptor>>,
    /// Load order, used for fallback selection and listing.
    order: Vec<String>,
    default_name: String,
    default_source: DefaultSource,
}

impl Registry {
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let mut providers = HashMap::new();
        let mut order = Vec::new();

        for entry in &config.providers {
            let descriptor = entry.to_descriptor()?;
            descriptor.validate()?;
            if providers
                .insert(descriptor.name.clone(), Arc::new(descriptor))
                .is_some()
            {
                return Err(RelayError::Config(format!(
                    "duplicate provider name '{}'",
                    entry.name
                )));
            }
            order.push(entry.name.clone());
        }

        if order.is_empty() {
            return Err(RelayError::Config("no provider loaded".into()));
        }

        let (default_name, default_source) = match &config.default_provider {
            Some(name) if providers.contains_key(name) => {
                (name.clone(), DefaultSource::Configured)
            }
            Some(name) => {
                tracing::warn!(
                    configured = %name,
                    fallback = %order[0],
                    "configured default provider not loaded, falling back"
                );
                (order[0].clone(), DefaultSource::Fallback)
            }
            None => (order[0].clone(), DefaultSource::Fallback),
        };

        Ok(Self {
            providers,
            order,
            default_name,
            default_source,
        })
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ProviderDescriptor>, RelayError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::ProviderNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<ProviderDescriptor>> {
        self.order
            .iter()
            .filter_map(|n| self.providers.get(n).cloned())
            .collect()
    }

    pub fn default(&self) -> Arc<ProviderDescriptor> {
        self.providers[&self.default_name].clone()
    }

    pub fn default_source(&self) -> DefaultSource {
        self.default_source
    }

    /// Split `<provider>:<model>` into its parts. A bare model has no hint.
    pub fn split_model(model: &str) -> (Option<&str>, &str) {
        match model.split_once(':') {
            Some((provider, rest)) if !provider.is_empty() && !rest.is_empty() => {
                (Some(provider), rest)
            }
            _ => (None, model),
        }
    }

    /// Resolve a request model string to a descriptor and reduced model name.
    pub fn resolve(&self, model: &str) -> Result<(Arc<ProviderDescriptor>, String), RelayError> {
        match Self::split_model(model) {
            (Some(hint), reduced) => Ok((self.lookup(hint)?, reduced.to_string())),
            (None, bare) => Ok((self.default(), bare.to_string())),
        }
    }
}

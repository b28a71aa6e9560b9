use std::collections::HashMap;
use std::sync::Mutex;

/// Process-global round-robin rotation over a provider's API key list.
///
/// Rotation state is shared across requests so parallel traffic spreads
/// over all keys instead of each request starting at index zero.
#[derive(Default)]
pub struct KeyRotator {
    indices: Mutex<HashMap<String, usize>>,
}

impl KeyRotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `keys[index % len]` for the provider, then advance the index.
    ///
    /// Panics on an empty slice; descriptor validation rules that out.
    pub fn next(&self, provider: &str, keys: &[String]) -> String {
        let mut indices = self.indices.lock().expect("key rotator lock poisoned");
        let index = indices.entry(provider.to_string()).or_insert(0);
        let key = keys[*index % keys.len()].clone();
        *index = index.wrapping_add(1);
        key
    }
}

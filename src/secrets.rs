//! API-key resolution.
//!
//! The batch core asks an [`ApiKeyResolver`] for a provider's key once per
//! run. Where the key comes from (environment, a secret store, the model
//! catalog) is the resolver's business; `None` is a valid answer for
//! providers that need no credentials.

use crate::provider::ProviderRegistry;
use std::collections::BTreeMap;
use tracing::debug;

/// Maps a provider name to an optional API key.
pub trait ApiKeyResolver: Send + Sync {
    fn resolve(&self, provider: &str) -> Option<String>;
}

impl<F> ApiKeyResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, provider: &str) -> Option<String> {
        self(provider)
    }
}

/// Always answers `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoApiKeys;

impl ApiKeyResolver for NoApiKeys {
    fn resolve(&self, _provider: &str) -> Option<String> {
        None
    }
}

/// Reads each provider's key from the environment variable named in its
/// definition (`api_key_env`). Empty values count as absent.
#[derive(Debug, Clone, Default)]
pub struct EnvKeyResolver {
    vars: BTreeMap<String, String>,
}

impl EnvKeyResolver {
    pub fn from_registry(registry: &ProviderRegistry) -> Self {
        let vars = registry
            .definitions()
            .filter_map(|d| d.api_key_env.clone().map(|var| (d.name.clone(), var)))
            .collect();
        Self { vars }
    }

    /// Variable consulted for `provider`, if any.
    pub fn variable_for(&self, provider: &str) -> Option<&str> {
        self.vars.get(provider).map(String::as_str)
    }
}

impl ApiKeyResolver for EnvKeyResolver {
    fn resolve(&self, provider: &str) -> Option<String> {
        let var = self.vars.get(provider)?;
        let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        debug!(
            "API key for '{}' from ${}: {}",
            provider,
            var,
            if value.is_some() { "found" } else { "not set" }
        );
        value
    }
}

/// Fixed provider → key map.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver(BTreeMap<String, String>);

impl StaticKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.0.insert(provider.into(), key.into());
        self
    }
}

impl ApiKeyResolver for StaticKeyResolver {
    fn resolve(&self, provider: &str) -> Option<String> {
        self.0.get(provider).cloned()
    }
}

/// Tries each resolver in order; first `Some` wins.
#[derive(Default)]
pub struct KeyChain {
    resolvers: Vec<Box<dyn ApiKeyResolver>>,
}

impl KeyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, resolver: impl ApiKeyResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }
}

impl ApiKeyResolver for KeyChain {
    fn resolve(&self, provider: &str) -> Option<String> {
        self.resolvers.iter().find_map(|r| r.resolve(provider))
    }
}

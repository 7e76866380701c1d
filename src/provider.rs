//! Provider definitions and the registry that resolves them.
//!
//! A provider is a named remote inference backend. Its *family* decides the
//! request shape (see [`crate::request::RequestBuilder`]); everything else
//! (URL, default prompt, timeout) is data. The registry is an immutable
//! snapshot handed to each batch run, so two runs never observe each other's
//! overrides.

use crate::error::FicheroError;
use crate::prompts::DEFAULT_PROMPT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Closed set of request conventions. Adding a provider that speaks one of
/// these needs only a registry entry; a new convention needs a new variant
/// here and in [`crate::request::RequestBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    /// Self-hosted server on localhost; no credentials.
    LocalNoAuth,
    /// Cloud API taking `Authorization: Bearer <key>`.
    BearerAuth,
    /// Enterprise gateway taking `api-key: <key>` and a versioned URL.
    HeaderKey,
}

impl ProviderFamily {
    /// How this family authenticates.
    pub fn auth_scheme(self) -> AuthScheme {
        match self {
            ProviderFamily::LocalNoAuth => AuthScheme::None,
            ProviderFamily::BearerAuth => AuthScheme::BearerHeader,
            ProviderFamily::HeaderKey => AuthScheme::CustomHeader("api-key"),
        }
    }

    pub fn requires_api_key(self) -> bool {
        self.auth_scheme() != AuthScheme::None
    }
}

/// Where the credential goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    None,
    BearerHeader,
    CustomHeader(&'static str),
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_scale() -> f32 {
    2.0
}

/// A provider as loaded at startup. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    /// Unique registry key, e.g. `"dashscope"`.
    pub name: String,

    /// Request convention.
    pub family: ProviderFamily,

    /// Endpoint URL. `{model}` and `{api_version}` are substituted at
    /// resolution time.
    pub url_template: String,

    /// Prompt used when the caller supplies none.
    #[serde(default = "default_prompt")]
    pub default_prompt: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Value for the `{api_version}` placeholder.
    #[serde(default)]
    pub api_version: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Page render scale factor (1.0 = 72 DPI).
    #[serde(default = "default_scale")]
    pub scale: f32,
}

impl ProviderDefinition {
    pub fn auth_scheme(&self) -> AuthScheme {
        self.family.auth_scheme()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Local Ollama server.
    pub fn ollama() -> Self {
        Self {
            name: "ollama".into(),
            family: ProviderFamily::LocalNoAuth,
            url_template: "http://localhost:11434/v1/chat/completions".into(),
            default_prompt: default_prompt(),
            timeout_secs: 90,
            api_version: None,
            api_key_env: None,
            scale: 1.0,
        }
    }

    /// Alibaba DashScope (international, OpenAI-compatible mode).
    pub fn dashscope() -> Self {
        Self {
            name: "dashscope".into(),
            family: ProviderFamily::BearerAuth,
            url_template:
                "https://dashscope-intl.aliyuncs.com/compatible-mode/v1/chat/completions".into(),
            default_prompt: default_prompt(),
            timeout_secs: 60,
            api_version: None,
            api_key_env: Some("DASHSCOPE_API_KEY".into()),
            scale: default_scale(),
        }
    }

    /// Princeton AI Sandbox (Azure OpenAI deployment gateway).
    pub fn sandbox() -> Self {
        Self {
            name: "sandbox".into(),
            family: ProviderFamily::HeaderKey,
            url_template: "https://api-ai-sandbox.princeton.edu/openai/deployments/{model}/chat/completions?api-version={api_version}".into(),
            default_prompt: default_prompt(),
            timeout_secs: 60,
            api_version: Some("2025-03-01-preview".into()),
            api_key_env: Some("AI_SANDBOX_KEY".into()),
            scale: default_scale(),
        }
    }
}

/// The `(provider, model)` pair chosen for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
    /// Replaces the provider's URL template for this model only.
    #[serde(default)]
    pub url: Option<String>,
}

impl ModelSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A provider resolved against a concrete model: everything a
/// [`crate::request::RequestBuilder`] needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescriptor {
    pub provider: String,
    pub family: ProviderFamily,
    pub model: String,
    /// Fully rendered URL.
    pub url: String,
    pub default_prompt: String,
    pub timeout: Duration,
    pub scale: f32,
}

/// Substitute `{model}` and `{api_version}` in a URL template.
pub fn render_url(template: &str, model: &str, api_version: Option<&str>) -> String {
    template
        .replace("{model}", model)
        .replace("{api_version}", api_version.unwrap_or_default())
}

/// Known providers keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderDefinition>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The static default table: `ollama`, `dashscope`, `sandbox`.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        reg.register(ProviderDefinition::ollama());
        reg.register(ProviderDefinition::dashscope());
        reg.register(ProviderDefinition::sandbox());
        reg
    }

    /// Insert or replace a definition; returns the one it replaced.
    pub fn register(&mut self, definition: ProviderDefinition) -> Option<ProviderDefinition> {
        debug!("Registering provider '{}'", definition.name);
        self.providers.insert(definition.name.clone(), definition)
    }

    /// Apply externally supplied overrides on top of this registry.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = ProviderDefinition>) -> Self {
        for def in overrides {
            self.register(def);
        }
        self
    }

    /// Parse a JSON array of provider definitions.
    pub fn parse_overrides(json: &str) -> Result<Vec<ProviderDefinition>, FicheroError> {
        serde_json::from_str(json)
            .map_err(|e| FicheroError::InvalidConfig(format!("provider overrides: {e}")))
    }

    /// Read a JSON array of provider definitions from disk.
    pub fn load_overrides(path: &Path) -> Result<Vec<ProviderDefinition>, FicheroError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FicheroError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::parse_overrides(&text)
    }

    /// Look up a provider by name.
    ///
    /// Never falls back to another provider: sending credentials to the wrong
    /// endpoint is worse than failing.
    pub fn resolve(&self, name: &str) -> Result<&ProviderDefinition, FicheroError> {
        self.providers
            .get(name)
            .ok_or_else(|| FicheroError::ProviderNotFound {
                name: name.to_string(),
                known: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Resolve a selection into a ready-to-call endpoint.
    pub fn endpoint(&self, selection: &ModelSelection) -> Result<EndpointDescriptor, FicheroError> {
        let def = self.resolve(&selection.provider)?;
        let template = selection.url.as_deref().unwrap_or(&def.url_template);
        Ok(EndpointDescriptor {
            provider: def.name.clone(),
            family: def.family,
            model: selection.model.clone(),
            url: render_url(template, &selection.model, def.api_version.as_deref()),
            default_prompt: def.default_prompt.clone(),
            timeout: def.timeout(),
            scale: def.scale,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Provider names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ProviderDefinition> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_three_families() {
        let reg = ProviderRegistry::builtin();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.resolve("ollama").unwrap().family, ProviderFamily::LocalNoAuth);
        assert_eq!(reg.resolve("dashscope").unwrap().family, ProviderFamily::BearerAuth);
        assert_eq!(reg.resolve("sandbox").unwrap().family, ProviderFamily::HeaderKey);
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let reg = ProviderRegistry::builtin();
        match reg.resolve("unknown-provider") {
            Err(FicheroError::ProviderNotFound { name, known }) => {
                assert_eq!(name, "unknown-provider");
                assert_eq!(known, "dashscope, ollama, sandbox");
            }
            other => panic!("expected ProviderNotFound, got {other:?}"),
        }
    }

    #[test]
    fn builtin_prompts_are_identical() {
        let reg = ProviderRegistry::builtin();
        for def in reg.definitions() {
            assert_eq!(def.default_prompt, DEFAULT_PROMPT, "provider {}", def.name);
        }
    }

    #[test]
    fn sandbox_url_is_templated() {
        let reg = ProviderRegistry::builtin();
        let ep = reg.endpoint(&ModelSelection::new("sandbox", "gpt-4o")).unwrap();
        assert_eq!(
            ep.url,
            "https://api-ai-sandbox.princeton.edu/openai/deployments/gpt-4o/chat/completions?api-version=2025-03-01-preview"
        );
        assert_eq!(ep.timeout, Duration::from_secs(60));
    }

    #[test]
    fn selection_url_overrides_template() {
        let reg = ProviderRegistry::builtin();
        let sel = ModelSelection::new("ollama", "llava").with_url("http://gpu-box:11434/v1/chat/completions");
        let ep = reg.endpoint(&sel).unwrap();
        assert_eq!(ep.url, "http://gpu-box:11434/v1/chat/completions");
        assert_eq!(ep.timeout, Duration::from_secs(90));
        assert_eq!(ep.scale, 1.0);
    }

    #[test]
    fn overrides_replace_by_name() {
        let json = r#"[
            {"name": "ollama", "family": "local-no-auth", "url_template": "http://10.0.0.2:11434/v1/chat/completions", "timeout_secs": 300},
            {"name": "openrouter", "family": "bearer-auth", "url_template": "https://openrouter.ai/api/v1/chat/completions", "api_key_env": "OPENROUTER_API_KEY"}
        ]"#;
        let overrides = ProviderRegistry::parse_overrides(json).unwrap();
        let reg = ProviderRegistry::builtin().with_overrides(overrides);

        assert_eq!(reg.len(), 4);
        let ollama = reg.resolve("ollama").unwrap();
        assert_eq!(ollama.timeout_secs, 300);
        assert_eq!(ollama.default_prompt, DEFAULT_PROMPT);
        assert_eq!(
            reg.resolve("openrouter").unwrap().auth_scheme(),
            AuthScheme::BearerHeader
        );
    }

    #[test]
    fn bad_family_rejected() {
        let json = r#"[{"name": "x", "family": "carrier-pigeon", "url_template": "http://x"}]"#;
        assert!(matches!(
            ProviderRegistry::parse_overrides(json),
            Err(FicheroError::InvalidConfig(_))
        ));
    }
}

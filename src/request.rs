//! Per-family request construction.
//!
//! Remote endpoints are strict about request shape: DashScope ignores a
//! top-level `max_tokens`, the sandbox gateway rejects `Authorization`, and a
//! local Ollama server has no notion of credentials at all. Each family gets
//! one [`RequestBuilder`] variant that produces exactly the shape its endpoint
//! expects. The output is a plain value with ordered maps, so two builds with
//! identical inputs compare equal.

use crate::config::ResponseFormat;
use crate::error::FileError;
use crate::prompts::effective_prompt;
use crate::provider::{AuthScheme, EndpointDescriptor, ProviderFamily};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Fully resolved transport parameters for one inference call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSpec {
    /// Registry name of the provider this request targets.
    pub provider: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Body fields other than the messages array, which the engine adds.
    pub body_params: Map<String, Value>,
    /// Instruction sent with every page image.
    pub prompt: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub response_format: ResponseFormat,
    /// Page render scale factor.
    pub scale: f32,
}

impl RequestSpec {
    /// Copy with credential header values masked, for logs and dry runs.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for (name, value) in copy.headers.iter_mut() {
            if name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("api-key") {
                *value = "<redacted>".into();
            }
        }
        copy
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// One strategy per provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBuilder {
    LocalNoAuth,
    BearerAuth,
    HeaderKey,
}

impl RequestBuilder {
    /// Select the builder for a family.
    pub fn for_family(family: ProviderFamily) -> Self {
        match family {
            ProviderFamily::LocalNoAuth => RequestBuilder::LocalNoAuth,
            ProviderFamily::BearerAuth => RequestBuilder::BearerAuth,
            ProviderFamily::HeaderKey => RequestBuilder::HeaderKey,
        }
    }

    fn family(self) -> ProviderFamily {
        match self {
            RequestBuilder::LocalNoAuth => ProviderFamily::LocalNoAuth,
            RequestBuilder::BearerAuth => ProviderFamily::BearerAuth,
            RequestBuilder::HeaderKey => ProviderFamily::HeaderKey,
        }
    }

    /// Build the request for one call.
    ///
    /// A missing `api_key` is not an error here: the auth header is simply
    /// left out and the endpoint's rejection is reported per file. Use
    /// [`RequestBuilder::build_strict`] to fail before the call instead.
    pub fn build(
        self,
        endpoint: &EndpointDescriptor,
        prompt: Option<&str>,
        api_key: Option<&str>,
        extra_params: &Map<String, Value>,
        response_format: ResponseFormat,
    ) -> RequestSpec {
        let mut body_params = extra_params.clone();
        for (k, v) in self.fixed_body(&endpoint.model) {
            body_params.insert(k, v);
        }

        RequestSpec {
            provider: endpoint.provider.clone(),
            url: endpoint.url.clone(),
            headers: self.headers(api_key),
            body_params,
            prompt: effective_prompt(prompt, &endpoint.default_prompt).to_string(),
            timeout: endpoint.timeout,
            response_format,
            scale: endpoint.scale,
        }
    }

    /// Like [`RequestBuilder::build`] but rejects a missing or blank key for
    /// families that need one.
    pub fn build_strict(
        self,
        endpoint: &EndpointDescriptor,
        prompt: Option<&str>,
        api_key: Option<&str>,
        extra_params: &Map<String, Value>,
        response_format: ResponseFormat,
    ) -> Result<RequestSpec, FileError> {
        let has_key = api_key.is_some_and(|k| !k.trim().is_empty());
        if self.family().requires_api_key() && !has_key {
            return Err(FileError::MissingCredentials {
                provider: endpoint.provider.clone(),
            });
        }
        Ok(self.build(endpoint, prompt, api_key, extra_params, response_format))
    }

    fn headers(self, api_key: Option<&str>) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if self == RequestBuilder::LocalNoAuth {
            return headers;
        }
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            match self.family().auth_scheme() {
                AuthScheme::BearerHeader => {
                    headers.insert("Authorization".to_string(), format!("Bearer {key}"));
                }
                AuthScheme::CustomHeader(name) => {
                    headers.insert(name.to_string(), key.to_string());
                }
                AuthScheme::None => {}
            }
        }
        headers
    }

    fn fixed_body(self, model: &str) -> Map<String, Value> {
        let body = match self {
            RequestBuilder::LocalNoAuth => json!({ "model": model }),
            RequestBuilder::BearerAuth => json!({
                "model": model,
                "parameters": { "max_new_tokens": 400 },
            }),
            RequestBuilder::HeaderKey => json!({
                "model": model,
                "max_tokens": 2000,
                "temperature": 0.0,
            }),
        };
        match body {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

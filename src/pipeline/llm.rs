//! VLM interaction: one `chat/completions` call per page image.
//!
//! The request body is the [`RequestSpec`]'s `body_params` plus a single user
//! message carrying the page as an `image_url` part followed by the prompt as
//! a `text` part. The response is read as an OpenAI-style completion; the
//! first choice's message content is the page text.

use crate::error::FileError;
use crate::pipeline::encode::EncodedImage;
use crate::request::RequestSpec;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

/// Longest slice of an error body kept in a [`FileError`].
const MAX_ERROR_BODY: usize = 500;

/// Build the JSON body for one page.
pub fn build_body(request: &RequestSpec, image: &EncodedImage) -> Value {
    let mut body = request.body_params.clone();
    body.insert(
        "messages".to_string(),
        json!([{
            "role": "user",
            "content": [
                { "type": "image_url", "image_url": { "url": image.data_uri() } },
                { "type": "text", "text": request.prompt },
            ],
        }]),
    );
    Value::Object(body)
}

/// Send one page to the endpoint and return the raw model text.
pub async fn request_page(
    client: &reqwest::Client,
    request: &RequestSpec,
    image: &EncodedImage,
) -> Result<String, FileError> {
    let start = Instant::now();
    let mut builder = client.post(&request.url).timeout(request.timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder
        .json(&build_body(request, image))
        .send()
        .await
        .map_err(|e| transport_error(e, request))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(e, request))?;

    debug!(
        "{} answered HTTP {} in {:?} ({} bytes)",
        request.provider,
        status.as_u16(),
        start.elapsed(),
        text.len()
    );

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(FileError::Authentication {
            provider: request.provider.clone(),
            status: status.as_u16(),
            detail: truncate(&text),
        });
    }
    if !status.is_success() {
        return Err(FileError::HttpStatus {
            status: status.as_u16(),
            body: truncate(&text),
        });
    }

    parse_completion(&text)
}

/// Extract `choices[0].message.content` from a completion payload.
///
/// Content may be a plain string or an array of `{type: "text", text}` parts.
pub fn parse_completion(body: &str) -> Result<String, FileError> {
    let value: Value = serde_json::from_str(body).map_err(|e| FileError::MalformedResponse {
        detail: format!("invalid JSON: {e}"),
    })?;

    let content = value
        .pointer("/choices/0/message/content")
        .ok_or_else(|| FileError::MalformedResponse {
            detail: "missing choices[0].message.content".into(),
        })?;

    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    if text.trim().is_empty() {
        return Err(FileError::MalformedResponse {
            detail: "empty completion content".into(),
        });
    }
    Ok(text)
}

fn transport_error(e: reqwest::Error, request: &RequestSpec) -> FileError {
    if e.is_timeout() {
        FileError::Timeout {
            secs: request.timeout.as_secs(),
        }
    } else {
        FileError::Transport {
            detail: e.to_string(),
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_ERROR_BODY {
        return s.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

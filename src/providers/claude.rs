use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ExecuteRequest, ExecuteResponse, ProviderAdapter, ResponseMetadata, VendorSettings, elapsed_ms, get_json, post_json,
    token_field,
};
use crate::error::ProviderError;
use crate::models::TokenUsage;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Messages API.
pub struct ClaudeAdapter {
    client: reqwest::Client,
    settings: VendorSettings,
}

impl ClaudeAdapter {
    pub fn new(client: reqwest::Client, settings: VendorSettings) -> Self {
        Self { client, settings }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let key = self.settings.require_key()?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(key).map_err(|_| ProviderError::AuthFailed)?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Ok(headers)
    }
}

fn request_body(model: &str, max_tokens: u32, prompt: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{
            "role": "user",
            "content": [{"type": "text", "text": prompt}]
        }],
    })
}

fn extract_content(v: &Value) -> String {
    v.get("content")
        .and_then(|arr| arr.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn parse_response(v: &Value, settings: &VendorSettings, latency_ms: u64) -> Result<ExecuteResponse, ProviderError> {
    if let Some(err) = v.get("error") {
        let kind = err.get("type").and_then(Value::as_str).unwrap_or("");
        let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(match kind {
            "rate_limit_error" => ProviderError::RateLimited,
            "authentication_error" | "permission_error" => ProviderError::AuthFailed,
            _ => ProviderError::VendorError(message.to_string()),
        });
    }

    let content = extract_content(v);
    if content.trim().is_empty() {
        return Err(ProviderError::VendorError("empty response from claude".to_string()));
    }

    Ok(ExecuteResponse {
        content,
        usage: TokenUsage::new(
            token_field(v, "/usage/input_tokens"),
            token_field(v, "/usage/output_tokens"),
        ),
        metadata: ResponseMetadata {
            provider: settings.name.clone(),
            model: v
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(settings.model.as_str())
                .to_string(),
            latency_ms,
            finish_reason: v.get("stop_reason").and_then(Value::as_str).map(str::to_string),
        },
    })
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.settings.base_url(DEFAULT_BASE_URL));
        let body = request_body(
            &self.settings.model,
            request.task.max_tokens(self.settings.max_tokens),
            &request.prompt,
        );
        debug!(provider = %self.settings.name, task = request.task.as_str(), "calling anthropic messages API");

        let started = Instant::now();
        let v = post_json(&self.client, &url, self.headers()?, &body).await?;
        parse_response(&v, &self.settings, elapsed_ms(started))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/v1/models", self.settings.base_url(DEFAULT_BASE_URL));
        get_json(&self.client, &url, self.headers()?).await.map(|_| ())
    }
}

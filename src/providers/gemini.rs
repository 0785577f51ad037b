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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini generateContent API.
pub struct GeminiAdapter {
    client: reqwest::Client,
    settings: VendorSettings,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client, settings: VendorSettings) -> Self {
        Self { client, settings }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let key = self.settings.require_key()?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(key).map_err(|_| ProviderError::AuthFailed)?,
        );
        Ok(headers)
    }
}

fn request_body(max_tokens: u32, prompt: &str) -> Value {
    json!({
        "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        "generationConfig": {"maxOutputTokens": max_tokens}
    })
}

fn parse_response(v: &Value, settings: &VendorSettings, latency_ms: u64) -> Result<ExecuteResponse, ProviderError> {
    if let Some(err) = v.get("error") {
        let status = err.get("status").and_then(Value::as_str).unwrap_or("");
        let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(match status {
            "RESOURCE_EXHAUSTED" => ProviderError::RateLimited,
            "UNAUTHENTICATED" | "PERMISSION_DENIED" => ProviderError::AuthFailed,
            "DEADLINE_EXCEEDED" => ProviderError::Timeout,
            _ => ProviderError::VendorError(message.to_string()),
        });
    }

    let candidate = v.pointer("/candidates/0");
    let content = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if content.trim().is_empty() {
        let reason = v
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .unwrap_or("empty response from gemini");
        return Err(ProviderError::VendorError(reason.to_string()));
    }

    Ok(ExecuteResponse {
        content,
        usage: TokenUsage::new(
            token_field(v, "/usageMetadata/promptTokenCount"),
            token_field(v, "/usageMetadata/candidatesTokenCount"),
        ),
        metadata: ResponseMetadata {
            provider: settings.name.clone(),
            model: settings.model.clone(),
            latency_ms,
            finish_reason: candidate
                .and_then(|c| c.get("finishReason"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
    })
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.settings.base_url(DEFAULT_BASE_URL),
            self.settings.model
        );
        let body = request_body(request.task.max_tokens(self.settings.max_tokens), &request.prompt);
        debug!(provider = %self.settings.name, task = request.task.as_str(), "calling gemini generateContent");

        let started = Instant::now();
        let v = post_json(&self.client, &url, self.headers()?, &body).await?;
        parse_response(&v, &self.settings, elapsed_ms(started))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.settings.base_url(DEFAULT_BASE_URL));
        get_json(&self.client, &url, self.headers()?).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{article_request, spawn_vendor};

    fn settings() -> VendorSettings {
        VendorSettings {
            name: "gemini".to_string(),
            model: "gemini-2.5-pro".to_string(),
            api_key: Some("key".to_string()),
            base_url: None,
            max_tokens: 2048,
        }
    }

    #[test]
    fn joins_candidate_parts() {
        let v = json!({
            "candidates": [{"content": {"parts": [{"text": "Teil 1 "}, {"text": "Teil 2"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 4}
        });
        let resp = parse_response(&v, &settings(), 1).unwrap();
        assert_eq!(resp.content, "Teil 1 Teil 2");
        assert_eq!(resp.usage.total_tokens, 12);
        assert_eq!(resp.metadata.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn blocked_prompt_reports_reason() {
        let v = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(
            parse_response(&v, &settings(), 0).unwrap_err(),
            ProviderError::VendorError("SAFETY".to_string())
        );
    }

    #[test]
    fn exhausted_resource_is_rate_limit() {
        let v = json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "quota"}});
        assert_eq!(parse_response(&v, &settings(), 0).unwrap_err(), ProviderError::RateLimited);
    }

    #[tokio::test]
    async fn generate_content_round_trip_over_http() {
        let (base, seen) = spawn_vendor(
            200,
            json!({
                "candidates": [{"content": {"parts": [{"text": "Gemini-Text"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 6}
            }),
        )
        .await;
        let adapter = GeminiAdapter::new(
            reqwest::Client::new(),
            VendorSettings {
                base_url: Some(base),
                ..settings()
            },
        );

        let resp = adapter.execute(article_request("Thema")).await.unwrap();
        assert_eq!(resp.content, "Gemini-Text");
        assert_eq!(resp.usage.total_tokens, 11);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/models/gemini-2.5-pro:generateContent");
        assert_eq!(seen[0].headers["x-goog-api-key"], "key");
        assert_eq!(seen[0].body["contents"][0]["parts"][0]["text"], "Thema");
    }

    #[tokio::test]
    async fn http_status_is_classified() {
        let (base, _) = spawn_vendor(429, json!({"error": {"status": "RESOURCE_EXHAUSTED"}})).await;
        let adapter = GeminiAdapter::new(
            reqwest::Client::new(),
            VendorSettings {
                base_url: Some(base),
                ..settings()
            },
        );
        assert_eq!(
            adapter.execute(article_request("x")).await.unwrap_err(),
            ProviderError::RateLimited
        );

        let (base, _) = spawn_vendor(403, json!({"error": {"status": "PERMISSION_DENIED"}})).await;
        let adapter = GeminiAdapter::new(
            reqwest::Client::new(),
            VendorSettings {
                base_url: Some(base),
                ..settings()
            },
        );
        assert_eq!(adapter.health_check().await, Err(ProviderError::AuthFailed));
    }
}

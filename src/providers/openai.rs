use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ExecuteRequest, ExecuteResponse, ProviderAdapter, ResponseMetadata, VendorSettings, elapsed_ms, get_json, post_json,
    token_field,
};
use crate::error::ProviderError;
use crate::models::TokenUsage;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI chat completions (also works against compatible gateways via `base_url`).
pub struct OpenAiAdapter {
    client: reqwest::Client,
    settings: VendorSettings,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client, settings: VendorSettings) -> Self {
        Self { client, settings }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let key = self.settings.require_key()?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| ProviderError::AuthFailed)?,
        );
        Ok(headers)
    }
}

fn request_body(model: &str, max_tokens: u32, prompt: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{"role": "user", "content": prompt}],
        "stream": false
    })
}

fn parse_response(v: &Value, settings: &VendorSettings, latency_ms: u64) -> Result<ExecuteResponse, ProviderError> {
    if let Some(err) = v.get("error") {
        let code = err.get("code").and_then(Value::as_str).unwrap_or("");
        let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(match code {
            "rate_limit_exceeded" | "insufficient_quota" => ProviderError::RateLimited,
            "invalid_api_key" => ProviderError::AuthFailed,
            _ => ProviderError::VendorError(message.to_string()),
        });
    }

    let choice = v.pointer("/choices/0");
    let content = choice
        .and_then(|c| c.pointer("/message/content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if content.trim().is_empty() {
        return Err(ProviderError::VendorError("empty response from openai".to_string()));
    }

    Ok(ExecuteResponse {
        content,
        usage: TokenUsage::new(
            token_field(v, "/usage/prompt_tokens"),
            token_field(v, "/usage/completion_tokens"),
        ),
        metadata: ResponseMetadata {
            provider: settings.name.clone(),
            model: v
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(settings.model.as_str())
                .to_string(),
            latency_ms,
            finish_reason: choice
                .and_then(|c| c.get("finish_reason"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.settings.base_url(DEFAULT_BASE_URL));
        let body = request_body(
            &self.settings.model,
            request.task.max_tokens(self.settings.max_tokens),
            &request.prompt,
        );
        debug!(provider = %self.settings.name, task = request.task.as_str(), "calling openai chat completions");

        let started = Instant::now();
        let v = post_json(&self.client, &url, self.headers()?, &body).await?;
        parse_response(&v, &self.settings, elapsed_ms(started))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/v1/models", self.settings.base_url(DEFAULT_BASE_URL));
        get_json(&self.client, &url, self.headers()?).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{article_request, spawn_vendor};

    fn settings() -> VendorSettings {
        VendorSettings {
            name: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: Some("sk".to_string()),
            base_url: Some("http://localhost:1234/".to_string()),
            max_tokens: 1024,
        }
    }

    #[test]
    fn parses_chat_completion() {
        let v = json!({
            "choices": [{"message": {"role": "assistant", "content": "Antwort"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = parse_response(&v, &settings(), 3).unwrap();
        assert_eq!(resp.content, "Antwort");
        assert_eq!(resp.usage, TokenUsage::new(10, 5));
        assert_eq!(resp.metadata.model, "gpt-4o");
    }

    #[test]
    fn quota_errors_are_rate_limits() {
        let v = json!({"error": {"code": "insufficient_quota", "message": "quota"}});
        assert_eq!(parse_response(&v, &settings(), 0).unwrap_err(), ProviderError::RateLimited);
        let v = json!({"error": {"code": "invalid_api_key", "message": "bad key"}});
        assert_eq!(parse_response(&v, &settings(), 0).unwrap_err(), ProviderError::AuthFailed);
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        assert_eq!(settings().base_url(DEFAULT_BASE_URL), "http://localhost:1234");
        let body = request_body("gpt-4o", 512, "Hallo");
        assert_eq!(body["messages"][0]["content"], "Hallo");
        assert_eq!(body["max_tokens"], 512);
    }

    #[tokio::test]
    async fn chat_completion_round_trip_over_http() {
        let (base, seen) = spawn_vendor(
            200,
            json!({
                "choices": [{"message": {"role": "assistant", "content": "Antwort"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 7, "completion_tokens": 3}
            }),
        )
        .await;
        let adapter = OpenAiAdapter::new(
            reqwest::Client::new(),
            VendorSettings {
                base_url: Some(format!("{base}/")),
                ..settings()
            },
        );

        let resp = adapter.execute(article_request("Frage")).await.unwrap();
        assert_eq!(resp.content, "Antwort");
        assert_eq!(resp.usage, TokenUsage::new(7, 3));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/v1/chat/completions");
        assert_eq!(seen[0].headers["authorization"], "Bearer sk");
        assert_eq!(seen[0].body["model"], "gpt-4o");
        assert_eq!(seen[0].body["messages"][0]["content"], "Frage");
    }

    #[tokio::test]
    async fn http_status_is_classified() {
        let (base, _) = spawn_vendor(401, json!({"error": {"code": "invalid_api_key"}})).await;
        let adapter = OpenAiAdapter::new(
            reqwest::Client::new(),
            VendorSettings {
                base_url: Some(base),
                ..settings()
            },
        );
        assert_eq!(
            adapter.execute(article_request("x")).await.unwrap_err(),
            ProviderError::AuthFailed
        );

        let (base, seen) = spawn_vendor(429, json!({"error": {"code": "rate_limit_exceeded"}})).await;
        let adapter = OpenAiAdapter::new(
            reqwest::Client::new(),
            VendorSettings {
                base_url: Some(base),
                ..settings()
            },
        );
        assert_eq!(adapter.health_check().await, Err(ProviderError::RateLimited));
        assert_eq!(seen.lock().unwrap()[0].path, "/v1/models");
    }
}

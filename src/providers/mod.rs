//! Provider adapters
//!
//! Each vendor sits behind [`ProviderAdapter`]. The set of vendors is closed
//! (see [`ProviderKind`]); [`build_adapter`] is the lookup table from
//! configuration to implementation.

pub mod claude;
pub mod gemini;
pub mod manager;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::models::TokenUsage;

pub use manager::ProviderManager;

/// What a provider call is for. Used for logging and token caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    Article,
    Optimize,
    Tags,
    Ideas,
    Research,
    Compare,
    Consensus,
    Chat,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Article => "article",
            Task::Optimize => "optimize",
            Task::Tags => "tags",
            Task::Ideas => "ideas",
            Task::Research => "research",
            Task::Compare => "compare",
            Task::Consensus => "consensus",
            Task::Chat => "chat",
        }
    }

    /// Tag suggestions need only a short answer.
    pub fn max_tokens(self, configured: u32) -> u32 {
        match self {
            Task::Tags => configured.min(512),
            _ => configured,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub task: Task,
    pub prompt: String,
    pub user_id: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub metadata: ResponseMetadata,
}

/// Uniform contract over one AI vendor.
///
/// `execute` is not idempotent: every call may burn vendor quota and return
/// different text for the same prompt.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry key, e.g. "claude".
    fn name(&self) -> &str;

    fn model_id(&self) -> &str;

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProviderError>;

    /// Cheap reachability and credential check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Build the adapter for a configured provider.
pub fn build_adapter(config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .with_context(|| format!("building HTTP client for provider '{}'", config.name))?;

    let settings = VendorSettings {
        name: config.name.clone(),
        model: config.model.clone(),
        api_key: config.resolve_api_key(),
        base_url: config.base_url.clone(),
        max_tokens: config.max_tokens,
    };

    let adapter: Arc<dyn ProviderAdapter> = match config.kind {
        ProviderKind::Claude => Arc::new(claude::ClaudeAdapter::new(client, settings)),
        ProviderKind::Openai => Arc::new(openai::OpenAiAdapter::new(client, settings)),
        ProviderKind::Gemini => Arc::new(gemini::GeminiAdapter::new(client, settings)),
    };
    Ok(adapter)
}

/// Settings shared by every vendor adapter.
#[derive(Debug, Clone)]
pub struct VendorSettings {
    pub name: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
}

impl VendorSettings {
    pub fn base_url<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default).trim_end_matches('/')
    }

    pub fn require_key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or(ProviderError::AuthFailed)
    }
}

/// POST a JSON body and return the decoded JSON response, classifying failures.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    body: &Value,
) -> Result<Value, ProviderError> {
    let resp = client.post(url).headers(headers).json(body).send().await?;
    decode(resp).await
}

pub(crate) async fn get_json(client: &reqwest::Client, url: &str, headers: HeaderMap) -> Result<Value, ProviderError> {
    let resp = client.get(url).headers(headers).send().await?;
    decode(resp).await
}

async fn decode(resp: reqwest::Response) -> Result<Value, ProviderError> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status, &text));
    }
    resp.json::<Value>().await.map_err(ProviderError::from)
}

pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Token count from a JSON field, tolerating absent or non-numeric values.
pub(crate) fn token_field(v: &Value, pointer: &str) -> u64 {
    v.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// Deadline applied by the orchestrator on top of the client timeout.
pub async fn with_deadline<T>(
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(r) => r,
        Err(_) => Err(ProviderError::Timeout),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted adapter for orchestrator and router tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    pub struct MockAdapter {
        name: String,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        default: Result<String, ProviderError>,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<(Task, String)>>,
        pub healthy: AtomicBool,
        pub delay: Option<Duration>,
    }

    impl MockAdapter {
        /// Always answers with `content`.
        pub fn ok(name: &str, content: &str) -> Self {
            Self::with_default(name, Ok(content.to_string()))
        }

        /// Always fails with `error`.
        pub fn failing(name: &str, error: ProviderError) -> Self {
            Self::with_default(name, Err(error))
        }

        fn with_default(name: &str, default: Result<String, ProviderError>) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(VecDeque::new()),
                default,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
                delay: None,
            }
        }

        /// Queue answers consumed in call order before falling back to the default.
        pub fn scripted(self, answers: Vec<Result<String, ProviderError>>) -> Self {
            *self.script.lock().unwrap() = answers.into();
            self
        }

        pub fn unhealthy(self) -> Self {
            self.set_healthy(false);
            self
        }

        /// Flip what the next `health_check` reports.
        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn tasks(&self) -> Vec<Task> {
            self.prompts.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn model_id(&self) -> &str {
            "mock-model"
        }

        async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push((request.task, request.prompt.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let content = next.unwrap_or_else(|| self.default.clone())?;
            Ok(ExecuteResponse {
                usage: TokenUsage::new(100, 50),
                content,
                metadata: ResponseMetadata {
                    provider: self.name.clone(),
                    model: "mock-model".to_string(),
                    latency_ms: 5,
                    finish_reason: Some("stop".to_string()),
                },
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProviderError::VendorError("down".to_string()))
            }
        }
    }

    /// Request as seen by [`spawn_vendor`].
    #[derive(Debug, Clone)]
    pub struct SeenRequest {
        pub method: String,
        pub path: String,
        pub headers: axum::http::HeaderMap,
        pub body: Value,
    }

    /// Serve a fake vendor API on an ephemeral port answering every request
    /// with `status` and `body`. Returns the base URL and the requests seen.
    pub async fn spawn_vendor(status: u16, body: Value) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
        use axum::extract::{Request, State};
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        type Shared = (Arc<Mutex<Vec<SeenRequest>>>, StatusCode, Value);

        async fn answer(State(state): State<Arc<Shared>>, req: Request) -> impl IntoResponse {
            let (seen, status, body) = &*state;
            let method = req.method().to_string();
            let path = req.uri().path().to_string();
            let headers = req.headers().clone();
            let bytes = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
            seen.lock().unwrap().push(SeenRequest {
                method,
                path,
                headers,
                body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
            });
            (*status, axum::Json(body.clone()))
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new((seen.clone(), StatusCode::from_u16(status).unwrap(), body));
        let app = axum::Router::new().fallback(answer).with_state(state);

        let listener = tokio::net::TcpListener::bind(std::net::SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    pub fn article_request(prompt: &str) -> ExecuteRequest {
        ExecuteRequest {
            task: Task::Article,
            prompt: prompt.to_string(),
            user_id: "editor".to_string(),
            metadata: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_categories() {
        use reqwest::StatusCode;
        assert_eq!(ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ProviderError::RateLimited);
        assert_eq!(ProviderError::from_status(StatusCode::UNAUTHORIZED, ""), ProviderError::AuthFailed);
        assert_eq!(ProviderError::from_status(StatusCode::FORBIDDEN, ""), ProviderError::AuthFailed);
        assert_eq!(ProviderError::from_status(StatusCode::GATEWAY_TIMEOUT, ""), ProviderError::Timeout);
        assert!(matches!(
            ProviderError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "overloaded"),
            ProviderError::VendorError(m) if m.contains("overloaded")
        ));
    }

    #[test]
    fn tag_task_caps_tokens() {
        assert_eq!(Task::Tags.max_tokens(4096), 512);
        assert_eq!(Task::Article.max_tokens(4096), 4096);
    }

    #[tokio::test]
    async fn deadline_turns_into_timeout() {
        let result: Result<(), ProviderError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(ProviderError::Timeout));
    }

    #[test]
    fn builds_one_adapter_per_kind() {
        for (kind, name) in [
            (ProviderKind::Claude, "claude"),
            (ProviderKind::Openai, "openai"),
            (ProviderKind::Gemini, "gemini"),
        ] {
            let config = ProviderConfig {
                name: name.to_string(),
                kind,
                model: "m".to_string(),
                api_key: Some("k".to_string()),
                api_key_env: None,
                base_url: None,
                timeout: "5s".to_string(),
                max_tokens: 256,
                daily_token_limit: None,
                enabled: true,
            };
            let adapter = build_adapter(&config).unwrap();
            assert_eq!(adapter.name(), name);
            assert_eq!(adapter.model_id(), "m");
        }
    }
}

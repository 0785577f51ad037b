//! Read/act client for the external newsletter queue.
//!
//! The queue, its dead-letter list and its circuit breaker live elsewhere. This
//! module only reads their state and forwards retry/reset requests; after any
//! action it re-reads the full snapshot.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::models::JobStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    #[serde(default)]
    pub waiting: u64,
    #[serde(default)]
    pub active: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub delayed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreaker {
    #[serde(default)]
    pub state: CircuitState,
    #[serde(default)]
    pub failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backpressure {
    /// Jobs currently in flight.
    #[serde(default)]
    pub active: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub queued: u64,
    #[serde(default)]
    pub throttled: bool,
}

/// Body of `GET {base_url}/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    #[serde(default)]
    pub queue: QueueCounts,
    #[serde(default)]
    pub dead_letter: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreaker,
    #[serde(default)]
    pub backpressure: Backpressure,
    #[serde(default)]
    pub jobs: Vec<JobStatus>,
}

/// What the dashboard receives: the remote metrics plus polling hints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    #[serde(flatten)]
    pub metrics: QueueMetrics,
    pub poll_interval_ms: u64,
    pub fetched_at: DateTime<Utc>,
}

pub struct QueueClient {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl QueueClient {
    /// `None` when no queue base URL is configured.
    pub fn from_config(config: &QueueConfig) -> Result<Option<Self>> {
        let Some(ref base_url) = config.base_url else {
            return Ok(None);
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("fluxao/", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(ref token) = config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let timeout = humantime::parse_duration(&config.timeout).unwrap_or(Duration::from_secs(10));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: humantime::parse_duration(&config.poll_interval).unwrap_or(Duration::from_secs(5)),
        }))
    }

    pub async fn get_metrics(&self) -> Result<QueueSnapshot, QueueError> {
        let url = format!("{}/metrics", self.base_url);
        debug!(url = %url, "fetching queue metrics");

        let response = self.client.get(&url).send().await.map_err(|e| QueueError::Http {
            url: url.clone(),
            source: e,
        })?;
        let response = check_status(response).await?;
        let metrics: QueueMetrics = response.json().await.map_err(|e| QueueError::Http { url, source: e })?;

        Ok(QueueSnapshot {
            metrics,
            poll_interval_ms: u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            fetched_at: Utc::now(),
        })
    }

    /// Ask the queue to retry a failed job, then return the fresh snapshot.
    pub async fn retry_job(&self, job_id: &str) -> Result<QueueSnapshot, QueueError> {
        if !valid_job_id(job_id) {
            return Err(QueueError::InvalidJobId(job_id.to_string()));
        }
        self.post(&format!("{}/jobs/{job_id}/retry", self.base_url)).await?;
        info!(job_id = %job_id, "job retry requested");
        self.get_metrics().await
    }

    /// Ask the queue to close its circuit breaker, then return the fresh snapshot.
    pub async fn reset_circuit(&self) -> Result<QueueSnapshot, QueueError> {
        self.post(&format!("{}/circuit/reset", self.base_url)).await?;
        info!("circuit breaker reset requested");
        self.get_metrics().await
    }

    async fn post(&self, url: &str) -> Result<(), QueueError> {
        let response = self.client.post(url).send().await.map_err(|e| QueueError::Http {
            url: url.to_string(),
            source: e,
        })?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, QueueError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(QueueError::Status {
        status: status.as_u16(),
        message: body.chars().take(300).collect(),
    })
}

/// Job ids are opaque but must be safe to place in a URL path segment.
fn valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        && id != "."
        && id != ".."
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-in for the external queue system.

    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use super::*;
    use crate::models::JobState;

    #[derive(Default)]
    pub struct FakeQueue {
        pub metrics: Mutex<QueueMetrics>,
        pub retried: Mutex<Vec<String>>,
        pub resets: Mutex<u32>,
        pub auth_headers: Mutex<Vec<Option<String>>>,
    }

    pub fn failed_job(id: &str) -> JobStatus {
        JobStatus {
            id: id.to_string(),
            job_type: "newsletter.send".to_string(),
            status: JobState::Failed,
            progress: 40.0,
            result: None,
            error: Some("SMTP 421".to_string()),
            created_at: Utc::now(),
        }
    }

    /// Serve a fake queue on an ephemeral port and return its base URL.
    pub async fn spawn(fake: Arc<FakeQueue>) -> String {
        async fn metrics(State(fake): State<Arc<FakeQueue>>, headers: HeaderMap) -> Json<QueueMetrics> {
            fake.auth_headers.lock().unwrap().push(
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            );
            Json(fake.metrics.lock().unwrap().clone())
        }

        async fn retry(State(fake): State<Arc<FakeQueue>>, Path(id): Path<String>) -> StatusCode {
            let mut metrics = fake.metrics.lock().unwrap();
            let Some(job) = metrics.jobs.iter_mut().find(|j| j.id == id) else {
                return StatusCode::NOT_FOUND;
            };
            job.status = JobState::Waiting;
            metrics.queue.failed = metrics.queue.failed.saturating_sub(1);
            metrics.queue.waiting += 1;
            fake.retried.lock().unwrap().push(id);
            StatusCode::NO_CONTENT
        }

        async fn reset(State(fake): State<Arc<FakeQueue>>) -> StatusCode {
            let mut metrics = fake.metrics.lock().unwrap();
            metrics.circuit_breaker = CircuitBreaker::default();
            *fake.resets.lock().unwrap() += 1;
            StatusCode::OK
        }

        let app = Router::new()
            .route("/metrics", get(metrics))
            .route("/jobs/{id}/retry", post(retry))
            .route("/circuit/reset", post(reset))
            .with_state(fake);

        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub fn client_for(base_url: &str, token: Option<&str>) -> QueueClient {
        let config = QueueConfig {
            base_url: Some(base_url.to_string()),
            token: token.map(str::to_string),
            ..QueueConfig::default()
        };
        QueueClient::from_config(&config).unwrap().unwrap()
    }
}

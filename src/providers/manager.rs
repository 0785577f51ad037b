use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ProviderAdapter, build_adapter, elapsed_ms, with_deadline};
use crate::config::Config;
use crate::error::{ManagerError, ProviderError};

/// Weight of the newest latency sample in the moving average.
const LATENCY_WEIGHT: f64 = 0.3;

struct Entry {
    name: String,
    adapter: Arc<dyn ProviderAdapter>,
    enabled: bool,
    daily_token_limit: Option<u64>,
}

#[derive(Debug, Clone)]
struct ProviderState {
    available: bool,
    latency_ms: Option<u64>,
    last_checked: Option<DateTime<Utc>>,
    last_error: Option<String>,
    usage_day: NaiveDate,
    requests_today: u64,
    tokens_today: u64,
}

impl ProviderState {
    fn new(enabled: bool) -> Self {
        Self {
            // Unchecked providers are assumed reachable until a health check says otherwise.
            available: enabled,
            latency_ms: None,
            last_checked: None,
            last_error: (!enabled).then(|| "disabled in configuration".to_string()),
            usage_day: Utc::now().date_naive(),
            requests_today: 0,
            tokens_today: 0,
        }
    }

    fn observe_latency(&mut self, sample_ms: u64) {
        self.latency_ms = Some(match self.latency_ms {
            None => sample_ms,
            Some(prev) => (prev as f64 * (1.0 - LATENCY_WEIGHT) + sample_ms as f64 * LATENCY_WEIGHT).round() as u64,
        });
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.usage_day != today {
            self.usage_day = today;
            self.requests_today = 0;
            self.tokens_today = 0;
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub requests_today: u64,
    pub tokens_today: u64,
    pub daily_token_limit_per_user: Option<u64>,
}

/// Last-known state of one provider. Never produced by a network call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub available: bool,
    pub enabled: bool,
    pub model: String,
    pub latency_ms: Option<u64>,
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub usage: UsageSnapshot,
}

/// Registry of adapters plus a cached health/usage snapshot.
pub struct ProviderManager {
    entries: Vec<Entry>,
    state: RwLock<HashMap<String, ProviderState>>,
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderManager {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            state: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut manager = Self::new();
        for provider in &config.provider {
            let adapter = build_adapter(provider)?;
            if provider.enabled && provider.resolve_api_key().is_none() {
                warn!(provider = %provider.name, "no API key configured; calls will fail with AuthFailed");
            }
            manager.register(adapter, provider.enabled, provider.daily_token_limit);
        }
        info!(providers = manager.entries.len(), "provider registry built");
        Ok(manager)
    }

    /// Add an adapter under its own name. Re-registering a name replaces it.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>, enabled: bool, daily_token_limit: Option<u64>) {
        let name = adapter.name().to_string();
        self.entries.retain(|e| e.name != name);
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), ProviderState::new(enabled));
        self.entries.push(Entry {
            name,
            adapter,
            enabled,
            daily_token_limit,
        });
    }

    /// Provider names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Resolve a provider name to its adapter using the cached availability.
    pub fn get_provider(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, ManagerError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ManagerError::UnknownProvider(name.to_string()))?;

        let available = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .is_some_and(|s| s.available);

        if !entry.enabled || !available {
            return Err(ManagerError::ProviderUnavailable(name.to_string()));
        }
        Ok(entry.adapter.clone())
    }

    pub fn daily_token_limit(&self, name: &str) -> Option<u64> {
        self.entry(name).and_then(|e| e.daily_token_limit)
    }

    /// Cached status for every registered provider.
    pub fn providers_status(&self) -> BTreeMap<String, ProviderStatus> {
        let today = Utc::now().date_naive();
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        self.entries
            .iter()
            .map(|entry| {
                let s = state
                    .get(&entry.name)
                    .cloned()
                    .unwrap_or_else(|| ProviderState::new(entry.enabled));
                let same_day = s.usage_day == today;
                let status = ProviderStatus {
                    available: entry.enabled && s.available,
                    enabled: entry.enabled,
                    model: entry.adapter.model_id().to_string(),
                    latency_ms: s.latency_ms,
                    last_checked: s.last_checked,
                    last_error: s.last_error,
                    usage: UsageSnapshot {
                        requests_today: if same_day { s.requests_today } else { 0 },
                        tokens_today: if same_day { s.tokens_today } else { 0 },
                        daily_token_limit_per_user: entry.daily_token_limit,
                    },
                };
                (entry.name.clone(), status)
            })
            .collect()
    }

    /// Account one finished provider call (successful or not).
    pub fn record_call(&self, name: &str, latency_ms: u64, tokens: u64) {
        let today = Utc::now().date_naive();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(s) = state.get_mut(name) {
            s.roll_day(today);
            s.requests_today += 1;
            s.tokens_today += tokens;
            s.observe_latency(latency_ms);
        }
    }

    fn record_health(&self, name: &str, outcome: Result<(), ProviderError>, latency_ms: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(s) = state.get_mut(name) {
            s.last_checked = Some(Utc::now());
            match outcome {
                Ok(()) => {
                    s.available = true;
                    s.last_error = None;
                    s.observe_latency(latency_ms);
                }
                Err(e) => {
                    s.available = false;
                    s.last_error = Some(e.to_string());
                }
            }
        }
    }

    /// Health-check every enabled provider concurrently and update the snapshot.
    pub async fn refresh_health(&self, timeout: Duration) {
        let checks = self.entries.iter().filter(|e| e.enabled).map(|entry| async move {
            let started = Instant::now();
            let outcome = with_deadline(timeout, entry.adapter.health_check()).await;
            (entry.name.as_str(), outcome, elapsed_ms(started))
        });

        for (name, outcome, latency_ms) in futures::future::join_all(checks).await {
            match &outcome {
                Ok(()) => debug!(provider = %name, latency_ms, "health check passed"),
                Err(e) => warn!(provider = %name, error = %e, "health check failed"),
            }
            self.record_health(name, outcome, latency_ms);
        }
    }
}

/// Periodic out-of-band health refresh.
pub async fn health_loop(manager: Arc<ProviderManager>, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "provider health loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("provider health loop shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        manager.refresh_health(Duration::from_secs(15)).await;
    }
}

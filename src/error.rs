use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Closed set of vendor failure categories. Callers branch on the variant,
/// never on vendor payloads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rate limit reached")]
    RateLimited,
    #[error("provider rejected credentials")]
    AuthFailed,
    #[error("provider call timed out")]
    Timeout,
    #[error("provider error: {0}")]
    VendorError(String),
}

impl ProviderError {
    /// Classify a non-success vendor HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            429 => ProviderError::RateLimited,
            401 | 403 => ProviderError::AuthFailed,
            408 | 504 => ProviderError::Timeout,
            _ => {
                let snippet: String = body.chars().take(300).collect();
                ProviderError::VendorError(format!("HTTP {status}: {snippet}"))
            }
        }
    }

    /// Short machine-readable code used in JSON responses.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::RateLimited => "rate_limited",
            ProviderError::AuthFailed => "auth_failed",
            ProviderError::Timeout => "timeout",
            ProviderError::VendorError(_) => "vendor_error",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Timeout;
        }
        if let Some(status) = e.status() {
            return ProviderError::from_status(status, "");
        }
        ProviderError::VendorError(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("provider '{0}' is currently unavailable")]
    ProviderUnavailable(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue system request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("queue system returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid job id '{0}'")]
    InvalidJobId(String),
    #[error("queue system not configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("request rejected: {0}")]
    Rejected(crate::security::Rejection),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("provider '{provider}' failed: {source}")]
    Provider { provider: String, source: ProviderError },
    #[error("daily token limit reached for provider '{0}'")]
    QuotaExceeded(String),
}

impl WriterError {
    /// Machine-readable code reported in per-item and per-provider failure slots.
    pub fn code(&self) -> &'static str {
        match self {
            WriterError::Rejected(r) if r.is_forbidden() => "forbidden",
            WriterError::Rejected(_) => "validation_failed",
            WriterError::Manager(ManagerError::UnknownProvider(_)) => "unknown_provider",
            WriterError::Manager(ManagerError::ProviderUnavailable(_)) => "provider_unavailable",
            WriterError::Provider { source, .. } => source.code(),
            WriterError::QuotaExceeded(_) => "quota_exceeded",
        }
    }
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::Role;

/// Upper bound for a single batch request regardless of configuration.
pub const BATCH_CEILING: usize = 10;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub fluxao: FluxaoConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub writer: WriterSettings,
    #[serde(default)]
    pub provider: Vec<ProviderConfig>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub user: Vec<UserConfig>,
}

#[derive(Debug, Deserialize)]
pub struct FluxaoConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_usage_retention")]
    pub usage_retention: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: String,
}

fn default_version() -> u32 {
    1
}
fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_usage_retention() -> String {
    "30d".to_string()
}
fn default_health_check_interval() -> String {
    "5m".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "fluxao.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriterSettings {
    #[serde(default = "default_provider_name")]
    pub default_provider: String,
    #[serde(default)]
    pub consensus_provider: Option<String>,
    #[serde(default = "default_max_user_context_chars")]
    pub max_user_context_chars: usize,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_batch_delay")]
    pub batch_delay: String,
    #[serde(default = "default_max_batch_delay")]
    pub max_batch_delay: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_max_compare_providers")]
    pub max_compare_providers: usize,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            default_provider: default_provider_name(),
            consensus_provider: None,
            max_user_context_chars: default_max_user_context_chars(),
            max_content_chars: default_max_content_chars(),
            max_batch_size: default_max_batch_size(),
            batch_delay: default_batch_delay(),
            max_batch_delay: default_max_batch_delay(),
            request_timeout: default_request_timeout(),
            max_compare_providers: default_max_compare_providers(),
        }
    }
}

fn default_provider_name() -> String {
    "claude".to_string()
}
fn default_max_user_context_chars() -> usize {
    4000
}
fn default_max_content_chars() -> usize {
    100_000
}
fn default_max_batch_size() -> usize {
    BATCH_CEILING
}
fn default_batch_delay() -> String {
    "2s".to_string()
}
fn default_max_batch_delay() -> String {
    "30s".to_string()
}
fn default_request_timeout() -> String {
    "120s".to_string()
}
fn default_max_compare_providers() -> usize {
    5
}

impl WriterSettings {
    pub fn batch_delay(&self) -> Duration {
        humantime::parse_duration(&self.batch_delay).unwrap_or(Duration::from_secs(2))
    }

    pub fn max_batch_delay(&self) -> Duration {
        humantime::parse_duration(&self.max_batch_delay).unwrap_or(Duration::from_secs(30))
    }

    pub fn request_timeout(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(120))
    }
}

/// Vendor family an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    Openai,
    Gemini,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub daily_token_limit: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_provider_timeout() -> String {
    "90s".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    /// Resolve the API key: inline value first, then the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key
            && !key.is_empty()
        {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        humantime::parse_duration(&self.timeout).unwrap_or(Duration::from_secs(90))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_queue_timeout")]
    pub timeout: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout: default_queue_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_queue_timeout() -> String {
    "10s".to_string()
}
fn default_poll_interval() -> String {
    "5s".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub role: Role,
    pub token: String,
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.database.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.fluxao.data_dir.join(db_path)
        }
    }

    pub fn usage_retention(&self) -> Duration {
        humantime::parse_duration(&self.fluxao.usage_retention).unwrap_or(Duration::from_secs(30 * 86_400))
    }

    pub fn health_check_interval(&self) -> Duration {
        humantime::parse_duration(&self.fluxao.health_check_interval).unwrap_or(Duration::from_secs(300))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.fluxao.version != 1 {
        return Err(ConfigError::Validation(format!(
            "unsupported config version {} (this binary supports version 1)",
            config.fluxao.version
        ))
        .into());
    }

    let mut provider_names = HashSet::new();
    for provider in &config.provider {
        if provider.name.is_empty() {
            return Err(ConfigError::Validation("provider name must not be empty".to_string()).into());
        }
        if !provider_names.insert(provider.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate provider name: '{}'", provider.name)).into());
        }
        if provider.model.is_empty() {
            return Err(ConfigError::Validation(format!("provider '{}': model must not be empty", provider.name)).into());
        }
        if provider.api_key.is_some() && provider.api_key_env.is_some() {
            return Err(ConfigError::Validation(format!(
                "provider '{}': set either 'api_key' or 'api_key_env', not both",
                provider.name
            ))
            .into());
        }
        humantime::parse_duration(&provider.timeout).map_err(|e| {
            ConfigError::Validation(format!(
                "provider '{}': invalid timeout '{}': {}",
                provider.name, provider.timeout, e
            ))
        })?;
        if provider.max_tokens == 0 {
            return Err(ConfigError::Validation(format!("provider '{}': max_tokens must be > 0", provider.name)).into());
        }
    }

    let writer = &config.writer;
    if !config.provider.is_empty() && !provider_names.contains(writer.default_provider.as_str()) {
        return Err(ConfigError::Validation(format!(
            "writer.default_provider '{}' is not a configured provider",
            writer.default_provider
        ))
        .into());
    }
    if let Some(ref consensus) = writer.consensus_provider
        && !provider_names.contains(consensus.as_str())
    {
        return Err(ConfigError::Validation(format!(
            "writer.consensus_provider '{consensus}' is not a configured provider"
        ))
        .into());
    }
    if writer.max_batch_size == 0 || writer.max_batch_size > BATCH_CEILING {
        return Err(ConfigError::Validation(format!(
            "writer.max_batch_size {} out of range (1..={BATCH_CEILING})",
            writer.max_batch_size
        ))
        .into());
    }
    if writer.max_compare_providers < 2 {
        return Err(ConfigError::Validation("writer.max_compare_providers must be at least 2".to_string()).into());
    }
    for (field, value) in [
        ("writer.batch_delay", &writer.batch_delay),
        ("writer.max_batch_delay", &writer.max_batch_delay),
        ("writer.request_timeout", &writer.request_timeout),
        ("fluxao.usage_retention", &config.fluxao.usage_retention),
        ("fluxao.health_check_interval", &config.fluxao.health_check_interval),
        ("queue.timeout", &config.queue.timeout),
        ("queue.poll_interval", &config.queue.poll_interval),
    ] {
        humantime::parse_duration(value)
            .map_err(|e| ConfigError::Validation(format!("{field} '{value}': {e}")))?;
    }

    if let Some(ref base_url) = config.queue.base_url
        && !(base_url.starts_with("http://") || base_url.starts_with("https://"))
    {
        return Err(ConfigError::Validation(format!(
            "queue.base_url '{base_url}' must start with http:// or https://"
        ))
        .into());
    }

    let mut user_names = HashSet::new();
    let mut user_tokens = HashSet::new();
    for user in &config.user {
        if user.token.trim().is_empty() {
            return Err(ConfigError::Validation(format!("user '{}': token must not be empty", user.name)).into());
        }
        if !user_names.insert(user.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate user name: '{}'", user.name)).into());
        }
        if !user_tokens.insert(user.token.as_str()) {
            return Err(ConfigError::Validation(format!("user '{}': token already in use", user.name)).into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[fluxao]

[[provider]]
name = "claude"
kind = "claude"
model = "claude-sonnet-4-5"
api_key = "sk-test"

[[user]]
name = "admin"
role = "ADMIN"
token = "admin-token"
"#;

    #[test]
    fn minimal_config_validates_with_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.fluxao.listen, "127.0.0.1:8080");
        assert_eq!(config.writer.max_batch_size, BATCH_CEILING);
        assert_eq!(config.writer.batch_delay(), Duration::from_secs(2));
        assert_eq!(config.db_path(), PathBuf::from("./data/fluxao.db"));
        assert_eq!(config.provider[0].kind, ProviderKind::Claude);
        assert_eq!(config.user[0].role, Role::Admin);
    }

    #[test]
    fn rejects_duplicate_provider_names() {
        let toml = format!(
            "{MINIMAL}\n[[provider]]\nname = \"claude\"\nkind = \"openai\"\nmodel = \"gpt-4o\"\n"
        );
        let config = parse_config(&toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate provider name"));
    }

    #[test]
    fn rejects_unknown_default_provider() {
        let toml = format!("{MINIMAL}\n[writer]\ndefault_provider = \"gemini\"\n");
        let config = parse_config(&toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("default_provider"));
    }

    #[test]
    fn rejects_batch_size_above_ceiling() {
        let toml = format!("{MINIMAL}\n[writer]\nmax_batch_size = 11\n");
        let config = parse_config(&toml).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_duplicate_user_tokens() {
        let toml = format!("{MINIMAL}\n[[user]]\nname = \"editor\"\nrole = \"EDITOR\"\ntoken = \"admin-token\"\n");
        let config = parse_config(&toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("token already in use"));
    }

    #[test]
    fn rejects_bad_durations() {
        let toml = format!("{MINIMAL}\n[queue]\ntimeout = \"soon\"\n");
        let config = parse_config(&toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("queue.timeout"));
    }

    #[test]
    fn example_config_validates() {
        let config = parse_config(include_str!("../config.example.toml")).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.provider.len(), 3);
        assert!(!config.provider[2].enabled);
        assert_eq!(config.usage_retention(), Duration::from_secs(30 * 24 * 3600));
    }

    #[test]
    fn api_key_env_is_resolved() {
        // SAFETY: test-local variable name, not read concurrently elsewhere.
        unsafe { std::env::set_var("FLUXAO_TEST_OPENAI_KEY", "sk-env") };
        let provider = ProviderConfig {
            name: "openai".to_string(),
            kind: ProviderKind::Openai,
            model: "gpt-4o".to_string(),
            api_key: None,
            api_key_env: Some("FLUXAO_TEST_OPENAI_KEY".to_string()),
            base_url: None,
            timeout: "30s".to_string(),
            max_tokens: 1024,
            daily_token_limit: None,
            enabled: true,
        };
        assert_eq!(provider.resolve_api_key().as_deref(), Some("sk-env"));
        assert_eq!(provider.timeout(), Duration::from_secs(30));
    }
}

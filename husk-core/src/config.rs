// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Every section has defaults; invalid limits are rejected at load time
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Drop idle keys on this period. Absent means keys are never pruned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_interval_secs: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            prune_interval_secs: None,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
            .with_multiplier(self.backoff_multiplier)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Per-call timeout for the AI client
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

impl ChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// User IDs that hold the owner role in every channel
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default = "default_confirmation_ttl_secs")]
    pub confirmation_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            owners: Vec::new(),
            confirmation_ttl_secs: default_confirmation_ttl_secs(),
        }
    }
}

impl SecurityConfig {
    pub fn confirmation_ttl(&self) -> Duration {
        Duration::from_secs(self.confirmation_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_max_requests() -> usize {
    15
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_chat_timeout_secs() -> u64 {
    30
}

fn default_audit_capacity() -> usize {
    crate::audit::DEFAULT_AUDIT_CAPACITY
}

fn default_confirmation_ttl_secs() -> u64 {
    60
}

fn default_bot_name() -> String {
    "husk".to_string()
}

/// `config.toml` in the per-user config dir, e.g. ~/.config/husk/config.toml
pub fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("no", "husk", "husk").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got: {}", name, val)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. HUSK_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/husk/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("HUSK_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "HUSK_CONFIG_PATH does not exist, ignoring");
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        user_config_file().filter(|path| path.exists())
    }

    /// Parse a config file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            Self::from_file(&config_path)?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("HUSK_HOST") {
            self.server.host = val;
        }
        if let Some(port) = env_number("HUSK_PORT")? {
            self.server.port = port;
        }
        if let Some(max) = env_number("HUSK_RATE_LIMIT_MAX")? {
            self.rate_limit.max_requests = max;
        }
        if let Some(window) = env_number("HUSK_RATE_LIMIT_WINDOW_MS")? {
            self.rate_limit.window_ms = window;
        }
        if let Some(threshold) = env_number("HUSK_BREAKER_THRESHOLD")? {
            self.circuit_breaker.threshold = threshold;
        }
        if let Some(reset) = env_number("HUSK_BREAKER_RESET_MS")? {
            self.circuit_breaker.reset_timeout_ms = reset;
        }
        if let Ok(val) = std::env::var("HUSK_OWNERS") {
            self.security.owners = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("HUSK_BOT_NAME") {
            self.bot.name = val;
        }
        Ok(())
    }

    /// Reject limits that would make a component useless.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            anyhow::bail!("rate_limit.max_requests must be at least 1");
        }
        if self.rate_limit.window_ms == 0 {
            anyhow::bail!("rate_limit.window_ms must be greater than 0");
        }
        if self.circuit_breaker.threshold == 0 {
            anyhow::bail!("circuit_breaker.threshold must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if !(self.retry.backoff_multiplier >= 1.0 && self.retry.backoff_multiplier.is_finite()) {
            anyhow::bail!(
                "retry.backoff_multiplier must be finite and >= 1.0, got {}",
                self.retry.backoff_multiplier
            );
        }
        if self.chat.timeout_secs == 0 {
            anyhow::bail!("chat.timeout_secs must be greater than 0");
        }
        if self.security.confirmation_ttl_secs == 0 {
            anyhow::bail!("security.confirmation_ttl_secs must be greater than 0");
        }
        if self.audit.capacity == 0 {
            anyhow::bail!("audit.capacity must be at least 1");
        }
        if self.bot.name.trim().is_empty() {
            anyhow::bail!("bot.name must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rate_limit.max_requests, 15);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.circuit_breaker.threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 30_000);
        assert_eq!(config.audit.capacity, 10_000);
        assert!(config.rate_limit.prune_interval_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[rate_limit]
max_requests = 3

[security]
owners = ["@boss"]
"#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.security.owners, vec!["@boss"]);
        assert_eq!(config.server.port, 8787);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("backoff_multiplier"));

        let mut config = Config::default();
        config.retry.backoff_multiplier = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut config = Config::default();
        config.chat.timeout_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("chat.timeout_secs"));

        let mut config = Config::default();
        config.security.confirmation_ttl_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("confirmation_ttl_secs"));
    }

    #[test]
    fn test_section_conversions() {
        let config = Config::default();
        let breaker = config.circuit_breaker.to_breaker_config();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(30));

        let policy = config.retry.to_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
    }
}

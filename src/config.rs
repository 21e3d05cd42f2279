//! Configuration parsing and validation.
//!
//! The file is TOML; every section except `[db]` and `[server]` has defaults.
//!
//! ```toml
//! [db]
//! path = "./data/trove.sqlite"
//!
//! [elastic]
//! url = "http://localhost:9200"
//! username = "elastic"
//! password_env = "ES_PASSWORD"
//!
//! [daemon]
//! max_batch_size = 25
//! flush_interval_secs = 5
//!
//! [server]
//! bind = "127.0.0.1:8003"
//!
//! [strategies]
//! enabled = ["trovesearch_denorm"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use trovesearch_core::strategy::selection::known_strategy_names;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub elastic: ElasticConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElasticConfig {
    #[serde(default = "default_elastic_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Name of the environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_track_total_hits")]
    pub track_total_hits: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: default_elastic_url(),
            username: None,
            password_env: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            track_total_hits: default_track_total_hits(),
        }
    }
}

impl ElasticConfig {
    /// The password from `password_env`, if both are set.
    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

fn default_elastic_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_track_total_hits() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_retry_initial_secs")]
    pub retry_initial_secs: u64,
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            receive_timeout_ms: default_receive_timeout_ms(),
            retry_initial_secs: default_retry_initial_secs(),
            retry_max_secs: default_retry_max_secs(),
            retry_max_attempts: default_retry_max_attempts(),
        }
    }
}

impl DaemonConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Delay before retry number `attempt` (zero-based): `initial * 2^attempt`, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let secs = self
            .retry_initial_secs
            .saturating_mul(factor)
            .min(self.retry_max_secs);
        Duration::from_secs(secs)
    }
}

fn default_max_batch_size() -> usize {
    25
}
fn default_flush_interval_secs() -> u64 {
    5
}
fn default_receive_timeout_ms() -> u64 {
    500
}
fn default_retry_initial_secs() -> u64 {
    2
}
fn default_retry_max_secs() -> u64 {
    30
}
fn default_retry_max_attempts() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategiesConfig {
    #[serde(default = "default_enabled_strategies")]
    pub enabled: Vec<String>,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_strategies(),
        }
    }
}

fn default_enabled_strategies() -> Vec<String> {
    known_strategy_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.daemon.max_batch_size == 0 {
        bail!("daemon.max_batch_size must be > 0");
    }
    if config.daemon.retry_max_attempts == 0 {
        bail!("daemon.retry_max_attempts must be > 0");
    }
    if config.elastic.track_total_hits == 0 {
        bail!("elastic.track_total_hits must be > 0");
    }
    if config.strategies.enabled.is_empty() {
        bail!("strategies.enabled must name at least one strategy");
    }
    let known = known_strategy_names();
    for name in &config.strategies.enabled {
        if !known.contains(&name.as_str()) {
            bail!(
                "Unknown index strategy: '{}'. Known strategies: {}",
                name,
                known.join(", ")
            );
        }
    }

    Ok(config)
}

//! Configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for the task queue system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent workers polling the queue
    pub worker_count: usize,

    /// Delay between polls when the queue is empty, in milliseconds
    pub poll_interval_ms: u64,

    /// Prefix of every key written to the store
    pub key_prefix: String,

    /// Storage backend type
    pub storage_backend: StorageBackend,

    /// Connection URL used by the redis backend
    pub redis_url: Option<String>,

    /// Handler timeout in seconds; unset means handlers may run forever
    pub handler_timeout_secs: Option<u64>,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,

    /// Default tracing filter for the binary
    pub log_level: String,
}

/// Storage backend types supported by the task queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process store (non-persistent, single process)
    Memory,
    /// Redis backend (requires the `redis` feature and a Redis server)
    Redis,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: num_cpus(),
            poll_interval_ms: 100,
            key_prefix: "fuse:tasks".to_string(),
            storage_backend: StorageBackend::Memory,
            redis_url: None,
            handler_timeout_secs: None,
            shutdown_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create a new configuration with custom values
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    /// Load configuration from file, environment variables, or defaults
    pub fn load() -> crate::Result<Self> {
        if let Ok(config_path) = env::var("FUSE_TASKS_CONFIG") {
            info!("Loading config from FUSE_TASKS_CONFIG: {}", config_path);
            return Self::from_file(&config_path);
        }

        let default_paths = [
            "config.yaml",
            "config.toml",
            "config/config.yaml",
            "config/config.toml",
        ];

        for path in default_paths {
            if Path::new(path).exists() {
                info!("Loading config from: {}", path);
                return Self::from_file(path);
            }
        }

        if let Ok(config) = Self::from_env() {
            info!("Loaded config from environment variables");
            return Ok(config);
        }

        warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a file (YAML or TOML)
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .map_err(|e| {
                crate::TaskQueueError::ConfigError(format!("Failed to load config file: {}", e))
            })?;

        let config: Config = settings.try_deserialize().map_err(|e| {
            crate::TaskQueueError::ConfigError(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        let mut found_any = false;

        if let Some(val) = read_env("WORKER_COUNT") {
            config.worker_count = parse_env("WORKER_COUNT", &val)?;
            found_any = true;
        }

        if let Some(val) = read_env("POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_env("POLL_INTERVAL_MS", &val)?;
            found_any = true;
        }

        if let Some(val) = read_env("KEY_PREFIX") {
            config.key_prefix = val;
            found_any = true;
        }

        if let Some(val) = read_env("STORAGE_BACKEND") {
            config.storage_backend = match val.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "redis" => StorageBackend::Redis,
                _ => {
                    return Err(crate::TaskQueueError::ConfigError(format!(
                        "Invalid STORAGE_BACKEND: {}",
                        val
                    )))
                }
            };
            found_any = true;
        }

        if let Some(val) = read_env("REDIS_URL") {
            config.redis_url = Some(val);
            found_any = true;
        }

        if let Some(val) = read_env("HANDLER_TIMEOUT_SECS") {
            config.handler_timeout_secs = Some(parse_env("HANDLER_TIMEOUT_SECS", &val)?);
            found_any = true;
        }

        if let Some(val) = read_env("SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout_secs = parse_env("SHUTDOWN_TIMEOUT_SECS", &val)?;
            found_any = true;
        }

        if let Some(val) = read_env("LOG_LEVEL") {
            config.log_level = val;
            found_any = true;
        }

        if !found_any {
            return Err(crate::TaskQueueError::ConfigError(
                "No environment variables found".to_string(),
            ));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.worker_count == 0 {
            return Err(crate::TaskQueueError::ConfigError(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(crate::TaskQueueError::ConfigError(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.key_prefix.is_empty() {
            return Err(crate::TaskQueueError::ConfigError(
                "Key prefix must not be empty".to_string(),
            ));
        }

        // The prefix is embedded in KEYS patterns.
        if self.key_prefix.contains(['*', '?', '[', ']']) {
            return Err(crate::TaskQueueError::ConfigError(format!(
                "Key prefix must not contain glob characters: {}",
                self.key_prefix
            )));
        }

        if self.handler_timeout_secs == Some(0) {
            return Err(crate::TaskQueueError::ConfigError(
                "Handler timeout must be greater than 0 when set".to_string(),
            ));
        }

        if self.storage_backend == StorageBackend::Redis && self.redis_url.is_none() {
            return Err(crate::TaskQueueError::ConfigError(
                "Redis backend requires redis_url".to_string(),
            ));
        }

        Ok(())
    }

    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Handler timeout as a [`Duration`], if configured
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }

    /// Shutdown timeout as a [`Duration`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn read_env(name: &str) -> Option<String> {
    env::var(format!("FUSE_TASKS_{}", name)).ok()
}

fn parse_env<T>(name: &str, val: &str) -> crate::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    val.parse()
        .map_err(|e| crate::TaskQueueError::ConfigError(format!("Invalid {}: {}", name, e)))
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

//! Configuration management with validation and defaults
//!
//! One `LedgerConfig` value drives the wager policy, storage backend, HTTP API
//! and monitoring. It can be loaded from TOML and overridden from the
//! environment.

use crate::errors::{ConfigurationError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub policy: PolicyConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
}

/// Wager policy constants
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Balance granted to a member on first interaction
    pub starting_balance: u64,
    /// How long after match start wagers are accepted
    pub window_duration_secs: u64,
    /// Credit for a correct prediction, as a multiple of the stake
    pub payout_multiplier: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1_000,
            window_duration_secs: 180,
            payout_multiplier: 2,
        }
    }
}

/// Storage backend selection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    RocksDb,
    Memory,
}

/// Storage configuration with optimization settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: usize,
    pub compression_type: CompressionType,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Snappy,
    Lz4,
    Zstd,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/ledger_data".to_string(),
            write_buffer_size_mb: 32,
            max_write_buffer_number: 2,
            compression_type: CompressionType::Lz4,
            clear_on_start: false, // Production default: preserve data
        }
    }
}

/// HTTP API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Shared secret required on the settlement trigger. `None` disables the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            settlement_api_key: None,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Monitoring and logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    pub log_level: LogLevel,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_level: LogLevel::Info,
        }
    }
}

impl LedgerConfig {
    /// Configuration for production deployment with persistence
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                data_directory: "./DB/ledger_data".to_string(),
                write_buffer_size_mb: 64,
                max_write_buffer_number: 4,
                clear_on_start: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// In-memory configuration for tests and local experiments
    pub fn testing() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                clear_on_start: true,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> LedgerResult<()> {
        if self.policy.window_duration_secs == 0 {
            return Err(invalid("policy.window_duration_secs", "0", "Window duration must be > 0"));
        }

        if self.policy.payout_multiplier == 0 {
            return Err(invalid("policy.payout_multiplier", "0", "Payout multiplier must be > 0"));
        }

        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()).into());
        }

        if self.api.port == 0 {
            return Err(invalid("api.port", "0", "API port cannot be zero"));
        }

        if self.api.request_timeout_secs == 0 {
            return Err(invalid("api.request_timeout_secs", "0", "Request timeout must be > 0"));
        }

        Ok(())
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.policy.window_duration_secs)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::errors::LedgerError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> LedgerResult<LedgerConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => LedgerConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> LedgerResult<LedgerConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut LedgerConfig) -> LedgerResult<()> {
        if let Some(v) = parse_env("MATCHWAGER_STARTING_BALANCE")? {
            config.policy.starting_balance = v;
        }
        if let Some(v) = parse_env("MATCHWAGER_WINDOW_SECS")? {
            config.policy.window_duration_secs = v;
        }
        if let Some(v) = parse_env("MATCHWAGER_PAYOUT_MULTIPLIER")? {
            config.policy.payout_multiplier = v;
        }
        if let Ok(data_dir) = env::var("MATCHWAGER_DATA_DIR") {
            config.storage.data_directory = data_dir;
        }
        if let Some(port) = parse_env("MATCHWAGER_API_PORT")? {
            config.api.port = port;
        }
        if let Ok(key) = env::var("SETTLEMENT_API_KEY") {
            config.api.settlement_api_key = Some(key);
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &LedgerConfig, path: &str) -> LedgerResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> LedgerResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| {
            ConfigurationError::InvalidValue {
                field: name.to_string(),
                value: raw,
                reason: "Could not parse value".to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> LedgerResult<()> {
    ConfigLoader::new().save(&LedgerConfig::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.starting_balance, 1_000);
        assert_eq!(config.policy.payout_multiplier, 2);
        assert_eq!(config.window_duration(), Duration::from_secs(180));
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(LedgerConfig::production().validate().is_ok());

        let testing = LedgerConfig::testing();
        assert!(testing.validate().is_ok());
        assert_eq!(testing.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let mut config = LedgerConfig::default();
        config.policy.window_duration_secs = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.policy.payout_multiplier = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [policy]
            payout_multiplier = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.payout_multiplier, 3);
        assert_eq!(config.policy.window_duration_secs, 180);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_save_and_load_config() -> LedgerResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut original = LedgerConfig::default();
        original.policy.starting_balance = 250;

        let loader = ConfigLoader::new();
        loader.save(&original, path)?;

        let loaded = ConfigLoader::new().with_path(path).load()?;
        assert_eq!(loaded.policy.starting_balance, 250);
        assert_eq!(loaded.api.port, original.api.port);

        Ok(())
    }
}

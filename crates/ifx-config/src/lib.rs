//! Inflector configuration system.
//!
//! TOML-based configuration with environment variable override support.
//! Every field has a default, so an empty file (or no file) yields a working
//! local configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub store: StoreConfig,
    pub keys: KeysConfig,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
    pub logic: LogicConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            store: StoreConfig::default(),
            keys: KeysConfig::default(),
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            logic: LogicConfig::default(),
        }
    }
}

/// MQTT broker connection and topic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub ingress_topic: String,
    pub egress_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "ifx-inflector".to_string(),
            keep_alive_secs: 30,
            ingress_topic: "inflector/ingress".to_string(),
            egress_topic: "inflector/egress".to_string(),
        }
    }
}

/// State-store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Well-known state-store key names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub shifts_reference: String,
    pub last_ten_shifts: String,
    pub lkv_shift_counter: String,
    pub previous_shift_counter: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            shifts_reference: "shifts".to_string(),
            last_ten_shifts: "lastTenShifts".to_string(),
            lkv_shift_counter: "lkvShiftCounter".to_string(),
            previous_shift_counter: "previousShiftCounter".to_string(),
        }
    }
}

/// Resilience policy for one class of remote operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub timeout_ms: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 500,
            max_delay_ms: 20_000,
            jitter: true,
            timeout_ms: 20_000,
        }
    }
}

/// Per-operation retry policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub store_read: RetryPolicyConfig,
    pub store_write: RetryPolicyConfig,
    pub publish: RetryPolicyConfig,
}

/// Worker/dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bounded ingress queue capacity; a full queue backpressures ingress.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
        }
    }
}

/// Business-logic attribute naming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogicConfig {
    pub cycle_time_attribute: String,
    pub shift_counter_attribute: String,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            cycle_time_attribute: "lr_avgCycleTime".to_string(),
            shift_counter_attribute: "ShiftCounter".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.ingress_topic.is_empty() || self.mqtt.egress_topic.is_empty() {
            return Err(ConfigError::ValidationError(
                "mqtt.ingress_topic and mqtt.egress_topic must not be empty".to_string(),
            ));
        }
        if self.mqtt.ingress_topic == self.mqtt.egress_topic {
            return Err(ConfigError::ValidationError(
                "mqtt.ingress_topic and mqtt.egress_topic must differ".to_string(),
            ));
        }
        if self.store.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "store.url must not be empty".to_string(),
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "worker.queue_capacity must be at least 1".to_string(),
            ));
        }
        for (name, policy) in [
            ("retry.store_read", &self.retry.store_read),
            ("retry.store_write", &self.retry.store_write),
            ("retry.publish", &self.retry.publish),
        ] {
            if policy.initial_delay_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{}.initial_delay_ms must be at least 1",
                    name
                )));
            }
            if policy.max_delay_ms < policy.initial_delay_ms {
                return Err(ConfigError::ValidationError(format!(
                    "{}.max_delay_ms must be >= initial_delay_ms",
                    name
                )));
            }
        }
        Ok(())
    }
}

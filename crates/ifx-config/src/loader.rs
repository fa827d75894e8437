//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "inflector.toml",
    "./config/config.toml",
    "./config/inflector.toml",
    "/etc/inflector/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("IFX_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // MQTT
        if let Ok(val) = env::var("IFX_MQTT_HOST") {
            config.mqtt.host = val;
        }
        if let Ok(val) = env::var("IFX_MQTT_PORT") {
            if let Ok(port) = val.parse() {
                config.mqtt.port = port;
            }
        }
        if let Ok(val) = env::var("IFX_MQTT_CLIENT_ID") {
            config.mqtt.client_id = val;
        }
        if let Ok(val) = env::var("IFX_MQTT_KEEP_ALIVE_SECS") {
            if let Ok(secs) = val.parse() {
                config.mqtt.keep_alive_secs = secs;
            }
        }
        if let Ok(val) = env::var("IFX_INGRESS_TOPIC") {
            config.mqtt.ingress_topic = val;
        }
        if let Ok(val) = env::var("IFX_EGRESS_TOPIC") {
            config.mqtt.egress_topic = val;
        }

        // State store
        if let Ok(val) = env::var("IFX_STORE_URL") {
            config.store.url = val;
        }

        // Store keys
        if let Ok(val) = env::var("IFX_KEY_SHIFTS_REFERENCE") {
            config.keys.shifts_reference = val;
        }
        if let Ok(val) = env::var("IFX_KEY_LAST_TEN_SHIFTS") {
            config.keys.last_ten_shifts = val;
        }
        if let Ok(val) = env::var("IFX_KEY_LKV_SHIFT_COUNTER") {
            config.keys.lkv_shift_counter = val;
        }
        if let Ok(val) = env::var("IFX_KEY_PREVIOUS_SHIFT_COUNTER") {
            config.keys.previous_shift_counter = val;
        }

        // Retry policies
        for (prefix, policy) in [
            ("IFX_RETRY_STORE_READ", &mut config.retry.store_read),
            ("IFX_RETRY_STORE_WRITE", &mut config.retry.store_write),
            ("IFX_RETRY_PUBLISH", &mut config.retry.publish),
        ] {
            if let Ok(val) = env::var(format!("{}_MAX_RETRIES", prefix)) {
                if let Ok(max) = val.parse() {
                    policy.max_retries = max;
                }
            }
            if let Ok(val) = env::var(format!("{}_INITIAL_DELAY_MS", prefix)) {
                if let Ok(ms) = val.parse() {
                    policy.initial_delay_ms = ms;
                }
            }
            if let Ok(val) = env::var(format!("{}_MAX_DELAY_MS", prefix)) {
                if let Ok(ms) = val.parse() {
                    policy.max_delay_ms = ms;
                }
            }
            if let Ok(val) = env::var(format!("{}_JITTER", prefix)) {
                policy.jitter = val.parse().unwrap_or(true);
            }
            if let Ok(val) = env::var(format!("{}_TIMEOUT_MS", prefix)) {
                if let Ok(ms) = val.parse() {
                    policy.timeout_ms = ms;
                }
            }
        }

        // Worker
        if let Ok(val) = env::var("IFX_QUEUE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                config.worker.queue_capacity = capacity;
            }
        }

        // Logic
        if let Ok(val) = env::var("IFX_CYCLE_TIME_ATTRIBUTE") {
            config.logic.cycle_time_attribute = val;
        }
        if let Ok(val) = env::var("IFX_SHIFT_COUNTER_ATTRIBUTE") {
            config.logic.shift_counter_attribute = val;
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

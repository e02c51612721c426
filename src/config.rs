//! Listener configuration
//!
//! Loaded from a TOML file with three sections: `[mqtt]` for the broker,
//! `[backoff]` for the reconnect delay and `[listener]` for the topics to
//! listen on. Credentials are never stored in the file; the file names the
//! environment variables that hold them.

use crate::backoff::BackoffPolicy;
use crate::listener::BacklogFailurePolicy;
use crate::transport::mqtt::connection::{parse_broker_url, validate_topic};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Complete listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    pub listener: ListenerSection,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Client ids are `{prefix}-{uuid}`, fresh for every session
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long to wait for the broker's ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_client_id_prefix() -> String {
    "notify-listener".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

impl MqttSection {
    /// Section with defaults for everything except the broker
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            username_env: None,
            password_env: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    /// Get MQTT username from environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_deref())
    }

    /// Get MQTT password from environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_deref())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Reconnect backoff, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffSection {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_ms() -> u64 {
    250
}

fn default_max_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffSection {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(self.initial_ms),
            Duration::from_millis(self.max_ms),
            self.multiplier,
        )
    }
}

/// Topics and listener behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerSection {
    pub topics: Vec<String>,
    #[serde(default)]
    pub backlog_failure: BacklogFailurePolicy,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ListenerConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ListenerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.mqtt.broker_url)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if self.mqtt.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id_prefix must not be empty".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.listener.topics.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "listener.topics must name at least one topic".to_string(),
            ));
        }
        for topic in &self.listener.topics {
            validate_topic(topic).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        }

        self.backoff
            .policy()
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("backoff: {e}")))?;

        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff.policy()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[listener]
topics = ["foo", "bar"]
"#;
        Self::from_toml(toml_content).expect("Test config should parse")
    }
}

/// Helper to read an optional environment variable by name
fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtts://broker.example.com:8883"
username_env = "NOTIFY_TEST_USER"
password_env = "NOTIFY_TEST_PASS"
client_id_prefix = "jobs"
keep_alive_secs = 30
connect_timeout_secs = 10

[backoff]
initial_ms = 100
max_ms = 5000
multiplier = 1.5

[listener]
topics = ["jobs/created", "jobs/cancelled"]
backlog_failure = "skip"
"#;

        let config = ListenerConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.mqtt.client_id_prefix, "jobs");
        assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.mqtt.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.listener.topics, vec!["jobs/created", "jobs/cancelled"]);
        assert_eq!(config.listener.backlog_failure, BacklogFailurePolicy::Skip);

        let policy = config.backoff_policy();
        assert_eq!(policy.initial, Duration::from_millis(100));
        assert_eq!(policy.max, Duration::from_secs(5));
        assert_eq!(policy.multiplier, 1.5);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ListenerConfig::test_config();
        assert_eq!(config.mqtt.client_id_prefix, "notify-listener");
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.connect_timeout_secs, 30);
        assert_eq!(config.backoff, BackoffSection::default());
        assert_eq!(config.backoff_policy(), BackoffPolicy::default());
        assert_eq!(
            config.listener.backlog_failure,
            BacklogFailurePolicy::Reconnect
        );
    }

    #[test]
    fn test_rejects_wildcard_topic() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[listener]
topics = ["jobs/#"]
"#;
        let err = ListenerConfig::from_toml(toml_content).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_empty_topic_list() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[listener]
topics = []
"#;
        assert!(ListenerConfig::from_toml(toml_content).is_err());
    }

    #[test]
    fn test_rejects_non_mqtt_url() {
        let toml_content = r#"
[mqtt]
broker_url = "http://localhost:1883"

[listener]
topics = ["foo"]
"#;
        let err = ListenerConfig::from_toml(toml_content).unwrap_err();
        assert!(err.to_string().contains("Invalid broker URL"));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[backoff]
multiplier = 0.5

[listener]
topics = ["foo"]
"#;
        let err = ListenerConfig::from_toml(toml_content).unwrap_err();
        assert!(err.to_string().contains("backoff"));
    }

    #[test]
    fn test_unknown_backlog_policy_fails_to_parse() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[listener]
topics = ["foo"]
backlog_failure = "retry"
"#;
        assert!(matches!(
            ListenerConfig::from_toml(toml_content),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_credentials_come_from_environment() {
        let mut section = MqttSection::new("mqtt://localhost:1883");
        section.username_env = Some("NOTIFY_LISTENER_TEST_USERNAME_UNSET".to_string());
        assert_eq!(section.username(), None);
        assert_eq!(section.password(), None);

        section.username_env = Some("NOTIFY_LISTENER_TEST_USERNAME".to_string());
        std::env::set_var("NOTIFY_LISTENER_TEST_USERNAME", "listener");
        assert_eq!(section.username().as_deref(), Some("listener"));
        std::env::remove_var("NOTIFY_LISTENER_TEST_USERNAME");
    }
}

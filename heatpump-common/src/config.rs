use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::topics::{DEFAULT_DISCOVERY_PREFIX, DEFAULT_PREFIX, Topics};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP.
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username (requires `password`).
    #[serde(default)]
    pub username: Option<String>,

    /// Password (requires `username`).
    #[serde(default)]
    pub password: Option<String>,

    /// MQTT protocol version.
    #[serde(default)]
    pub protocol: MqttProtocol,

    /// Prefix for value, command and availability topics.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Prefix for discovery announcements.
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Retain register values and discovery announcements.
    #[serde(default = "default_true")]
    pub retain_state: bool,

    /// Retain availability messages.
    #[serde(default = "default_true")]
    pub retain_availability: bool,

    /// Client identifier (random when unset).
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

/// MQTT protocol versions accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MqttProtocol {
    /// MQTT 3.1. Recognised but rejected by validation: the client cannot
    /// speak it.
    #[serde(rename = "3.1")]
    V31,
    /// MQTT 3.1.1 (default).
    #[default]
    #[serde(rename = "3.1.1")]
    V311,
    /// MQTT 5.
    #[serde(rename = "5")]
    V5,
}

impl MqttProtocol {
    /// Version string as written in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            MqttProtocol::V31 => "3.1",
            MqttProtocol::V311 => "3.1.1",
            MqttProtocol::V5 => "5",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MqttProtocol::V31)
    }
}

impl MqttConfig {
    /// Create a configuration for `host` with all defaults.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            protocol: MqttProtocol::default(),
            prefix: default_prefix(),
            discovery_prefix: default_discovery_prefix(),
            retain_state: true,
            retain_availability: true,
            client_id: None,
        }
    }

    /// Topic builder for this configuration.
    pub fn topics(&self) -> Topics {
        Topics::new(&self.prefix, &self.discovery_prefix)
    }

    /// Validate the MQTT settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("mqtt.host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(Error::Config("mqtt.port must be 1-65535".to_string()));
        }

        if !self.protocol.is_supported() {
            return Err(Error::Config(format!(
                "mqtt.protocol {} is not supported, use \"3.1.1\" or \"5\"",
                self.protocol.as_str()
            )));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(
                "mqtt.username and mqtt.password must be set together".to_string(),
            ));
        }

        for (field, value) in [
            ("prefix", &self.prefix),
            ("discovery_prefix", &self.discovery_prefix),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("mqtt.{} cannot be empty", field)));
            }
            if value.contains(['+', '#']) || value.ends_with('/') {
                return Err(Error::Topic(format!(
                    "mqtt.{} '{}' must not contain wildcards or a trailing '/'",
                    field, value
                )));
            }
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// The MQTT client could not accept a request.
    #[error("MQTT client error: {0}")]
    Mqtt(String),

    /// Publishing error.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a publish error for `topic`.
    pub fn publish(topic: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.to_string(),
        }
    }
}

impl From<heatpump_common::Error> for BridgeError {
    fn from(err: heatpump_common::Error) -> Self {
        match err {
            heatpump_common::Error::Config(msg) | heatpump_common::Error::Topic(msg) => {
                Self::ConfigValidation(msg)
            }
            heatpump_common::Error::Io(e) => Self::Io(e),
            heatpump_common::Error::Json(e) => Self::Serialization(e.to_string()),
        }
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Mqtt(err.to_string())
    }
}

impl From<rumqttc::v5::ClientError> for BridgeError {
    fn from(err: rumqttc::v5::ClientError) -> Self {
        Self::Mqtt(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

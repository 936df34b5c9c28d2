//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{LoggingConfig, MqttConfig};

/// Trait for bridge configuration types.
///
/// Implement this for the bridge's configuration struct to get loading,
/// validation and access to the shared MQTT and logging sections.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use heatpump_bridge_framework::{BridgeConfig, LoggingConfig, MqttConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub mqtt: MqttConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
///     pub device: DeviceConfig,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn mqtt(&self) -> &MqttConfig {
///         &self.mqtt
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the MQTT broker configuration.
    fn mqtt(&self) -> &MqttConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. The default checks the MQTT
    /// section; overrides should call [`MqttConfig::validate`] too.
    fn validate(&self) -> Result<()> {
        self.mqtt().validate()?;
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        mqtt: MqttConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    impl BridgeConfig for TestConfig {
        fn mqtt(&self) -> &MqttConfig {
            &self.mqtt
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.json5", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_config_load() {
        let path = write_temp(
            "bridge-config-load",
            r#"{
                // comments are allowed
                mqtt: { host: "localhost" },
            }"#,
        );

        let config = TestConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_parse_error() {
        let path = write_temp("bridge-config-parse", "{ mqtt: ");
        let result = TestConfig::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    #[test]
    fn test_config_validated_on_load() {
        let path = write_temp(
            "bridge-config-invalid",
            r#"{ mqtt: { host: "localhost", prefix: "nibe/+" } }"#,
        );
        let result = TestConfig::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }
}

//! Heat pump bridge common library
//!
//! Shared types and utilities for the heat pump MQTT bridge:
//!
//! - [`value`] - Register values as published and commanded (`RegisterValue`)
//! - [`topics`] - MQTT topic builders and parsers
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - MQTT client options
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod session;
pub mod topics;
pub mod value;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, MqttConfig, MqttProtocol, load_config, parse_config};
pub use error::{Error, Result};
pub use session::{OFFLINE, ONLINE, mqtt_options, mqtt_options_v5, random_client_id};
pub use topics::{Topics, slugify};
pub use value::RegisterValue;

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}

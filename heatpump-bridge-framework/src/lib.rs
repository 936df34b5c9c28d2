//! Heat Pump Bridge Framework
//!
//! Common building blocks for bridges that expose a device on MQTT.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Bus`] and [`MqttBus`] for publishing and receiving commands over MQTT
//! - [`RetryPolicy`] and [`retry`] for bounded retries of device I/O
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use heatpump_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, MqttBus};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//!     let bus = MqttBus::new(runner.config().mqtt(), tx);
//!     bus.start().await?;
//!     runner.spawn(handle_commands(rx));
//!
//!     runner.run(async move { let _ = bus.stop().await; }).await?;
//!     Ok(())
//! }
//! ```

mod args;
mod bus;
mod config;
mod error;
mod retry;
mod runner;

pub use args::BridgeArgs;
pub use bus::{Bus, Command, MqttBus, STOP_TIMEOUT, decode_command};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use retry::{Retry, RetryError, RetryPolicy, retry};
pub use runner::BridgeRunner;

// Re-export commonly used types from heatpump-common
pub use heatpump_common::{LogFormat, LoggingConfig, MqttConfig, RegisterValue, Topics};

//! Bridge runner for lifecycle management.

use std::future::Future;

use tokio::signal;
use tokio::task::JoinHandle;

use heatpump_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Bridge runner that manages the lifecycle of a bridge process.
///
/// Handles:
/// - Logging initialization (with optional CLI override)
/// - Task spawning and tracking
/// - Graceful shutdown on Ctrl+C
///
/// # Example
///
/// ```ignore
/// use heatpump_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("heatpump.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///     runner.spawn(async move {
///         // Worker logic here
///     });
///
///     runner.run(async {}).await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner and initialize logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        Ok(Self::untraced(name, config))
    }

    /// Create a runner without touching the global subscriber.
    fn untraced(name: impl Into<String>, config: C) -> Self {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        Self {
            name,
            version,
            config,
            tasks: Vec::new(),
        }
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Run the bridge until Ctrl+C is received.
    ///
    /// After the signal, all tracked tasks are aborted and `on_shutdown` runs.
    pub async fn run<S>(self, on_shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let signal = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        };

        self.run_until(signal, on_shutdown).await
    }

    /// Run the bridge until `signal` completes.
    pub async fn run_until<F, S>(self, signal: F, on_shutdown: S) -> Result<()>
    where
        F: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        signal.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        for task in &self.tasks {
            task.abort();
        }

        // Wait briefly for tasks to clean up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        on_shutdown.await;

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

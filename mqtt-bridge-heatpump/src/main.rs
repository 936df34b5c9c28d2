//! MQTT bridge for Nibe heat pumps.
//!
//! Reads and writes heat pump registers over Modbus and mirrors them on MQTT.

use anyhow::{Context, Result};
use heatpump_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, MqttBus};
use mqtt_bridge_heatpump::config::HeatpumpBridgeConfig;
use mqtt_bridge_heatpump::modbus::ModbusConnection;
use mqtt_bridge_heatpump::service::{Service, ServiceSettings};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("heatpump.json5");

    let config = HeatpumpBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = BridgeRunner::new_with_args("mqtt-bridge-heatpump", config, Some(&args))?;
    info!("Loaded configuration from {:?}", args.config);

    let config = runner.config();
    let connection = Arc::new(ModbusConnection::new(&config.heatpump));
    info!(
        connection = config.heatpump.modbus.connection.address(),
        unit_id = config.heatpump.modbus.unit_id,
        "Using Modbus connection"
    );

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let bus = Arc::new(MqttBus::new(&config.mqtt, commands_tx));
    info!(host = %config.mqtt.host, port = config.mqtt.port, "Using MQTT broker");

    let settings = ServiceSettings::from_config(config);
    let mut service = Service::new(connection, bus.clone(), settings);
    service
        .start()
        .await
        .context("Failed to start heat pump bridge")?;

    runner.spawn(service.run(commands_rx));

    runner
        .run(async move { bus.stop().await })
        .await?;

    Ok(())
}

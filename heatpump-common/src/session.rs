use std::time::Duration;

use rumqttc::{LastWill, MqttOptions, QoS, v5};

use crate::config::MqttConfig;

/// Keep-alive interval for broker connections.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Payload published on the availability topic while the bridge is up.
pub const ONLINE: &str = "online";

/// Payload published (or willed) on the availability topic when the bridge is down.
pub const OFFLINE: &str = "offline";

/// Generate a random client identifier, `nibe` followed by 16 hex digits.
pub fn random_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("nibe{}", &id[..16])
}

/// Build MQTT 3.1.1 connection options from configuration.
///
/// Registers an `offline` last will on the availability topic so the broker
/// flags the bridge as unavailable if the connection drops uncleanly.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(client_id(config), &config.host, config.port);
    options.set_keep_alive(KEEP_ALIVE);

    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user, pass);
    }

    options.set_last_will(LastWill::new(
        config.topics().availability(),
        OFFLINE,
        QoS::AtLeastOnce,
        config.retain_availability,
    ));

    log_options(config, &options.client_id());
    options
}

/// Build MQTT 5 connection options from configuration, with the same last
/// will as [`mqtt_options`].
pub fn mqtt_options_v5(config: &MqttConfig) -> v5::MqttOptions {
    let mut options = v5::MqttOptions::new(client_id(config), &config.host, config.port);
    options.set_keep_alive(KEEP_ALIVE);

    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user, pass);
    }

    options.set_last_will(v5::mqttbytes::v5::LastWill::new(
        config.topics().availability(),
        OFFLINE,
        v5::mqttbytes::QoS::AtLeastOnce,
        config.retain_availability,
        None,
    ));

    log_options(config, &options.client_id());
    options
}

fn client_id(config: &MqttConfig) -> String {
    config.client_id.clone().unwrap_or_else(random_client_id)
}

fn log_options(config: &MqttConfig, client_id: &str) {
    tracing::info!(
        host = %config.host,
        port = config.port,
        protocol = config.protocol.as_str(),
        client_id = %client_id,
        "Prepared MQTT connection options"
    );
}

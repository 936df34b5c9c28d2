//! MQTT bridge for Nibe heat pumps.
//!
//! This bridge talks Modbus (TCP or RTU/serial) to a heat pump, publishes
//! register values to MQTT, announces every register for discovery by a
//! home automation controller and writes commanded values back to the pump.
//!
//! # Topics
//!
//! ```text
//! <prefix>/availability                                      online | offline
//! <prefix>/coils/<register>                                  current value
//! <prefix>/coils/<register>/set                              commands
//! <discovery_prefix>/<component>/<device_id>/<register>/config
//! ```
//!
//! Where:
//! - `<prefix>` - Topic prefix from configuration (default `nibe`)
//! - `<discovery_prefix>` - Discovery prefix (default `homeassistant`)
//! - `<component>` - `sensor`, `binary_sensor`, `switch`, `select` or `number`
//! - `<register>` - Register name from the catalogue

pub mod catalogue;
pub mod config;
pub mod device;
pub mod discovery;
pub mod modbus;
pub mod poller;
pub mod publisher;
pub mod service;

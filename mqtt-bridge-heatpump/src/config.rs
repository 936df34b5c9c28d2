//! Configuration for the heat pump bridge.

use heatpump_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, MqttConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatpumpBridgeConfig {
    /// MQTT broker settings
    pub mqtt: MqttConfig,

    /// Heat pump settings
    pub heatpump: HeatpumpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Heat pump device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatpumpConfig {
    /// Heat pump model (e.g. "F1255"), shown in discovery
    pub model: String,

    /// Manufacturer shown in discovery (default: "Nibe")
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    /// Modbus connection settings
    pub modbus: ModbusConfig,

    /// JSON5 file with additional register definitions
    #[serde(default)]
    pub catalogue_file: Option<PathBuf>,

    /// Inline register definitions
    #[serde(default)]
    pub registers: Vec<RegisterConfig>,

    /// Stale register polling (disabled when absent)
    #[serde(default)]
    pub poll: Option<PollConfig>,
}

fn default_manufacturer() -> String {
    "Nibe".to_string()
}

/// Modbus connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

impl ModbusConfig {
    /// Address identifying the device, `<host or serial port>-<unit id>`.
    pub fn device_address(&self) -> String {
        format!("{}-{}", self.connection.address(), self.unit_id)
    }
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl ConnectionConfig {
    /// Host name for TCP, serial port path for RTU.
    pub fn address(&self) -> &str {
        match self {
            ConnectionConfig::Tcp { host, .. } => host,
            ConnectionConfig::Rtu { port, .. } => port,
        }
    }
}

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds after which a register is considered stale (default: 60)
    #[serde(default = "default_poll_interval")]
    pub interval: u64,

    /// Registers to keep fresh, by name or address
    pub registers: Vec<RegisterKey>,
}

fn default_poll_interval() -> u64 {
    60
}

/// Reference to a register by name or by address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterKey {
    Address(u16),
    Name(String),
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKey::Address(address) => write!(f, "{}", address),
            RegisterKey::Name(name) => f.write_str(name),
        }
    }
}

impl From<u16> for RegisterKey {
    fn from(address: u16) -> Self {
        RegisterKey::Address(address)
    }
}

impl From<&str> for RegisterKey {
    fn from(name: &str) -> Self {
        RegisterKey::Name(name.to_string())
    }
}

/// Definition of a single register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// Register address
    pub address: u16,

    /// Stable name, used in topics
    pub name: String,

    /// Display name (defaults to `name`)
    #[serde(default)]
    pub title: Option<String>,

    /// Register type
    #[serde(rename = "type")]
    pub register_type: RegisterType,

    /// Data type interpretation for holding/input registers
    #[serde(default)]
    pub data_type: DataType,

    /// Scaling factor (raw = value * factor)
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Unit of measurement
    #[serde(default)]
    pub unit: Option<String>,

    /// Lowest accepted value, in scaled units
    #[serde(default)]
    pub min: Option<f64>,

    /// Highest accepted value, in scaled units
    #[serde(default)]
    pub max: Option<f64>,

    /// Override writability (default: true for coil and holding)
    #[serde(default)]
    pub writable: Option<bool>,

    /// Enumerated values, in display order
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

fn default_factor() -> f64 {
    1.0
}

/// One raw value to label mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub value: i64,
    pub label: String,
}

/// Modbus register types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// Discrete output coils (read/write, 1-bit)
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    Discrete,
    /// Input registers (read-only, 16-bit)
    Input,
    /// Holding registers (read/write, 16-bit)
    Holding,
}

impl RegisterType {
    /// Return the string name for this register type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Coil => "coil",
            RegisterType::Discrete => "discrete",
            RegisterType::Input => "input",
            RegisterType::Holding => "holding",
        }
    }

    /// Whether registers of this type hold a single bit.
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterType::Coil | RegisterType::Discrete)
    }

    /// Whether registers of this type accept writes.
    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterType::Coil | RegisterType::Holding)
    }
}

/// Data type interpretation for 16-bit registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 16-bit integer (default)
    #[default]
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer (2 registers, big-endian)
    U32,
    /// Signed 32-bit integer (2 registers, big-endian)
    I32,
    /// Unsigned 32-bit integer (2 registers, little-endian word order)
    U32Le,
    /// Signed 32-bit integer (2 registers, little-endian word order)
    I32Le,
}

impl DataType {
    /// Number of 16-bit words a value occupies.
    pub fn word_count(&self) -> u16 {
        match self {
            DataType::U16 | DataType::I16 => 1,
            _ => 2,
        }
    }

    /// Inclusive range of raw values.
    pub fn raw_range(&self) -> (i64, i64) {
        match self {
            DataType::U16 => (0, u16::MAX as i64),
            DataType::I16 => (i16::MIN as i64, i16::MAX as i64),
            DataType::U32 | DataType::U32Le => (0, u32::MAX as i64),
            DataType::I32 | DataType::I32Le => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// Check a set of register definitions for duplicates and bad factors.
pub fn validate_registers(registers: &[RegisterConfig]) -> Result<(), String> {
    let mut addresses = HashSet::new();
    let mut names = HashSet::new();

    for register in registers {
        if register.name.is_empty() {
            return Err(format!("Register {}: name cannot be empty", register.address));
        }

        if register.name.contains(['/', '+', '#']) {
            return Err(format!(
                "Register '{}': name must not contain '/', '+' or '#'",
                register.name
            ));
        }

        if !addresses.insert(register.address) {
            return Err(format!("Duplicate register address {}", register.address));
        }

        if !names.insert(register.name.as_str()) {
            return Err(format!("Duplicate register name '{}'", register.name));
        }

        if !(register.factor.is_finite() && register.factor > 0.0) {
            return Err(format!(
                "Register '{}': factor must be greater than 0",
                register.name
            ));
        }

        if let (Some(min), Some(max)) = (register.min, register.max) {
            if min > max {
                return Err(format!("Register '{}': min exceeds max", register.name));
            }
        }
    }

    Ok(())
}

impl BridgeConfig for HeatpumpBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> heatpump_bridge_framework::Result<()> {
        self.mqtt.validate()?;

        let heatpump = &self.heatpump;

        if heatpump.model.trim().is_empty() {
            return Err(BridgeError::validation("heatpump.model cannot be empty"));
        }

        if heatpump.modbus.unit_id == 0 || heatpump.modbus.unit_id > 247 {
            return Err(BridgeError::validation(format!(
                "heatpump.modbus.unit_id must be 1-247, got {}",
                heatpump.modbus.unit_id
            )));
        }

        if heatpump.modbus.timeout_ms == 0 {
            return Err(BridgeError::validation(
                "heatpump.modbus.timeout_ms must be greater than 0",
            ));
        }

        match &heatpump.modbus.connection {
            ConnectionConfig::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(BridgeError::validation("Modbus host cannot be empty"));
                }
                if *port == 0 {
                    return Err(BridgeError::validation("Modbus port must be 1-65535"));
                }
            }
            ConnectionConfig::Rtu { port, parity, .. } => {
                if port.trim().is_empty() {
                    return Err(BridgeError::validation("Serial port cannot be empty"));
                }
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(BridgeError::validation(format!(
                            "Invalid parity '{}' (use none, even, or odd)",
                            parity
                        )));
                    }
                }
            }
        }

        if heatpump.registers.is_empty() && heatpump.catalogue_file.is_none() {
            return Err(BridgeError::validation(
                "heatpump must specify registers or catalogue_file",
            ));
        }

        validate_registers(&heatpump.registers).map_err(BridgeError::validation)?;

        if let Some(poll) = &heatpump.poll {
            if poll.interval == 0 {
                return Err(BridgeError::validation(
                    "heatpump.poll.interval must be greater than 0",
                ));
            }
            if poll.registers.is_empty() {
                return Err(BridgeError::validation(
                    "heatpump.poll.registers cannot be empty",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_CONFIG: &str = r#"{
        mqtt: { host: "127.0.0.1" },
        heatpump: {
            model: "F1255",
            modbus: {
                connection: { type: "tcp", host: "192.168.1.10" }
            },
            registers: [
                {
                    address: 40004,
                    name: "bt1-outdoor-temperature-40004",
                    title: "BT1 Outdoor Temperature",
                    type: "input",
                    data_type: "i16",
                    factor: 10,
                    unit: "°C"
                },
                {
                    address: 47041,
                    name: "hot-water-comfort-mode-47041",
                    type: "holding",
                    mappings: [
                        { value: 0, label: "ECONOMY" },
                        { value: 1, label: "NORMAL" },
                        { value: 2, label: "LUXURY" }
                    ]
                }
            ],
            poll: { registers: ["bt1-outdoor-temperature-40004", 47041] }
        }
    }"#;

    #[test]
    fn test_parse_tcp_config() {
        let config: HeatpumpBridgeConfig = json5::from_str(TCP_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.heatpump.manufacturer, "Nibe");
        assert_eq!(config.heatpump.modbus.unit_id, 1);
        assert_eq!(config.heatpump.modbus.timeout_ms, 1000);

        if let ConnectionConfig::Tcp { host, port } = &config.heatpump.modbus.connection {
            assert_eq!(host, "192.168.1.10");
            assert_eq!(*port, 502); // default
        } else {
            panic!("Expected TCP connection");
        }

        assert_eq!(config.heatpump.modbus.device_address(), "192.168.1.10-1");

        let registers = &config.heatpump.registers;
        assert_eq!(registers.len(), 2);
        assert_eq!(registers[0].data_type, DataType::I16);
        assert_eq!(registers[0].factor, 10.0);
        assert_eq!(registers[1].mappings[2].label, "LUXURY");
        assert_eq!(registers[1].writable, None);

        let poll = config.heatpump.poll.as_ref().unwrap();
        assert_eq!(poll.interval, 60);
        assert_eq!(
            poll.registers,
            vec![
                RegisterKey::from("bt1-outdoor-temperature-40004"),
                RegisterKey::Address(47041)
            ]
        );
    }

    #[test]
    fn test_parse_rtu_config() {
        let json = r#"{
            mqtt: { host: "127.0.0.1" },
            heatpump: {
                model: "S2125",
                modbus: {
                    connection: {
                        type: "rtu",
                        port: "/dev/ttyUSB0",
                        baud_rate: 19200,
                        parity: "even"
                    },
                    unit_id: 5
                },
                catalogue_file: "s2125.json5"
            }
        }"#;

        let config: HeatpumpBridgeConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        let modbus = &config.heatpump.modbus;
        assert_eq!(modbus.unit_id, 5);
        assert_eq!(modbus.device_address(), "/dev/ttyUSB0-5");
        if let ConnectionConfig::Rtu {
            port,
            baud_rate,
            parity,
            ..
        } = &modbus.connection
        {
            assert_eq!(port, "/dev/ttyUSB0");
            assert_eq!(*baud_rate, 19200);
            assert_eq!(parity, "even");
        } else {
            panic!("Expected RTU connection");
        }
    }

    #[test]
    fn test_validate_unit_id() {
        let mut config: HeatpumpBridgeConfig = json5::from_str(TCP_CONFIG).unwrap();
        config.heatpump.modbus.unit_id = 0;
        assert!(config.validate().is_err());

        config.heatpump.modbus.unit_id = 248;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_poll() {
        let mut config: HeatpumpBridgeConfig = json5::from_str(TCP_CONFIG).unwrap();
        if let Some(poll) = config.heatpump.poll.as_mut() {
            poll.interval = 0;
        }
        assert!(config.validate().is_err());

        let mut config: HeatpumpBridgeConfig = json5::from_str(TCP_CONFIG).unwrap();
        if let Some(poll) = config.heatpump.poll.as_mut() {
            poll.registers.clear();
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_registers() {
        let mut config: HeatpumpBridgeConfig = json5::from_str(TCP_CONFIG).unwrap();
        config.heatpump.registers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_parity() {
        let json = r#"{
            mqtt: { host: "127.0.0.1" },
            heatpump: {
                model: "S2125",
                modbus: { connection: { type: "rtu", port: "COM1", parity: "mark" } },
                catalogue_file: "s2125.json5"
            }
        }"#;

        let config: HeatpumpBridgeConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_mqtt_section() {
        let mut config: HeatpumpBridgeConfig = json5::from_str(TCP_CONFIG).unwrap();
        config.mqtt.username = Some("nibe".to_string());
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_registers() {
        let config: HeatpumpBridgeConfig = json5::from_str(TCP_CONFIG).unwrap();
        let mut registers = config.heatpump.registers.clone();
        assert!(validate_registers(&registers).is_ok());

        registers[1].address = registers[0].address;
        assert!(validate_registers(&registers).unwrap_err().contains("address"));

        let mut registers = config.heatpump.registers.clone();
        registers[1].name = registers[0].name.clone();
        assert!(validate_registers(&registers).unwrap_err().contains("name"));

        let mut registers = config.heatpump.registers.clone();
        registers[0].factor = 0.0;
        assert!(validate_registers(&registers).is_err());

        let mut registers = config.heatpump.registers.clone();
        registers[0].name = "outdoor/temp".to_string();
        assert!(validate_registers(&registers).is_err());
    }

    #[test]
    fn test_register_key_untagged() {
        let keys: Vec<RegisterKey> = json5::from_str(r#"[40004, "fan-speed"]"#).unwrap();
        assert_eq!(keys[0], RegisterKey::Address(40004));
        assert_eq!(keys[1].to_string(), "fan-speed");
    }

    #[test]
    fn test_data_type_ranges() {
        assert_eq!(DataType::U16.word_count(), 1);
        assert_eq!(DataType::I32Le.word_count(), 2);
        assert_eq!(DataType::I16.raw_range(), (-32768, 32767));
        assert_eq!(DataType::U32.raw_range().1, 4_294_967_295);
    }

    #[test]
    fn test_register_type_flags() {
        assert!(RegisterType::Coil.is_bit());
        assert!(RegisterType::Coil.is_writable());
        assert!(RegisterType::Discrete.is_bit());
        assert!(!RegisterType::Discrete.is_writable());
        assert!(!RegisterType::Input.is_writable());
        assert!(RegisterType::Holding.is_writable());
        assert_eq!(RegisterType::Holding.as_str(), "holding");
    }
}

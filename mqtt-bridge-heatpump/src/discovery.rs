//! Discovery announcements.
//!
//! [`classify`] maps register metadata to the retained configuration message
//! a home automation controller uses to create an entity for the register.
//! It is a pure function of its inputs.

use heatpump_common::{Topics, slugify};
use serde::Serialize;

use crate::catalogue::Register;

/// Name of the device block shared by all registers of one heat pump.
pub const DEVICE_NAME: &str = "Nibe heatpump integration";

/// Entity kind announced for a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Switch,
    BinarySensor,
    Select,
    Number,
    Sensor,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Switch => "switch",
            Component::BinarySensor => "binary_sensor",
            Component::Select => "select",
            Component::Number => "number",
            Component::Sensor => "sensor",
        }
    }
}

/// Identity of the physical heat pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    /// Build device info for a heat pump reachable at `address`.
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>, address: &str) -> Self {
        Self {
            id: slugify(&format!("Nibe {}", address)),
            name: DEVICE_NAME.to_string(),
            manufacturer: manufacturer.into(),
            model: model.into(),
        }
    }
}

/// Device block of a discovery payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceBlock {
    pub manufacturer: String,
    pub name: String,
    pub model: String,
    pub identifiers: Vec<String>,
}

/// Discovery configuration message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryPayload {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub device: DeviceBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// A classified register, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub component: Component,
    pub topic: String,
    pub payload: DiscoveryPayload,
}

impl Announcement {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload)
    }
}

/// Device class (and state class) implied by a unit of measurement.
pub fn device_class(unit: &str) -> Option<(&'static str, Option<&'static str>)> {
    match unit {
        "°C" => Some(("temperature", Some("measurement"))),
        "h" | "min" => Some(("duration", None)),
        "kW" | "W" => Some(("power", None)),
        "kWh" => Some(("energy", None)),
        "Hz" => Some(("frequency", None)),
        _ => None,
    }
}

/// Classify `register` and build its announcement.
pub fn classify(register: &Register, device: &DeviceInfo, topics: &Topics) -> Announcement {
    let unique_id = format!("{}_{}", device.id, register.name);
    let state_topic = topics.value(&register.name);

    let mut payload = DiscoveryPayload {
        name: register.title.clone(),
        unique_id: unique_id.clone(),
        object_id: unique_id,
        state_topic,
        availability_topic: topics.availability(),
        device: DeviceBlock {
            manufacturer: device.manufacturer.clone(),
            name: device.name.clone(),
            model: device.model.clone(),
            identifiers: vec![device.id.clone()],
        },
        unit_of_measurement: None,
        device_class: None,
        state_class: None,
        command_topic: None,
        options: None,
        min: None,
        max: None,
        step: None,
    };

    if let Some(unit) = &register.unit {
        payload.unit_of_measurement = Some(unit.clone());
        if let Some((class, state_class)) = device_class(unit) {
            payload.device_class = Some(class);
            payload.state_class = state_class;
        }
    }

    let component = if register.is_boolean() {
        if register.writable {
            payload.command_topic = Some(topics.command(&register.name));
            Component::Switch
        } else {
            Component::BinarySensor
        }
    } else if register.writable {
        payload.command_topic = Some(topics.command(&register.name));
        if register.has_mappings() {
            payload.options = Some(register.labels());
            Component::Select
        } else {
            payload.min = register.min;
            payload.max = register.max;
            payload.step = Some(1.0 / register.factor);
            Component::Number
        }
    } else {
        Component::Sensor
    };

    Announcement {
        component,
        topic: topics.discovery(component.as_str(), &device.id, &register.name),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, MappingConfig, RegisterConfig, RegisterType};
    use serde_json::json;

    fn device() -> DeviceInfo {
        DeviceInfo::new("Nibe", "F1255", "192.168.1.3-1")
    }

    fn register(name: &str, register_type: RegisterType) -> Register {
        Register::from_config(&RegisterConfig {
            address: 40000,
            name: name.to_string(),
            title: None,
            register_type,
            data_type: DataType::U16,
            factor: 1.0,
            unit: None,
            min: None,
            max: None,
            writable: None,
            mappings: Vec::new(),
        })
    }

    fn with_mappings(mut reg: Register, labels: &[&str]) -> Register {
        reg.mappings = labels
            .iter()
            .enumerate()
            .map(|(i, label)| MappingConfig {
                value: i as i64,
                label: label.to_string(),
            })
            .collect();
        reg
    }

    #[test]
    fn test_device_info() {
        let device = device();
        assert_eq!(device.id, "nibe-192-168-1-3-1");
        assert_eq!(device.name, DEVICE_NAME);
    }

    #[test]
    fn test_writable_boolean_is_switch() {
        let reg = register("hot-water-boost", RegisterType::Coil);
        let a = classify(&reg, &device(), &Topics::default());

        assert_eq!(a.component, Component::Switch);
        assert_eq!(
            a.payload.command_topic.as_deref(),
            Some("nibe/coils/hot-water-boost/set")
        );
        assert_eq!(
            a.topic,
            "homeassistant/switch/nibe-192-168-1-3-1/hot-water-boost/config"
        );
    }

    #[test]
    fn test_on_off_mapping_is_switch() {
        let reg = with_mappings(register("vacation", RegisterType::Holding), &["OFF", "ON"]);
        let a = classify(&reg, &device(), &Topics::default());

        assert_eq!(a.component, Component::Switch);
        assert!(a.payload.options.is_none());
    }

    #[test]
    fn test_read_only_boolean_is_binary_sensor() {
        let reg = register("alarm", RegisterType::Discrete);
        let a = classify(&reg, &device(), &Topics::default());

        assert_eq!(a.component, Component::BinarySensor);
        assert!(a.payload.command_topic.is_none());
    }

    #[test]
    fn test_writable_mapped_is_select() {
        let reg = with_mappings(
            register("hot-water-mode", RegisterType::Holding),
            &["LUXURY", "NORMAL", "ECONOMY"],
        );
        let a = classify(&reg, &device(), &Topics::default());

        assert_eq!(a.component, Component::Select);
        assert_eq!(
            a.payload.options,
            Some(vec![
                "LUXURY".to_string(),
                "NORMAL".to_string(),
                "ECONOMY".to_string()
            ])
        );
        assert!(a.payload.command_topic.is_some());
        assert!(a.payload.step.is_none());
    }

    #[test]
    fn test_writable_numeric_is_number() {
        let mut reg = register("room-temp", RegisterType::Holding);
        reg.factor = 10.0;
        reg.min = Some(5.0);
        reg.max = Some(30.0);

        let a = classify(&reg, &device(), &Topics::default());

        assert_eq!(a.component, Component::Number);
        assert_eq!(a.payload.step, Some(0.1));
        assert_eq!(a.payload.min, Some(5.0));
        assert_eq!(a.payload.max, Some(30.0));
    }

    #[test]
    fn test_read_only_is_sensor() {
        let mut reg = register("outdoor-temp", RegisterType::Input);
        reg.unit = Some("°C".to_string());

        let a = classify(&reg, &device(), &Topics::default());

        assert_eq!(a.component, Component::Sensor);
        assert_eq!(a.payload.device_class, Some("temperature"));
        assert_eq!(a.payload.state_class, Some("measurement"));
        assert!(a.payload.command_topic.is_none());
    }

    #[test]
    fn test_unit_table() {
        assert_eq!(device_class("min"), Some(("duration", None)));
        assert_eq!(device_class("W"), Some(("power", None)));
        assert_eq!(device_class("kWh"), Some(("energy", None)));
        assert_eq!(device_class("Hz"), Some(("frequency", None)));
        assert_eq!(device_class("%"), None);
    }

    #[test]
    fn test_payload_json() {
        let mut reg = register("compressor-hours", RegisterType::Input);
        reg.title = "Compressor operating time".to_string();
        reg.unit = Some("h".to_string());

        let a = classify(&reg, &device(), &Topics::new("house/nibe", "ha"));
        let value: serde_json::Value = serde_json::from_str(&a.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "name": "Compressor operating time",
                "unique_id": "nibe-192-168-1-3-1_compressor-hours",
                "object_id": "nibe-192-168-1-3-1_compressor-hours",
                "state_topic": "house/nibe/coils/compressor-hours",
                "availability_topic": "house/nibe/availability",
                "device": {
                    "manufacturer": "Nibe",
                    "name": "Nibe heatpump integration",
                    "model": "F1255",
                    "identifiers": ["nibe-192-168-1-3-1"]
                },
                "unit_of_measurement": "h",
                "device_class": "duration"
            })
        );
        assert_eq!(
            a.topic,
            "ha/sensor/nibe-192-168-1-3-1/compressor-hours/config"
        );
    }

    #[test]
    fn test_classify_is_deterministic() {
        let reg = register("fan-speed", RegisterType::Holding);
        let topics = Topics::default();

        assert_eq!(
            classify(&reg, &device(), &topics),
            classify(&reg, &device(), &topics)
        );
    }
}

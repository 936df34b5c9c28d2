//! Register catalogue: the heat pump's address space.
//!
//! Each [`Register`] knows how to turn raw device words into a published
//! [`RegisterValue`] and how to validate and normalise a requested value
//! before it is written.

use heatpump_common::RegisterValue;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{
    DataType, MappingConfig, RegisterConfig, RegisterKey, RegisterType, validate_registers,
};
use crate::device::DeviceError;

const ON: &str = "ON";
const OFF: &str = "OFF";

/// Register metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub address: u16,
    pub name: String,
    /// Display name.
    pub title: String,
    pub register_type: RegisterType,
    pub data_type: DataType,
    /// raw = value * factor
    pub factor: f64,
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub writable: bool,
    /// Enumerated values in display order.
    pub mappings: Vec<MappingConfig>,
}

impl Register {
    pub fn from_config(config: &RegisterConfig) -> Self {
        Self {
            address: config.address,
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            register_type: config.register_type,
            data_type: config.data_type,
            factor: config.factor,
            unit: config.unit.clone(),
            min: config.min,
            max: config.max,
            writable: config
                .writable
                .unwrap_or_else(|| config.register_type.is_writable()),
            mappings: config.mappings.clone(),
        }
    }

    /// A register is boolean when it holds a single bit or its only labels
    /// are `ON` and `OFF`.
    pub fn is_boolean(&self) -> bool {
        if self.register_type.is_bit() {
            return true;
        }

        let mut labels: Vec<String> = self
            .mappings
            .iter()
            .map(|m| m.label.to_ascii_uppercase())
            .collect();
        labels.sort();
        labels.dedup();

        labels == [OFF, ON]
    }

    pub fn has_mappings(&self) -> bool {
        !self.mappings.is_empty()
    }

    /// Mapping labels in their defined order.
    pub fn labels(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.label.clone()).collect()
    }

    /// Convert a raw device value into its published form.
    pub fn decode(&self, raw: i64) -> RegisterValue {
        if let Some(mapping) = self.mappings.iter().find(|m| m.value == raw) {
            return RegisterValue::Text(mapping.label.clone());
        }

        if self.register_type.is_bit() && !self.has_mappings() {
            let label = if raw != 0 { ON } else { OFF };
            return RegisterValue::Text(label.to_string());
        }

        if self.factor == 1.0 {
            RegisterValue::Integer(raw)
        } else {
            RegisterValue::Float(raw as f64 / self.factor)
        }
    }

    /// Convert a value into the raw integer written to the device.
    pub fn encode(&self, value: &RegisterValue) -> Result<i64, DeviceError> {
        let raw = match value {
            RegisterValue::Text(text) => self.encode_label(text.trim())?,
            RegisterValue::Integer(_) | RegisterValue::Float(_) => {
                let v = value.as_f64().unwrap_or(f64::NAN);
                self.encode_number(v)?
            }
        };

        let (lo, hi) = if self.register_type.is_bit() {
            (0, 1)
        } else {
            self.data_type.raw_range()
        };

        if raw < lo || raw > hi {
            return Err(DeviceError::rejected(
                &self.name,
                format!("raw value {} outside {}..={}", raw, lo, hi),
            ));
        }

        Ok(raw)
    }

    fn encode_label(&self, label: &str) -> Result<i64, DeviceError> {
        if let Some(mapping) = self
            .mappings
            .iter()
            .find(|m| m.label.eq_ignore_ascii_case(label))
        {
            return Ok(mapping.value);
        }

        if self.has_mappings() {
            return Err(DeviceError::rejected(
                &self.name,
                format!(
                    "unknown option '{}' (expected one of {})",
                    label,
                    self.labels().join(", ")
                ),
            ));
        }

        if self.register_type.is_bit() {
            if label.eq_ignore_ascii_case(ON) {
                return Ok(1);
            }
            if label.eq_ignore_ascii_case(OFF) {
                return Ok(0);
            }
            return Err(DeviceError::rejected(
                &self.name,
                format!("'{}' is not ON or OFF", label),
            ));
        }

        Err(DeviceError::rejected(
            &self.name,
            format!("'{}' is not a number", label),
        ))
    }

    fn encode_number(&self, v: f64) -> Result<i64, DeviceError> {
        if !v.is_finite() {
            return Err(DeviceError::rejected(&self.name, "value is not finite"));
        }

        if self.has_mappings() || self.register_type.is_bit() {
            // Mapped and bit registers take raw values
            if v.fract() != 0.0 {
                return Err(DeviceError::rejected(
                    &self.name,
                    format!("{} is not a valid option", v),
                ));
            }
            let raw = v as i64;
            if self.has_mappings() && !self.mappings.iter().any(|m| m.value == raw) {
                return Err(DeviceError::rejected(
                    &self.name,
                    format!("{} is not a valid option", raw),
                ));
            }
            return Ok(raw);
        }

        if let Some(min) = self.min {
            if v < min {
                return Err(DeviceError::rejected(
                    &self.name,
                    format!("value {} below min {}", v, min),
                ));
            }
        }

        if let Some(max) = self.max {
            if v > max {
                return Err(DeviceError::rejected(
                    &self.name,
                    format!("value {} above max {}", v, max),
                ));
            }
        }

        Ok((v * self.factor).round() as i64)
    }

    /// Validate a requested value and normalise it to the published form.
    pub fn stage(&self, value: RegisterValue) -> Result<RegisterValue, DeviceError> {
        if !self.writable {
            return Err(DeviceError::rejected(&self.name, "register is read-only"));
        }

        let raw = self.encode(&value)?;
        Ok(self.decode(raw))
    }
}

/// All registers of one heat pump, indexed by name and address.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    registers: Vec<Arc<Register>>,
    by_name: HashMap<String, usize>,
    by_address: HashMap<u16, usize>,
}

impl Catalogue {
    /// Build a catalogue, rejecting duplicate names or addresses.
    pub fn new(registers: Vec<Register>) -> Result<Self, DeviceError> {
        let mut catalogue = Self::default();

        for register in registers {
            let index = catalogue.registers.len();

            if catalogue.by_address.insert(register.address, index).is_some() {
                return Err(DeviceError::catalogue(format!(
                    "duplicate register address {}",
                    register.address
                )));
            }

            if catalogue.by_name.insert(register.name.clone(), index).is_some() {
                return Err(DeviceError::catalogue(format!(
                    "duplicate register name '{}'",
                    register.name
                )));
            }

            catalogue.registers.push(Arc::new(register));
        }

        Ok(catalogue)
    }

    /// Build a catalogue from register definitions.
    pub fn from_configs(configs: &[RegisterConfig]) -> Result<Self, DeviceError> {
        validate_registers(configs).map_err(DeviceError::catalogue)?;
        Self::new(configs.iter().map(Register::from_config).collect())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Register>> {
        self.registers.iter()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<Register>> {
        self.by_name.get(name).map(|&i| &self.registers[i])
    }

    pub fn get_by_address(&self, address: u16) -> Option<&Arc<Register>> {
        self.by_address.get(&address).map(|&i| &self.registers[i])
    }

    /// Look a register up by name or address.
    pub fn resolve(&self, key: &RegisterKey) -> Result<&Arc<Register>, DeviceError> {
        let register = match key {
            RegisterKey::Address(address) => self.get_by_address(*address),
            RegisterKey::Name(name) => self.get_by_name(name),
        };
        register.ok_or_else(|| DeviceError::not_found(key))
    }
}

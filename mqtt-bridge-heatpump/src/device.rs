//! Device connection capability.
//!
//! The bridge core talks to the heat pump only through [`Connection`]. A
//! connection loads the register catalogue, reads and writes single
//! registers, and may push unsolicited updates.

use async_trait::async_trait;
use heatpump_common::RegisterValue;
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::catalogue::{Catalogue, Register};

/// Classification of device failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorKind {
    /// No register with the given name or address.
    RegisterNotFound,
    /// The value failed validation for the register.
    WriteRejected,
    /// A read did not complete in time.
    ReadTimeout,
    /// A write did not complete in time.
    WriteTimeout,
    /// The transport failed (connection refused, broken pipe, bad frame).
    Transport,
    /// The register catalogue could not be loaded.
    Catalogue,
}

impl DeviceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceErrorKind::RegisterNotFound => "register not found",
            DeviceErrorKind::WriteRejected => "write rejected",
            DeviceErrorKind::ReadTimeout => "read timeout",
            DeviceErrorKind::WriteTimeout => "write timeout",
            DeviceErrorKind::Transport => "transport error",
            DeviceErrorKind::Catalogue => "catalogue error",
        }
    }
}

impl fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by device operations.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct DeviceError {
    kind: DeviceErrorKind,
    message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(key: impl fmt::Display) -> Self {
        Self::new(DeviceErrorKind::RegisterNotFound, key.to_string())
    }

    pub fn rejected(register: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            DeviceErrorKind::WriteRejected,
            format!("{}: {}", register, reason),
        )
    }

    pub fn read_timeout(register: &str) -> Self {
        Self::new(DeviceErrorKind::ReadTimeout, register)
    }

    pub fn write_timeout(register: &str) -> Self {
        Self::new(DeviceErrorKind::WriteTimeout, register)
    }

    pub fn transport(message: impl fmt::Display) -> Self {
        Self::new(DeviceErrorKind::Transport, message.to_string())
    }

    pub fn catalogue(message: impl fmt::Display) -> Self {
        Self::new(DeviceErrorKind::Catalogue, message.to_string())
    }

    pub fn kind(&self) -> DeviceErrorKind {
        self.kind
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::ReadTimeout | DeviceErrorKind::WriteTimeout | DeviceErrorKind::Transport
        )
    }
}

/// An unsolicited value change pushed by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterUpdate {
    pub address: u16,
    pub value: RegisterValue,
}

/// Read/write/subscribe access to a heat pump.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Load the register catalogue.
    async fn initialize(&self) -> Result<Catalogue, DeviceError>;

    /// Open the transport.
    async fn start(&self) -> Result<(), DeviceError>;

    /// Read the current value of `register`.
    async fn read(&self, register: &Register) -> Result<RegisterValue, DeviceError>;

    /// Write a staged value to `register`.
    async fn write(&self, register: &Register, value: &RegisterValue) -> Result<(), DeviceError>;

    /// Stream of values pushed by the device.
    fn subscribe(&self) -> broadcast::Receiver<RegisterUpdate>;

    /// Which failures are worth retrying.
    fn is_retryable(&self, error: &DeviceError) -> bool {
        error.is_transient()
    }
}

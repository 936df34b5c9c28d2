//! Modbus implementation of [`Connection`] (TCP or RTU/serial).

use async_trait::async_trait;
use heatpump_common::RegisterValue;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::catalogue::{Catalogue, Register};
use crate::config::{ConnectionConfig, DataType, HeatpumpConfig, ModbusConfig, RegisterConfig, RegisterType};
use crate::device::{Connection, DeviceError, RegisterUpdate};

/// Connection to a heat pump's Modbus interface.
///
/// The client is opened lazily and dropped after any transport failure or
/// timeout, so the next request reconnects.
pub struct ModbusConnection {
    config: ModbusConfig,
    registers: Vec<RegisterConfig>,
    catalogue_file: Option<PathBuf>,
    timeout: Duration,
    client: Mutex<Option<Context>>,
    updates: broadcast::Sender<RegisterUpdate>,
}

/// A single Modbus write request.
enum WriteRequest {
    Coil(bool),
    Single(u16),
    Multiple(Vec<u16>),
}

impl ModbusConnection {
    pub fn new(config: &HeatpumpConfig) -> Self {
        let (updates, _) = broadcast::channel(16);

        Self {
            config: config.modbus.clone(),
            registers: config.registers.clone(),
            catalogue_file: config.catalogue_file.clone(),
            timeout: Duration::from_millis(config.modbus.timeout_ms),
            client: Mutex::new(None),
            updates,
        }
    }

    /// Connect to the Modbus device.
    async fn connect(&self) -> Result<Context, DeviceError> {
        let slave = Slave(self.config.unit_id);

        match &self.config.connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| DeviceError::transport(format!("Resolving {}: {}", host, e)))?
                    .next()
                    .ok_or_else(|| DeviceError::transport(format!("No address for {}", host)))?;

                let ctx = tokio::time::timeout(self.timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| DeviceError::transport("Connection timeout"))?
                    .map_err(DeviceError::transport)?;

                info!(%addr, unit_id = self.config.unit_id, "Connected to Modbus TCP device");
                Ok(ctx)
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits);

                let serial = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| DeviceError::transport(format!("Serial open failed: {}", e)))?;

                info!(%port, unit_id = self.config.unit_id, "Opened Modbus RTU port");
                Ok(rtu::attach_slave(serial, slave))
            }
        }
    }

    /// The cached client, connecting first if needed.
    async fn client<'a>(
        &self,
        guard: &'a mut MutexGuard<'_, Option<Context>>,
    ) -> Result<&'a mut Context, DeviceError> {
        let slot: &'a mut Option<Context> = &mut **guard;
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }

        slot.as_mut()
            .ok_or_else(|| DeviceError::transport("Not connected"))
    }
}

/// Decode the words of one register value.
///
/// Returns `None` if fewer words arrived than the data type needs.
pub fn decode_words(words: &[u16], data_type: DataType) -> Option<i64> {
    let first = *words.first()?;

    let value = match data_type {
        DataType::U16 => first as i64,
        DataType::I16 => first as i16 as i64,
        DataType::U32 => ((first as u32) << 16 | *words.get(1)? as u32) as i64,
        DataType::I32 => ((first as u32) << 16 | *words.get(1)? as u32) as i32 as i64,
        DataType::U32Le => ((*words.get(1)? as u32) << 16 | first as u32) as i64,
        DataType::I32Le => ((*words.get(1)? as u32) << 16 | first as u32) as i32 as i64,
    };

    Some(value)
}

/// Encode a raw value into register words.
pub fn encode_words(raw: i64, data_type: DataType) -> Vec<u16> {
    let bits = raw as u32;
    let (hi, lo) = ((bits >> 16) as u16, bits as u16);

    match data_type {
        DataType::U16 | DataType::I16 => vec![raw as u16],
        DataType::U32 | DataType::I32 => vec![hi, lo],
        DataType::U32Le | DataType::I32Le => vec![lo, hi],
    }
}

#[async_trait]
impl Connection for ModbusConnection {
    async fn initialize(&self) -> Result<Catalogue, DeviceError> {
        let mut configs = self.registers.clone();

        if let Some(path) = &self.catalogue_file {
            let extra: Vec<RegisterConfig> = heatpump_common::load_config(path)
                .map_err(DeviceError::catalogue)?;
            info!(path = %path.display(), registers = extra.len(), "Loaded register catalogue");
            configs.extend(extra);
        }

        let catalogue = Catalogue::from_configs(&configs)?;
        if catalogue.is_empty() {
            return Err(DeviceError::catalogue("No registers defined"));
        }

        Ok(catalogue)
    }

    async fn start(&self) -> Result<(), DeviceError> {
        let mut guard = self.client.lock().await;
        self.client(&mut guard).await?;
        Ok(())
    }

    async fn read(&self, register: &Register) -> Result<RegisterValue, DeviceError> {
        let mut guard = self.client.lock().await;
        let ctx = self.client(&mut guard).await?;

        let address = register.address;
        let count = register.data_type.word_count();
        let data_type = register.data_type;

        let result = tokio::time::timeout(self.timeout, async {
            match register.register_type {
                RegisterType::Coil => ctx
                    .read_coils(address, 1)
                    .await
                    .map(|r| r.map(|bits| bits.first().map(|&b| b as i64))),
                RegisterType::Discrete => ctx
                    .read_discrete_inputs(address, 1)
                    .await
                    .map(|r| r.map(|bits| bits.first().map(|&b| b as i64))),
                RegisterType::Input => ctx
                    .read_input_registers(address, count)
                    .await
                    .map(|r| r.map(|words| decode_words(&words, data_type))),
                RegisterType::Holding => ctx
                    .read_holding_registers(address, count)
                    .await
                    .map(|r| r.map(|words| decode_words(&words, data_type))),
            }
        })
        .await;

        let raw = match result {
            Err(_) => {
                *guard = None;
                return Err(DeviceError::read_timeout(&register.name));
            }
            Ok(Err(e)) => {
                *guard = None;
                return Err(DeviceError::transport(format!("{}: {}", register.name, e)));
            }
            Ok(Ok(Err(exception))) => {
                return Err(DeviceError::transport(format!(
                    "{}: exception {:?}",
                    register.name, exception
                )));
            }
            Ok(Ok(Ok(None))) => {
                return Err(DeviceError::transport(format!(
                    "{}: short response",
                    register.name
                )));
            }
            Ok(Ok(Ok(Some(raw)))) => raw,
        };

        let value = register.decode(raw);
        debug!(register = %register.name, raw, value = %value, "Read register");
        Ok(value)
    }

    async fn write(&self, register: &Register, value: &RegisterValue) -> Result<(), DeviceError> {
        let raw = register.encode(value)?;

        let request = match register.register_type {
            RegisterType::Coil => WriteRequest::Coil(raw != 0),
            RegisterType::Holding => match encode_words(raw, register.data_type).as_slice() {
                [word] => WriteRequest::Single(*word),
                words => WriteRequest::Multiple(words.to_vec()),
            },
            RegisterType::Discrete | RegisterType::Input => {
                return Err(DeviceError::rejected(
                    &register.name,
                    format!("{} registers cannot be written", register.register_type.as_str()),
                ));
            }
        };

        let mut guard = self.client.lock().await;
        let ctx = self.client(&mut guard).await?;
        let address = register.address;

        let result = tokio::time::timeout(self.timeout, async {
            match &request {
                WriteRequest::Coil(on) => ctx.write_single_coil(address, *on).await,
                WriteRequest::Single(word) => ctx.write_single_register(address, *word).await,
                WriteRequest::Multiple(words) => ctx.write_multiple_registers(address, words).await,
            }
        })
        .await;

        match result {
            Err(_) => {
                *guard = None;
                Err(DeviceError::write_timeout(&register.name))
            }
            Ok(Err(e)) => {
                *guard = None;
                Err(DeviceError::transport(format!("{}: {}", register.name, e)))
            }
            Ok(Ok(Err(exception))) => {
                warn!(register = %register.name, ?exception, "Device refused write");
                Err(DeviceError::rejected(
                    &register.name,
                    format!("exception {:?}", exception),
                ))
            }
            Ok(Ok(Ok(()))) => {
                debug!(register = %register.name, raw, "Wrote register");
                Ok(())
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RegisterUpdate> {
        // Modbus has no unsolicited traffic; the stream stays silent.
        self.updates.subscribe()
    }
}

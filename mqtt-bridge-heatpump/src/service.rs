//! Bridge core.
//!
//! [`Service`] owns the mutable bridge state (the latest register values and
//! the poll scheduler) and runs a single coordination loop over four inputs:
//!
//! - values pushed by the device,
//! - completions of spawned device reads and writes,
//! - commands handed off by the bus,
//! - the poll ticker.
//!
//! Device I/O runs in spawned tasks that report back over a channel, and
//! outbound messages are queued to a [`Publisher`] task, so neither a slow
//! register nor a stalled bus stalls the loop. Nothing that fails after
//! startup stops the loop.

use heatpump_bridge_framework::{Bus, BridgeError, Command, RetryError, RetryPolicy, Topics};
use heatpump_common::RegisterValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::catalogue::{Catalogue, Register};
use crate::config::{HeatpumpBridgeConfig, RegisterKey};
use crate::device::{Connection, DeviceError, RegisterUpdate};
use crate::discovery::DeviceInfo;
use crate::poller::{POLL_TICK, PollScheduler};
use crate::publisher::{Publication, Publisher};

/// Delays between write attempts.
pub const WRITE_RETRY_DELAYS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_millis(500),
    Duration::from_secs(1),
];

/// Delays between read attempts.
pub const READ_RETRY_DELAYS: [Duration; 2] = [Duration::ZERO, Duration::from_millis(500)];

/// Startup failure.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Bus error: {0}")]
    Bus(#[from] BridgeError),
}

/// Polling settings resolved against the catalogue at startup.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub registers: Vec<RegisterKey>,
}

/// Everything the service needs besides its two connections.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub topics: Topics,
    /// Retain values and discovery announcements.
    pub retain_state: bool,
    pub device: DeviceInfo,
    pub poll: Option<PollSettings>,
    pub write_policy: RetryPolicy,
    pub read_policy: RetryPolicy,
}

impl ServiceSettings {
    pub fn new(topics: Topics, device: DeviceInfo) -> Self {
        Self {
            topics,
            retain_state: true,
            device,
            poll: None,
            write_policy: RetryPolicy::new(WRITE_RETRY_DELAYS),
            read_policy: RetryPolicy::new(READ_RETRY_DELAYS),
        }
    }

    pub fn from_config(config: &HeatpumpBridgeConfig) -> Self {
        let heatpump = &config.heatpump;
        let device = DeviceInfo::new(
            &heatpump.manufacturer,
            &heatpump.model,
            &heatpump.modbus.device_address(),
        );

        let mut settings = Self::new(config.mqtt.topics(), device);
        settings.retain_state = config.mqtt.retain_state;
        settings.poll = heatpump.poll.as_ref().map(|poll| PollSettings {
            interval: Duration::from_secs(poll.interval),
            registers: poll.registers.clone(),
        });
        settings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOrigin {
    Poll,
    Reconcile,
}

/// Completion of work spawned off the coordination loop.
enum Event {
    WriteFinished {
        register: Arc<Register>,
        staged: RegisterValue,
        result: Result<(), RetryError<DeviceError>>,
    },
    ReadFinished {
        register: Arc<Register>,
        origin: ReadOrigin,
        result: Result<RegisterValue, RetryError<DeviceError>>,
    },
    SweepFinished,
}

/// The bridge between one heat pump and the bus.
pub struct Service {
    connection: Arc<dyn Connection>,
    bus: Arc<dyn Bus>,
    settings: ServiceSettings,
    catalogue: Catalogue,
    values: HashMap<u16, RegisterValue>,
    publications: Option<mpsc::UnboundedSender<Publication>>,
    poller: Option<PollScheduler>,
    updates: Option<broadcast::Receiver<RegisterUpdate>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Service {
    pub fn new(
        connection: Arc<dyn Connection>,
        bus: Arc<dyn Bus>,
        settings: ServiceSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            connection,
            bus,
            settings,
            catalogue: Catalogue::default(),
            values: HashMap::new(),
            publications: None,
            poller: None,
            updates: None,
            events_tx,
            events_rx,
        }
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn poller(&self) -> Option<&PollScheduler> {
        self.poller.as_ref()
    }

    /// Bring the bridge up, in order: load the catalogue, open the device,
    /// set up polling, start publishing, open the bus.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        self.catalogue = self.connection.initialize().await?;
        info!(registers = self.catalogue.len(), "Register catalogue loaded");

        self.updates = Some(self.connection.subscribe());
        self.connection.start().await?;
        info!("Device connection started");

        if let Some(poll) = &self.settings.poll {
            self.poller = Some(self.build_poller(poll));
        }

        let publisher = Publisher::new(
            self.bus.clone(),
            self.settings.topics.clone(),
            self.settings.device.clone(),
            self.settings.retain_state,
        );
        self.publications = Some(publisher.spawn());

        self.bus.start().await?;
        Ok(())
    }

    fn build_poller(&self, poll: &PollSettings) -> PollScheduler {
        let mut registers = Vec::with_capacity(poll.registers.len());

        for key in &poll.registers {
            match self.catalogue.resolve(key) {
                Ok(register) => registers.push(register.clone()),
                Err(e) => error!(register = %key, error = %e, "Cannot poll register"),
            }
        }

        info!(
            interval_secs = poll.interval.as_secs(),
            registers = registers.len(),
            "Polling enabled"
        );

        PollScheduler::new(poll.interval, registers)
    }

    /// Run the coordination loop. Never returns; cancel the task to stop it.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + POLL_TICK, POLL_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        info!("Bridge core running");

        loop {
            tokio::select! {
                biased;

                update = next_update(&mut self.updates) => self.on_device_update(update),

                Some(event) = self.events_rx.recv() => self.handle_event(event),

                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        warn!("Command channel closed");
                        commands_open = false;
                    }
                },

                _ = ticker.tick(), if self.poller.is_some() => self.poll_tick(),
            }
        }
    }

    /// Validate a command and dispatch the write.
    fn handle_command(&mut self, command: Command) {
        let Some(register) = self.catalogue.get_by_name(&command.register).cloned() else {
            error!(register = %command.register, "Register not found");
            return;
        };

        let staged = match register.stage(command.value) {
            Ok(value) => value,
            Err(e) => {
                error!(register = %register.name, error = %e, "Write rejected");
                return;
            }
        };

        info!(register = %register.name, value = %staged, "Writing register");
        self.values.insert(register.address, staged.clone());
        self.spawn_write(register, staged);
    }

    fn spawn_write(&self, register: Arc<Register>, staged: RegisterValue) {
        let connection = self.connection.clone();
        let policy = self.settings.write_policy.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let result = policy
                .run(
                    |e| connection.is_retryable(e),
                    || connection.write(&register, &staged),
                )
                .await;

            let _ = events.send(Event::WriteFinished {
                register,
                staged,
                result,
            });
        });
    }

    fn spawn_read(&self, register: Arc<Register>, origin: ReadOrigin) {
        let connection = self.connection.clone();
        let policy = self.settings.read_policy.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let result = read_register(&connection, &policy, &register).await;
            let _ = events.send(Event::ReadFinished {
                register,
                origin,
                result,
            });
        });
    }

    fn poll_tick(&mut self) {
        let Some(poller) = self.poller.as_mut() else {
            return;
        };
        let Some(registers) = poller.begin_sweep(Instant::now()) else {
            return;
        };

        let connection = self.connection.clone();
        let policy = self.settings.read_policy.clone();
        let mut sweep = SweepGuard::new(self.events_tx.clone());

        tokio::spawn(async move {
            for register in registers {
                info!(register = %register.name, "Polling register");
                let result = read_register(&connection, &policy, &register).await;
                let event = Event::ReadFinished {
                    register,
                    origin: ReadOrigin::Poll,
                    result,
                };
                if sweep.events.send(event).is_err() {
                    return;
                }
            }
            sweep.completed = true;
        });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::WriteFinished {
                register,
                staged,
                result,
            } => self.on_write_finished(register, staged, result),
            Event::ReadFinished {
                register,
                origin,
                result,
            } => self.on_read_finished(register, origin, result),
            Event::SweepFinished => {
                if let Some(poller) = self.poller.as_mut() {
                    poller.finish_sweep();
                }
            }
        }
    }

    fn on_write_finished(
        &mut self,
        register: Arc<Register>,
        staged: RegisterValue,
        result: Result<(), RetryError<DeviceError>>,
    ) {
        match result {
            Ok(()) => {
                let current = self.values.get(&register.address);
                if current == Some(&staged) {
                    debug!(register = %register.name, "Write confirmed");
                    self.publish_update(&register);
                } else {
                    info!(
                        register = %register.name,
                        staged = %staged,
                        current = ?current,
                        "Value changed while writing"
                    );
                    self.spawn_read(register, ReadOrigin::Reconcile);
                }
            }
            Err(e) => {
                error!(register = %register.name, error = %e, "Write failed");
                self.spawn_read(register, ReadOrigin::Reconcile);
            }
        }
    }

    fn on_read_finished(
        &mut self,
        register: Arc<Register>,
        origin: ReadOrigin,
        result: Result<RegisterValue, RetryError<DeviceError>>,
    ) {
        match result {
            Ok(value) => {
                self.values.insert(register.address, value);
                self.publish_update(&register);
            }
            Err(e) => match origin {
                ReadOrigin::Poll => {
                    warn!(register = %register.name, error = %e, "Poll failed");
                }
                ReadOrigin::Reconcile => {
                    error!(register = %register.name, error = %e, "Reconciling read failed");
                }
            },
        }
    }

    fn on_device_update(&mut self, update: Result<RegisterUpdate, RecvError>) {
        match update {
            Ok(update) => {
                let Some(register) = self.catalogue.get_by_address(update.address).cloned() else {
                    debug!(address = update.address, "Update for unknown register");
                    return;
                };
                self.values.insert(register.address, update.value);
                self.publish_update(&register);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Device updates lagged");
            }
            Err(RecvError::Closed) => {
                info!("Device update stream closed");
                self.updates = None;
            }
        }
    }

    /// Queue the current value of `register` for publication.
    ///
    /// The register counts as refreshed for polling once it is queued.
    fn publish_update(&mut self, register: &Arc<Register>) {
        if let (Some(publications), Some(value)) =
            (&self.publications, self.values.get(&register.address))
        {
            let publication = Publication {
                register: register.clone(),
                value: value.clone(),
            };
            if publications.send(publication).is_err() {
                warn!(register = %register.name, "Publisher stopped, dropping value");
            }
        }

        self.mark_refreshed(register.address);
    }

    fn mark_refreshed(&mut self, address: u16) {
        if let Some(poller) = self.poller.as_mut() {
            poller.register_update(address, Instant::now());
        }
    }
}

/// Reports the end of a poll sweep to the loop, however the sweep task ends.
struct SweepGuard {
    events: mpsc::UnboundedSender<Event>,
    completed: bool,
}

impl SweepGuard {
    fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            events,
            completed: false,
        }
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Poll sweep ended early");
        }
        let _ = self.events.send(Event::SweepFinished);
    }
}

async fn next_update(
    updates: &mut Option<broadcast::Receiver<RegisterUpdate>>,
) -> Result<RegisterUpdate, RecvError> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn read_register(
    connection: &Arc<dyn Connection>,
    policy: &RetryPolicy,
    register: &Register,
) -> Result<RegisterValue, RetryError<DeviceError>> {
    policy
        .run(|e| connection.is_retryable(e), || connection.read(register))
        .await
}

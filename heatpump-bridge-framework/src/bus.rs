//! Message bus abstraction and its MQTT implementation.
//!
//! The [`Bus`] trait is the only thing the bridge core needs for outbound
//! traffic. [`MqttBus`] implements it on top of `rumqttc` (MQTT 3.1.1 or 5):
//! a background task drives the client event loop, republishes availability
//! and the command subscription on every connection acknowledgement, and
//! forwards inbound command messages as [`Command`]s over a channel.
//!
//! Requests never wait on the client queue. When the broker is unreachable
//! and the queue is full, publishing fails immediately instead of blocking
//! the caller.

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode as ConnectReturnCodeV5, Packet as PacketV5};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet, QoS, v5};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use heatpump_common::{
    MqttConfig, MqttProtocol, OFFLINE, ONLINE, RegisterValue, Topics, mqtt_options,
    mqtt_options_v5,
};

use crate::error::{BridgeError, Result};

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;

/// Pause after a connection error before polling the event loop again.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long [`MqttBus::stop`] waits for the event loop to wind down.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// The bridge's view of the message bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Open the transport: announce availability and subscribe to commands.
    async fn start(&self) -> Result<()>;

    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;
}

/// A write request received on a command topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Register name taken from the topic.
    pub register: String,
    /// Requested value.
    pub value: RegisterValue,
}

/// Decode an inbound message into a [`Command`].
///
/// Returns `None` when `topic` is not a command topic. The payload is read as
/// an integer, then a float, and otherwise kept as the raw text.
pub fn decode_command(topics: &Topics, topic: &str, payload: &[u8]) -> Option<Command> {
    let register = topics.parse_command(topic)?;
    let text = String::from_utf8_lossy(payload);

    Some(Command {
        register: register.to_string(),
        value: RegisterValue::parse_payload(&text),
    })
}

/// Client handle for the negotiated protocol version.
#[derive(Clone)]
enum Client {
    V311(AsyncClient),
    V5(v5::AsyncClient),
}

impl Client {
    fn try_publish(&self, topic: &str, retain: bool, payload: String) -> Result<()> {
        match self {
            Client::V311(client) => client
                .try_publish(topic, QoS::AtLeastOnce, retain, payload)
                .map_err(|e| BridgeError::publish(topic, e)),
            Client::V5(client) => client
                .try_publish(topic, v5::mqttbytes::QoS::AtLeastOnce, retain, payload)
                .map_err(|e| BridgeError::publish(topic, e)),
        }
    }

    fn try_subscribe(&self, filter: &str) -> Result<()> {
        match self {
            Client::V311(client) => client
                .try_subscribe(filter, QoS::AtLeastOnce)
                .map_err(BridgeError::from),
            Client::V5(client) => client
                .try_subscribe(filter, v5::mqttbytes::QoS::AtLeastOnce)
                .map_err(BridgeError::from),
        }
    }

    fn try_disconnect(&self) -> Result<()> {
        match self {
            Client::V311(client) => client
                .try_disconnect()
                .map_err(BridgeError::from),
            Client::V5(client) => client
                .try_disconnect()
                .map_err(BridgeError::from),
        }
    }
}

/// Event loop for the negotiated protocol version.
enum Connection {
    V311(EventLoop),
    V5(v5::EventLoop),
}

/// Event loop notifications the bus reacts to.
#[derive(Debug)]
enum BusEvent {
    Connected,
    Refused(String),
    Message { topic: String, payload: Vec<u8> },
    BrokerDisconnect,
    Closed,
    Other,
    Error(String),
}

impl Connection {
    async fn poll(&mut self) -> BusEvent {
        match self {
            Connection::V311(eventloop) => match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        BusEvent::Connected
                    } else {
                        BusEvent::Refused(format!("{:?}", ack.code))
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => BusEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                },
                Ok(Event::Incoming(Packet::Disconnect)) => BusEvent::BrokerDisconnect,
                Ok(Event::Outgoing(Outgoing::Disconnect)) => BusEvent::Closed,
                Ok(_) => BusEvent::Other,
                Err(e) => BusEvent::Error(e.to_string()),
            },
            Connection::V5(eventloop) => match eventloop.poll().await {
                Ok(v5::Event::Incoming(PacketV5::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCodeV5::Success {
                        BusEvent::Connected
                    } else {
                        BusEvent::Refused(format!("{:?}", ack.code))
                    }
                }
                Ok(v5::Event::Incoming(PacketV5::Publish(publish))) => BusEvent::Message {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload.to_vec(),
                },
                Ok(v5::Event::Incoming(PacketV5::Disconnect(_))) => BusEvent::BrokerDisconnect,
                Ok(v5::Event::Outgoing(Outgoing::Disconnect)) => BusEvent::Closed,
                Ok(_) => BusEvent::Other,
                Err(e) => BusEvent::Error(e.to_string()),
            },
        }
    }
}

/// MQTT implementation of [`Bus`].
#[derive(Clone)]
pub struct MqttBus {
    client: Client,
    protocol: MqttProtocol,
    topics: Topics,
    retain_availability: bool,
    driver: Arc<Mutex<Option<Driver>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Event loop waiting to be driven, with the channel commands are sent on.
struct Driver {
    connection: Connection,
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBus")
            .field("protocol", &self.protocol)
            .field("topics", &self.topics)
            .field("retain_availability", &self.retain_availability)
            .finish_non_exhaustive()
    }
}

impl MqttBus {
    /// Create the client. Nothing goes on the wire until [`Bus::start`].
    ///
    /// Decoded commands are sent on `commands`. The client speaks MQTT 5 when
    /// `config.protocol` asks for it and MQTT 3.1.1 otherwise.
    pub fn new(config: &MqttConfig, commands: mpsc::UnboundedSender<Command>) -> Self {
        let (client, connection) = match config.protocol {
            MqttProtocol::V5 => {
                let (client, eventloop) =
                    v5::AsyncClient::new(mqtt_options_v5(config), REQUEST_CAPACITY);
                (Client::V5(client), Connection::V5(eventloop))
            }
            _ => {
                let (client, eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);
                (Client::V311(client), Connection::V311(eventloop))
            }
        };

        Self {
            client,
            protocol: config.protocol,
            topics: config.topics(),
            retain_availability: config.retain_availability,
            driver: Arc::new(Mutex::new(Some(Driver {
                connection,
                commands,
            }))),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Topic layout used by this bus.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Protocol version the client speaks.
    pub fn protocol(&self) -> MqttProtocol {
        self.protocol
    }

    /// Publish `offline` and disconnect from the broker.
    ///
    /// Both requests are queued without waiting. The event loop gets
    /// [`STOP_TIMEOUT`] to flush them and is aborted after that, so stopping
    /// completes even when the broker is gone.
    pub async fn stop(&self) {
        let topic = self.topics.availability();
        if let Err(e) =
            self.client
                .try_publish(&topic, self.retain_availability, OFFLINE.to_string())
        {
            tracing::warn!(topic = %topic, error = %e, "Failed to queue offline availability");
        }

        if let Err(e) = self.client.try_disconnect() {
            tracing::warn!(error = %e, "Failed to queue MQTT disconnect");
        }

        if let Some(mut task) = self.task.lock().await.take() {
            if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("MQTT event loop did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!("MQTT bus stopped");
    }

    async fn drive(self, driver: Driver) {
        let Driver {
            mut connection,
            commands,
        } = driver;

        loop {
            match connection.poll().await {
                BusEvent::Connected => self.on_connect(),
                BusEvent::Refused(code) => {
                    tracing::error!(code = %code, "MQTT broker refused connection");
                }
                BusEvent::Message { topic, payload } => {
                    match decode_command(&self.topics, &topic, &payload) {
                        Some(command) => {
                            tracing::info!(
                                register = %command.register,
                                value = %command.value,
                                "Received command"
                            );
                            if commands.send(command).is_err() {
                                tracing::debug!("Command receiver closed, dropping command");
                            }
                        }
                        None => {
                            tracing::debug!(topic = %topic, "Ignoring message");
                        }
                    }
                }
                BusEvent::BrokerDisconnect => {
                    tracing::warn!("MQTT broker closed the connection");
                }
                BusEvent::Closed => {
                    tracing::info!("MQTT connection closed");
                    break;
                }
                BusEvent::Other => {}
                BusEvent::Error(e) => {
                    tracing::warn!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Announce availability and (re)subscribe to command topics.
    ///
    /// Runs inside the event loop task, so requests must not wait on the
    /// queue the loop itself drains.
    fn on_connect(&self) {
        tracing::info!("Connected to MQTT broker");

        let availability = self.topics.availability();
        if let Err(e) =
            self.client
                .try_publish(&availability, self.retain_availability, ONLINE.to_string())
        {
            tracing::warn!(topic = %availability, error = %e, "Failed to publish availability");
        }

        let filter = self.topics.command_filter();
        match self.client.try_subscribe(&filter) {
            Ok(()) => tracing::debug!(filter = %filter, "Subscribed to commands"),
            Err(e) => tracing::warn!(filter = %filter, error = %e, "Failed to subscribe"),
        }
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn start(&self) -> Result<()> {
        let driver = self
            .driver
            .lock()
            .await
            .take()
            .ok_or_else(|| BridgeError::Mqtt("bus already started".to_string()))?;

        tracing::info!(
            availability = %self.topics.availability(),
            commands = %self.topics.command_filter(),
            "Starting MQTT bus"
        );

        let handle = tokio::spawn(self.clone().drive(driver));
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        self.client.try_publish(topic, retain, payload)
    }
}

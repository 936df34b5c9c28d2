//! Outbound publications.
//!
//! The bridge core hands each fresh register value to a [`Publisher`] task
//! over an unbounded channel and moves on. The task announces a register the
//! first time it is seen and then publishes its value, so a slow or stalled
//! bus only ever holds up this task.

use heatpump_bridge_framework::{Bus, Topics};
use heatpump_common::RegisterValue;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::catalogue::Register;
use crate::discovery::{DeviceInfo, classify};

/// A register value ready to go on the bus.
#[derive(Debug, Clone)]
pub struct Publication {
    pub register: Arc<Register>,
    pub value: RegisterValue,
}

/// Publishes discovery announcements and register values in order.
pub struct Publisher {
    bus: Arc<dyn Bus>,
    topics: Topics,
    device: DeviceInfo,
    retain: bool,
    announced: HashSet<u16>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn Bus>, topics: Topics, device: DeviceInfo, retain: bool) -> Self {
        Self {
            bus,
            topics,
            device,
            retain,
            announced: HashSet::new(),
        }
    }

    /// Move the publisher onto its own task and return the queue feeding it.
    ///
    /// The task ends once every sender is dropped.
    pub fn spawn(self) -> mpsc::UnboundedSender<Publication> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        tx
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Publication>) {
        while let Some(publication) = rx.recv().await {
            self.publish(&publication).await;
        }
        debug!("Publication queue closed");
    }

    /// Announce the register if it has not been announced yet, then publish
    /// the value.
    ///
    /// A value is never published before its announcement. When the
    /// announcement fails the value is dropped and the announcement is
    /// retried with the next publication for that register.
    pub async fn publish(&mut self, publication: &Publication) {
        let register = &publication.register;

        if !self.announced.contains(&register.address) {
            let announcement = classify(register, &self.device, &self.topics);

            let published = match announcement.to_json() {
                Ok(payload) => {
                    self.bus
                        .publish(&announcement.topic, payload, self.retain)
                        .await
                }
                Err(e) => Err(e.into()),
            };

            match published {
                Ok(()) => {
                    info!(
                        register = %register.name,
                        component = announcement.component.as_str(),
                        "Published discovery"
                    );
                    self.announced.insert(register.address);
                }
                Err(e) => {
                    error!(register = %register.name, error = %e, "Failed to publish discovery");
                    return;
                }
            }
        }

        let topic = self.topics.value(&register.name);
        let value = &publication.value;
        match self.bus.publish(&topic, value.to_payload(), self.retain).await {
            Ok(()) => debug!(%topic, value = %value, "Published value"),
            Err(e) => error!(%topic, error = %e, "Failed to publish value"),
        }
    }

    pub fn is_announced(&self, address: u16) -> bool {
        self.announced.contains(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegisterConfig;
    use async_trait::async_trait;
    use heatpump_bridge_framework::{BridgeError, Result};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String, bool)>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Bus for RecordingBus {
        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BridgeError::publish(topic, "queue full"));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload, retain));
            Ok(())
        }
    }

    impl RecordingBus {
        fn topics(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _, _)| topic.clone())
                .collect()
        }
    }

    fn outdoor_temp() -> Publication {
        let config: RegisterConfig = json5::from_str(
            r#"{
                address: 40004,
                name: "outdoor-temp-40004",
                title: "Outdoor temperature",
                type: "input",
                unit: "°C",
                factor: 10,
            }"#,
        )
        .unwrap();

        Publication {
            register: Arc::new(Register::from_config(&config)),
            value: RegisterValue::Float(-3.5),
        }
    }

    fn publisher(bus: &Arc<RecordingBus>) -> Publisher {
        Publisher::new(
            bus.clone(),
            Topics::default(),
            DeviceInfo::new("Nibe", "F1255", "tcp://10.0.0.7:502-1"),
            true,
        )
    }

    #[tokio::test]
    async fn test_announces_once_before_values() {
        let bus = Arc::new(RecordingBus::default());
        let mut publisher = publisher(&bus);

        publisher.publish(&outdoor_temp()).await;
        publisher.publish(&outdoor_temp()).await;

        let topics = bus.topics();
        assert_eq!(topics.len(), 3);
        assert!(topics[0].starts_with("homeassistant/sensor/"));
        assert!(topics[0].ends_with("/config"));
        assert_eq!(topics[1], "nibe/coils/outdoor-temp-40004");
        assert_eq!(topics[2], "nibe/coils/outdoor-temp-40004");
        assert!(publisher.is_announced(40004));
    }

    #[tokio::test]
    async fn test_failed_announcement_holds_back_value() {
        let bus = Arc::new(RecordingBus::default());
        bus.failures.store(1, Ordering::SeqCst);
        let mut publisher = publisher(&bus);

        publisher.publish(&outdoor_temp()).await;
        assert!(bus.topics().is_empty());
        assert!(!publisher.is_announced(40004));

        publisher.publish(&outdoor_temp()).await;
        let topics = bus.topics();
        assert_eq!(topics.len(), 2);
        assert!(topics[0].ends_with("/config"));
    }

    #[tokio::test]
    async fn test_spawned_publisher_drains_queue() {
        let bus = Arc::new(RecordingBus::default());
        let tx = publisher(&bus).spawn();

        tx.send(outdoor_temp()).unwrap();
        tx.send(outdoor_temp()).unwrap();

        for _ in 0..100 {
            if bus.topics().len() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.topics().len(), 3);
        assert!(bus.published.lock().unwrap().iter().all(|(_, _, retain)| *retain));
    }
}

//! Best-effort change-event bus over MQTT.
//!
//! Subjects are dotted strings (`assets.asset.created`); the adapter maps
//! them to slashed MQTT topics (`assets/asset/created`) so subscribers can
//! use the `assets/#` wildcard. Delivery is at-most-once: publish failures
//! are warnings for the caller, never data-path errors.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("bus client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Publisher contract the reconciler depends on.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// A change event as received off the bus: `(subject, payload)`.
pub type BusMessage = (String, Vec<u8>);

/// MQTT-backed event bus. `connect` spawns the event-loop driver task; the
/// bus stays usable (and keeps retrying) while the broker is down.
pub struct EventBus {
    client: AsyncClient,
    incoming_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<BusMessage>>>,
}

impl EventBus {
    pub fn connect(cfg: &MqttConfig) -> Self {
        let mut opts = MqttOptions::new(cfg.client_id.clone(), &cfg.host, cfg.port);
        opts.set_keep_alive(Duration::from_secs(15));

        let (client, mut eventloop) = AsyncClient::new(opts, 32);
        let (tx, incoming_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("event bus connected");
                    }
                    Ok(Event::Incoming(Incoming::Publish(p))) => {
                        let subject = topic_to_subject(&p.topic);
                        if tx.send((subject, p.payload.to_vec())).is_err() {
                            // Receiver gone, nothing left to feed.
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "event bus connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client,
            incoming_rx: parking_lot::Mutex::new(Some(incoming_rx)),
        }
    }

    /// Subscribe to every change-event subject and hand back the receiving
    /// end. Intended for the notifier fan-out; can be taken once.
    pub async fn subscribe_events(&self) -> Option<mpsc::UnboundedReceiver<BusMessage>> {
        if let Err(e) = self.client.subscribe("assets/#", QoS::AtMostOnce).await {
            warn!(error = %e, "event bus subscribe failed");
        }
        self.incoming_rx.lock().take()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), PublishError> {
        let topic = subject_to_topic(subject);
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await?;
        debug!(subject, bytes = payload.len(), "published change event");
        Ok(())
    }
}

/// `assets.asset.created` -> `assets/asset/created`
fn subject_to_topic(subject: &str) -> String {
    subject.replace('.', "/")
}

/// `assets/asset/created` -> `assets.asset.created`
fn topic_to_subject(topic: &str) -> String {
    topic.replace('/', ".")
}

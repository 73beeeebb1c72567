//! MQTT publisher for outbound events
//!
//! One MQTT connection is shared by both outbound channels:
//! - `freight` - FreightCalculated (QoS 1)
//! - `simulator` - DriverMoved (QoS 1)
//!
//! MQTT has no message keys, so with `keyed_topics` the route id is appended as
//! the last topic level (`freight/<route_id>`). Brokers order per topic, which
//! keeps per-route ordering.

use crate::error::PublishError;
use crate::infra::config::Config;
use crate::io::publisher::Publisher;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The shared outbound connection and the task polling its event loop
pub struct Egress {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// Connect the egress client and spawn its event loop
///
/// The loop keeps running (and reconnecting) until `Egress::close` queues a
/// disconnect behind the pending publishes.
pub fn connect_egress(config: &Config) -> Egress {
    let client_id = format!("{}-egress-{}", config.service_name(), std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_clean_session(true);

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

    let task = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt_egress_connected");
                }
                Ok(Event::Incoming(Packet::PubAck(_))) => {
                    debug!("mqtt_egress_puback");
                }
                // Requests are handled in order, so everything published before is on the wire
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("mqtt_egress_disconnected");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt_egress_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    Egress { client, task }
}

impl Egress {
    /// Client handle for publishers
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Flush queued publishes and disconnect, up to `timeout`
    ///
    /// Returns true if the event loop reached the disconnect in time. Otherwise
    /// the loop is aborted and anything still queued is lost.
    pub async fn close(self, timeout: Duration) -> bool {
        let Egress { client, mut task } = self;
        let flushed = tokio::time::timeout(timeout, async {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "mqtt_egress_disconnect_failed");
                return false;
            }
            (&mut task).await.is_ok()
        })
        .await
        .unwrap_or(false);

        if !flushed {
            warn!(timeout_ms = %timeout.as_millis(), "mqtt_egress_flush_incomplete");
            task.abort();
        }
        flushed
    }
}

/// Publishes to one topic over a shared MQTT client
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    keyed: bool,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, topic: impl Into<String>, keyed: bool) -> Self {
        Self { client, topic: topic.into(), keyed }
    }

    /// Topic a message with `key` is published to
    pub fn topic_for(&self, key: &str) -> String {
        if self.keyed && !key.is_empty() {
            format!("{}/{}", self.topic, sanitize_level(key))
        } else {
            self.topic.clone()
        }
    }
}

/// MQTT topic levels must not contain wildcards or separators
fn sanitize_level(key: &str) -> String {
    key.chars().map(|c| if matches!(c, '/' | '+' | '#') { '_' } else { c }).collect()
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<(), PublishError> {
        let topic = self.topic_for(key);
        self.client
            .publish_bytes(topic.clone(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PublishError::new(topic, e))
    }

    fn destination(&self) -> &str {
        &self.topic
    }
}

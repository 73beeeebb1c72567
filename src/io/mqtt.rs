//! MQTT client for receiving route events
//!
//! Subscribes to the inbound route topic and hands every payload to the
//! `MessagePool`. Submission waits for an admission permit, so when the pool is
//! saturated this loop stops polling and the broker's flow control takes over.
//! A shutdown signal still ends the loop while it waits for a permit.

use crate::infra::config::Config;
use crate::infra::shutdown::wait_for_shutdown;
use crate::services::message_pool::MessagePool;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Start the MQTT ingress loop. Returns when shutdown is requested.
pub async fn start_mqtt_client(
    config: &Config,
    pool: MessagePool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingress-{}", config.service_name(), std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let topic = config.route_topic().to_string();

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_ingress_starting");

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("mqtt_ingress_shutdown");
                let _ = client.try_disconnect();
                return Ok(());
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, bytes = %publish.payload.len(), "mqtt_message");
                        if pool.submit_or_shutdown(publish.payload, &mut shutdown).await.is_none()
                            && *shutdown.borrow()
                        {
                            info!("mqtt_ingress_shutdown");
                            let _ = client.try_disconnect();
                            return Ok(());
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean sessions drop subscriptions, so subscribe on every connect
                        info!(topic = %topic, "mqtt_ingress_connected");
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            error!(error = %e, topic = %topic, "mqtt_subscribe_failed");
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!(topic = %topic, "mqtt_ingress_subscribed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_ingress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

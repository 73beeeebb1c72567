//! Embedded MQTT broker using rumqttd
//!
//! Only started when `[broker] enabled = true`, so a single binary can run the
//! whole route/freight/simulator loop on a laptop without external services.

use crate::infra::config::Config as AppConfig;
use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Largest accepted MQTT payload. Routes with long direction lists still fit.
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// How long startup waits for the broker listener to accept connections
const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Listener address from `[broker]`
pub fn listen_addr(app_config: &AppConfig) -> anyhow::Result<SocketAddr> {
    let addr = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    addr.parse().with_context(|| format!("Invalid broker bind address {addr}"))
}

/// rumqttd settings for a single v4 listener
pub fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 104857600,
        max_segment_count: 10,
        max_connections: 1024,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_PAYLOAD_SIZE,
                max_inflight_count: 200,
                auth: None,
                // Keyed topics (`freight/<route_id>`) are created on first publish
                dynamic_filters: true,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker if enabled and wait until it accepts connections
///
/// Returns the listener address, or `None` when the broker is disabled.
pub async fn start_embedded_broker(app_config: &AppConfig) -> anyhow::Result<Option<SocketAddr>> {
    if !app_config.broker_enabled() {
        return Ok(None);
    }

    let listen = listen_addr(app_config)?;
    let config = broker_config(listen);

    thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            let mut broker = Broker::new(config);
            // start() blocks for the lifetime of the broker
            if let Err(e) = broker.start() {
                warn!(error = %e, "broker_start_failed");
            }
        })
        .context("Failed to spawn broker thread")?;

    // Clients connecting to 0.0.0.0 need a concrete address
    let target = if listen.ip().is_unspecified() {
        SocketAddr::from(([127, 0, 0, 1], listen.port()))
    } else {
        listen
    };

    let ready = tokio::time::timeout(READY_TIMEOUT, async {
        while TcpStream::connect(target).await.is_err() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    match ready {
        Ok(()) => info!(listen = %listen, "broker_started"),
        Err(_) => warn!(listen = %listen, timeout_ms = %READY_TIMEOUT.as_millis(), "broker_not_ready"),
    }
    Ok(Some(listen))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr_from_config() {
        let config = AppConfig::default();
        assert_eq!(listen_addr(&config).unwrap(), "0.0.0.0:1883".parse().unwrap());
    }

    #[test]
    fn test_broker_config_single_v4_listener() {
        let listen: SocketAddr = "127.0.0.1:18830".parse().unwrap();
        let config = broker_config(listen);

        let servers = config.v4.unwrap();
        assert_eq!(servers.len(), 1);
        let v4 = &servers["v4"];
        assert_eq!(v4.listen, listen);
        assert!(v4.connections.dynamic_filters);
        assert_eq!(v4.connections.max_payload_size, MAX_PAYLOAD_SIZE);
        assert!(config.v5.is_none());
    }

    #[tokio::test]
    async fn test_disabled_broker_is_not_started() {
        let config = AppConfig::default();
        assert!(!config.broker_enabled());
        assert_eq!(start_embedded_broker(&config).await.unwrap(), None);
    }
}

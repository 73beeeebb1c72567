//! Route simulator - route/freight event router and delivery simulator
//!
//! Consumes RouteCreated / DeliveryStarted from the route topic, publishes
//! FreightCalculated and streams paced DriverMoved positions per delivery.
//!
//! Module structure:
//! - `domain/` - Routes, positions and event payloads
//! - `io/` - External interfaces (MQTT ingress/egress, route store, Prometheus)
//! - `services/` - Event router, freight, delivery simulation
//! - `infra/` - Infrastructure (Config, Metrics, Broker, Shutdown)

use anyhow::Context;
use clap::Parser;
use route_simulator::infra::{Config, LogFormat, Metrics, StoreBackend};
use route_simulator::io::{
    connect_egress, FileRouteStore, MemoryRouteStore, MqttPublisher, Publisher, RouteStore,
};
use route_simulator::services::{
    DeliveryLauncher, DeliveryRegistry, DeliverySimulator, EventRouter, MessagePool,
    PositionPublisher, RouteCoordinator,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Time the egress flush always gets, even when the grace period is spent
const EGRESS_FLUSH_MIN: Duration = Duration::from_millis(500);

/// Route simulator - freight pricing and delivery position streaming
#[derive(Parser, Debug)]
#[command(name = "route-simulator", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

fn init_logging(format: LogFormat) {
    // Default: INFO, use RUST_LOG=debug for per-message visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    init_logging(config.log_format());
    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "route-simulator starting");

    route_simulator::infra::broker::start_embedded_broker(&config).await?;

    info!(
        config_file = %config.config_file(),
        service = %config.service_name(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        route_topic = %config.route_topic(),
        freight_topic = %config.freight_topic(),
        simulation_topic = %config.simulation_topic(),
        store = ?config.store_backend(),
        pacing_ms = %config.pacing().as_millis(),
        idle_timeout_ms = %config.idle_timeout().as_millis(),
        max_in_flight = %config.max_in_flight(),
        reject_invalid = %config.reject_invalid(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = route_simulator::infra::shutdown::shutdown_channel();
    let metrics = Arc::new(Metrics::new());

    let store: Arc<dyn RouteStore> = match config.store_backend() {
        StoreBackend::Memory => Arc::new(MemoryRouteStore::new()),
        StoreBackend::File => Arc::new(
            FileRouteStore::open(config.store_path())
                .with_context(|| format!("Failed to open route store {}", config.store_path()))?,
        ),
    };

    // Both outbound channels share one MQTT connection. It outlives the shutdown
    // signal and is closed last, after everything that publishes has stopped.
    let egress = connect_egress(&config);
    let freight: Arc<dyn Publisher> =
        Arc::new(MqttPublisher::new(egress.client(), config.freight_topic(), config.keyed_topics()));
    let simulation: Arc<dyn Publisher> =
        Arc::new(MqttPublisher::new(egress.client(), config.simulation_topic(), config.keyed_topics()));

    let registry = Arc::new(DeliveryRegistry::new());
    let launcher = DeliveryLauncher::new(
        DeliverySimulator::new(config.pacing(), config.delivery_buffer(), metrics.clone()),
        PositionPublisher::new(simulation, config.idle_timeout(), metrics.clone()),
        registry.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    );
    let router = Arc::new(EventRouter::new(
        RouteCoordinator::new(store),
        freight,
        launcher,
        metrics.clone(),
        config.reject_invalid(),
    ));
    let pool = MessagePool::new(router, config.max_in_flight(), metrics.clone());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_registry = registry.clone();
        let prom_service = config.service_name().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = route_simulator::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_registry,
                prom_service,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary in the log
    let report_metrics = metrics.clone();
    let report_registry = registry.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            report_metrics.report(report_registry.len()).log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Runs until shutdown
    if let Err(e) =
        route_simulator::io::mqtt::start_mqtt_client(&config, pool.clone(), shutdown_rx).await
    {
        error!(error = %e, "MQTT ingress error");
    }

    // One grace period covers handlers, deliveries and the final flush
    let grace = config.shutdown_grace();
    let deadline = Instant::now() + grace;

    pool.drain(grace).await;
    let remaining = deadline.saturating_duration_since(Instant::now());
    if !registry.wait_drained(remaining).await {
        warn!(
            active = %registry.len(),
            routes = ?registry.active_routes(),
            grace_ms = %grace.as_millis(),
            "deliveries_still_running_at_shutdown"
        );
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    egress.close(remaining.max(EGRESS_FLUSH_MIN)).await;
    metrics.report(registry.len()).log();
    info!("route-simulator shutdown complete");
    Ok(())
}

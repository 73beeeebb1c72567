//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Instance name, used in MQTT client ids and metric labels
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// How long shutdown waits for in-flight deliveries to finish
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_format: LogFormat::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_service_name() -> String {
    "route-simulator".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Inbound topic carrying RouteCreated / DeliveryStarted
    #[serde(default = "default_route_topic")]
    pub route_topic: String,
    /// Outbound topic for FreightCalculated
    #[serde(default = "default_freight_topic")]
    pub freight_topic: String,
    /// Outbound topic for DriverMoved
    #[serde(default = "default_simulation_topic")]
    pub simulation_topic: String,
    /// Append the route id as a last topic level on outbound publishes
    #[serde(default = "default_keyed_topics")]
    pub keyed_topics: bool,
}

fn default_route_topic() -> String {
    "route".to_string()
}

fn default_freight_topic() -> String {
    "freight".to_string()
}

fn default_simulation_topic() -> String {
    "simulator".to_string()
}

fn default_keyed_topics() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// JSON snapshot file, only used by the file backend
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: StoreBackend::Memory, path: default_store_path() }
    }
}

fn default_store_path() -> String {
    "data/routes.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Delay before each DriverMoved emission
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Publisher loop exits after this long without a position
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Per-delivery channel capacity
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            delivery_buffer: default_delivery_buffer(),
        }
    }
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_idle_timeout_ms() -> u64 {
    1500
}

fn default_delivery_buffer() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    /// Maximum inbound messages being handled at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self { max_in_flight: default_max_in_flight() }
    }
}

fn default_max_in_flight() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValidationConfig {
    /// Reject negative distances, out-of-range coordinates and empty ids
    #[serde(default)]
    pub reject_invalid: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run an embedded broker in-process (development only)
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    service_name: String,
    log_format: LogFormat,
    shutdown_grace_ms: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    route_topic: String,
    freight_topic: String,
    simulation_topic: String,
    keyed_topics: bool,
    store_backend: StoreBackend,
    store_path: String,
    pacing_ms: u64,
    idle_timeout_ms: u64,
    delivery_buffer: usize,
    max_in_flight: usize,
    reject_invalid: bool,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_format: LogFormat::Text,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            route_topic: default_route_topic(),
            freight_topic: default_freight_topic(),
            simulation_topic: default_simulation_topic(),
            keyed_topics: true,
            store_backend: StoreBackend::Memory,
            store_path: default_store_path(),
            pacing_ms: default_pacing_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            delivery_buffer: default_delivery_buffer(),
            max_in_flight: default_max_in_flight(),
            reject_invalid: false,
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
            config_file: "default".to_string(),
            broker_enabled: false,
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_broker_port(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self {
            service_name: toml_config.service.name,
            log_format: toml_config.service.log_format,
            shutdown_grace_ms: toml_config.service.shutdown_grace_ms,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            route_topic: toml_config.mqtt.route_topic,
            freight_topic: toml_config.mqtt.freight_topic,
            simulation_topic: toml_config.mqtt.simulation_topic,
            keyed_topics: toml_config.mqtt.keyed_topics,
            store_backend: toml_config.store.backend,
            store_path: toml_config.store.path,
            pacing_ms: toml_config.simulation.pacing_ms,
            idle_timeout_ms: toml_config.simulation.idle_timeout_ms,
            delivery_buffer: toml_config.simulation.delivery_buffer,
            max_in_flight: toml_config.ingress.max_in_flight,
            reject_invalid: toml_config.validation.reject_invalid,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: path.display().to_string(),
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from a specific path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Cross-field checks the deserializer cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idle_timeout_ms <= self.pacing_ms {
            bail!(
                "simulation.idle_timeout_ms ({}) must be greater than simulation.pacing_ms ({})",
                self.idle_timeout_ms,
                self.pacing_ms
            );
        }
        if self.delivery_buffer == 0 {
            bail!("simulation.delivery_buffer must be at least 1");
        }
        if self.max_in_flight == 0 {
            bail!("ingress.max_in_flight must be at least 1");
        }
        if self.metrics_interval_secs == 0 {
            bail!("metrics.interval_secs must be at least 1");
        }
        Ok(())
    }

    // Getters for all config fields
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn route_topic(&self) -> &str {
        &self.route_topic
    }

    pub fn freight_topic(&self) -> &str {
        &self.freight_topic
    }

    pub fn simulation_topic(&self) -> &str {
        &self.simulation_topic
    }

    pub fn keyed_topics(&self) -> bool {
        self.keyed_topics
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store_backend
    }

    pub fn store_path(&self) -> &str {
        &self.store_path
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn delivery_buffer(&self) -> usize {
        self.delivery_buffer
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn reject_invalid(&self) -> bool {
        self.reject_invalid
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    /// Builder method for tests to shorten simulation timing
    pub fn with_timing(mut self, pacing_ms: u64, idle_timeout_ms: u64) -> Self {
        self.pacing_ms = pacing_ms;
        self.idle_timeout_ms = idle_timeout_ms;
        self
    }
}

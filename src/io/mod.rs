//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT ingress for RouteCreated / DeliveryStarted
//! - `mqtt_egress` - MQTT publishers for freight and simulation topics
//! - `publisher` - Outbound publisher trait and in-memory recorder
//! - `route_store` - Route persistence (memory and JSON file backends)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod publisher;
pub mod route_store;

// Re-export commonly used types
pub use mqtt_egress::{connect_egress, Egress, MqttPublisher};
pub use publisher::{Publisher, RecordingPublisher};
pub use route_store::{FileRouteStore, MemoryRouteStore, RouteStore};

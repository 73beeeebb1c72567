//! Infrastructure - configuration, metrics, broker and shutdown
//!
//! - `config` - Application configuration (TOML loading, defaults, validation)
//! - `metrics` - Lock-free metrics collection
//! - `broker` - Embedded MQTT broker (rumqttd) for local development
//! - `shutdown` - Process-wide shutdown signal

pub mod broker;
pub mod config;
pub mod metrics;
pub mod shutdown;

// Re-export commonly used types
pub use config::{Config, LogFormat, StoreBackend};
pub use metrics::Metrics;

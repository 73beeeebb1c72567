//! Outbound publisher seam
//!
//! The router and delivery loops only see `Publisher`; the MQTT implementation
//! lives in `mqtt_egress`. `RecordingPublisher` keeps everything in memory and is
//! what the unit and integration tests publish to.

use crate::error::PublishError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// One output channel (freight or simulation). Safe to share across tasks.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` with `key` as its routing/partition key
    async fn publish(&self, key: &str, payload: Bytes) -> Result<(), PublishError>;

    /// Destination name, for logs
    fn destination(&self) -> &str;
}

/// A message captured by `RecordingPublisher`
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub key: String,
    pub payload: Bytes,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// In-memory publisher
#[derive(Default)]
pub struct RecordingPublisher {
    name: String,
    messages: Mutex<Vec<Published>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Make subsequent publishes fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Published> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::new(&self.name, "publisher set to fail"));
        }
        self.messages.lock().push(Published { key: key.to_string(), payload });
        Ok(())
    }

    fn destination(&self) -> &str {
        &self.name
    }
}

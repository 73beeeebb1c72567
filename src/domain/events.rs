//! Inbound and outbound event payloads
//!
//! Inbound payloads are decoded in two passes: first the minimal envelope
//! (`{"event": ...}`) to pick the variant, then the full variant from the
//! same bytes once the router knows which handler will take it.

use crate::domain::route::{Position, Route};
use crate::error::RouterError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ROUTE_CREATED: &str = "RouteCreated";
pub const DELIVERY_STARTED: &str = "DeliveryStarted";
pub const FREIGHT_CALCULATED: &str = "FreightCalculated";
pub const DRIVER_MOVED: &str = "DriverMoved";

/// Inbound event discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RouteCreated,
    DeliveryStarted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RouteCreated => ROUTE_CREATED,
            EventKind::DeliveryStarted => DELIVERY_STARTED,
        }
    }
}

impl FromStr for EventKind {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ROUTE_CREATED => Ok(EventKind::RouteCreated),
            DELIVERY_STARTED => Ok(EventKind::DeliveryStarted),
            other => Err(RouterError::UnknownEvent(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
}

/// Minimal decoded form of an inbound event
///
/// Carries the discriminator plus the original bytes, so the full variant can be
/// parsed later without copying the payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    kind: EventKind,
    payload: Bytes,
}

impl Envelope {
    /// Parse only the `event` field of a payload
    ///
    /// Fails with `Decode` when the payload is not a JSON object with a string
    /// `event` field, and with `UnknownEvent` when the discriminator is not one
    /// this service handles.
    pub fn decode(payload: Bytes) -> Result<Self, RouterError> {
        let raw: RawEnvelope = serde_json::from_slice(&payload).map_err(RouterError::Decode)?;
        let kind = raw.event.parse()?;
        Ok(Self { kind, payload })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Re-parse the payload as a concrete variant
    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T, RouterError> {
        serde_json::from_slice(&self.payload).map_err(RouterError::Decode)
    }
}

/// `{ event, id, distance, directions }`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteCreated {
    #[serde(rename = "id")]
    pub route_id: String,
    pub distance: i64,
    #[serde(default)]
    pub directions: Vec<Position>,
}

impl RouteCreated {
    /// Strict checks applied when the service rejects invalid input
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.route_id.is_empty() {
            return Err(RouterError::Invalid("empty route id".to_string()));
        }
        if self.distance < 0 {
            return Err(RouterError::Invalid(format!("negative distance {}", self.distance)));
        }
        if let Some((idx, pos)) = self.directions.iter().enumerate().find(|(_, p)| !p.is_valid()) {
            return Err(RouterError::Invalid(format!("direction {} out of range ({})", idx, pos)));
        }
        Ok(())
    }
}

/// `{ event, route_id }`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryStarted {
    pub route_id: String,
}

impl DeliveryStarted {
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.route_id.is_empty() {
            return Err(RouterError::Invalid("empty route id".to_string()));
        }
        Ok(())
    }
}

/// Published once per successfully processed `RouteCreated`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreightCalculated {
    pub event: &'static str,
    pub route_id: String,
    pub amount: f64,
}

impl FreightCalculated {
    pub fn new(route_id: impl Into<String>, amount: f64) -> Self {
        Self { event: FREIGHT_CALCULATED, route_id: route_id.into(), amount }
    }

    pub fn from_route(route: &Route) -> Self {
        Self::new(route.id.clone(), route.freight_price)
    }
}

/// Published once per waypoint of a started delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverMoved {
    pub event: &'static str,
    pub route_id: String,
    pub lat: f64,
    pub lng: f64,
}

impl DriverMoved {
    pub fn new(route_id: impl Into<String>, position: Position) -> Self {
        Self { event: DRIVER_MOVED, route_id: route_id.into(), lat: position.lat, lng: position.lng }
    }
}

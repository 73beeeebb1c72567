//! Domain models - routes, positions and the event payloads exchanged on the wire
//!
//! - `Route` / `Position` - the persisted route and its ordered waypoints
//! - `Envelope` - minimal decoded form of an inbound event
//! - `RouteCreated` / `DeliveryStarted` - full inbound variants
//! - `FreightCalculated` / `DriverMoved` - outbound payloads

pub mod events;
pub mod route;

// Re-export commonly used types at module level
pub use events::{DeliveryStarted, DriverMoved, Envelope, EventKind, FreightCalculated, RouteCreated};
pub use route::{Position, Route};

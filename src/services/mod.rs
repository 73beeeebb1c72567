//! Services - route/freight logic and the delivery simulation pipeline
//!
//! - `freight` - Freight price formula
//! - `route_coordinator` - Prices, persists and hydrates routes
//! - `simulator` - Paced DriverMoved producer, one task per delivery
//! - `position_publisher` - Drains one delivery channel to the simulation output
//! - `deliveries` - Launches deliveries and tracks the ones in flight
//! - `event_router` - Decodes inbound payloads and dispatches to handlers
//! - `message_pool` - Bounded per-message task pool fed by ingress

pub mod deliveries;
pub mod event_router;
pub mod freight;
pub mod message_pool;
pub mod position_publisher;
pub mod route_coordinator;
pub mod simulator;

// Re-export commonly used types
pub use deliveries::{DeliveryId, DeliveryLauncher, DeliveryRegistry};
pub use event_router::{DispatchOutcome, EventRouter};
pub use message_pool::MessagePool;
pub use position_publisher::PositionPublisher;
pub use route_coordinator::RouteCoordinator;
pub use simulator::DeliverySimulator;

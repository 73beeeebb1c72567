//! Event router - decodes inbound payloads and dispatches them to handlers
//!
//! Stateless per payload:
//! - `RouteCreated` - price + persist the route, publish FreightCalculated
//! - `DeliveryStarted` - hydrate the route, launch a delivery, return at once
//!
//! Errors are returned to the caller untouched; nothing here retries.

use crate::domain::events::{DeliveryStarted, Envelope, EventKind, FreightCalculated, RouteCreated};
use crate::error::{PublishError, RouterError};
use crate::infra::metrics::Metrics;
use crate::io::publisher::Publisher;
use crate::services::deliveries::{DeliveryId, DeliveryLauncher};
use crate::services::route_coordinator::RouteCoordinator;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// What a successfully dispatched payload did
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    FreightPublished { route_id: String, amount: f64 },
    DeliveryLaunched { route_id: String, delivery_id: DeliveryId, waypoints: usize },
}

pub struct EventRouter {
    coordinator: RouteCoordinator,
    freight: Arc<dyn Publisher>,
    deliveries: DeliveryLauncher,
    metrics: Arc<Metrics>,
    reject_invalid: bool,
}

impl EventRouter {
    pub fn new(
        coordinator: RouteCoordinator,
        freight: Arc<dyn Publisher>,
        deliveries: DeliveryLauncher,
        metrics: Arc<Metrics>,
        reject_invalid: bool,
    ) -> Self {
        Self { coordinator, freight, deliveries, metrics, reject_invalid }
    }

    pub fn deliveries(&self) -> &DeliveryLauncher {
        &self.deliveries
    }

    /// Parse the event discriminator only
    pub fn decode(&self, payload: Bytes) -> Result<Envelope, RouterError> {
        Envelope::decode(payload)
    }

    /// Parse the full variant and run its handler
    pub async fn dispatch(&self, envelope: Envelope) -> Result<DispatchOutcome, RouterError> {
        match envelope.kind() {
            EventKind::RouteCreated => {
                let event: RouteCreated = envelope.parse()?;
                if self.reject_invalid {
                    event.validate()?;
                }
                self.handle_route_created(event).await
            }
            EventKind::DeliveryStarted => {
                let event: DeliveryStarted = envelope.parse()?;
                if self.reject_invalid {
                    event.validate()?;
                }
                self.handle_delivery_started(event).await
            }
        }
    }

    /// Decode then dispatch one raw payload
    pub async fn handle(&self, payload: Bytes) -> Result<DispatchOutcome, RouterError> {
        let envelope = self.decode(payload)?;
        debug!(event = %envelope.kind(), "event_decoded");
        self.dispatch(envelope).await
    }

    async fn handle_route_created(&self, event: RouteCreated) -> Result<DispatchOutcome, RouterError> {
        let route = self
            .coordinator
            .create_route(&event.route_id, event.distance, event.directions)
            .await?;

        let freight = FreightCalculated::from_route(&route);
        let payload = serde_json::to_vec(&freight)
            .map_err(|e| PublishError::new(self.freight.destination(), e))?;
        self.freight.publish(&freight.route_id, Bytes::from(payload)).await?;
        self.metrics.record_freight_published();

        info!(route_id = %freight.route_id, amount = %freight.amount, "freight_published");
        Ok(DispatchOutcome::FreightPublished { route_id: freight.route_id, amount: freight.amount })
    }

    async fn handle_delivery_started(
        &self,
        event: DeliveryStarted,
    ) -> Result<DispatchOutcome, RouterError> {
        // A missing route fails here, before anything is spawned
        let route = self.coordinator.get_route(&event.route_id).await?;
        let waypoints = route.waypoints();
        let (delivery_id, _handle) = self.deliveries.launch(route);

        Ok(DispatchOutcome::DeliveryLaunched { route_id: event.route_id, delivery_id, waypoints })
    }
}

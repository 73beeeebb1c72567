//! Route lifecycle: pricing, persistence and hydration

use crate::domain::route::{Position, Route};
use crate::error::StoreError;
use crate::io::route_store::RouteStore;
use crate::services::freight;
use std::sync::Arc;
use tracing::debug;

/// Prices routes and persists them through the store
#[derive(Clone)]
pub struct RouteCoordinator {
    store: Arc<dyn RouteStore>,
}

impl RouteCoordinator {
    pub fn new(store: Arc<dyn RouteStore>) -> Self {
        Self { store }
    }

    /// Price the route and upsert the full record
    ///
    /// The returned route carries the computed `freight_price`. On error nothing
    /// should be published for this route.
    pub async fn create_route(
        &self,
        id: &str,
        distance: i64,
        directions: Vec<Position>,
    ) -> Result<Route, StoreError> {
        let mut route = Route::new(id, distance, directions);
        route.freight_price = freight::calculate(distance);

        let stored = self.store.upsert(route).await?;
        debug!(
            route_id = %stored.id,
            distance = %stored.distance,
            waypoints = %stored.waypoints(),
            freight_price = %stored.freight_price,
            "route_persisted"
        );
        Ok(stored)
    }

    /// Load a route before simulating it
    pub async fn get_route(&self, id: &str) -> Result<Route, StoreError> {
        self.store.get_by_id(id).await
    }
}

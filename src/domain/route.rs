//! Route data model
//!
//! A route is created (or overwritten wholesale) by a `RouteCreated` event and
//! read back when a delivery starts. Its serde shape is the persisted record:
//! `{ _id, distance, directions, freight_price }`.

use serde::{Deserialize, Serialize};

/// A single waypoint on a route, in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True if both coordinates are finite and inside the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Persisted route record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "_id")]
    pub id: String,
    pub distance: i64,
    /// Traversal order is insertion order
    #[serde(default)]
    pub directions: Vec<Position>,
    /// Derived from `distance`, never supplied by the caller
    #[serde(default)]
    pub freight_price: f64,
}

impl Route {
    /// Create an unpriced route. The coordinator fills in `freight_price`.
    pub fn new(id: impl Into<String>, distance: i64, directions: Vec<Position>) -> Self {
        Self { id: id.into(), distance, directions, freight_price: 0.0 }
    }

    /// Number of waypoints, which is also the number of positions a delivery emits
    #[inline]
    pub fn waypoints(&self) -> usize {
        self.directions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_serializes_as_persisted_record() {
        let mut route = Route::new("r1", 100, vec![Position::new(1.0, 2.0)]);
        route.freight_price = 15.3;

        let value = serde_json::to_value(&route).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "_id": "r1",
                "distance": 100,
                "directions": [{"lat": 1.0, "lng": 2.0}],
                "freight_price": 15.3
            })
        );

        let back: Route = serde_json::from_value(value).unwrap();
        assert_eq!(back, route);
    }

    #[test]
    fn test_position_validity() {
        assert!(Position::new(0.0, 0.0).is_valid());
        assert!(Position::new(-90.0, 180.0).is_valid());
        assert!(!Position::new(90.5, 0.0).is_valid());
        assert!(!Position::new(0.0, -181.0).is_valid());
        assert!(!Position::new(f64::NAN, 0.0).is_valid());
    }
}

//! Freight price calculation

/// Price per distance unit
pub const RATE_PER_UNIT: f64 = 0.15;
/// Flat fee added to every route
pub const BASE_FEE: f64 = 0.3;

/// Freight price for a distance, rounded down to two decimal places
///
/// `floor((distance * 0.15 + 0.3) * 100) / 100`. Pure and total; negative
/// distances are priced by the same formula (rejection is the router's call).
#[inline]
pub fn calculate(distance: i64) -> f64 {
    ((distance as f64 * RATE_PER_UNIT + BASE_FEE) * 100.0).floor() / 100.0
}

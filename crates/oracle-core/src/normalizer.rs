//! Price-to-delta normalization

use crate::error::OracleResult;
use crate::models::{FeatureVector, PriceSeries, FEATURE_COUNT};

/// Percentage move mapped onto a feature value of 1.0.
///
/// The network was trained with this scale; changing it requires retraining.
pub const DELTA_SCALE_PCT: f64 = 5.0;

/// Convert a validated price window into clamped percentage deltas
pub fn normalize(prices: &PriceSeries) -> FeatureVector {
    let p = prices.values();
    let mut features = [0.0; FEATURE_COUNT];

    for i in 0..FEATURE_COUNT {
        let pct = (p[i + 1] - p[i]) / p[i] * 100.0;
        features[i] = (pct / DELTA_SCALE_PCT).clamp(-1.0, 1.0);
    }

    FeatureVector::from_clamped(features)
}

/// Validate raw prices and normalize them
pub fn normalize_prices(prices: &[f64]) -> OracleResult<FeatureVector> {
    Ok(normalize(&PriceSeries::new(prices)?))
}

/// Round to 4 decimal places for display
pub fn round_display(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

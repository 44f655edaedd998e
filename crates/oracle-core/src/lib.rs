//! # Oracle Core
//!
//! Deterministic price-direction inference shared by the local fallback and
//! the on-chain program.
//!
//! Pipeline: prices → [`normalizer`] → features → [`network`] → probabilities
//! → [`codec`] → [`PredictionRecord`]. Weights come from [`weights`] and are
//! validated once at load time.

pub mod codec;
pub mod error;
pub mod models;
pub mod network;
pub mod normalizer;
pub mod weights;

pub use codec::*;
pub use error::*;
pub use models::*;
pub use network::{evaluate, Evaluation};
pub use normalizer::{normalize, normalize_prices, round_display, DELTA_SCALE_PCT};
pub use weights::{validate, BundleMetadata, WeightBundle, WeightStore};

/// Validate, normalize and evaluate in one step, entirely in-process
pub fn predict_local(prices: &[f64], weights: &WeightBundle) -> OracleResult<PredictionRecord> {
    let features = normalize_prices(prices)?;
    let evaluation = evaluate(&features, weights);
    Ok(PredictionRecord::new(evaluation.probabilities).with_source(Source::Local))
}

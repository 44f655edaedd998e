//! Data model for the price oracle
//!
//! Every type here is immutable once built. Validation happens in the
//! constructors so that malformed values never reach the network evaluator.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{OracleError, OracleResult};

/// Number of prices in one inference window
pub const PRICE_WINDOW: usize = 5;

/// Number of normalized deltas derived from a price window
pub const FEATURE_COUNT: usize = PRICE_WINDOW - 1;

/// Number of output classes
pub const LABEL_COUNT: usize = 3;

/// Label names in network output order
pub const LABELS: [&str; LABEL_COUNT] = ["UP", "DOWN", "SIDEWAYS"];

// =============================================================================
// Direction
// =============================================================================

/// Predicted short-horizon price direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Sideways,
}

impl Direction {
    pub const ALL: [Direction; LABEL_COUNT] = [Direction::Up, Direction::Down, Direction::Sideways];

    /// Position of this class in the network output and in the on-chain label byte
    pub fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Sideways => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        LABELS[self.index()]
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Five strictly positive prices, oldest first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSeries([f64; PRICE_WINDOW]);

impl PriceSeries {
    /// Validate raw prices.
    ///
    /// The error names the violated constraint: a wrong length, or the index
    /// and value of the first price that is not a finite positive number.
    pub fn new(prices: &[f64]) -> OracleResult<Self> {
        if prices.len() != PRICE_WINDOW {
            return Err(OracleError::InvalidInput(format!(
                "expected exactly {} prices, got {}",
                PRICE_WINDOW,
                prices.len()
            )));
        }

        if let Some((index, price)) = prices
            .iter()
            .enumerate()
            .find(|(_, p)| !(p.is_finite() && **p > 0.0))
        {
            return Err(OracleError::InvalidInput(format!(
                "price at index {} must be a positive number, got {}",
                index, price
            )));
        }

        let mut values = [0.0; PRICE_WINDOW];
        values.copy_from_slice(prices);
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64; PRICE_WINDOW] {
        &self.0
    }
}

/// Four normalized deltas, each in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Build a feature vector from already-normalized values, e.g. decoded
    /// from the on-chain input region.
    pub fn new(values: [f64; FEATURE_COUNT]) -> OracleResult<Self> {
        if let Some((index, value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && (-1.0..=1.0).contains(*v)))
        {
            return Err(OracleError::InvalidInput(format!(
                "feature at index {} must lie in [-1, 1], got {}",
                index, value
            )));
        }
        Ok(Self(values))
    }

    /// Values produced by the normalizer are clamped already.
    pub(crate) fn from_clamped(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Class probabilities in label order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub up: f64,
    pub down: f64,
    pub sideways: f64,
}

impl Probabilities {
    pub fn from_array(values: [f64; LABEL_COUNT]) -> Self {
        Self {
            up: values[0],
            down: values[1],
            sideways: values[2],
        }
    }

    pub fn to_array(&self) -> [f64; LABEL_COUNT] {
        [self.up, self.down, self.sideways]
    }

    pub fn get(&self, direction: Direction) -> f64 {
        self.to_array()[direction.index()]
    }

    /// Most probable class; ties resolve to the lowest label index
    pub fn direction(&self) -> Direction {
        let index = crate::network::argmax(&self.to_array());
        Direction::ALL[index]
    }
}

/// Which path produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Onchain,
    Local,
}

/// The canonical result of one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(alias = "prediction")]
    pub direction: Direction,

    /// Probability of `direction`
    pub confidence: f64,

    pub probabilities: Probabilities,

    /// Epoch seconds
    pub timestamp: i64,

    /// Transaction that executed the inference, when it ran on-chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

impl PredictionRecord {
    /// Build a record stamped with the current time
    pub fn new(probabilities: Probabilities) -> Self {
        Self::at(probabilities, Utc::now().timestamp())
    }

    pub fn at(probabilities: Probabilities, timestamp: i64) -> Self {
        let direction = probabilities.direction();
        Self {
            direction,
            confidence: probabilities.get(direction),
            probabilities,
            timestamp,
            tx_signature: None,
            source: None,
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_tx_signature(mut self, signature: impl Into<String>) -> Self {
        self.tx_signature = Some(signature.into());
        self
    }
}

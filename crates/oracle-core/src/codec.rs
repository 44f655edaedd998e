//! Wire formats for requests and prediction records
//!
//! - Text: JSON records with full-precision probabilities; a rounded variant
//!   exists for display only.
//! - On-chain input region: 4 little-endian `f32` features (16 bytes).
//! - On-chain output region: 1 label byte (0=UP, 1=DOWN, 2=SIDEWAYS) followed
//!   by the up, down and sideways probabilities as little-endian `f32`
//!   (13 bytes). The schema is fixed, so there is no length prefix.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{OracleError, OracleResult};
use crate::models::{
    Direction, FeatureVector, PredictionRecord, PriceSeries, Probabilities, FEATURE_COUNT,
    LABEL_COUNT,
};
use crate::normalizer::round_display;

/// Size of the on-chain input region in bytes
pub const INPUT_REGION_LEN: usize = FEATURE_COUNT * 4;

/// Size of the on-chain output region in bytes
pub const OUTPUT_REGION_LEN: usize = 1 + LABEL_COUNT * 4;

/// Allowed distance from 1.0 for the probability sum of a text record
const RECORD_SUM_TOLERANCE: f64 = 1e-6;

/// Allowed distance from 1.0 for the probability sum of an output region
const REGION_SUM_TOLERANCE: f64 = 1e-5;

// =============================================================================
// Text
// =============================================================================

/// `{"prices": [p0, p1, p2, p3, p4]}`
#[derive(Debug, Deserialize)]
pub struct InferenceRequest {
    pub prices: Vec<f64>,
}

/// Parse a text inference request into a validated price window
pub fn parse_request(text: &str) -> OracleResult<PriceSeries> {
    let request: InferenceRequest = serde_json::from_str(text)
        .map_err(|e| OracleError::InvalidInput(format!("malformed request: {}", e)))?;
    PriceSeries::new(&request.prices)
}

/// Full-precision JSON encoding of a record
pub fn encode_json(record: &PredictionRecord) -> OracleResult<String> {
    Ok(serde_json::to_string(record)?)
}

/// Decode a JSON record; `prediction` is accepted in place of `direction`
pub fn decode_json(text: &str) -> OracleResult<PredictionRecord> {
    let record: PredictionRecord = serde_json::from_str(text)
        .map_err(|e| OracleError::Decode(format!("malformed prediction JSON: {}", e)))?;

    check_distribution(&record.probabilities.to_array(), RECORD_SUM_TOLERANCE)?;

    let expected = record.probabilities.get(record.direction);
    if (record.confidence - expected).abs() > RECORD_SUM_TOLERANCE {
        return Err(OracleError::Decode(format!(
            "confidence {} does not match the {} probability {}",
            record.confidence, record.direction, expected
        )));
    }
    Ok(record)
}

/// Every probability in [0, 1] and the sum within `tolerance` of 1
fn check_distribution(probabilities: &[f64], tolerance: f64) -> OracleResult<()> {
    if !probabilities.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p)) {
        return Err(OracleError::Decode(format!(
            "probabilities out of range: {:?}",
            probabilities
        )));
    }

    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > tolerance {
        return Err(OracleError::Decode(format!(
            "probabilities sum to {}, expected 1",
            sum
        )));
    }
    Ok(())
}

/// Record with probabilities rounded to 4 decimal places, for presentation
pub fn to_display_json(record: &PredictionRecord) -> Value {
    let mut value = json!({
        "direction": record.direction,
        "confidence": round_display(record.confidence),
        "probabilities": {
            "up": round_display(record.probabilities.up),
            "down": round_display(record.probabilities.down),
            "sideways": round_display(record.probabilities.sideways),
        },
        "timestamp": record.timestamp,
    });

    if let Some(signature) = &record.tx_signature {
        value["tx_signature"] = json!(signature);
    }
    if let Some(source) = record.source {
        value["source"] = json!(source);
    }
    value
}

// =============================================================================
// On-chain regions
// =============================================================================

/// Encode features into the VM input region
pub fn encode_input_region(features: &FeatureVector) -> [u8; INPUT_REGION_LEN] {
    let mut out = [0u8; INPUT_REGION_LEN];
    for (chunk, value) in out.chunks_exact_mut(4).zip(features.values()) {
        chunk.copy_from_slice(&(*value as f32).to_le_bytes());
    }
    out
}

/// Decode the VM input region back into features
pub fn decode_input_region(bytes: &[u8]) -> OracleResult<FeatureVector> {
    if bytes.len() != INPUT_REGION_LEN {
        return Err(OracleError::Decode(format!(
            "input region must be {} bytes, got {}",
            INPUT_REGION_LEN,
            bytes.len()
        )));
    }

    let mut values = [0.0; FEATURE_COUNT];
    for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = read_f32(chunk) as f64;
    }
    FeatureVector::new(values).map_err(|e| OracleError::Decode(e.to_string()))
}

/// Fixed-width result as stored in the VM output account
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputRegion {
    pub direction: Direction,
    /// up, down, sideways
    pub probabilities: [f32; LABEL_COUNT],
}

impl OutputRegion {
    /// Narrow a record to the on-chain layout
    pub fn from_record(record: &PredictionRecord) -> Self {
        Self {
            direction: record.direction,
            probabilities: record.probabilities.to_array().map(|p| p as f32),
        }
    }

    pub fn encode(&self) -> [u8; OUTPUT_REGION_LEN] {
        let mut out = [0u8; OUTPUT_REGION_LEN];
        out[0] = self.direction.index() as u8;
        for (chunk, p) in out[1..].chunks_exact_mut(4).zip(self.probabilities.iter()) {
            chunk.copy_from_slice(&p.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> OracleResult<Self> {
        if bytes.len() != OUTPUT_REGION_LEN {
            return Err(OracleError::Decode(format!(
                "output region must be {} bytes, got {}",
                OUTPUT_REGION_LEN,
                bytes.len()
            )));
        }

        let direction = Direction::from_index(bytes[0] as usize)
            .ok_or_else(|| OracleError::Decode(format!("label byte {} out of range", bytes[0])))?;

        let mut probabilities = [0.0f32; LABEL_COUNT];
        for (p, chunk) in probabilities.iter_mut().zip(bytes[1..].chunks_exact(4)) {
            *p = read_f32(chunk);
        }
        check_distribution(&probabilities.map(f64::from), REGION_SUM_TOLERANCE)?;

        Ok(Self {
            direction,
            probabilities,
        })
    }

    /// Expand to a canonical record. The label byte decides the direction.
    pub fn into_record(self, timestamp: i64) -> PredictionRecord {
        let probabilities = Probabilities::from_array(self.probabilities.map(f64::from));
        PredictionRecord {
            direction: self.direction,
            confidence: probabilities.get(self.direction),
            probabilities,
            timestamp,
            tx_signature: None,
            source: None,
        }
    }
}

fn read_f32(chunk: &[u8]) -> f32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(chunk);
    f32::from_le_bytes(buf)
}

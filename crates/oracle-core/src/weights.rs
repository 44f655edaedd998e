//! Weight bundle loading and validation
//!
//! Two source formats decode to the same logical bundle:
//!
//! - JSON as exported by the training script:
//!   `{"model": ..., "version": ..., "architecture": {...},
//!     "weights": {"W1": [[...]], "b1": [...], "W2": [[...]], "b2": [...]},
//!     "labels": ["UP", "DOWN", "SIDEWAYS"]}`
//!   Only `weights` is required.
//! - Packed binary: magic `OWB1`, three little-endian `u32` sizes
//!   (input, hidden, output), then little-endian `f32` values for W1
//!   (row-major), b1, W2 (row-major) and b2.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{OracleError, OracleResult};
use crate::models::{FEATURE_COUNT, LABELS, LABEL_COUNT};

/// Leading bytes of the packed binary format
pub const BINARY_MAGIC: &[u8; 4] = b"OWB1";

/// Upper bound on the hidden width accepted from a binary header
const MAX_HIDDEN_WIDTH: usize = 4096;

// =============================================================================
// Bundle
// =============================================================================

/// Descriptive fields carried by exported bundles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    #[serde(default = "default_activation")]
    pub activation: String,
    #[serde(default = "default_output_activation")]
    pub output_activation: String,
}

fn default_activation() -> String {
    "relu".to_string()
}

fn default_output_activation() -> String {
    "softmax".to_string()
}

/// Trained parameters of the two-layer network.
///
/// A bundle only exists in validated form: every constructor runs
/// [`validate`]. Share it behind an `Arc`; it is never mutated after load.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightBundle {
    /// FEATURE_COUNT rows × H columns
    pub(crate) w1: Vec<Vec<f64>>,
    pub(crate) b1: Vec<f64>,
    /// H rows × LABEL_COUNT columns
    pub(crate) w2: Vec<Vec<f64>>,
    pub(crate) b2: Vec<f64>,
    pub(crate) metadata: BundleMetadata,
}

#[derive(Debug, Deserialize, Serialize)]
struct BundleFile {
    #[serde(flatten)]
    metadata: BundleMetadata,
    weights: RawWeights,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawWeights {
    #[serde(rename = "W1")]
    w1: Vec<Vec<f64>>,
    b1: Vec<f64>,
    #[serde(rename = "W2")]
    w2: Vec<Vec<f64>>,
    b2: Vec<f64>,
}

impl WeightBundle {
    pub fn new(
        w1: Vec<Vec<f64>>,
        b1: Vec<f64>,
        w2: Vec<Vec<f64>>,
        b2: Vec<f64>,
    ) -> OracleResult<Self> {
        let bundle = Self {
            w1,
            b1,
            w2,
            b2,
            metadata: BundleMetadata::default(),
        };
        validate(&bundle)?;
        Ok(bundle)
    }

    /// Decode the JSON export format
    pub fn from_json(text: &str) -> OracleResult<Self> {
        let file: BundleFile = serde_json::from_str(text)
            .map_err(|e| OracleError::CorruptWeights(format!("invalid weight JSON: {}", e)))?;

        let bundle = Self {
            w1: file.weights.w1,
            b1: file.weights.b1,
            w2: file.weights.w2,
            b2: file.weights.b2,
            metadata: file.metadata,
        };
        validate(&bundle)?;
        Ok(bundle)
    }

    /// Encode to the JSON export format
    pub fn to_json(&self) -> OracleResult<String> {
        let file = BundleFile {
            metadata: self.metadata.clone(),
            weights: RawWeights {
                w1: self.w1.clone(),
                b1: self.b1.clone(),
                w2: self.w2.clone(),
                b2: self.b2.clone(),
            },
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Decode the packed binary format
    pub fn from_binary(bytes: &[u8]) -> OracleResult<Self> {
        let mut reader = Reader::new(bytes);

        if reader.take(BINARY_MAGIC.len())? != BINARY_MAGIC {
            return Err(OracleError::CorruptWeights(
                "missing binary weight header".to_string(),
            ));
        }

        let input = reader.u32()? as usize;
        let hidden = reader.u32()? as usize;
        let output = reader.u32()? as usize;

        if input != FEATURE_COUNT {
            return Err(OracleError::shape("binary header input size", FEATURE_COUNT, input));
        }
        if output != LABEL_COUNT {
            return Err(OracleError::shape("binary header output size", LABEL_COUNT, output));
        }
        if hidden == 0 || hidden > MAX_HIDDEN_WIDTH {
            return Err(OracleError::CorruptWeights(format!(
                "hidden width {} outside 1..={}",
                hidden, MAX_HIDDEN_WIDTH
            )));
        }

        let expected = (input * hidden + hidden + hidden * output + output) * 4;
        if reader.remaining() != expected {
            return Err(OracleError::CorruptWeights(format!(
                "expected {} bytes of parameters, found {}",
                expected,
                reader.remaining()
            )));
        }

        let w1 = reader.matrix(input, hidden)?;
        let b1 = reader.vector(hidden)?;
        let w2 = reader.matrix(hidden, output)?;
        let b2 = reader.vector(output)?;

        Self::new(w1, b1, w2, b2)
    }

    /// Encode to the packed binary format. Values are narrowed to `f32`.
    pub fn to_binary(&self) -> Vec<u8> {
        let hidden = self.hidden_width();
        let params = FEATURE_COUNT * hidden + hidden + hidden * LABEL_COUNT + LABEL_COUNT;
        let mut out = Vec::with_capacity(BINARY_MAGIC.len() + 12 + params * 4);

        out.extend_from_slice(BINARY_MAGIC);
        for size in [FEATURE_COUNT, hidden, LABEL_COUNT] {
            out.extend_from_slice(&(size as u32).to_le_bytes());
        }

        let values = self
            .w1
            .iter()
            .flatten()
            .chain(self.b1.iter())
            .chain(self.w2.iter().flatten())
            .chain(self.b2.iter());
        for v in values {
            out.extend_from_slice(&(*v as f32).to_le_bytes());
        }
        out
    }

    /// Load a bundle from disk, detecting the format from the content
    pub fn load(path: impl AsRef<Path>) -> OracleResult<Self> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OracleError::WeightsNotFound(path.display().to_string()));
            }
            Err(e) => return Err(OracleError::Io(e)),
        };

        if bytes.starts_with(BINARY_MAGIC) {
            return Self::from_binary(&bytes);
        }

        let text = std::str::from_utf8(&bytes).map_err(|_| {
            OracleError::CorruptWeights(format!(
                "{} is neither a binary bundle nor UTF-8 JSON",
                path.display()
            ))
        })?;
        Self::from_json(text)
    }

    /// Number of hidden units, as read from the bundle
    pub fn hidden_width(&self) -> usize {
        self.b1.len()
    }

    pub fn metadata(&self) -> &BundleMetadata {
        &self.metadata
    }

    pub fn w1(&self) -> &[Vec<f64>] {
        &self.w1
    }

    pub fn b1(&self) -> &[f64] {
        &self.b1
    }

    pub fn w2(&self) -> &[Vec<f64>] {
        &self.w2
    }

    pub fn b2(&self) -> &[f64] {
        &self.b2
    }
}

/// Check every shape invariant of a bundle, plus its metadata when present
pub fn validate(bundle: &WeightBundle) -> OracleResult<()> {
    let hidden = bundle.b1.len();
    if hidden == 0 {
        return Err(OracleError::CorruptWeights("b1 is empty".to_string()));
    }

    if bundle.w1.len() != FEATURE_COUNT {
        return Err(OracleError::shape("W1 rows", FEATURE_COUNT, bundle.w1.len()));
    }
    for (i, row) in bundle.w1.iter().enumerate() {
        if row.len() != hidden {
            return Err(OracleError::shape(format!("W1 row {} columns", i), hidden, row.len()));
        }
    }

    if bundle.w2.len() != hidden {
        return Err(OracleError::shape("W2 rows", hidden, bundle.w2.len()));
    }
    for (j, row) in bundle.w2.iter().enumerate() {
        if row.len() != LABEL_COUNT {
            return Err(OracleError::shape(format!("W2 row {} columns", j), LABEL_COUNT, row.len()));
        }
    }

    if bundle.b2.len() != LABEL_COUNT {
        return Err(OracleError::shape("b2 length", LABEL_COUNT, bundle.b2.len()));
    }

    let all_finite = bundle
        .w1
        .iter()
        .flatten()
        .chain(bundle.b1.iter())
        .chain(bundle.w2.iter().flatten())
        .chain(bundle.b2.iter())
        .all(|v| v.is_finite());
    if !all_finite {
        return Err(OracleError::CorruptWeights(
            "weights contain non-finite values".to_string(),
        ));
    }

    validate_metadata(&bundle.metadata, hidden)
}

fn validate_metadata(metadata: &BundleMetadata, hidden: usize) -> OracleResult<()> {
    if let Some(arch) = &metadata.architecture {
        if arch.input_size != FEATURE_COUNT {
            return Err(OracleError::shape("architecture.input_size", FEATURE_COUNT, arch.input_size));
        }
        if arch.hidden_size != hidden {
            return Err(OracleError::shape("architecture.hidden_size", hidden, arch.hidden_size));
        }
        if arch.output_size != LABEL_COUNT {
            return Err(OracleError::shape("architecture.output_size", LABEL_COUNT, arch.output_size));
        }
        if arch.activation != "relu" || arch.output_activation != "softmax" {
            return Err(OracleError::CorruptWeights(format!(
                "unsupported activations {}/{}, expected relu/softmax",
                arch.activation, arch.output_activation
            )));
        }
    }

    if let Some(labels) = &metadata.labels {
        if labels.iter().map(String::as_str).ne(LABELS.iter().copied()) {
            return Err(OracleError::CorruptWeights(format!(
                "labels must be {:?}, got {:?}",
                LABELS, labels
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Store
// =============================================================================

/// Holder for the process-wide weights.
///
/// There are no built-in weights: until a bundle is loaded every request for
/// it fails with [`OracleError::WeightsNotLoaded`].
#[derive(Debug, Clone, Default)]
pub enum WeightStore {
    #[default]
    Empty,
    Loaded(Arc<WeightBundle>),
}

impl WeightStore {
    /// Load and validate a bundle from disk
    pub fn load(path: impl AsRef<Path>) -> OracleResult<Self> {
        Ok(WeightStore::Loaded(Arc::new(WeightBundle::load(path)?)))
    }

    pub fn install(&mut self, bundle: WeightBundle) {
        *self = WeightStore::Loaded(Arc::new(bundle));
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, WeightStore::Loaded(_))
    }

    /// Shared read-only handle to the loaded bundle
    pub fn bundle(&self) -> OracleResult<Arc<WeightBundle>> {
        match self {
            WeightStore::Loaded(bundle) => Ok(Arc::clone(bundle)),
            WeightStore::Empty => Err(OracleError::WeightsNotLoaded),
        }
    }
}

// =============================================================================
// Binary reader
// =============================================================================

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> OracleResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(OracleError::CorruptWeights(format!(
                "truncated binary bundle at byte {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> OracleResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn f32(&mut self) -> OracleResult<f64> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(f32::from_le_bytes(buf) as f64)
    }

    fn vector(&mut self, len: usize) -> OracleResult<Vec<f64>> {
        (0..len).map(|_| self.f32()).collect()
    }

    fn matrix(&mut self, rows: usize, cols: usize) -> OracleResult<Vec<Vec<f64>>> {
        (0..rows).map(|_| self.vector(cols)).collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// All-zero parameters of the given hidden width
    pub fn zero_bundle(hidden: usize) -> WeightBundle {
        WeightBundle::new(
            vec![vec![0.0; hidden]; FEATURE_COUNT],
            vec![0.0; hidden],
            vec![vec![0.0; LABEL_COUNT]; hidden],
            vec![0.0; LABEL_COUNT],
        )
        .unwrap()
    }

    /// Two hidden units: one fires on rising prices, one on falling prices.
    /// A small sideways bias wins when the features are all zero.
    pub fn trend_bundle() -> WeightBundle {
        WeightBundle::new(
            vec![vec![1.0, -1.0]; FEATURE_COUNT],
            vec![0.0, 0.0],
            vec![vec![3.0, -3.0, 0.0], vec![-3.0, 3.0, 0.0]],
            vec![0.0, 0.0, 0.5],
        )
        .unwrap()
    }
}

//! Feed-forward network evaluation
//!
//! Architecture: features → dense(H) → ReLU → dense(3) → softmax.
//!
//! The on-chain program evaluates the same network, so every accumulation runs
//! in a fixed order: start from the bias, then add terms with the input index
//! ascending. Do not replace these loops with iterator reductions or a linear
//! algebra library; a different summation order changes rounding.

use serde::Serialize;

use crate::models::{FeatureVector, Probabilities, LABEL_COUNT};
use crate::weights::WeightBundle;

/// Output of one forward pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub probabilities: Probabilities,
    /// Output-layer values before softmax
    pub raw_scores: [f64; LABEL_COUNT],
}

/// Run the network on a feature vector.
///
/// The bundle's shapes were checked when it was loaded, so this cannot fail.
pub fn evaluate(features: &FeatureVector, weights: &WeightBundle) -> Evaluation {
    let x = features.values();
    let hidden_width = weights.hidden_width();

    let mut hidden = vec![0.0; hidden_width];
    for (j, unit) in hidden.iter_mut().enumerate() {
        let mut z = weights.b1[j];
        for (i, xi) in x.iter().enumerate() {
            z += xi * weights.w1[i][j];
        }
        *unit = relu(z);
    }

    let mut raw_scores = [0.0; LABEL_COUNT];
    for (k, score) in raw_scores.iter_mut().enumerate() {
        let mut z = weights.b2[k];
        for (j, a) in hidden.iter().enumerate() {
            z += a * weights.w2[j][k];
        }
        *score = z;
    }

    Evaluation {
        probabilities: Probabilities::from_array(softmax(&raw_scores)),
        raw_scores,
    }
}

/// Rectified linear unit; negative inputs become exactly zero
pub fn relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// Numerically stable softmax: shift by the maximum before exponentiating
pub fn softmax(scores: &[f64; LABEL_COUNT]) -> [f64; LABEL_COUNT] {
    let mut max = scores[0];
    for &s in &scores[1..] {
        if s > max {
            max = s;
        }
    }

    let mut exps = [0.0; LABEL_COUNT];
    let mut sum = 0.0;
    for (e, &s) in exps.iter_mut().zip(scores.iter()) {
        *e = (s - max).exp();
        sum += *e;
    }

    for e in exps.iter_mut() {
        *e /= sum;
    }
    exps
}

/// Index of the largest value; the first one wins on ties
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

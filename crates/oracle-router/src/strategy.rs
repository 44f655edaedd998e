//! Execution strategies
//!
//! The router runs each inference through exactly one strategy: the remote
//! VM strategy when it is available, or the in-process one.

use std::future::Future;
use std::sync::Arc;

use oracle_core::{evaluate, Direction, FeatureVector, Probabilities, WeightBundle};

use crate::error::StrategyError;

/// Result of running the network through a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub direction: Direction,
    pub probabilities: Probabilities,
    /// Transaction that carried the execution, if any
    pub tx_signature: Option<String>,
}

pub trait ExecutionStrategy {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        features: &FeatureVector,
    ) -> impl Future<Output = Result<Execution, StrategyError>> + Send;
}

/// A strategy backed by infrastructure that may be absent
pub trait RemoteStrategy: ExecutionStrategy {
    /// One availability check; no retries
    fn probe(&self) -> impl Future<Output = bool> + Send;
}

/// Pure in-process evaluation against the loaded bundle
#[derive(Debug, Clone)]
pub struct LocalStrategy {
    weights: Arc<WeightBundle>,
}

impl LocalStrategy {
    pub fn new(weights: Arc<WeightBundle>) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &Arc<WeightBundle> {
        &self.weights
    }
}

impl ExecutionStrategy for LocalStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, features: &FeatureVector) -> Result<Execution, StrategyError> {
        let probabilities = evaluate(features, &self.weights).probabilities;
        Ok(Execution {
            direction: probabilities.direction(),
            probabilities,
            tx_signature: None,
        })
    }
}

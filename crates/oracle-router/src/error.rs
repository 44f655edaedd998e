//! Error types for the invocation router

use std::fmt;

use oracle_core::OracleError;
use thiserror::Error;

/// Step of the on-chain protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InputWrite,
    Invoke,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::InputWrite => "input-write",
            Stage::Invoke => "invoke",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Failure of a single execution strategy
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("{stage} failed: {detail}")]
    Failed {
        stage: Stage,
        detail: String,
        /// Whether on-chain state had already been mutated when it failed
        committed: bool,
    },
}

impl StrategyError {
    pub fn before_commit(stage: Stage, detail: impl Into<String>) -> Self {
        StrategyError::Failed {
            stage,
            detail: detail.into(),
            committed: false,
        }
    }

    pub fn after_commit(stage: Stage, detail: impl Into<String>) -> Self {
        StrategyError::Failed {
            stage,
            detail: detail.into(),
            committed: true,
        }
    }

    /// Falling back to the local path is only safe if nothing was committed
    pub fn is_committed(&self) -> bool {
        matches!(self, StrategyError::Failed { committed: true, .. })
    }
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("On-chain execution failed at {stage} after state was committed: {detail}")]
    OnChainExecution { stage: Stage, detail: String },

    #[error("On-chain execution required but unavailable: {0}")]
    OnChainUnavailable(String),

    #[error("Local execution failed: {0}")]
    Local(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RouterError {
    pub fn is_input_error(&self) -> bool {
        matches!(self, RouterError::Oracle(e) if e.is_input_error())
    }

    pub fn is_configuration_error(&self) -> bool {
        match self {
            RouterError::Oracle(e) => e.is_configuration_error(),
            RouterError::Config(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

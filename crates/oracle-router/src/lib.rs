//! # Oracle Router
//!
//! Runs price-direction inference either inside the on-chain VM or locally,
//! and returns the same [`oracle_core::PredictionRecord`] either way.
//!
//! - [`strategy`]: the execution strategy seam and the local strategy
//! - [`vm`]: the VM strategy driven through its command-line tool
//! - [`router`]: probe, route, fall back
//! - [`config`]: layered configuration

pub mod config;
pub mod error;
pub mod router;
pub mod strategy;
pub mod vm;

pub use crate::config::{AppConfig, RouterMode};
pub use crate::error::{Result, RouterError, Stage, StrategyError};
pub use crate::router::{InvocationRouter, Route};
pub use crate::strategy::{Execution, ExecutionStrategy, LocalStrategy, RemoteStrategy};
pub use crate::vm::VmStrategy;

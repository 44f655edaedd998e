//! Invocation router
//!
//! Each call goes through one of two paths and ends in one record:
//!
//! ```text
//! Probe ──available──▶ OnChain ──ok──────────────────────▶ Completed
//!   │                     ├─failed, nothing committed──▶ Local ─▶ Completed
//!   │                     └─failed after commit────────▶ OnChainExecution error
//!   └──unavailable──────▶ Local ─────────────────────────▶ Completed
//! ```
//!
//! There is exactly one probe and one on-chain attempt per call.

use std::sync::Arc;

use chrono::Utc;
use oracle_core::{
    normalize_prices, FeatureVector, PredictionRecord, Source, WeightBundle, WeightStore,
};

use crate::config::RouterMode;
use crate::error::{Result, RouterError, StrategyError};
use crate::strategy::{Execution, ExecutionStrategy, LocalStrategy, RemoteStrategy};

/// Path chosen for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    OnChain,
    Local,
}

pub struct InvocationRouter<R> {
    local: LocalStrategy,
    remote: Option<R>,
    mode: RouterMode,
}

impl<R: RemoteStrategy + Sync> InvocationRouter<R> {
    pub fn new(weights: Arc<WeightBundle>, remote: Option<R>, mode: RouterMode) -> Self {
        Self {
            local: LocalStrategy::new(weights),
            remote,
            mode,
        }
    }

    /// Build from a weight store; fails if no bundle has been loaded
    pub fn from_store(store: &WeightStore, remote: Option<R>, mode: RouterMode) -> Result<Self> {
        Ok(Self::new(store.bundle()?, remote, mode))
    }

    pub fn mode(&self) -> RouterMode {
        self.mode
    }

    /// Validate and normalize raw prices, then route the features.
    ///
    /// Invalid prices are rejected here, before any strategy runs.
    pub async fn predict_prices(&self, prices: &[f64]) -> Result<PredictionRecord> {
        let features = normalize_prices(prices)?;
        self.predict(&features).await
    }

    pub async fn predict(&self, features: &FeatureVector) -> Result<PredictionRecord> {
        let Some(remote) = self.select().await? else {
            return self.run_local(features).await;
        };

        match remote.execute(features).await {
            Ok(execution) => {
                tracing::info!(
                    direction = %execution.direction,
                    tx_signature = execution.tx_signature.as_deref().unwrap_or(""),
                    "On-chain inference completed"
                );
                Ok(into_record(execution, Source::Onchain))
            }
            Err(StrategyError::Failed {
                stage,
                detail,
                committed: true,
            }) => {
                tracing::error!(%stage, %detail, "On-chain execution failed after commit");
                Err(RouterError::OnChainExecution { stage, detail })
            }
            Err(e) if self.mode == RouterMode::Onchain => {
                Err(RouterError::OnChainUnavailable(e.to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "On-chain execution failed before commit, falling back to local");
                self.run_local(features).await
            }
        }
    }

    /// Probe step: decide which path this call takes
    pub async fn route(&self) -> Result<Route> {
        Ok(match self.select().await? {
            Some(_) => Route::OnChain,
            None => Route::Local,
        })
    }

    async fn select(&self) -> Result<Option<&R>> {
        if self.mode == RouterMode::Local {
            return Ok(None);
        }

        let remote = match &self.remote {
            Some(remote) => remote,
            None if self.mode == RouterMode::Onchain => {
                return Err(RouterError::OnChainUnavailable(
                    "no on-chain strategy configured".to_string(),
                ));
            }
            None => return Ok(None),
        };

        if remote.probe().await {
            return Ok(Some(remote));
        }

        if self.mode == RouterMode::Onchain {
            return Err(RouterError::OnChainUnavailable(format!(
                "{} strategy failed its availability probe",
                remote.name()
            )));
        }

        tracing::warn!(strategy = remote.name(), "On-chain execution unavailable, using local evaluation");
        Ok(None)
    }

    async fn run_local(&self, features: &FeatureVector) -> Result<PredictionRecord> {
        let execution = self
            .local
            .execute(features)
            .await
            .map_err(|e| RouterError::Local(e.to_string()))?;

        tracing::debug!(direction = %execution.direction, "Local inference completed");
        Ok(into_record(execution, Source::Local))
    }
}

fn into_record(execution: Execution, source: Source) -> PredictionRecord {
    PredictionRecord {
        direction: execution.direction,
        confidence: execution.probabilities.get(execution.direction),
        probabilities: execution.probabilities,
        timestamp: Utc::now().timestamp(),
        tx_signature: execution.tx_signature,
        source: Some(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use oracle_core::{evaluate, Direction, OutputRegion};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TREND_WEIGHTS: &str = r#"{
        "model": "price-predictor",
        "weights": {
            "W1": [[1.0, -1.0], [1.0, -1.0], [1.0, -1.0], [1.0, -1.0]],
            "b1": [0.0, 0.0],
            "W2": [[3.0, -3.0, 0.0], [-3.0, 3.0, 0.0]],
            "b2": [0.0, 0.0, 0.5]
        }
    }"#;

    const UPTREND: [f64; 5] = [100.0, 101.0, 103.0, 105.0, 108.0];

    fn weights() -> Arc<WeightBundle> {
        Arc::new(WeightBundle::from_json(TREND_WEIGHTS).unwrap())
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        /// Evaluate the same network and pass the result through the output region
        Mirror,
        FailBeforeCommit,
        FailAfterCommit,
    }

    struct FakeVm {
        available: bool,
        outcome: Outcome,
        weights: Arc<WeightBundle>,
        probes: AtomicUsize,
        executions: AtomicUsize,
    }

    impl FakeVm {
        fn new(available: bool, outcome: Outcome) -> Self {
            Self {
                available,
                outcome,
                weights: weights(),
                probes: AtomicUsize::new(0),
                executions: AtomicUsize::new(0),
            }
        }
    }

    impl ExecutionStrategy for FakeVm {
        fn name(&self) -> &'static str {
            "fake-vm"
        }

        async fn execute(
            &self,
            features: &FeatureVector,
        ) -> std::result::Result<Execution, StrategyError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Mirror => {
                    let probabilities = evaluate(features, &self.weights).probabilities;
                    let record = PredictionRecord::at(probabilities, 0);
                    let bytes = OutputRegion::from_record(&record).encode();
                    let region = OutputRegion::decode(&bytes).unwrap().into_record(0);
                    Ok(Execution {
                        direction: region.direction,
                        probabilities: region.probabilities,
                        tx_signature: Some("fake-signature".to_string()),
                    })
                }
                Outcome::FailBeforeCommit => Err(StrategyError::before_commit(
                    Stage::InputWrite,
                    "connection refused",
                )),
                Outcome::FailAfterCommit => {
                    Err(StrategyError::after_commit(Stage::Invoke, "rpc timeout"))
                }
            }
        }
    }

    impl RemoteStrategy for FakeVm {
        async fn probe(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.available
        }
    }

    fn router(vm: FakeVm, mode: RouterMode) -> InvocationRouter<FakeVm> {
        InvocationRouter::new(weights(), Some(vm), mode)
    }

    #[tokio::test]
    async fn test_unavailable_vm_falls_back_to_local() {
        let router = router(FakeVm::new(false, Outcome::Mirror), RouterMode::Auto);
        let record = router.predict_prices(&UPTREND).await.unwrap();

        assert_eq!(record.direction, Direction::Up);
        assert_eq!(record.source, Some(Source::Local));
        assert!(record.tx_signature.is_none());

        let vm = router.remote.as_ref().unwrap();
        assert_eq!(vm.probes.load(Ordering::SeqCst), 1);
        assert_eq!(vm.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_available_vm_runs_on_chain() {
        let router = router(FakeVm::new(true, Outcome::Mirror), RouterMode::Auto);
        let record = router.predict_prices(&UPTREND).await.unwrap();

        assert_eq!(record.source, Some(Source::Onchain));
        assert_eq!(record.tx_signature.as_deref(), Some("fake-signature"));
        assert_eq!(record.confidence, record.probabilities.up);
    }

    #[tokio::test]
    async fn test_on_chain_and_local_paths_agree() {
        let onchain = router(FakeVm::new(true, Outcome::Mirror), RouterMode::Auto);
        let local = router(FakeVm::new(true, Outcome::Mirror), RouterMode::Local);

        for prices in [
            UPTREND,
            [108.0, 105.0, 103.0, 101.0, 100.0],
            [100.0; 5],
            [100.0, 100.4, 99.8, 100.1, 100.3],
        ] {
            let a = onchain.predict_prices(&prices).await.unwrap();
            let b = local.predict_prices(&prices).await.unwrap();
            assert_eq!(a.direction, b.direction);
            for (pa, pb) in a.probabilities.to_array().iter().zip(b.probabilities.to_array()) {
                assert!((pa - pb).abs() < 1e-6);
            }
        }
    }

    #[tokio::test]
    async fn test_failure_before_commit_falls_back() {
        let router = router(FakeVm::new(true, Outcome::FailBeforeCommit), RouterMode::Auto);
        let record = router.predict_prices(&UPTREND).await.unwrap();
        assert_eq!(record.source, Some(Source::Local));
        assert_eq!(router.remote.as_ref().unwrap().executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_after_commit_is_surfaced() {
        let router = router(FakeVm::new(true, Outcome::FailAfterCommit), RouterMode::Auto);
        let err = router.predict_prices(&UPTREND).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::OnChainExecution { stage: Stage::Invoke, .. }
        ));
        assert!(!err.is_input_error());
    }

    #[tokio::test]
    async fn test_invalid_prices_never_reach_a_strategy() {
        let router = router(FakeVm::new(true, Outcome::Mirror), RouterMode::Auto);
        for prices in [&[100.0; 4][..], &[100.0; 6][..], &[100.0, 0.0, 100.0, 100.0, 100.0][..]] {
            let err = router.predict_prices(prices).await.unwrap_err();
            assert!(err.is_input_error());
        }
        let vm = router.remote.as_ref().unwrap();
        assert_eq!(vm.probes.load(Ordering::SeqCst), 0);
        assert_eq!(vm.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_mode_skips_probe() {
        let router = router(FakeVm::new(true, Outcome::Mirror), RouterMode::Local);
        assert_eq!(router.route().await.unwrap(), Route::Local);
        assert_eq!(router.remote.as_ref().unwrap().probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_onchain_mode_refuses_fallback() {
        let router = router(FakeVm::new(false, Outcome::Mirror), RouterMode::Onchain);
        let err = router.predict_prices(&UPTREND).await.unwrap_err();
        assert!(matches!(err, RouterError::OnChainUnavailable(_)));

        let router = router_without_vm(RouterMode::Onchain);
        assert!(router.route().await.is_err());
    }

    fn router_without_vm(mode: RouterMode) -> InvocationRouter<FakeVm> {
        InvocationRouter::new(weights(), None, mode)
    }

    #[tokio::test]
    async fn test_flat_prices_follow_bias() {
        let router = router_without_vm(RouterMode::Auto);
        let record = router.predict_prices(&[100.0; 5]).await.unwrap();
        assert_eq!(record.direction, Direction::Sideways);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_weights() {
        let router = Arc::new(router_without_vm(RouterMode::Auto));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    let step = 1.0 + i as f64 * 0.5;
                    let prices = [100.0, 100.0 + step, 100.0 + 2.0 * step, 100.0 + 3.0 * step, 100.0 + 4.0 * step];
                    router.predict_prices(&prices).await
                })
            })
            .collect();

        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert_eq!(record.direction, Direction::Up);
        }
    }

    #[test]
    fn test_router_requires_loaded_weights() {
        let result = InvocationRouter::<FakeVm>::from_store(&WeightStore::Empty, None, RouterMode::Auto);
        assert!(matches!(result, Err(ref e) if e.is_configuration_error()));
    }
}

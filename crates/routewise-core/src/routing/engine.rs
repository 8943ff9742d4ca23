//! Routing engine - ties prediction, selection, circuit breaking and tracking together
//!
//! The engine owns one instance of each stateful component. A request flows
//! through the circuit breaker filter, the predictor and the optimizer; the
//! outcome of the call is then fed back into all of them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::optimizer::RoutingOptimizer;
use super::predictor::PerformancePredictor;
use super::types::{Candidate, ExecutionOutcome, Prediction, RouteRequest, RoutingDecision};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, EngineConfig};
use crate::error::{Error, Result};
use crate::tracker::BusinessValueTracker;

/// Performs the actual call to a selected candidate
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute the request against the candidate
    ///
    /// Returning `Err` is treated the same as a failed outcome.
    async fn execute(&self, candidate: &Candidate, request: &RouteRequest)
    -> Result<ExecutionOutcome>;
}

/// Result of routing a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSelection {
    /// Identifier for correlating the selection with its outcome
    pub request_id: String,
    pub decision: RoutingDecision,
    /// Predictions for every candidate that passed the circuit filter
    pub predictions: Vec<Prediction>,
}

/// Result of a dispatched request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub request_id: String,
    /// Candidate that served the request
    pub candidate: Candidate,
    pub outcome: ExecutionOutcome,
    /// Number of candidates tried, including the successful one
    pub attempts: u32,
    pub failed_over: bool,
}

/// Adaptive routing engine
///
/// All operations take `&self`; share the engine between tasks with `Arc`.
#[derive(Debug)]
pub struct RoutingEngine {
    config: EngineConfig,
    sla_threshold_ms: f64,
    predictor: PerformancePredictor,
    optimizer: RoutingOptimizer,
    circuit_breaker: CircuitBreaker,
    tracker: BusinessValueTracker,
    clock: Arc<dyn Clock>,
    outcomes_recorded: AtomicU64,
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingEngine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        RoutingEngineBuilder::new().build()
    }

    /// Create an engine from a loaded configuration
    pub fn with_config(config: Config) -> Self {
        RoutingEngineBuilder::new().config(config).build()
    }

    /// Select a candidate for a request
    ///
    /// Candidates with an open circuit are skipped, and a half-open trial is
    /// claimed only for the candidate returned. Fails only when no candidate
    /// is left to choose from.
    pub fn route(&self, candidates: &[Candidate], request: &RouteRequest) -> Result<RouteSelection> {
        let mut available = self.circuit_breaker.filter_available(candidates);
        let exploration = self.config.exploration_enabled && request.exploration_enabled;

        loop {
            if available.is_empty() {
                warn!(
                    task_type = %request.task_type,
                    offered = candidates.len(),
                    "No candidates available after circuit filter"
                );
                return Err(Error::NoCandidatesAvailable(request.task_type.clone()));
            }

            let predictions = self
                .predictor
                .predict_performance(&available, &request.features);
            let decision =
                self.optimizer
                    .select_optimal_model(&predictions, &request.task_type, exploration)?;

            // another caller may have taken a single trial since filtering
            if self.circuit_breaker.is_open(&decision.candidate) {
                debug!(
                    candidate = %decision.candidate,
                    "Selected candidate blocked, routing again"
                );
                available.retain(|c| *c != decision.candidate);
                continue;
            }

            let request_id = uuid::Uuid::new_v4().to_string();
            debug!(
                request_id = %request_id,
                task_type = %request.task_type,
                candidate = %decision.candidate,
                score = decision.score,
                is_exploration = decision.is_exploration,
                "Routed request"
            );

            return Ok(RouteSelection {
                request_id,
                decision,
                predictions,
            });
        }
    }

    /// Feed the outcome of a call back into every component
    pub fn record_outcome(
        &self,
        candidate: &Candidate,
        request: &RouteRequest,
        outcome: &ExecutionOutcome,
    ) {
        let latency_ms = outcome.latency_ms as f64;

        self.predictor
            .update_model_stats(candidate, latency_ms, outcome.success, outcome.cost_usd);
        self.predictor
            .record_feature_result(request.features.clone(), *outcome);

        self.optimizer.update_from_result(
            candidate,
            &request.task_type,
            outcome.success,
            latency_ms,
            outcome.cost_usd,
        );

        if outcome.success {
            self.circuit_breaker.record_success(candidate);
        } else {
            self.circuit_breaker.record_failure(candidate);
        }

        self.tracker.track_request_success(outcome.success);
        self.tracker.track_response_time(latency_ms);
        self.tracker
            .update_sla_compliance(latency_ms, self.sla_threshold_ms);
        if outcome.success {
            self.tracker
                .track_cost_savings(&request.task_type, candidate, outcome.cost_usd);
        }

        let recorded = self.outcomes_recorded.fetch_add(1, Ordering::Relaxed) + 1;
        let interval = self.config.exploration_adjust_interval;
        if interval > 0 && recorded % interval == 0 {
            self.optimizer.adjust_exploration_rate();
            debug!(
                recorded,
                exploration_rate = self.optimizer.exploration_rate(),
                "Adjusted exploration rate"
            );
        }
    }

    /// Route, execute and record a request, failing over on errors
    ///
    /// A failed attempt excludes its candidate and routes again among the
    /// rest, up to `max_failover_attempts` extra tries.
    pub async fn dispatch(
        &self,
        executor: &dyn Executor,
        candidates: &[Candidate],
        request: &RouteRequest,
    ) -> Result<Dispatch> {
        let mut remaining = candidates.to_vec();
        let mut attempts: u32 = 0;
        let mut last_error = String::from("no attempt made");

        loop {
            let selection = match self.route(&remaining, request) {
                Ok(selection) => selection,
                Err(err) if attempts == 0 => return Err(err),
                Err(_) => break,
            };
            attempts += 1;
            let failed_over = attempts > 1;
            let candidate = selection.decision.candidate;

            let started = self.clock.now_millis();
            let outcome = match executor.execute(&candidate, request).await {
                Ok(outcome) => {
                    last_error = format!("{} reported failure", candidate);
                    outcome
                }
                Err(err) => {
                    last_error = format!("{}: {}", candidate, err);
                    let elapsed = (self.clock.now_millis() - started).max(0) as u64;
                    ExecutionOutcome::failure(elapsed)
                }
            };

            self.record_outcome(&candidate, request, &outcome);
            if failed_over {
                self.tracker.track_failover_success(outcome.success);
            }

            if outcome.success {
                if failed_over {
                    info!(
                        request_id = %selection.request_id,
                        candidate = %candidate,
                        attempts,
                        "Request served after failover"
                    );
                }
                return Ok(Dispatch {
                    request_id: selection.request_id,
                    candidate,
                    outcome,
                    attempts,
                    failed_over,
                });
            }

            warn!(
                request_id = %selection.request_id,
                candidate = %candidate,
                attempt = attempts,
                error = %last_error,
                "Execution failed"
            );

            remaining.retain(|c| *c != candidate);
            if attempts > self.config.max_failover_attempts || remaining.is_empty() {
                break;
            }
        }

        Err(Error::ExecutionFailed(format!(
            "{} attempt(s) for task type '{}' failed, last: {}",
            attempts, request.task_type, last_error
        )))
    }

    /// Recompute the exploration rate from the total sample count
    pub fn adjust_exploration_rate(&self) {
        self.optimizer.adjust_exploration_rate();
    }

    /// Run a predictor training pass, returning the number of examples
    pub fn train_predictor(&self) -> usize {
        self.predictor.train()
    }

    /// Number of outcomes recorded so far
    pub fn outcomes_recorded(&self) -> u64 {
        self.outcomes_recorded.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn predictor(&self) -> &PerformancePredictor {
        &self.predictor
    }

    pub fn optimizer(&self) -> &RoutingOptimizer {
        &self.optimizer
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn tracker(&self) -> &BusinessValueTracker {
        &self.tracker
    }
}

/// Builder for RoutingEngine
pub struct RoutingEngineBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    seed: Option<u64>,
}

impl Default for RoutingEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingEngineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            clock: None,
            seed: None,
        }
    }

    /// Set configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the time source for stats and circuit timing
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed the exploration random source
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the engine
    pub fn build(self) -> RoutingEngine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        RoutingEngine {
            config: self.config.engine,
            sla_threshold_ms: self.config.tracker.sla_threshold_ms,
            predictor: PerformancePredictor::with_clock(clock.clone()),
            optimizer: RoutingOptimizer::with_config(&self.config.optimizer, self.seed),
            circuit_breaker: CircuitBreaker::with_clock(self.config.circuit_breaker, clock.clone()),
            tracker: BusinessValueTracker::new(),
            clock,
            outcomes_recorded: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::routing::RequestFeatures;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Executor with a fixed behaviour per candidate
    #[derive(Default)]
    struct ScriptedExecutor {
        outcomes: HashMap<Candidate, Option<ExecutionOutcome>>,
        calls: Mutex<Vec<Candidate>>,
    }

    impl ScriptedExecutor {
        fn with(mut self, candidate: &Candidate, outcome: Option<ExecutionOutcome>) -> Self {
            self.outcomes.insert(candidate.clone(), outcome);
            self
        }

        fn calls(&self) -> Vec<Candidate> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(
            &self,
            candidate: &Candidate,
            _request: &RouteRequest,
        ) -> Result<ExecutionOutcome> {
            self.calls.lock().unwrap().push(candidate.clone());
            match self.outcomes.get(candidate) {
                Some(Some(outcome)) => Ok(*outcome),
                _ => Err(Error::ExecutionFailed(format!("{} unreachable", candidate))),
            }
        }
    }

    fn engine() -> RoutingEngine {
        RoutingEngineBuilder::new()
            .clock(Arc::new(ManualClock::new(0)))
            .seed(7)
            .build()
    }

    fn exploit(task_type: &str) -> RouteRequest {
        RouteRequest::new(task_type)
            .with_features(RequestFeatures::new(200, 0.3, 3))
            .with_exploration(false)
    }

    #[test]
    fn test_route_without_history_keeps_input_order() {
        let engine = engine();
        let candidates = vec![Candidate::new("a", "m1"), Candidate::new("b", "m2")];

        let selection = engine.route(&candidates, &exploit("chat")).unwrap();

        assert_eq!(selection.decision.candidate, candidates[0]);
        assert_eq!(selection.decision.alternatives, vec![candidates[1].clone()]);
        assert_eq!(selection.predictions.len(), 2);
        assert!(!selection.request_id.is_empty());
    }

    #[test]
    fn test_route_with_no_candidates_fails() {
        let engine = engine();
        let err = engine.route(&[], &exploit("chat")).unwrap_err();
        assert!(matches!(err, Error::NoCandidatesAvailable(t) if t == "chat"));
    }

    #[test]
    fn test_route_skips_open_circuits() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        let b = Candidate::new("b", "m2");
        for _ in 0..5 {
            engine.record_outcome(&a, &exploit("chat"), &ExecutionOutcome::failure(100));
        }

        let selection = engine.route(&[a.clone(), b.clone()], &exploit("chat")).unwrap();
        assert_eq!(selection.decision.candidate, b);

        let err = engine.route(&[a], &exploit("chat")).unwrap_err();
        assert!(matches!(err, Error::NoCandidatesAvailable(_)));
    }

    #[test]
    fn test_single_trial_kept_for_unselected_candidate() {
        let clock = Arc::new(ManualClock::new(0));
        let mut config = Config::default();
        config.circuit_breaker.single_trial = true;
        let engine = RoutingEngineBuilder::new()
            .config(config)
            .clock(clock.clone())
            .seed(7)
            .build();
        let a = Candidate::new("a", "m1");
        let b = Candidate::new("b", "m2");
        for _ in 0..5 {
            engine.record_outcome(&a, &exploit("chat"), &ExecutionOutcome::failure(100));
            engine.record_outcome(&b, &exploit("chat"), &ExecutionOutcome::success(100, 0.001));
        }
        clock.advance(std::time::Duration::from_secs(31));

        let selection = engine.route(&[a.clone(), b.clone()], &exploit("chat")).unwrap();
        assert_eq!(selection.decision.candidate, b);
        assert!(engine.circuit_breaker().is_available(&a));

        let trial = engine.route(std::slice::from_ref(&a), &exploit("chat")).unwrap();
        assert_eq!(trial.decision.candidate, a);

        let err = engine.route(std::slice::from_ref(&a), &exploit("chat")).unwrap_err();
        assert!(matches!(err, Error::NoCandidatesAvailable(_)));
    }

    #[test]
    fn test_route_keeps_duplicate_alternatives() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        let b = Candidate::new("b", "m2");

        let selection = engine
            .route(&[a.clone(), b.clone(), b.clone()], &exploit("chat"))
            .unwrap();

        assert_eq!(selection.decision.candidate, a);
        assert_eq!(selection.decision.alternatives, vec![b.clone(), b]);
    }

    #[test]
    fn test_learned_candidate_preferred() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        let b = Candidate::new("b", "m2");
        for _ in 0..50 {
            engine.record_outcome(&a, &exploit("code"), &ExecutionOutcome::success(200, 0.001));
        }

        let selection = engine.route(&[b, a.clone()], &exploit("code")).unwrap();
        assert_eq!(selection.decision.candidate, a);
    }

    #[test]
    fn test_record_outcome_feeds_every_component() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        let request = exploit("chat");

        engine.record_outcome(&a, &request, &ExecutionOutcome::success(300, 0.004));
        engine.record_outcome(&a, &request, &ExecutionOutcome::success(300, 0.002));

        let stats = engine.predictor().model_stats(&a).unwrap();
        assert_eq!(stats.success_count, 2);
        assert_eq!(engine.predictor().feature_history_len(), 2);
        assert_eq!(engine.optimizer().reward_history(&a, "chat").len(), 2);
        assert!(engine.optimizer().weighted_score(&a, "chat") > 0.5);
        assert_eq!(engine.circuit_breaker().status()[&a].failure_count, 0);

        let metrics = engine.tracker().metrics();
        assert!((metrics.average_response_time_ms - 300.0).abs() < 1e-9);
        assert!((metrics.total_cost_savings - 0.002).abs() < 1e-12);
        assert_eq!(engine.outcomes_recorded(), 2);
    }

    #[test]
    fn test_failed_outcome_skips_cost_savings() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        engine.record_outcome(&a, &exploit("chat"), &ExecutionOutcome::failure(100));

        assert_eq!(engine.tracker().cost_baseline("chat"), None);
        assert_eq!(engine.tracker().metrics().success_rate, 0.0);
    }

    #[test]
    fn test_exploration_rate_adjusts_on_interval() {
        let mut config = Config::default();
        config.engine.exploration_adjust_interval = 2;
        let engine = RoutingEngineBuilder::new().config(config).seed(1).build();
        let a = Candidate::new("a", "m1");

        engine.record_outcome(&a, &exploit("chat"), &ExecutionOutcome::success(100, 0.0));
        assert_eq!(engine.optimizer().exploration_rate(), 0.2);

        engine.record_outcome(&a, &exploit("chat"), &ExecutionOutcome::success(100, 0.0));
        let expected = 0.3 - (2.0 / 10_000.0) * 0.25;
        assert!((engine.optimizer().exploration_rate() - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_dispatch_success_first_try() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        let executor =
            ScriptedExecutor::default().with(&a, Some(ExecutionOutcome::success(150, 0.001)));

        let dispatch = engine
            .dispatch(&executor, std::slice::from_ref(&a), &exploit("chat"))
            .await
            .unwrap();

        assert_eq!(dispatch.candidate, a);
        assert_eq!(dispatch.attempts, 1);
        assert!(!dispatch.failed_over);
        assert_eq!(engine.tracker().metrics().failover_success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_dispatch_fails_over_to_next_candidate() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        let b = Candidate::new("b", "m2");
        let executor = ScriptedExecutor::default()
            .with(&a, None)
            .with(&b, Some(ExecutionOutcome::success(150, 0.001)));

        let dispatch = engine
            .dispatch(&executor, &[a.clone(), b.clone()], &exploit("chat"))
            .await
            .unwrap();

        assert_eq!(dispatch.candidate, b);
        assert_eq!(dispatch.attempts, 2);
        assert!(dispatch.failed_over);
        assert_eq!(executor.calls(), vec![a.clone(), b]);
        assert_eq!(engine.circuit_breaker().status()[&a].failure_count, 1);
        assert!((engine.tracker().metrics().failover_success_rate - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_dispatch_gives_up_after_max_attempts() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        let b = Candidate::new("b", "m2");
        let c = Candidate::new("c", "m3");
        let executor = ScriptedExecutor::default()
            .with(&a, Some(ExecutionOutcome::failure(900)))
            .with(&b, None);

        let err = engine
            .dispatch(&executor, &[a, b, c], &exploit("chat"))
            .await
            .unwrap_err();

        // first attempt plus one failover
        assert!(matches!(err, Error::ExecutionFailed(_)));
        assert_eq!(executor.calls().len(), 2);
        assert_eq!(engine.tracker().metrics().failover_success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_dispatch_with_all_circuits_open() {
        let engine = engine();
        let a = Candidate::new("a", "m1");
        for _ in 0..5 {
            engine.circuit_breaker().record_failure(&a);
        }
        let executor = ScriptedExecutor::default();

        let err = engine
            .dispatch(&executor, std::slice::from_ref(&a), &exploit("chat"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoCandidatesAvailable(_)));
        assert!(executor.calls().is_empty());
    }
}

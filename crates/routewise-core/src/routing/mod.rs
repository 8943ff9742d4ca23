//! Adaptive model routing
//!
//! This module picks a `(provider, model)` candidate for each request and
//! learns from the outcome. The key components are:
//!
//! - **Performance Predictor**: Estimates latency, cost and reliability per
//!   candidate from a bounded window of observed calls.
//!
//! - **Routing Optimizer**: Epsilon-greedy selection over a blend of learned
//!   per-task-type scores and fresh predictions.
//!
//! - **Circuit Breaker**: Keeps repeatedly failing candidates out of
//!   selection until a reset window has passed.
//!
//! - **Routing Engine**: Runs the filter, predict, select, execute, record
//!   loop and fails over to the next candidate when a call fails.
//!
//! ## How It Works
//!
//! 1. Candidates with an open circuit are filtered out
//! 2. The predictor scores the rest using the request's features
//! 3. The optimizer explores at random or picks the best composite score
//! 4. The outcome updates predictor stats, learned scores, circuits and
//!    business metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use routewise_core::routing::{Candidate, ExecutionOutcome, RouteRequest, RoutingEngine};
//!
//! let engine = RoutingEngine::new();
//! let candidates = vec![
//!     Candidate::new("anthropic", "claude-3-5-haiku"),
//!     Candidate::new("openai", "gpt-4o-mini"),
//! ];
//!
//! let request = RouteRequest::new("summarize");
//! let selection = engine.route(&candidates, &request)?;
//!
//! // Call the selected backend...
//! let outcome = ExecutionOutcome::success(420, 0.0012);
//!
//! engine.record_outcome(&selection.decision.candidate, &request, &outcome);
//! ```

mod circuit_breaker;
mod engine;
mod optimizer;
mod predictor;
mod types;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPhase, CircuitStatus, MAX_RESET_TIMEOUT_MS,
};
pub use engine::{Dispatch, Executor, RouteSelection, RoutingEngine, RoutingEngineBuilder};
pub use optimizer::{OptimizerConfig, RoutingOptimizer};
pub use predictor::{FeatureRecord, PerformancePredictor};
pub use types::{
    COST_CEILING_USD, Candidate, ExecutionOutcome, LATENCY_CEILING_MS, LATENCY_WINDOW, ModelStats,
    Prediction, RequestFeatures, RouteRequest, RoutingDecision, RoutingReason, ScoreKey,
    compute_reward, cost_factor, latency_factor,
};

//! Types shared by the predictor, optimizer, circuit breaker and engine
//!
//! Candidates are plain values identified by `(provider, model)`. Keys that
//! combine a candidate with a task type are explicit structs so identifiers
//! containing `:` can never collide.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Latency at or beyond which the latency factor bottoms out at zero
pub const LATENCY_CEILING_MS: f64 = 5000.0;

/// Cost at or beyond which the cost factor bottoms out at zero
pub const COST_CEILING_USD: f64 = 0.1;

/// Maximum latency samples kept per candidate
pub const LATENCY_WINDOW: usize = 100;

/// A `(provider, model)` pair eligible for selection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Candidate {
    /// Provider identifier (e.g., "anthropic")
    pub provider: String,
    /// Model identifier (e.g., "claude-3-5-haiku")
    pub model: String,
}

impl Candidate {
    /// Create a new candidate
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl std::str::FromStr for Candidate {
    type Err = Error;

    /// Parse `provider:model`, splitting on the first `:`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(Error::InvalidInput(format!(
                "expected provider:model, got: {}",
                s
            ))),
        }
    }
}

/// Key for per-task learned state in the optimizer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScoreKey {
    pub candidate: Candidate,
    pub task_type: String,
}

impl ScoreKey {
    pub fn new(candidate: &Candidate, task_type: &str) -> Self {
        Self {
            candidate: candidate.clone(),
            task_type: task_type.to_string(),
        }
    }
}

/// Request features used to adjust latency predictions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestFeatures {
    /// Prompt length in characters
    pub prompt_length: usize,
    /// Complexity score (0.0 to 1.0)
    pub complexity: f64,
    /// Hour of day the request arrived (0-23)
    pub hour_of_day: u32,
}

impl Default for RequestFeatures {
    fn default() -> Self {
        Self {
            prompt_length: 0,
            complexity: 0.0,
            hour_of_day: 0,
        }
    }
}

impl RequestFeatures {
    /// Create features from raw values
    pub fn new(prompt_length: usize, complexity: f64, hour_of_day: u32) -> Self {
        Self {
            prompt_length,
            complexity,
            hour_of_day,
        }
    }

    /// Features stamped with the current local hour
    pub fn at_current_hour(prompt_length: usize, complexity: f64) -> Self {
        use chrono::Timelike;
        Self::new(prompt_length, complexity, chrono::Local::now().hour())
    }

    /// Whether the request falls in business hours (9-17 inclusive)
    pub fn is_business_hours(&self) -> bool {
        (9..=17).contains(&self.hour_of_day)
    }

    /// Reject values the predictor cannot reason about
    pub fn validate(&self) -> Result<()> {
        if !self.complexity.is_finite() {
            return Err(Error::PredictionError(format!(
                "complexity must be finite, got {}",
                self.complexity
            )));
        }
        if self.hour_of_day > 23 {
            return Err(Error::PredictionError(format!(
                "hour_of_day must be 0-23, got {}",
                self.hour_of_day
            )));
        }
        Ok(())
    }
}

/// A single routing request as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Task classification used to key learned scores
    pub task_type: String,
    /// Features for latency prediction
    pub features: RequestFeatures,
    /// Whether epsilon-greedy exploration may be used
    pub exploration_enabled: bool,
}

impl RouteRequest {
    /// Create a new request with default features and exploration on
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            features: RequestFeatures::default(),
            exploration_enabled: true,
        }
    }

    /// Set request features
    pub fn with_features(mut self, features: RequestFeatures) -> Self {
        self.features = features;
        self
    }

    /// Enable or disable exploration
    pub fn with_exploration(mut self, enabled: bool) -> Self {
        self.exploration_enabled = enabled;
        self
    }
}

/// Predicted performance of a candidate for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub candidate: Candidate,
    pub predicted_latency_ms: f64,
    pub predicted_cost_usd: f64,
    pub predicted_reliability: f64,
    /// How much history backs this prediction (0.0 to 1.0)
    pub confidence: f64,
}

impl Prediction {
    /// Conservative prediction used when there is no usable history
    pub fn fallback(candidate: Candidate) -> Self {
        Self {
            candidate,
            predicted_latency_ms: 1000.0,
            predicted_cost_usd: 0.01,
            predicted_reliability: 0.95,
            confidence: 0.1,
        }
    }

    /// Confidence-weighted desirability of this prediction
    pub fn predicted_score(&self) -> f64 {
        let latency_score = latency_factor(self.predicted_latency_ms);
        let cost_score = cost_factor(self.predicted_cost_usd);
        self.confidence
            * (0.4 * self.predicted_reliability + 0.3 * latency_score + 0.3 * cost_score)
    }
}

/// Latency normalised to 0-1, lower latency scores higher
pub fn latency_factor(latency_ms: f64) -> f64 {
    (1.0 - latency_ms / LATENCY_CEILING_MS).max(0.0)
}

/// Cost normalised to 0-1, cheaper scores higher
pub fn cost_factor(cost_usd: f64) -> f64 {
    (1.0 - cost_usd / COST_CEILING_USD).max(0.0)
}

/// Reward for a single outcome (0.0 to 1.0)
///
/// Reward combines:
/// - Success (60% weight)
/// - Latency (20% weight)
/// - Cost (20% weight)
pub fn compute_reward(success: bool, latency_ms: f64, cost_usd: f64) -> f64 {
    let success_factor = if success { 1.0 } else { 0.0 };
    0.6 * success_factor + 0.2 * latency_factor(latency_ms) + 0.2 * cost_factor(cost_usd)
}

/// Completed result of a backend call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub latency_ms: u64,
    pub cost_usd: f64,
}

impl ExecutionOutcome {
    /// A successful call
    pub fn success(latency_ms: u64, cost_usd: f64) -> Self {
        Self {
            success: true,
            latency_ms,
            cost_usd,
        }
    }

    /// A failed call; also used for cancelled or timed-out requests
    pub fn failure(latency_ms: u64) -> Self {
        Self {
            success: false,
            latency_ms,
            cost_usd: 0.0,
        }
    }

    /// Reward value for this outcome
    pub fn reward(&self) -> f64 {
        compute_reward(self.success, self.latency_ms as f64, self.cost_usd)
    }
}

/// Per-candidate performance statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStats {
    pub candidate: Candidate,
    /// Most recent latency samples, oldest first
    pub latency_samples: VecDeque<f64>,
    pub success_count: u64,
    pub failure_count: u64,
    pub error_rate: f64,
    pub reliability: f64,
    /// Running mean cost over all attempts
    pub average_cost_usd: f64,
    pub last_updated_ms: i64,
}

impl ModelStats {
    /// Create empty stats
    pub fn new(candidate: Candidate, now_ms: i64) -> Self {
        Self {
            candidate,
            latency_samples: VecDeque::with_capacity(LATENCY_WINDOW + 1),
            success_count: 0,
            failure_count: 0,
            error_rate: 0.0,
            reliability: 1.0,
            average_cost_usd: 0.0,
            last_updated_ms: now_ms,
        }
    }

    /// Fold a new observation into the stats
    pub fn update(&mut self, latency_ms: f64, success: bool, cost_usd: f64, now_ms: i64) {
        self.latency_samples.push_back(latency_ms);
        if self.latency_samples.len() > LATENCY_WINDOW {
            self.latency_samples.pop_front();
        }

        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }

        let n = self.total_requests() as f64;
        self.error_rate = self.failure_count as f64 / n;
        self.reliability = 1.0 - self.error_rate;

        // n counts failed attempts too, so they pull the average toward their cost
        self.average_cost_usd = (self.average_cost_usd * (n - 1.0) + cost_usd) / n;
        self.last_updated_ms = now_ms;
    }

    /// Total attempts observed
    pub fn total_requests(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Mean of the most recent `window` latency samples
    pub fn recent_average_latency(&self, window: usize) -> Option<f64> {
        let take = window.min(self.latency_samples.len());
        if take == 0 {
            return None;
        }
        let sum: f64 = self.latency_samples.iter().rev().take(take).sum();
        Some(sum / take as f64)
    }
}

/// Result of a selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Selected candidate
    pub candidate: Candidate,
    /// Composite score of the selected candidate (0.0 when not scored)
    pub score: f64,
    /// Reason for selection
    pub reason: RoutingReason,
    /// Other candidates that were considered
    pub alternatives: Vec<Candidate>,
    /// Whether this was an exploration (vs exploitation) choice
    pub is_exploration: bool,
}

impl RoutingDecision {
    /// Create a new routing decision
    pub fn new(candidate: Candidate, score: f64, reason: RoutingReason) -> Self {
        Self {
            candidate,
            score,
            reason,
            alternatives: Vec::new(),
            is_exploration: false,
        }
    }

    /// Add alternative candidates
    pub fn with_alternatives(mut self, alternatives: Vec<Candidate>) -> Self {
        self.alternatives = alternatives;
        self
    }

    /// Mark as exploration choice
    pub fn as_exploration(mut self) -> Self {
        self.is_exploration = true;
        self
    }
}

/// Reason for a routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingReason {
    /// Only one candidate was offered
    SingleCandidate,
    /// Highest composite of learned and predicted score
    Performance { score: f64 },
    /// Uniform random pick to gather data
    Exploration { epsilon: f64 },
    /// Scoring failed; picked the most reliable prediction
    ReliabilityFallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_display_and_parse() {
        let candidate = Candidate::new("openai", "gpt-4o");
        assert_eq!(candidate.to_string(), "openai:gpt-4o");

        let parsed: Candidate = "local:llama:70b".parse().unwrap();
        assert_eq!(parsed.provider, "local");
        assert_eq!(parsed.model, "llama:70b");

        let err = "no-separator".parse::<Candidate>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.code(), "E800");
        assert!(":model".parse::<Candidate>().is_err());
    }

    #[test]
    fn test_score_key_does_not_collide_on_separator() {
        let a = ScoreKey::new(&Candidate::new("a:b", "c"), "t");
        let b = ScoreKey::new(&Candidate::new("a", "b:c"), "t");
        assert_ne!(a, b);
    }

    #[test]
    fn test_features_validation() {
        assert!(RequestFeatures::new(10, 0.5, 12).validate().is_ok());
        assert!(RequestFeatures::new(10, f64::NAN, 12).validate().is_err());
        assert!(RequestFeatures::new(10, 0.5, 24).validate().is_err());
    }

    #[test]
    fn test_business_hours_bounds() {
        assert!(!RequestFeatures::new(0, 0.0, 8).is_business_hours());
        assert!(RequestFeatures::new(0, 0.0, 9).is_business_hours());
        assert!(RequestFeatures::new(0, 0.0, 17).is_business_hours());
        assert!(!RequestFeatures::new(0, 0.0, 18).is_business_hours());
    }

    #[test]
    fn test_compute_reward_bounds() {
        assert!((compute_reward(true, 0.0, 0.0) - 1.0).abs() < 1e-12);
        assert_eq!(compute_reward(false, 10_000.0, 5.0), 0.0);
        // 0.6 + 0.2 * 0.5 + 0.2 * 0.5
        assert!((compute_reward(true, 2500.0, 0.05) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_fallback_prediction_score() {
        let prediction = Prediction::fallback(Candidate::new("p", "m"));
        // 0.1 * (0.4 * 0.95 + 0.3 * 0.8 + 0.3 * 0.9)
        assert!((prediction.predicted_score() - 0.089).abs() < 1e-9);
    }

    #[test]
    fn test_model_stats_update() {
        let mut stats = ModelStats::new(Candidate::new("p", "m"), 0);
        stats.update(200.0, true, 0.002, 10);
        stats.update(400.0, false, 0.0, 20);

        assert_eq!(stats.total_requests(), 2);
        assert!((stats.error_rate - 0.5).abs() < 1e-12);
        assert!((stats.reliability - 0.5).abs() < 1e-12);
        assert!((stats.average_cost_usd - 0.001).abs() < 1e-12);
        assert_eq!(stats.last_updated_ms, 20);
        assert_eq!(stats.recent_average_latency(20), Some(300.0));
    }

    #[test]
    fn test_model_stats_window_is_bounded() {
        let mut stats = ModelStats::new(Candidate::new("p", "m"), 0);
        for i in 0..150 {
            stats.update(i as f64, true, 0.0, i);
        }
        assert_eq!(stats.latency_samples.len(), LATENCY_WINDOW);
        assert_eq!(stats.latency_samples.front().copied(), Some(50.0));
        assert_eq!(stats.latency_samples.back().copied(), Some(149.0));
    }
}

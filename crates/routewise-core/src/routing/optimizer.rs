//! Epsilon-greedy routing optimizer
//!
//! Each `(candidate, task_type)` key carries a weighted score that starts at
//! 0.5 and moves toward observed rewards by exponential smoothing:
//!
//! ```text
//! score <- score + learning_rate * (reward - score)
//! ```
//!
//! Selection blends that learned score with a fresh prediction:
//!
//! ```text
//! composite = 0.7 * weighted_score + 0.3 * predicted_score
//! ```
//!
//! With probability epsilon the optimizer instead picks uniformly at random.
//! Epsilon shrinks as reward samples accumulate, bottoming out at 0.05.

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use tracing::{debug, error};

use super::types::{Candidate, Prediction, RoutingDecision, RoutingReason, ScoreKey, compute_reward};
use crate::error::{Error, Result};

/// Weighted score for keys with no recorded outcome
const DEFAULT_WEIGHTED_SCORE: f64 = 0.5;

/// Rewards retained per key
const MAX_REWARD_HISTORY: usize = 100;

/// Share of the composite score taken by the learned score
const HISTORY_WEIGHT: f64 = 0.7;

/// Share of the composite score taken by the prediction
const PREDICTION_WEIGHT: f64 = 0.3;

/// Exploration rate never drops below this
const MIN_EXPLORATION_RATE: f64 = 0.05;

/// Optimizer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Exploration rate before the first adjustment
    pub initial_exploration_rate: f64,
    /// Smoothing factor for weighted score updates
    pub learning_rate: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            initial_exploration_rate: 0.2,
            learning_rate: 0.1,
        }
    }
}

#[derive(Debug)]
struct LearnedState {
    rewards: HashMap<ScoreKey, VecDeque<f64>>,
    scores: HashMap<ScoreKey, f64>,
    exploration_rate: f64,
}

/// Selects candidates and learns from their outcomes
#[derive(Debug)]
pub struct RoutingOptimizer {
    state: RwLock<LearnedState>,
    learning_rate: f64,
    rng: Mutex<StdRng>,
}

impl Default for RoutingOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingOptimizer {
    /// Create an optimizer with default parameters
    pub fn new() -> Self {
        Self::build(OptimizerConfig::default(), StdRng::from_entropy())
    }

    /// Create an optimizer with a fixed seed (for reproducibility in tests)
    pub fn with_seed(seed: u64) -> Self {
        Self::build(OptimizerConfig::default(), StdRng::seed_from_u64(seed))
    }

    /// Create an optimizer from config, seeded if a seed is given
    pub fn with_config(config: &OptimizerConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::build(config.clone(), rng)
    }

    fn build(config: OptimizerConfig, rng: StdRng) -> Self {
        Self {
            state: RwLock::new(LearnedState {
                rewards: HashMap::new(),
                scores: HashMap::new(),
                exploration_rate: config.initial_exploration_rate.clamp(0.0, 1.0),
            }),
            learning_rate: config.learning_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    /// Select a candidate from scored predictions
    ///
    /// Fails only when `predictions` is empty.
    pub fn select_optimal_model(
        &self,
        predictions: &[Prediction],
        task_type: &str,
        exploration_enabled: bool,
    ) -> Result<RoutingDecision> {
        if predictions.is_empty() {
            return Err(Error::NoCandidatesAvailable(task_type.to_string()));
        }

        if predictions.len() == 1 {
            return Ok(RoutingDecision::new(
                predictions[0].candidate.clone(),
                0.0,
                RoutingReason::SingleCandidate,
            ));
        }

        if exploration_enabled {
            let epsilon = self.exploration_rate();
            if let Some(index) = self.draw_exploration(epsilon, predictions.len()) {
                debug!(
                    task_type,
                    candidate = %predictions[index].candidate,
                    epsilon,
                    "Exploring random candidate"
                );
                return Ok(decision_at(
                    predictions,
                    index,
                    0.0,
                    RoutingReason::Exploration { epsilon },
                )
                .as_exploration());
            }
        }

        match self.best_composite(predictions, task_type) {
            Ok((index, score)) => {
                debug!(
                    task_type,
                    candidate = %predictions[index].candidate,
                    score,
                    "Selected candidate by composite score"
                );
                Ok(decision_at(
                    predictions,
                    index,
                    score,
                    RoutingReason::Performance { score },
                ))
            }
            Err(err) => {
                let index = most_reliable(predictions);
                error!(
                    error = %err,
                    task_type,
                    candidate = %predictions[index].candidate,
                    "Scoring failed, falling back to most reliable candidate"
                );
                Ok(decision_at(
                    predictions,
                    index,
                    0.0,
                    RoutingReason::ReliabilityFallback,
                ))
            }
        }
    }

    /// Uniform draw against epsilon; returns the random pick if exploring
    fn draw_exploration(&self, epsilon: f64, len: usize) -> Option<usize> {
        let mut rng = self.rng.lock().ok()?;
        if rng.r#gen::<f64>() < epsilon {
            Some(rng.gen_range(0..len))
        } else {
            None
        }
    }

    /// Index and score of the strictly highest composite (first wins ties)
    fn best_composite(&self, predictions: &[Prediction], task_type: &str) -> Result<(usize, f64)> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::SelectionError("optimizer state lock poisoned".to_string()))?;

        let mut best: Option<(usize, f64)> = None;
        for (index, prediction) in predictions.iter().enumerate() {
            let key = ScoreKey::new(&prediction.candidate, task_type);
            let weighted = state
                .scores
                .get(&key)
                .copied()
                .unwrap_or(DEFAULT_WEIGHTED_SCORE);
            let composite =
                HISTORY_WEIGHT * weighted + PREDICTION_WEIGHT * prediction.predicted_score();

            if !composite.is_finite() {
                return Err(Error::SelectionError(format!(
                    "non-finite score for {}",
                    prediction.candidate
                )));
            }

            match best {
                Some((_, best_score)) if composite <= best_score => {}
                _ => best = Some((index, composite)),
            }
        }

        best.ok_or_else(|| Error::SelectionError("no scores computed".to_string()))
    }

    /// Update the learned score for a key with an observed outcome
    ///
    /// Creates the key's state if it doesn't exist yet.
    pub fn update_from_result(
        &self,
        candidate: &Candidate,
        task_type: &str,
        success: bool,
        latency_ms: f64,
        cost_usd: f64,
    ) {
        let reward = compute_reward(success, latency_ms, cost_usd).clamp(0.0, 1.0);
        let key = ScoreKey::new(candidate, task_type);

        let Ok(mut state) = self.state.write() else {
            error!(candidate = %candidate, task_type, "Optimizer state unavailable, dropping result");
            return;
        };

        let rewards = state.rewards.entry(key.clone()).or_default();
        rewards.push_back(reward);
        if rewards.len() > MAX_REWARD_HISTORY {
            rewards.pop_front();
        }

        let score = state.scores.entry(key).or_insert(DEFAULT_WEIGHTED_SCORE);
        *score += self.learning_rate * (reward - *score);

        debug!(
            candidate = %candidate,
            task_type,
            reward,
            score = *score,
            "Updated weighted score"
        );
    }

    /// Recompute epsilon from the number of retained reward samples
    pub fn adjust_exploration_rate(&self) {
        if let Ok(mut state) = self.state.write() {
            let total: usize = state.rewards.values().map(VecDeque::len).sum();
            state.exploration_rate =
                (0.3 - (total as f64 / 10_000.0) * 0.25).max(MIN_EXPLORATION_RATE);
            debug!(
                samples = total,
                exploration_rate = state.exploration_rate,
                "Adjusted exploration rate"
            );
        }
    }

    /// Current exploration rate (epsilon)
    pub fn exploration_rate(&self) -> f64 {
        self.state
            .read()
            .map(|s| s.exploration_rate)
            .unwrap_or(MIN_EXPLORATION_RATE)
    }

    /// Learned score for a key, 0.5 if never updated
    pub fn weighted_score(&self, candidate: &Candidate, task_type: &str) -> f64 {
        let key = ScoreKey::new(candidate, task_type);
        self.state
            .read()
            .ok()
            .and_then(|s| s.scores.get(&key).copied())
            .unwrap_or(DEFAULT_WEIGHTED_SCORE)
    }

    /// Retained rewards for a key, oldest first
    pub fn reward_history(&self, candidate: &Candidate, task_type: &str) -> Vec<f64> {
        let key = ScoreKey::new(candidate, task_type);
        self.state
            .read()
            .ok()
            .and_then(|s| s.rewards.get(&key).map(|r| r.iter().copied().collect()))
            .unwrap_or_default()
    }

    /// Reward samples retained across all keys
    pub fn total_samples(&self) -> usize {
        self.state
            .read()
            .map(|s| s.rewards.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    /// Learned scores for every key seen so far
    pub fn weighted_scores(&self) -> HashMap<ScoreKey, f64> {
        self.state
            .read()
            .map(|s| s.scores.clone())
            .unwrap_or_default()
    }
}

fn decision_at(
    predictions: &[Prediction],
    index: usize,
    score: f64,
    reason: RoutingReason,
) -> RoutingDecision {
    let alternatives = predictions
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, p)| p.candidate.clone())
        .collect();
    RoutingDecision::new(predictions[index].candidate.clone(), score, reason)
        .with_alternatives(alternatives)
}

/// Index of the highest predicted reliability (first wins ties)
fn most_reliable(predictions: &[Prediction]) -> usize {
    let mut best_index = 0;
    for (index, prediction) in predictions.iter().enumerate().skip(1) {
        if prediction.predicted_reliability > predictions[best_index].predicted_reliability {
            best_index = index;
        }
    }
    best_index
}

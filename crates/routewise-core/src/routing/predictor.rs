//! Performance prediction from observed history
//!
//! The predictor keeps a bounded latency window, success/failure counts and a
//! running cost average per candidate. Predictions average the most recent
//! latencies and scale them by request features; candidates without history
//! get a conservative low-confidence default.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::types::{Candidate, ExecutionOutcome, ModelStats, Prediction, RequestFeatures};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// Latency samples averaged for a prediction
const RECENT_LATENCY_SAMPLES: usize = 20;

/// Feature/outcome pairs retained for training
const MAX_FEATURE_HISTORY: usize = 1000;

/// A request's features paired with how it turned out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub features: RequestFeatures,
    pub outcome: ExecutionOutcome,
}

/// Predicts latency, cost and reliability per candidate
#[derive(Debug)]
pub struct PerformancePredictor {
    stats: RwLock<HashMap<Candidate, ModelStats>>,
    feature_history: RwLock<VecDeque<FeatureRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for PerformancePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformancePredictor {
    /// Create a predictor using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a predictor with a custom clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            feature_history: RwLock::new(VecDeque::new()),
            clock,
        }
    }

    /// Predict performance for each candidate, in input order
    ///
    /// Never fails: any internal problem yields the default prediction for
    /// every candidate.
    pub fn predict_performance(
        &self,
        candidates: &[Candidate],
        features: &RequestFeatures,
    ) -> Vec<Prediction> {
        match self.try_predict(candidates, features) {
            Ok(predictions) => predictions,
            Err(err) => {
                warn!(
                    error = %err,
                    candidates = candidates.len(),
                    "Falling back to default predictions"
                );
                candidates.iter().cloned().map(Prediction::fallback).collect()
            }
        }
    }

    fn try_predict(
        &self,
        candidates: &[Candidate],
        features: &RequestFeatures,
    ) -> Result<Vec<Prediction>> {
        features.validate()?;

        let stats = self
            .stats
            .read()
            .map_err(|_| Error::PredictionError("model stats lock poisoned".to_string()))?;

        let predictions = candidates
            .iter()
            .map(|candidate| {
                let Some(model_stats) = stats.get(candidate) else {
                    return Prediction::fallback(candidate.clone());
                };
                let Some(avg_latency) =
                    model_stats.recent_average_latency(RECENT_LATENCY_SAMPLES)
                else {
                    return Prediction::fallback(candidate.clone());
                };

                Prediction {
                    candidate: candidate.clone(),
                    predicted_latency_ms: avg_latency * latency_multiplier(features),
                    predicted_cost_usd: model_stats.average_cost_usd,
                    predicted_reliability: model_stats.reliability,
                    confidence: (model_stats.latency_samples.len() as f64 / 100.0).min(0.9),
                }
            })
            .collect();

        Ok(predictions)
    }

    /// Record an observed call for a candidate
    ///
    /// Creates stats for the candidate if they don't exist yet.
    pub fn update_model_stats(
        &self,
        candidate: &Candidate,
        latency_ms: f64,
        success: bool,
        cost_usd: f64,
    ) {
        let now = self.clock.now_millis();

        if let Ok(mut stats) = self.stats.write() {
            let model_stats = stats
                .entry(candidate.clone())
                .or_insert_with(|| ModelStats::new(candidate.clone(), now));
            model_stats.update(latency_ms, success, cost_usd, now);

            debug!(
                candidate = %candidate,
                samples = model_stats.latency_samples.len(),
                reliability = model_stats.reliability,
                avg_cost = model_stats.average_cost_usd,
                "Updated model stats"
            );
        } else {
            error!(candidate = %candidate, "Model stats unavailable, dropping observation");
        }
    }

    /// Keep a request's features and outcome for training
    pub fn record_feature_result(&self, features: RequestFeatures, outcome: ExecutionOutcome) {
        if let Ok(mut history) = self.feature_history.write() {
            history.push_back(FeatureRecord { features, outcome });
            if history.len() > MAX_FEATURE_HISTORY {
                history.pop_front();
            }
        } else {
            error!("Feature history unavailable, dropping record");
        }
    }

    /// Run a training pass over the recorded feature history
    ///
    /// Returns the number of examples seen. Afterwards only the most recent
    /// half of the history capacity is kept so later passes favour fresh data.
    pub fn train(&self) -> usize {
        let Ok(mut history) = self.feature_history.write() else {
            error!("Feature history unavailable, skipping training");
            return 0;
        };

        let examples = history.len();
        info!(examples, "Training performance predictor");

        let keep = MAX_FEATURE_HISTORY / 2;
        if history.len() > keep {
            let excess = history.len() - keep;
            history.drain(..excess);
        }
        examples
    }

    /// Number of retained feature/outcome pairs
    pub fn feature_history_len(&self) -> usize {
        self.feature_history.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Snapshot of a candidate's stats
    pub fn model_stats(&self, candidate: &Candidate) -> Option<ModelStats> {
        self.stats
            .read()
            .ok()
            .and_then(|s| s.get(candidate).cloned())
    }

    /// Snapshot of every candidate's stats
    pub fn all_stats(&self) -> Vec<ModelStats> {
        self.stats
            .read()
            .ok()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Compounding latency adjustment for request features
fn latency_multiplier(features: &RequestFeatures) -> f64 {
    let mut multiplier = 1.0;
    if features.prompt_length > 1000 {
        multiplier *= 1.2;
    }
    if features.complexity > 0.7 {
        multiplier *= 1.3;
    }
    if features.is_business_hours() {
        multiplier *= 1.1;
    }
    multiplier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn quiet_features() -> RequestFeatures {
        RequestFeatures::new(100, 0.2, 3)
    }

    #[test]
    fn test_predict_without_history_uses_defaults() {
        let predictor = PerformancePredictor::new();
        let candidates = vec![Candidate::new("a", "m1"), Candidate::new("b", "m2")];

        let predictions = predictor.predict_performance(&candidates, &quiet_features());

        assert_eq!(predictions.len(), 2);
        for (prediction, candidate) in predictions.iter().zip(&candidates) {
            assert_eq!(&prediction.candidate, candidate);
            assert_eq!(prediction.predicted_latency_ms, 1000.0);
            assert_eq!(prediction.predicted_cost_usd, 0.01);
            assert_eq!(prediction.predicted_reliability, 0.95);
            assert_eq!(prediction.confidence, 0.1);
        }
    }

    #[test]
    fn test_predict_averages_recent_window() {
        let predictor = PerformancePredictor::new();
        let candidate = Candidate::new("a", "m1");

        // 30 slow samples followed by 20 fast ones; only the last 20 count
        for _ in 0..30 {
            predictor.update_model_stats(&candidate, 900.0, true, 0.002);
        }
        for _ in 0..20 {
            predictor.update_model_stats(&candidate, 100.0, true, 0.002);
        }

        let predictions =
            predictor.predict_performance(std::slice::from_ref(&candidate), &quiet_features());
        let prediction = &predictions[0];

        assert!((prediction.predicted_latency_ms - 100.0).abs() < 1e-9);
        assert!((prediction.predicted_cost_usd - 0.002).abs() < 1e-12);
        assert_eq!(prediction.predicted_reliability, 1.0);
        assert!((prediction.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_feature_multipliers_compound() {
        let predictor = PerformancePredictor::new();
        let candidate = Candidate::new("a", "m1");
        predictor.update_model_stats(&candidate, 1000.0, true, 0.0);

        let heavy = RequestFeatures::new(5000, 0.9, 12);
        let predictions = predictor.predict_performance(std::slice::from_ref(&candidate), &heavy);

        let expected = 1000.0 * 1.2 * 1.3 * 1.1;
        assert!((predictions[0].predicted_latency_ms - expected).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_caps_at_point_nine() {
        let predictor = PerformancePredictor::new();
        let candidate = Candidate::new("a", "m1");
        for _ in 0..100 {
            predictor.update_model_stats(&candidate, 200.0, true, 0.001);
        }

        let predictions =
            predictor.predict_performance(std::slice::from_ref(&candidate), &quiet_features());
        assert!((predictions[0].confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_features_fall_back_for_all_candidates() {
        let predictor = PerformancePredictor::new();
        let candidate = Candidate::new("a", "m1");
        for _ in 0..50 {
            predictor.update_model_stats(&candidate, 200.0, true, 0.001);
        }

        let bad = RequestFeatures::new(100, 0.2, 42);
        let predictions = predictor.predict_performance(std::slice::from_ref(&candidate), &bad);

        assert_eq!(predictions[0], Prediction::fallback(candidate));
    }

    #[test]
    fn test_latency_window_never_exceeds_cap() {
        let predictor = PerformancePredictor::new();
        let candidate = Candidate::new("a", "m1");
        for i in 0..101 {
            predictor.update_model_stats(&candidate, i as f64, true, 0.0);
        }

        let stats = predictor.model_stats(&candidate).unwrap();
        assert_eq!(stats.latency_samples.len(), 100);
        assert_eq!(stats.latency_samples.front().copied(), Some(1.0));
    }

    #[test]
    fn test_failed_attempts_count_toward_cost_average() {
        let predictor = PerformancePredictor::new();
        let candidate = Candidate::new("a", "m1");
        predictor.update_model_stats(&candidate, 100.0, true, 0.004);
        predictor.update_model_stats(&candidate, 100.0, false, 0.0);

        let stats = predictor.model_stats(&candidate).unwrap();
        assert!((stats.average_cost_usd - 0.002).abs() < 1e-12);
        assert!((stats.reliability - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_stats_use_injected_clock() {
        let clock = Arc::new(ManualClock::new(5_000));
        let predictor = PerformancePredictor::with_clock(clock.clone());
        let candidate = Candidate::new("a", "m1");

        predictor.update_model_stats(&candidate, 100.0, true, 0.0);
        clock.advance(std::time::Duration::from_millis(250));
        predictor.update_model_stats(&candidate, 100.0, true, 0.0);

        assert_eq!(predictor.model_stats(&candidate).unwrap().last_updated_ms, 5_250);
    }

    #[test]
    fn test_train_trims_feature_history() {
        let predictor = PerformancePredictor::new();
        for _ in 0..1200 {
            predictor.record_feature_result(quiet_features(), ExecutionOutcome::success(100, 0.001));
        }
        assert_eq!(predictor.feature_history_len(), 1000);

        assert_eq!(predictor.train(), 1000);
        assert_eq!(predictor.feature_history_len(), 500);
    }

    #[test]
    fn test_poisoned_stats_fall_back_without_panicking() {
        let predictor = Arc::new(PerformancePredictor::new());
        let candidate = Candidate::new("a", "m1");
        let shared = Arc::clone(&predictor);
        let _ = std::thread::spawn(move || {
            let _guard = shared.stats.write().unwrap();
            panic!("poison model stats");
        })
        .join();

        predictor.update_model_stats(&candidate, 100.0, true, 0.001);
        assert!(predictor.model_stats(&candidate).is_none());

        let predictions =
            predictor.predict_performance(std::slice::from_ref(&candidate), &quiet_features());
        assert_eq!(predictions[0], Prediction::fallback(candidate));
    }
}

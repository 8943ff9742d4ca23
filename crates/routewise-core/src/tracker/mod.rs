//! Business value tracking
//!
//! This module provides:
//! - Cost savings against a per-task-type baseline, and ROI
//! - Request success rate and average response time over recent history
//! - SLA compliance and failover success as exponential moving averages
//! - A plain-text business impact report
//!
//! Tracking never fails: if internal state is unavailable the call logs an
//! error and returns a neutral value.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

use crate::routing::Candidate;

/// Entries kept in the success and response-time histories
const MAX_REQUEST_HISTORY: usize = 1000;

/// Entries kept in the cost savings history
const MAX_SAVINGS_HISTORY: usize = 100;

/// Smoothing factor for SLA compliance
const SLA_ALPHA: f64 = 0.05;

/// Smoothing factor for failover success
const FAILOVER_ALPHA: f64 = 0.1;

/// Point-in-time view of the business metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessMetrics {
    /// Sum of savings against each task type's baseline, in USD
    pub total_cost_savings: f64,
    /// Fraction of recent requests that succeeded
    pub success_rate: f64,
    /// Mean of recent response times in milliseconds
    pub average_response_time_ms: f64,
    /// Service uptime fraction
    pub uptime: f64,
    /// Smoothed rate of successful failovers
    pub failover_success_rate: f64,
    /// Smoothed fraction of requests meeting the SLA threshold
    pub sla_compliance: f64,
}

impl Default for BusinessMetrics {
    fn default() -> Self {
        Self {
            total_cost_savings: 0.0,
            success_rate: 1.0,
            average_response_time_ms: 0.0,
            uptime: 1.0,
            failover_success_rate: 0.0,
            sla_compliance: 1.0,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    metrics: BusinessMetrics,
    cost_baselines: HashMap<String, f64>,
    cost_savings_history: VecDeque<f64>,
    success_history: VecDeque<bool>,
    response_time_history: VecDeque<f64>,
}

/// Aggregates operational metrics across all routing decisions
#[derive(Debug, Clone, Default)]
pub struct BusinessValueTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl BusinessValueTracker {
    /// Create a tracker with initial metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cost of a call and return the savings against the baseline
    ///
    /// The first call for a task type seeds its baseline and returns 0.
    pub fn track_cost_savings(&self, task_type: &str, candidate: &Candidate, actual_cost: f64) -> f64 {
        let Ok(mut state) = self.state.write() else {
            error!(task_type, "Tracker state unavailable, skipping cost savings");
            return 0.0;
        };

        let Some(&baseline) = state.cost_baselines.get(task_type) else {
            state
                .cost_baselines
                .insert(task_type.to_string(), actual_cost);
            debug!(task_type, baseline = actual_cost, "Seeded cost baseline");
            return 0.0;
        };

        let savings = baseline - actual_cost;
        state.metrics.total_cost_savings += savings;
        state.cost_savings_history.push_back(savings);
        if state.cost_savings_history.len() > MAX_SAVINGS_HISTORY {
            state.cost_savings_history.pop_front();
        }

        debug!(
            task_type,
            candidate = %candidate,
            savings,
            total = state.metrics.total_cost_savings,
            "Tracked cost savings"
        );
        savings
    }

    /// Return on investment as a percentage, never negative
    pub fn calculate_roi(&self, implementation_cost: f64) -> f64 {
        if implementation_cost <= 0.0 {
            return 0.0;
        }
        let savings = self
            .state
            .read()
            .map(|s| s.metrics.total_cost_savings)
            .unwrap_or(0.0);
        (savings / implementation_cost * 100.0).max(0.0)
    }

    /// Record whether a request succeeded
    pub fn track_request_success(&self, success: bool) {
        if let Ok(mut state) = self.state.write() {
            state.success_history.push_back(success);
            if state.success_history.len() > MAX_REQUEST_HISTORY {
                state.success_history.pop_front();
            }

            let successes = state.success_history.iter().filter(|s| **s).count();
            state.metrics.success_rate = successes as f64 / state.success_history.len() as f64;
        } else {
            error!("Tracker state unavailable, skipping request success");
        }
    }

    /// Record a response time in milliseconds
    pub fn track_response_time(&self, response_time_ms: f64) {
        if let Ok(mut state) = self.state.write() {
            state.response_time_history.push_back(response_time_ms);
            if state.response_time_history.len() > MAX_REQUEST_HISTORY {
                state.response_time_history.pop_front();
            }

            let total: f64 = state.response_time_history.iter().sum();
            state.metrics.average_response_time_ms =
                total / state.response_time_history.len() as f64;
        } else {
            error!("Tracker state unavailable, skipping response time");
        }
    }

    /// Fold one response into the SLA compliance average
    pub fn update_sla_compliance(&self, response_time_ms: f64, threshold_ms: f64) {
        let target = if response_time_ms <= threshold_ms { 1.0 } else { 0.0 };
        if let Ok(mut state) = self.state.write() {
            let current = state.metrics.sla_compliance;
            state.metrics.sla_compliance = (1.0 - SLA_ALPHA) * current + SLA_ALPHA * target;
        } else {
            error!("Tracker state unavailable, skipping SLA compliance");
        }
    }

    /// Fold one failover attempt into the failover success average
    pub fn track_failover_success(&self, success: bool) {
        let target = if success { 1.0 } else { 0.0 };
        if let Ok(mut state) = self.state.write() {
            let current = state.metrics.failover_success_rate;
            state.metrics.failover_success_rate =
                (1.0 - FAILOVER_ALPHA) * current + FAILOVER_ALPHA * target;
        } else {
            error!("Tracker state unavailable, skipping failover result");
        }
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> BusinessMetrics {
        self.state
            .read()
            .map(|s| s.metrics.clone())
            .unwrap_or_default()
    }

    /// Recent savings values, oldest first
    pub fn cost_savings_history(&self) -> Vec<f64> {
        self.state
            .read()
            .map(|s| s.cost_savings_history.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Baseline cost for a task type, if seeded
    pub fn cost_baseline(&self, task_type: &str) -> Option<f64> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.cost_baselines.get(task_type).copied())
    }

    /// Human-readable summary of the current metrics
    pub fn generate_business_impact_report(&self) -> String {
        let metrics = self.metrics();
        format!(
            "Business Impact Report:\n\
             ------------------------\n\
             Total Cost Savings: ${:.2}\n\
             Success Rate: {:.1}%\n\
             Average Response Time: {:.0}ms\n\
             Service Uptime: {:.2}%\n\
             SLA Compliance: {:.1}%\n\
             Failover Success Rate: {:.1}%\n",
            metrics.total_cost_savings,
            metrics.success_rate * 100.0,
            metrics.average_response_time_ms,
            metrics.uptime * 100.0,
            metrics.sla_compliance * 100.0,
            metrics.failover_success_rate * 100.0,
        )
    }

    /// Clear all metrics and history, recovering from a poisoned lock
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = TrackerState::default();
        self.state.clear_poison();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> Candidate {
        Candidate::new("openai", "gpt-4o-mini")
    }

    #[test]
    fn test_initial_metrics() {
        let tracker = BusinessValueTracker::new();
        assert_eq!(tracker.metrics(), BusinessMetrics::default());
    }

    #[test]
    fn test_first_cost_seeds_baseline() {
        let tracker = BusinessValueTracker::new();

        assert_eq!(tracker.track_cost_savings("summarize", &candidate(), 0.05), 0.0);
        assert_eq!(tracker.cost_baseline("summarize"), Some(0.05));
        assert_eq!(tracker.metrics().total_cost_savings, 0.0);
        assert!(tracker.cost_savings_history().is_empty());
    }

    #[test]
    fn test_savings_against_fixed_baseline() {
        let tracker = BusinessValueTracker::new();
        tracker.track_cost_savings("summarize", &candidate(), 0.05);

        let first = tracker.track_cost_savings("summarize", &candidate(), 0.02);
        let second = tracker.track_cost_savings("summarize", &candidate(), 0.08);

        assert!((first - 0.03).abs() < 1e-12);
        assert!((second + 0.03).abs() < 1e-12);
        assert!(tracker.metrics().total_cost_savings.abs() < 1e-12);
        assert_eq!(tracker.cost_baseline("summarize"), Some(0.05));
    }

    #[test]
    fn test_savings_history_is_bounded() {
        let tracker = BusinessValueTracker::new();
        tracker.track_cost_savings("chat", &candidate(), 1.0);
        for _ in 0..150 {
            tracker.track_cost_savings("chat", &candidate(), 0.5);
        }
        assert_eq!(tracker.cost_savings_history().len(), 100);
        assert!((tracker.metrics().total_cost_savings - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_roi() {
        let tracker = BusinessValueTracker::new();
        assert_eq!(tracker.calculate_roi(0.0), 0.0);
        assert_eq!(tracker.calculate_roi(-5.0), 0.0);

        tracker.track_cost_savings("chat", &candidate(), 1.0);
        tracker.track_cost_savings("chat", &candidate(), 0.5);
        assert!((tracker.calculate_roi(2.0) - 25.0).abs() < 1e-9);

        // Negative savings clamp to zero
        tracker.track_cost_savings("chat", &candidate(), 3.0);
        assert_eq!(tracker.calculate_roi(2.0), 0.0);
    }

    #[test]
    fn test_success_rate_over_window() {
        let tracker = BusinessValueTracker::new();
        tracker.track_request_success(true);
        tracker.track_request_success(false);
        tracker.track_request_success(true);
        tracker.track_request_success(true);
        assert!((tracker.metrics().success_rate - 0.75).abs() < 1e-12);

        for _ in 0..1000 {
            tracker.track_request_success(false);
        }
        assert_eq!(tracker.metrics().success_rate, 0.0);
    }

    #[test]
    fn test_average_response_time_window() {
        let tracker = BusinessValueTracker::new();
        for _ in 0..1000 {
            tracker.track_response_time(100.0);
        }
        tracker.track_response_time(1100.0);
        // Oldest 100 evicted, so 999 x 100 + 1100 over 1000
        assert!((tracker.metrics().average_response_time_ms - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_sla_compliance_ema() {
        let tracker = BusinessValueTracker::new();
        tracker.update_sla_compliance(2000.0, 1000.0);
        assert!((tracker.metrics().sla_compliance - 0.95).abs() < 1e-12);

        tracker.update_sla_compliance(1000.0, 1000.0);
        assert!((tracker.metrics().sla_compliance - 0.9525).abs() < 1e-12);
    }

    #[test]
    fn test_failover_ema() {
        let tracker = BusinessValueTracker::new();
        tracker.track_failover_success(true);
        assert!((tracker.metrics().failover_success_rate - 0.1).abs() < 1e-12);
        tracker.track_failover_success(false);
        assert!((tracker.metrics().failover_success_rate - 0.09).abs() < 1e-12);
    }

    #[test]
    fn test_business_impact_report() {
        let tracker = BusinessValueTracker::new();
        tracker.track_cost_savings("chat", &candidate(), 2.0);
        tracker.track_cost_savings("chat", &candidate(), 0.75);
        tracker.track_request_success(true);
        tracker.track_response_time(250.0);

        let report = tracker.generate_business_impact_report();

        assert!(report.contains("Total Cost Savings: $1.25"));
        assert!(report.contains("Success Rate: 100.0%"));
        assert!(report.contains("Average Response Time: 250ms"));
        assert!(report.contains("Service Uptime: 100.00%"));
        assert!(report.contains("SLA Compliance: 100.0%"));
        assert!(report.contains("Failover Success Rate: 0.0%"));
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = BusinessValueTracker::new();
        let clone = tracker.clone();
        clone.track_request_success(false);
        assert_eq!(tracker.metrics().success_rate, 0.0);

        tracker.clear();
        assert_eq!(clone.metrics(), BusinessMetrics::default());
    }

    #[test]
    fn test_poisoned_state_skips_updates_until_cleared() {
        let tracker = BusinessValueTracker::new();
        let shared = tracker.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.state.write().unwrap();
            panic!("poison tracker state");
        })
        .join();

        tracker.track_request_success(false);
        tracker.update_sla_compliance(9_000.0, 2_000.0);
        tracker.track_failover_success(true);
        assert_eq!(tracker.metrics(), BusinessMetrics::default());

        tracker.clear();
        tracker.track_request_success(false);
        assert_eq!(tracker.metrics().success_rate, 0.0);
    }
}

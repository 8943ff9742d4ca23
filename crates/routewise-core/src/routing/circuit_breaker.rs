//! Per-candidate circuit breaker
//!
//! # States
//! - Closed: normal operation, the candidate may be selected
//! - Open: candidate assumed down, filtered out of selection
//! - Half-Open: reset window elapsed, trial requests are let through
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_threshold consecutive failures
//! Open → Half-Open: reset_timeout_ms since the last failure (checked in is_open)
//! Half-Open → Closed: successes_to_close consecutive successes
//! Half-Open → Open: any failure (restarts the reset window)
//! ```
//!
//! Half-open is not stored; it is an open circuit whose window has elapsed.
//! By default every caller that observes the elapsed window is let through.
//! With `single_trial` only the first caller per window gets through.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use super::types::Candidate;
use crate::clock::{Clock, SystemClock};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SUCCESSES_TO_CLOSE: u32 = 2;

/// Longest reset window accepted from configuration (one week)
pub const MAX_RESET_TIMEOUT_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time after the last failure before a trial is allowed
    pub reset_timeout_ms: u64,
    /// Consecutive successes while open needed to close
    pub successes_to_close: u32,
    /// Let only one caller through per half-open window
    pub single_trial: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
            successes_to_close: DEFAULT_SUCCESSES_TO_CLOSE,
            single_trial: false,
        }
    }
}

impl CircuitBreakerConfig {
    /// Replace zero values with the defaults
    pub fn normalized(mut self) -> Self {
        if self.failure_threshold == 0 {
            self.failure_threshold = DEFAULT_FAILURE_THRESHOLD;
        }
        if self.reset_timeout_ms == 0 {
            self.reset_timeout_ms = DEFAULT_RESET_TIMEOUT_MS;
        }
        if self.successes_to_close == 0 {
            self.successes_to_close = DEFAULT_SUCCESSES_TO_CLOSE;
        }
        self
    }
}

/// Logical circuit state, derived from stored fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CircuitState {
    is_open: bool,
    failure_count: u32,
    last_failure_ms: i64,
    recovery_attempt_ms: Option<i64>,
    consecutive_successes: u32,
}

/// Observability snapshot of one circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub is_open: bool,
    pub failure_count: u32,
    pub last_failure_ms: i64,
}

/// Failure isolation for every candidate
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: RwLock<HashMap<Candidate, CircuitState>>,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker with a custom clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.normalized(),
            states: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether the candidate is blocked
    ///
    /// Returning `false` for an open circuit marks a recovery attempt: the
    /// caller is the half-open trial.
    pub fn is_open(&self, candidate: &Candidate) -> bool {
        let now = self.clock.now_millis();
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(candidate.clone()).or_default();

        if !state.is_open {
            return false;
        }
        if self.blocks(state, now) {
            return true;
        }

        state.recovery_attempt_ms = Some(now);
        info!(candidate = %candidate, "Circuit entering half-open state for testing");
        false
    }

    /// Whether the candidate would currently be let through, without
    /// claiming a half-open trial
    pub fn is_available(&self, candidate: &Candidate) -> bool {
        let now = self.clock.now_millis();
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        match states.get(candidate) {
            Some(state) if state.is_open => !self.blocks(state, now),
            _ => true,
        }
    }

    /// Candidates whose circuit would let them through, in input order
    ///
    /// Does not claim trials; call `is_open` on the candidate actually used.
    pub fn filter_available(&self, candidates: &[Candidate]) -> Vec<Candidate> {
        candidates
            .iter()
            .filter(|c| self.is_available(c))
            .cloned()
            .collect()
    }

    /// Reset window in milliseconds, saturated to the clock's range
    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.reset_timeout_ms).unwrap_or(i64::MAX)
    }

    /// Open-circuit gate: inside the reset window, or a single trial in flight
    fn blocks(&self, state: &CircuitState, now: i64) -> bool {
        let window = self.window_ms();
        if now < state.last_failure_ms.saturating_add(window) {
            return true;
        }
        if self.config.single_trial {
            if let Some(started) = state.recovery_attempt_ms {
                return now < started.saturating_add(window);
            }
        }
        false
    }

    /// Record a failed call, opening the circuit at the threshold
    pub fn record_failure(&self, candidate: &Candidate) {
        let now = self.clock.now_millis();
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(candidate.clone()).or_default();

        state.failure_count += 1;
        state.last_failure_ms = now;
        state.consecutive_successes = 0;

        if !state.is_open && state.failure_count >= self.config.failure_threshold {
            state.is_open = true;
            warn!(
                candidate = %candidate,
                failures = state.failure_count,
                "Circuit breaker opened"
            );
        } else if state.recovery_attempt_ms.take().is_some() {
            warn!(candidate = %candidate, "Recovery attempt failed, circuit remains open");
        }
    }

    /// Record a successful call, closing an open circuit after enough successes
    pub fn record_success(&self, candidate: &Candidate) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(candidate.clone()).or_default();

        state.failure_count = 0;

        if state.is_open {
            state.consecutive_successes += 1;
            if state.consecutive_successes >= self.config.successes_to_close {
                info!(
                    candidate = %candidate,
                    successes = state.consecutive_successes,
                    "Circuit breaker closed"
                );
                state.is_open = false;
                state.recovery_attempt_ms = None;
                state.consecutive_successes = 0;
            }
        }
    }

    /// Forget all state for a candidate
    pub fn reset(&self, candidate: &Candidate) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.remove(candidate);
        info!(candidate = %candidate, "Circuit breaker reset");
    }

    /// Logical state without side effects
    pub fn phase(&self, candidate: &Candidate) -> CircuitPhase {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        match states.get(candidate) {
            Some(state) if state.is_open => {
                let elapsed = self.clock.now_millis()
                    >= state.last_failure_ms.saturating_add(self.window_ms());
                if elapsed || state.recovery_attempt_ms.is_some() {
                    CircuitPhase::HalfOpen
                } else {
                    CircuitPhase::Open
                }
            }
            _ => CircuitPhase::Closed,
        }
    }

    /// Snapshot of every known circuit
    pub fn status(&self) -> BTreeMap<Candidate, CircuitStatus> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states
            .iter()
            .map(|(candidate, state)| {
                (
                    candidate.clone(),
                    CircuitStatus {
                        is_open: state.is_open,
                        failure_count: state.failure_count,
                        last_failure_ms: state.last_failure_ms,
                    },
                )
            })
            .collect()
    }
}

//! Routewise Core Library
//!
//! This crate provides the adaptive routing engine for Routewise, including:
//! - Performance prediction from observed latency, cost and reliability
//! - Epsilon-greedy model selection with learned per-task-type scores
//! - Per-candidate circuit breaking
//! - Business value tracking (cost savings, success rate, SLA compliance)
//! - File-backed configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod routing;
pub mod tracker;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::routing::{
        Candidate, ExecutionOutcome, Executor, RequestFeatures, RouteRequest, RoutingEngine,
        RoutingEngineBuilder,
    };
    pub use crate::tracker::{BusinessMetrics, BusinessValueTracker};
}

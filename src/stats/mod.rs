// src/stats/mod.rs
//! Statistics collection and reporting module
//!
//! [`StatsAggregator`] holds the lock-free counters that dispatchers, the
//! evaluator and the outcome listener increment. [`StatsReporter`] reads them
//! once per interval and logs a human-readable status line.

/// Atomic mining counters and link health flags
pub mod aggregator;

/// Periodic display of the counters
pub mod reporter;

// Re-export main components
pub use aggregator::{LinkStatus, StatsAggregator, StatsSnapshot};
pub use reporter::{HardwareStats, StatsReporter, format_hashrate, format_memory, format_uptime};

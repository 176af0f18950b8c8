//! DynMiner - multi-device proof-of-work miner in Rust
//!
//! This crate provides the mining core of a DynProgram-style miner:
//! - Atomic job publication to any number of compute devices
//! - CPU and (feature `opencl`) GPU dispatch loops
//! - Leading-zero share evaluation and asynchronous submission
//! - Lock-free statistics with a periodic status line

#![cfg_attr(not(feature = "opencl"), forbid(unsafe_code))]

/// Mining pipeline: jobs, dispatchers, evaluation, submission
pub mod miner;

/// Job feeds and share transports
pub mod network;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::{Config, DeviceSpec};
pub use miner::{AppContext, Job, JobBroadcast, PipelineSettings, ShareCandidate, Supervisor};
pub use network::{JobFeed, ShareOutcome, SubmitTransport};
pub use stats::{HardwareStats, StatsAggregator, StatsReporter};
pub use types::{DeviceKind, NoncePartition};
pub use utils::{MinerError, init_logging};

// src/utils/mod.rs
//! Utilities module for common functionality
//!
//! Error handling, logging, retry policy and the cancellation signal shared by
//! every worker.

/// Error types and handling utilities
///
/// Contains the [`MinerError`] enum which defines all possible error conditions
/// for the mining application, along with conversion implementations.
pub mod error;

/// Logging configuration and utilities
pub mod logging;

/// Bounded exponential backoff for feed and submission retries
pub mod backoff;

/// Cooperative cancellation signal
pub mod shutdown;

// Re-export for easier access
pub use backoff::{Backoff, RetryConfig};
pub use error::MinerError;
pub use logging::init_logging;
pub use shutdown::Shutdown;

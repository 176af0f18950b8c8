// src/network/mod.rs
//! Work intake and share output
//!
//! The miner talks to the outside world through two seams:
//! - [`JobFeed`]: produces jobs, polled on the async runtime by [`run_feed`]
//! - [`SubmitTransport`]: consumes share candidates and reports outcomes

/// Job feeds and the polling loop
pub mod feed;

/// Share submission transports
pub mod transport;

// Re-export main components for cleaner imports
pub use feed::{FeedTarget, FileJobFeed, JobFeed, SyntheticJobFeed, run_feed};
pub use transport::{
    JsonLinesTransport, LocalVerifier, OutcomeSender, ShareOutcome, SubmitTransport,
    outcome_channel,
};

// src/stats/aggregator.rs
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Point-in-time copy of the mining counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Nonces hashed across all devices
    pub hashes_tried: u64,
    /// Digests that met the job target
    pub shares_found: u64,
    /// Shares the network acknowledged
    pub shares_accepted: u64,
    /// Shares the network refused
    pub shares_rejected: u64,
}

/// Lock-free mining counters
///
/// Each counter is independent; a snapshot may observe them at slightly
/// different instants.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    hashes_tried: AtomicU64,
    shares_found: AtomicU64,
    shares_accepted: AtomicU64,
    shares_rejected: AtomicU64,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hashes(&self, count: u64) {
        self.hashes_tried.fetch_add(count, Ordering::Relaxed);
    }

    pub fn share_found(&self) {
        self.shares_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn share_accepted(&self) {
        self.shares_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn share_rejected(&self) {
        self.shares_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hashes_tried: self.hashes_tried.load(Ordering::Relaxed),
            shares_found: self.shares_found.load(Ordering::Relaxed),
            shares_accepted: self.shares_accepted.load(Ordering::Relaxed),
            shares_rejected: self.shares_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Operator-visible health of the external links
#[derive(Debug, Default)]
pub struct LinkStatus {
    feed_degraded: AtomicBool,
    submit_degraded: AtomicBool,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_degraded(&self, degraded: bool) {
        let was = self.feed_degraded.swap(degraded, Ordering::Relaxed);
        if was && !degraded {
            log::info!("Job feed recovered");
        }
    }

    pub fn set_submit_degraded(&self, degraded: bool) {
        let was = self.submit_degraded.swap(degraded, Ordering::Relaxed);
        if was && !degraded {
            log::info!("Share submission recovered");
        }
    }

    pub fn feed_degraded(&self) -> bool {
        self.feed_degraded.load(Ordering::Relaxed)
    }

    pub fn submit_degraded(&self) -> bool {
        self.submit_degraded.load(Ordering::Relaxed)
    }
}

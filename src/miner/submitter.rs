// src/miner/submitter.rs
//! Hand-off of share candidates to the submission transport
//!
//! The [`Submitter`] runs on its own thread, so network I/O never stalls the
//! evaluator. It drops candidates whose job has been replaced, remembers
//! submitted shares by `(job_id, nonce)` and lets the [`OutcomeListener`]
//! match accept/reject verdicts against them.

use crate::miner::evaluator::ShareCandidate;
use crate::miner::job::JobBroadcast;
use crate::network::transport::{ShareOutcome, SubmitTransport};
use crate::stats::{LinkStatus, StatsAggregator};
use crate::utils::{Backoff, RetryConfig, Shutdown};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Outcomes older than this are no longer expected
pub const PENDING_TTL: Duration = Duration::from_secs(600);

const LISTEN_SLICE: Duration = Duration::from_millis(200);

/// Shares submitted and still awaiting a verdict
#[derive(Debug, Default)]
pub struct PendingShares {
    inner: Mutex<HashMap<(String, u32), Instant>>,
}

impl PendingShares {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<(String, u32), Instant>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, job_id: &str, nonce: u32) {
        self.entries().insert((job_id.to_string(), nonce), Instant::now());
    }

    /// Removes the entry; `false` if it was never submitted or already resolved
    pub fn resolve(&self, job_id: &str, nonce: u32) -> bool {
        self.entries().remove(&(job_id.to_string(), nonce)).is_some()
    }

    /// Forgets entries submitted longer than `ttl` ago; returns how many
    pub fn prune(&self, ttl: Duration) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, submitted| submitted.elapsed() < ttl);
        before - entries.len()
    }

    pub fn contains(&self, job_id: &str, nonce: u32) -> bool {
        self.entries().contains_key(&(job_id.to_string(), nonce))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Submitted,
    /// Job was replaced before the candidate went out
    Stale,
    /// Transport kept failing until the retry budget ran out
    Failed,
}

/// Feeds candidates to a [`SubmitTransport`]
pub struct Submitter<T: SubmitTransport> {
    transport: T,
    jobs: Arc<JobBroadcast>,
    pending: Arc<PendingShares>,
    status: Arc<LinkStatus>,
    retry: RetryConfig,
}

impl<T: SubmitTransport> Submitter<T> {
    pub fn new(
        transport: T,
        jobs: Arc<JobBroadcast>,
        pending: Arc<PendingShares>,
        status: Arc<LinkStatus>,
        retry: RetryConfig,
    ) -> Self {
        Submitter {
            transport,
            jobs,
            pending,
            status,
            retry,
        }
    }

    fn is_stale(&self, candidate: &ShareCandidate) -> bool {
        self.jobs.current_version() != candidate.job_version
    }

    /// Submits one candidate, retrying transport failures with backoff
    pub fn submit(&mut self, candidate: &ShareCandidate, shutdown: &Shutdown) -> SubmitResult {
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            if self.is_stale(candidate) {
                log::debug!(
                    "Dropping stale share for job {} (v{}) nonce {:#010x}",
                    candidate.job_id,
                    candidate.job_version,
                    candidate.nonce
                );
                return SubmitResult::Stale;
            }

            self.pending.insert(&candidate.job_id, candidate.nonce);
            match self.transport.submit(candidate) {
                Ok(()) => {
                    self.status.set_submit_degraded(false);
                    log::info!(
                        "Share submitted via {}: job {} nonce {:#010x}",
                        self.transport.name(),
                        candidate.job_id,
                        candidate.nonce
                    );
                    return SubmitResult::Submitted;
                }
                Err(e) => {
                    self.pending.resolve(&candidate.job_id, candidate.nonce);
                    let Some(delay) = backoff.next_delay() else {
                        log::error!(
                            "Giving up on share for job {} after {} attempts: {}",
                            candidate.job_id,
                            backoff.attempts(),
                            e
                        );
                        self.status.set_submit_degraded(true);
                        return SubmitResult::Failed;
                    };
                    log::warn!(
                        "Submit via {} failed: {}, retrying in {:?}",
                        self.transport.name(),
                        e,
                        delay
                    );
                    if !shutdown.sleep(delay) {
                        return SubmitResult::Failed;
                    }
                }
            }
        }
    }

    /// Worker loop: runs until the evaluator hangs up
    pub fn run(mut self, candidates: Receiver<ShareCandidate>, shutdown: Shutdown) {
        for candidate in candidates {
            self.submit(&candidate, &shutdown);
        }
        log::debug!("Submitter for {} finished", self.transport.name());
    }
}

/// Applies asynchronous accept/reject verdicts to the stats
pub struct OutcomeListener {
    stats: Arc<StatsAggregator>,
    pending: Arc<PendingShares>,
    ttl: Duration,
}

impl OutcomeListener {
    pub fn new(stats: Arc<StatsAggregator>, pending: Arc<PendingShares>) -> Self {
        OutcomeListener {
            stats,
            pending,
            ttl: PENDING_TTL,
        }
    }

    /// Overrides how long a submitted share waits for its verdict
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Counts `outcome` if it matches a submitted share; returns whether it did
    pub fn record(&self, outcome: &ShareOutcome) -> bool {
        if !self.pending.resolve(&outcome.job_id, outcome.nonce) {
            log::warn!(
                "Ignoring outcome for unknown share: job {} nonce {:#010x}",
                outcome.job_id,
                outcome.nonce
            );
            return false;
        }

        if outcome.accepted {
            self.stats.share_accepted();
            log::info!("Share accepted: job {} nonce {:#010x}", outcome.job_id, outcome.nonce);
        } else {
            self.stats.share_rejected();
            log::warn!("Share rejected: job {} nonce {:#010x}", outcome.job_id, outcome.nonce);
        }
        true
    }

    /// Worker loop: runs until the transport hangs up or shutdown is triggered
    ///
    /// Expired shares are pruned at least once per listen slice, however busy
    /// the outcome stream is.
    pub fn run(self, outcomes: Receiver<ShareOutcome>, shutdown: Shutdown) {
        let prune_every = LISTEN_SLICE.min(self.ttl);
        let mut last_prune = Instant::now();

        while !shutdown.is_triggered() {
            match outcomes.recv_timeout(LISTEN_SLICE) {
                Ok(outcome) => {
                    self.record(&outcome);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_prune.elapsed() >= prune_every {
                last_prune = Instant::now();
                let expired = self.pending.prune(self.ttl);
                if expired > 0 {
                    log::debug!("{} shares expired without an outcome", expired);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::job::{HEADER_LEN, Job};
    use crate::utils::MinerError;

    /// Fails the first `failures` submissions, then records the rest
    struct FlakyTransport {
        failures: u32,
        sent: Arc<Mutex<Vec<u32>>>,
    }

    impl SubmitTransport for FlakyTransport {
        fn name(&self) -> &str {
            "flaky"
        }

        fn submit(&mut self, candidate: &ShareCandidate) -> Result<(), MinerError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(MinerError::NetworkError("connection reset".into()));
            }
            self.sent.lock().unwrap().push(candidate.nonce);
            Ok(())
        }
    }

    struct Fixture {
        jobs: Arc<JobBroadcast>,
        pending: Arc<PendingShares>,
        status: Arc<LinkStatus>,
        sent: Arc<Mutex<Vec<u32>>>,
    }

    fn fixture() -> Fixture {
        let jobs = Arc::new(JobBroadcast::new());
        jobs.replace(Job::new("j1", [0u8; HEADER_LEN], vec![1], 8));
        Fixture {
            jobs,
            pending: Arc::new(PendingShares::new()),
            status: Arc::new(LinkStatus::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            max_attempts,
        }
    }

    fn submitter(f: &Fixture, failures: u32, max_attempts: u32) -> Submitter<FlakyTransport> {
        Submitter::new(
            FlakyTransport {
                failures,
                sent: Arc::clone(&f.sent),
            },
            Arc::clone(&f.jobs),
            Arc::clone(&f.pending),
            Arc::clone(&f.status),
            fast_retry(max_attempts),
        )
    }

    fn candidate(job_id: &str, version: u64, nonce: u32) -> ShareCandidate {
        ShareCandidate {
            nonce,
            job_id: job_id.to_string(),
            job_version: version,
            digest: [0u8; 32],
            leading_zero_bits: 256,
        }
    }

    #[test]
    fn current_share_is_submitted_and_pending() {
        let f = fixture();
        let mut sub = submitter(&f, 0, 3);

        let result = sub.submit(&candidate("j1", 1, 42), &Shutdown::new());

        assert_eq!(result, SubmitResult::Submitted);
        assert_eq!(*f.sent.lock().unwrap(), vec![42]);
        assert_eq!(f.pending.len(), 1);
    }

    #[test]
    fn stale_share_is_dropped() {
        let f = fixture();
        f.jobs.replace(Job::new("j2", [1u8; HEADER_LEN], vec![2], 8));
        let mut sub = submitter(&f, 0, 3);

        let result = sub.submit(&candidate("j1", 1, 42), &Shutdown::new());

        assert_eq!(result, SubmitResult::Stale);
        assert!(f.sent.lock().unwrap().is_empty());
        assert!(f.pending.is_empty());
    }

    #[test]
    fn transient_failures_are_retried() {
        let f = fixture();
        let mut sub = submitter(&f, 2, 3);

        let result = sub.submit(&candidate("j1", 1, 7), &Shutdown::new());

        assert_eq!(result, SubmitResult::Submitted);
        assert_eq!(*f.sent.lock().unwrap(), vec![7]);
        assert!(!f.status.submit_degraded());
    }

    #[test]
    fn persistent_failure_degrades_status() {
        let f = fixture();
        let mut sub = submitter(&f, 10, 2);

        let result = sub.submit(&candidate("j1", 1, 7), &Shutdown::new());

        assert_eq!(result, SubmitResult::Failed);
        assert!(f.status.submit_degraded());
        assert!(f.pending.is_empty());

        // The next success clears the flag.
        let mut healthy = submitter(&f, 0, 2);
        healthy.submit(&candidate("j1", 1, 8), &Shutdown::new());
        assert!(!f.status.submit_degraded());
    }

    #[test]
    fn outcomes_are_correlated_by_job_and_nonce() {
        let stats = Arc::new(StatsAggregator::new());
        let pending = Arc::new(PendingShares::new());
        pending.insert("j1", 1);
        pending.insert("j1", 2);
        let listener = OutcomeListener::new(Arc::clone(&stats), Arc::clone(&pending));

        let outcome = |job: &str, nonce, accepted| ShareOutcome {
            job_id: job.to_string(),
            nonce,
            accepted,
        };
        assert!(listener.record(&outcome("j1", 1, true)));
        assert!(listener.record(&outcome("j1", 2, false)));
        assert!(!listener.record(&outcome("j1", 1, true)), "duplicate");
        assert!(!listener.record(&outcome("j9", 2, true)), "unknown job");

        let snap = stats.snapshot();
        assert_eq!(snap.shares_accepted, 1);
        assert_eq!(snap.shares_rejected, 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn listener_stops_when_transport_hangs_up() {
        let stats = Arc::new(StatsAggregator::new());
        let pending = Arc::new(PendingShares::new());
        pending.insert("j1", 5);
        let (tx, rx) = crossbeam_channel::unbounded();
        let listener = OutcomeListener::new(Arc::clone(&stats), pending);
        let worker = std::thread::spawn(move || listener.run(rx, Shutdown::new()));

        tx.send(ShareOutcome {
            job_id: "j1".into(),
            nonce: 5,
            accepted: true,
        })
        .unwrap();
        drop(tx);
        worker.join().unwrap();

        assert_eq!(stats.snapshot().shares_accepted, 1);
    }

    #[test]
    fn unanswered_share_expires_under_steady_outcomes() {
        let stats = Arc::new(StatsAggregator::new());
        let pending = Arc::new(PendingShares::new());
        pending.insert("lost", 1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let listener = OutcomeListener::new(Arc::clone(&stats), Arc::clone(&pending))
            .with_ttl(Duration::from_millis(50));
        let worker = std::thread::spawn(move || listener.run(rx, Shutdown::new()));

        // Answered shares arrive faster than the listen slice, so the receive
        // never times out.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut nonce = 100;
        while pending.contains("lost", 1) && Instant::now() < deadline {
            pending.insert("busy", nonce);
            tx.send(ShareOutcome {
                job_id: "busy".into(),
                nonce,
                accepted: true,
            })
            .unwrap();
            nonce += 1;
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(!pending.contains("lost", 1), "unanswered share never expired");
        drop(tx);
        worker.join().unwrap();
        assert!(stats.snapshot().shares_accepted > 0);
    }

    #[test]
    fn prune_forgets_old_entries() {
        let pending = PendingShares::new();
        pending.insert("j1", 1);
        assert_eq!(pending.prune(Duration::from_secs(60)), 0);
        assert_eq!(pending.prune(Duration::ZERO), 1);
        assert!(pending.is_empty());
    }
}

// src/miner/job.rs
//! Current unit of work and its publication to the dispatchers
//!
//! A [`Job`] is immutable once published. [`JobBroadcast`] swaps whole
//! `Arc<Job>` records, so a reader sees every field from the same version and
//! taking a snapshot never copies the program bytecode.

use crate::utils::Shutdown;
use arc_swap::ArcSwap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Length of the block header template
pub const HEADER_LEN: usize = 80;

/// Byte offset of the 32-bit nonce inside the header
pub const NONCE_OFFSET: usize = 76;

/// Upper bound on a single condvar wait, so cancellation is noticed
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// One unit of mining work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Publication counter, stamped by [`JobBroadcast::replace`]; 0 = no work yet
    pub version: u64,
    /// Opaque token used to correlate submissions
    pub id: String,
    /// Header template; the nonce lives in bytes 76..80
    pub header: [u8; HEADER_LEN],
    /// Bytecode defining the job-specific hash function
    pub program: Vec<u8>,
    /// Minimum leading-zero-bit count for a share
    pub difficulty_target: u32,
}

impl Job {
    /// Builds an unpublished job; the version is assigned on publication
    pub fn new(
        id: impl Into<String>,
        header: [u8; HEADER_LEN],
        program: Vec<u8>,
        difficulty_target: u32,
    ) -> Self {
        Job {
            version: 0,
            id: id.into(),
            header,
            program,
            difficulty_target,
        }
    }

    /// Placeholder held by the broadcast before the first publish
    fn uninitialized() -> Self {
        Job::new(String::new(), [0u8; HEADER_LEN], Vec::new(), u32::MAX)
    }

    pub fn is_initialized(&self) -> bool {
        self.version != 0
    }
}

/// Writes `nonce` into the header, little-endian, at offset 76
pub fn write_nonce(header: &mut [u8; HEADER_LEN], nonce: u32) {
    header[NONCE_OFFSET..].copy_from_slice(&nonce.to_le_bytes());
}

/// Reads the little-endian nonce at offset 76
pub fn read_nonce(header: &[u8; HEADER_LEN]) -> u32 {
    u32::from_le_bytes([
        header[NONCE_OFFSET],
        header[NONCE_OFFSET + 1],
        header[NONCE_OFFSET + 2],
        header[NONCE_OFFSET + 3],
    ])
}

/// Holds the single current job
///
/// Writers are serialised by `published`, which also stamps versions and
/// backs the condvar used to wake waiters. Readers never take the lock.
pub struct JobBroadcast {
    current: ArcSwap<Job>,
    published: Mutex<u64>,
    changed: Condvar,
}

impl Default for JobBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBroadcast {
    pub fn new() -> Self {
        JobBroadcast {
            current: ArcSwap::from_pointee(Job::uninitialized()),
            published: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// Publishes `job` as the current work and returns its version
    ///
    /// Any version already set on `job` is overwritten with `previous + 1`.
    pub fn replace(&self, mut job: Job) -> u64 {
        let mut published = self
            .published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let version = *published + 1;
        job.version = version;
        self.current.store(Arc::new(job));
        *published = version;

        self.changed.notify_all();
        version
    }

    /// Consistent view of the current job
    pub fn snapshot(&self) -> Arc<Job> {
        self.current.load_full()
    }

    pub fn current_version(&self) -> u64 {
        self.current.load().version
    }

    /// Blocks until some job has been published
    ///
    /// Returns `None` if shutdown is triggered first.
    pub fn await_first_job(&self, shutdown: &Shutdown) -> Option<Arc<Job>> {
        loop {
            if shutdown.is_triggered() {
                return None;
            }
            if let Some(job) = self.wait_for_newer(0, WAIT_SLICE) {
                return Some(job);
            }
        }
    }

    /// Waits up to `timeout` for a job newer than `version`
    pub fn wait_for_newer(&self, version: u64, timeout: Duration) -> Option<Arc<Job>> {
        let published = self
            .published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let (published, _) = self
            .changed
            .wait_timeout_while(published, timeout, |latest| *latest <= version)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if *published > version {
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// Wakes every waiter without publishing, so they can re-check shutdown
    pub fn notify_waiters(&self) {
        let _guard = self
            .published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn job_filled_with(byte: u8) -> Job {
        Job::new(format!("job-{byte}"), [byte; HEADER_LEN], vec![byte; 512], 8)
    }

    #[test]
    fn nonce_round_trip_is_little_endian() {
        let mut header = [0xAAu8; HEADER_LEN];
        write_nonce(&mut header, 0x1234_5678);

        assert_eq!(&header[76..80], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(read_nonce(&header), 0x1234_5678);
        assert!(header[..76].iter().all(|&b| b == 0xAA));

        for nonce in [0, 1, u32::MAX, 0x8000_0000] {
            write_nonce(&mut header, nonce);
            assert_eq!(read_nonce(&header), nonce);
        }
    }

    #[test]
    fn starts_uninitialized() {
        let jobs = JobBroadcast::new();
        assert_eq!(jobs.current_version(), 0);
        assert!(!jobs.snapshot().is_initialized());
    }

    #[test]
    fn replace_stamps_increasing_versions() {
        let jobs = JobBroadcast::new();
        let mut stale = job_filled_with(1);
        stale.version = 99;

        assert_eq!(jobs.replace(stale), 1);
        assert_eq!(jobs.replace(job_filled_with(2)), 2);
        assert_eq!(jobs.replace(job_filled_with(3)), 3);

        let snap = jobs.snapshot();
        assert_eq!(snap.version, 3);
        assert_eq!(snap.id, "job-3");
    }

    #[test]
    fn snapshot_never_mixes_versions() {
        let jobs = Arc::new(JobBroadcast::new());
        jobs.replace(job_filled_with(0));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let jobs = Arc::clone(&jobs);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut last_version = 0;
                    while !done.load(Ordering::Relaxed) {
                        let snap = jobs.snapshot();
                        let marker = snap.header[0];
                        assert!(snap.header[..76].iter().all(|&b| b == marker));
                        assert!(snap.program.iter().all(|&b| b == marker));
                        assert_eq!(snap.id, format!("job-{marker}"));
                        assert!(snap.version >= last_version);
                        last_version = snap.version;
                    }
                })
            })
            .collect();

        for round in 1..=2_000u32 {
            jobs.replace(job_filled_with((round % 251) as u8));
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(jobs.current_version(), 2_001);
    }

    #[test]
    fn await_first_job_wakes_on_publish() {
        let jobs = Arc::new(JobBroadcast::new());
        let shutdown = Shutdown::new();

        let publisher = {
            let jobs = Arc::clone(&jobs);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                jobs.replace(job_filled_with(7))
            })
        };

        let job = jobs.await_first_job(&shutdown).expect("job published");
        assert_eq!(job.version, 1);
        assert_eq!(job.id, "job-7");
        assert_eq!(publisher.join().unwrap(), 1);
    }

    #[test]
    fn await_first_job_gives_up_on_shutdown() {
        let jobs = JobBroadcast::new();
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(jobs.await_first_job(&shutdown).is_none());
    }

    #[test]
    fn wait_for_newer_times_out_without_publish() {
        let jobs = JobBroadcast::new();
        jobs.replace(job_filled_with(1));

        let started = Instant::now();
        assert!(jobs.wait_for_newer(1, Duration::from_millis(20)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));

        let newer = jobs.wait_for_newer(0, Duration::from_millis(20)).unwrap();
        assert_eq!(newer.version, 1);
    }
}

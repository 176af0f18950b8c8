// src/network/feed.rs
//! Job feed seam
//!
//! A [`JobFeed`] produces new work; [`run_feed`] polls it on the async runtime
//! and publishes each new job to the [`JobBroadcast`]. Failures are retried
//! with bounded exponential backoff; once the attempt budget is spent the feed
//! is flagged degraded and polling continues at the maximum delay.

use crate::miner::job::{HEADER_LEN, Job, JobBroadcast};
use crate::stats::LinkStatus;
use crate::utils::{Backoff, MinerError, RetryConfig, Shutdown};
use rand::{RngCore, SeedableRng, rngs::StdRng};
use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of mining jobs
pub trait JobFeed {
    fn name(&self) -> &str;

    /// Fetches work; `Ok(None)` means nothing new since the last poll
    fn poll(&mut self) -> impl Future<Output = Result<Option<Job>, MinerError>> + Send;
}

/// Everything [`run_feed`] publishes into
pub struct FeedTarget {
    pub jobs: Arc<JobBroadcast>,
    pub status: Arc<LinkStatus>,
    pub shutdown: Shutdown,
}

/// Polls `feed` until shutdown, publishing every new job
pub async fn run_feed<F: JobFeed + Send>(
    mut feed: F,
    target: FeedTarget,
    poll_interval: Duration,
    retry: RetryConfig,
) {
    let mut backoff = Backoff::new(retry);
    log::info!("Job feed '{}' started", feed.name());

    loop {
        let delay = match feed.poll().await {
            Ok(job) => {
                backoff.reset();
                target.status.set_feed_degraded(false);
                if let Some(job) = job {
                    let id = job.id.clone();
                    let version = target.jobs.replace(job);
                    log::info!("New job {} (v{})", id, version);
                }
                poll_interval
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    log::warn!(
                        "Job feed '{}' failed (attempt {}): {}, retrying in {:?}",
                        feed.name(),
                        backoff.attempts(),
                        e,
                        delay
                    );
                    delay
                }
                None => {
                    if !target.status.feed_degraded() {
                        log::error!(
                            "Job feed '{}' still failing after {} attempts: {}",
                            feed.name(),
                            backoff.attempts(),
                            e
                        );
                    }
                    target.status.set_feed_degraded(true);
                    backoff.max_delay()
                }
            },
        };

        tokio::select! {
            _ = target.shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    log::info!("Job feed '{}' stopped", feed.name());
}

/// On-disk work description
#[derive(Debug, Deserialize)]
struct WorkFile {
    id: String,
    /// 80-byte header template, hex
    header: String,
    /// Program bytecode, hex
    program: String,
    difficulty_target: u32,
}

impl WorkFile {
    fn into_job(self) -> Result<Job, MinerError> {
        let header_bytes = hex::decode(self.header.trim())?;
        let header: [u8; HEADER_LEN] = header_bytes.as_slice().try_into().map_err(|_| {
            MinerError::ProtocolError(format!(
                "Header must be {} bytes, got {}",
                HEADER_LEN,
                header_bytes.len()
            ))
        })?;
        let program = hex::decode(self.program.trim())?;
        if program.is_empty() {
            return Err(MinerError::ProtocolError("Empty program".into()));
        }
        if self.difficulty_target > 256 {
            return Err(MinerError::ProtocolError(format!(
                "Difficulty target {} exceeds 256 bits",
                self.difficulty_target
            )));
        }
        Ok(Job::new(self.id, header, program, self.difficulty_target))
    }
}

/// Reads jobs from a JSON work file kept current by an external fetcher
///
/// A job is republished only when its id, header, program or target change;
/// rewriting the file with the same work is not a new job.
pub struct FileJobFeed {
    path: PathBuf,
    name: String,
    last_content: Option<String>,
    last_job: Option<Job>,
}

impl FileJobFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        FileJobFeed {
            name: path.display().to_string(),
            path,
            last_content: None,
            last_job: None,
        }
    }
}

impl JobFeed for FileJobFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self) -> impl Future<Output = Result<Option<Job>, MinerError>> + Send {
        async move {
            let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                MinerError::NetworkError(format!("Cannot read {}: {}", self.path.display(), e))
            })?;
            if self.last_content.as_deref() == Some(content.as_str()) {
                return Ok(None);
            }

            let work: WorkFile = serde_json::from_str(&content)?;
            let job = work.into_job()?;
            self.last_content = Some(content);
            if self.last_job.as_ref() == Some(&job) {
                return Ok(None);
            }
            self.last_job = Some(job.clone());
            Ok(Some(job))
        }
    }
}

/// Random work for benchmarks, refreshed on a fixed interval
pub struct SyntheticJobFeed {
    rng: StdRng,
    refresh: Duration,
    program_len: usize,
    difficulty_target: u32,
    issued: u64,
    last_issue: Option<Instant>,
}

impl SyntheticJobFeed {
    pub fn new(refresh: Duration, program_len: usize, difficulty_target: u32) -> Self {
        SyntheticJobFeed {
            rng: StdRng::from_entropy(),
            refresh,
            program_len,
            difficulty_target,
            issued: 0,
            last_issue: None,
        }
    }

    /// Builds the next job regardless of the refresh interval
    pub fn next_job(&mut self) -> Job {
        let mut header = [0u8; HEADER_LEN];
        self.rng.fill_bytes(&mut header);
        let mut program = vec![0u8; self.program_len.max(1)];
        self.rng.fill_bytes(&mut program);

        self.issued += 1;
        self.last_issue = Some(Instant::now());
        Job::new(
            format!("synthetic-{}", self.issued),
            header,
            program,
            self.difficulty_target,
        )
    }
}

impl JobFeed for SyntheticJobFeed {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn poll(&mut self) -> impl Future<Output = Result<Option<Job>, MinerError>> + Send {
        let due = self
            .last_issue
            .is_none_or(|issued| issued.elapsed() >= self.refresh);
        let job = due.then(|| self.next_job());
        async move { Ok(job) }
    }
}

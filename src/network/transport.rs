// src/network/transport.rs
//! Share submission seam
//!
//! A [`SubmitTransport`] takes share candidates off the submitter thread and
//! reports accept/reject outcomes later through an [`OutcomeSender`],
//! correlated by job id and nonce. Network transports (solo RPC, pool, stratum)
//! live outside this crate; two local sinks are provided here.

use crate::miner::backend::cpu::{program_digest, reference_digest};
use crate::miner::evaluator::{ShareCandidate, leading_zero_bits};
use crate::miner::job::JobBroadcast;
use crate::utils::error::MinerError;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Arc;

/// Network verdict on a submitted share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareOutcome {
    pub job_id: String,
    pub nonce: u32,
    pub accepted: bool,
}

impl ShareOutcome {
    pub fn for_candidate(candidate: &ShareCandidate, accepted: bool) -> Self {
        ShareOutcome {
            job_id: candidate.job_id.clone(),
            nonce: candidate.nonce,
            accepted,
        }
    }
}

/// Channel end a transport reports outcomes on
pub type OutcomeSender = Sender<ShareOutcome>;

/// Creates the outcome channel shared by a transport and the outcome listener
pub fn outcome_channel() -> (OutcomeSender, Receiver<ShareOutcome>) {
    crossbeam_channel::unbounded()
}

/// Consumer of share candidates
pub trait SubmitTransport: Send {
    fn name(&self) -> &str;

    /// Hands one candidate to the network
    ///
    /// Returning `Err` asks the submitter to retry with backoff.
    fn submit(&mut self, candidate: &ShareCandidate) -> Result<(), MinerError>;
}

impl SubmitTransport for Box<dyn SubmitTransport> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn submit(&mut self, candidate: &ShareCandidate) -> Result<(), MinerError> {
        (**self).submit(candidate)
    }
}

/// Writes each candidate as one JSON line for an external submitter process
pub struct JsonLinesTransport {
    name: String,
    writer: Box<dyn Write + Send>,
}

impl JsonLinesTransport {
    /// Opens `output` for appending; `-` writes to stdout
    pub fn open(output: &str) -> Result<Self, MinerError> {
        if output == "-" {
            return Ok(Self::from_writer("stdout", std::io::stdout()));
        }
        let file = OpenOptions::new().create(true).append(true).open(output)?;
        Ok(Self::from_writer(output, BufWriter::new(file)))
    }

    pub fn from_writer(name: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        JsonLinesTransport {
            name: name.into(),
            writer: Box::new(writer),
        }
    }
}

impl SubmitTransport for JsonLinesTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, candidate: &ShareCandidate) -> Result<(), MinerError> {
        serde_json::to_writer(&mut self.writer, candidate)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Re-checks candidates against the CPU reference hash and answers at once
///
/// Used by benchmarks, where there is no network to ask. Shares computed by a
/// device whose kernel differs from the reference hash are rejected.
pub struct LocalVerifier {
    jobs: Arc<JobBroadcast>,
    outcomes: OutcomeSender,
}

impl LocalVerifier {
    pub fn new(jobs: Arc<JobBroadcast>, outcomes: OutcomeSender) -> Self {
        LocalVerifier { jobs, outcomes }
    }

    fn verify(&self, candidate: &ShareCandidate) -> bool {
        let job = self.jobs.snapshot();
        if job.version != candidate.job_version {
            return false;
        }
        let digest = reference_digest(&program_digest(&job.program), &job.header, candidate.nonce);
        digest == candidate.digest && leading_zero_bits(&digest) >= job.difficulty_target
    }
}

impl SubmitTransport for LocalVerifier {
    fn name(&self) -> &str {
        "local-verifier"
    }

    fn submit(&mut self, candidate: &ShareCandidate) -> Result<(), MinerError> {
        let accepted = self.verify(candidate);
        self.outcomes
            .send(ShareOutcome::for_candidate(candidate, accepted))
            .map_err(|e| MinerError::ChannelError(format!("Outcome send failed: {}", e)))
    }
}

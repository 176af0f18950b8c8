// src/miner/mod.rs
//! Core mining functionality
//!
//! This module contains the mining pipeline:
//! - Job publication shared by every device
//! - Per-device dispatch loops over pluggable compute backends
//! - Share evaluation, submission and outcome tracking
//! - The supervisor owning all worker threads

/// Compute device backends (CPU reference, OpenCL)
pub mod backend;

/// Current job and its atomic replace/snapshot
pub mod job;

/// Nonce range assignment per device
pub mod nonce;

/// Per-device dispatch loop
///
/// Uploads each new job's program and issues hash batches until the job is
/// replaced or mining stops.
pub mod dispatcher;

/// Leading-zero scan of hash batches
pub mod evaluator;

/// Candidate hand-off to the transport and outcome correlation
pub mod submitter;

/// Thread ownership and ordered shutdown
pub mod supervisor;

// Re-export main components for cleaner imports
pub use self::backend::{BufferCapacities, ComputeBackend, CpuBackend, Digest};
pub use self::dispatcher::{DeviceDispatcher, DispatchContext, HashBatch};
pub use self::evaluator::{ShareCandidate, ShareEvaluator, leading_zero_bits};
pub use self::job::{Job, JobBroadcast};
pub use self::submitter::{OutcomeListener, PendingShares, Submitter};
pub use self::supervisor::{AppContext, BackendFactory, PipelineSettings, Supervisor};

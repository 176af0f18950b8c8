// src/utils/error.rs
use crate::miner::dispatcher::HashBatch;
use crate::miner::evaluator::ShareCandidate;
use serde_json;
use std::io;
use thiserror::Error;

/// Main error type for the mining application
///
/// Covers startup configuration problems, compute device failures,
/// work/submission transport failures and internal channel breakage.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Invalid or missing startup parameters
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Compute platform/device enumeration or buffer allocation failure
    #[error("Device initialisation error: {0}")]
    DeviceInitError(String),

    /// Failure while a device was dispatching work
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Job feed or submission transport connectivity failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Malformed work description or transport message
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Worker thread or async task execution errors
    #[error("Task execution error: {0}")]
    TaskError(String),
}

/// Converts a failed hand-off of a hash batch to the evaluator.
///
/// Only happens once the evaluator thread is gone, which ends the dispatcher.
impl From<crossbeam_channel::SendError<HashBatch>> for MinerError {
    fn from(e: crossbeam_channel::SendError<HashBatch>) -> Self {
        MinerError::ChannelError(format!("Hash batch send failed: {}", e))
    }
}

impl From<crossbeam_channel::SendError<ShareCandidate>> for MinerError {
    fn from(e: crossbeam_channel::SendError<ShareCandidate>) -> Self {
        MinerError::ChannelError(format!("Share send failed: {}", e))
    }
}

/// Converts hex decoding errors into MinerError
///
/// Used when a work description carries invalid header or program hex.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}

#[cfg(feature = "opencl")]
impl From<ocl::Error> for MinerError {
    fn from(e: ocl::Error) -> Self {
        MinerError::DeviceError(format!("OpenCL: {}", e))
    }
}

// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of compute device a dispatcher drives
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Host CPU, hashed through a dedicated rayon pool
    Cpu,
    /// OpenCL GPU
    Gpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Gpu => write!(f, "GPU"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c" | "cpu" => Ok(DeviceKind::Cpu),
            "g" | "gpu" => Ok(DeviceKind::Gpu),
            other => Err(format!("Invalid miner type - must be GPU or CPU: {}", other)),
        }
    }
}

/// How devices pick nonce ranges within a job
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoncePartition {
    /// Time-seeded random start per device; ranges may overlap
    #[default]
    Random,

    /// Device `i` of `n` starts at `i * unit` and steps by `n * unit`, where
    /// `unit` is the largest batch size of any device
    Strided,
}

impl fmt::Display for NoncePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoncePartition::Random => write!(f, "random"),
            NoncePartition::Strided => write!(f, "strided"),
        }
    }
}

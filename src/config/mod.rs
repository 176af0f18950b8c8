// src/config/mod.rs
//! Configuration management for the miner
//!
//! Handles loading the TOML configuration file, parsing device
//! descriptions and generating a commented template.

/// Core configuration implementation
///
/// Contains the [`Config`] struct and the work/submit sections.
pub mod config;

/// Compute device descriptions (`type,units[,batch,platform,device]`)
pub mod device;

// Re-export key items for easy access
pub use config::{Config, SubmitConfig, WorkConfig};
pub use device::DeviceSpec;

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads miner configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
pub fn generate_template() -> String {
    Config::generate_template()
}

// src/config/config.rs
use crate::{
    config::device::DeviceSpec, miner::nonce::stride_unit, types::NoncePartition,
    utils::backoff::RetryConfig, utils::error::MinerError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for the mining application
///
/// Describes the devices to drive, where work comes from and where found
/// shares go. Transport-specific settings (pool URLs, credentials) belong to
/// whatever process produces the work file and consumes the share output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Devices to mine on, as `type,units[,batch,platform,device]` strings
    /// (default: one CPU device using every core)
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceSpec>,

    /// Nonce range assignment across devices
    #[serde(default)]
    pub nonce_partition: NoncePartition,

    /// Capacity of the hash batch and share queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds between status lines
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// OpenCL kernel source used by GPU devices
    #[serde(default = "default_kernel_path")]
    pub kernel_path: PathBuf,

    /// Where jobs come from
    pub work: WorkConfig,

    /// Where share candidates go
    #[serde(default)]
    pub submit: SubmitConfig,

    /// Retry policy for the feed and submission
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Work file polled for new jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkConfig {
    /// JSON work description written by the job fetcher
    pub path: PathBuf,
    /// Milliseconds between polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Share output written as JSON lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    /// Output file; `-` means stdout
    #[serde(default = "default_submit_output")]
    pub output: String,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        SubmitConfig {
            output: default_submit_output(),
        }
    }
}

fn default_devices() -> Vec<DeviceSpec> {
    vec![DeviceSpec::cpu(num_cpus::get() as u32)]
}

fn default_queue_capacity() -> usize {
    256
}

fn default_stats_interval() -> u64 {
    10
}

fn default_kernel_path() -> PathBuf {
    PathBuf::from("dyn_miner2.cl")
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_submit_output() -> String {
    "-".into()
}

impl Config {
    /// Loads configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml(&config_str)
    }

    /// Parses and validates configuration text
    pub fn from_toml(text: &str) -> Result<Self, MinerError> {
        let config: Config = toml::from_str(text)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no component can run with
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.devices.is_empty() {
            return Err(MinerError::ConfigError("Missing argument: miner".into()));
        }
        for device in &self.devices {
            device.validate()?;
        }
        if self.nonce_partition == NoncePartition::Strided {
            stride_unit(self.devices.iter().map(|d| d.batch_size))?;
        }
        if self.queue_capacity == 0 {
            return Err(MinerError::ConfigError(
                "queue_capacity must be positive".into(),
            ));
        }
        if self.stats_interval_secs == 0 {
            return Err(MinerError::ConfigError(
                "stats_interval_secs must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(MinerError::ConfigError(
                "retry.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Generates a commented configuration template
    pub fn generate_template() -> String {
        let mut template = String::new();
        template.push_str("# DynMiner Configuration\n\n");
        template.push_str("# Devices: [CPU|GPU],<units>[,<batch size>,<platform id>,<device id>]\n");
        template.push_str("#   CPU units = threads, GPU units = work-group size\n");
        template.push_str("devices = [\"CPU,4\"]\n");
        template.push_str("# Nonce assignment: random or strided\n");
        template.push_str("nonce_partition = \"random\"\n");
        template.push_str("queue_capacity = 256\n");
        template.push_str("stats_interval_secs = 10\n");
        template.push_str("kernel_path = \"dyn_miner2.cl\"\n\n");

        template.push_str("[work]\n");
        template.push_str("# JSON work file: {id, header, program, difficulty_target}\n");
        template.push_str("path = \"work.json\"\n");
        template.push_str("poll_interval_ms = 500\n\n");

        template.push_str("[submit]\n");
        template.push_str("# Share candidates as JSON lines; \"-\" for stdout\n");
        template.push_str("output = \"shares.jsonl\"\n\n");

        template.push_str("[retry]\n");
        template.push_str("initial_delay_ms = 500\n");
        template.push_str("max_delay_ms = 30000\n");
        template.push_str("multiplier = 2.0\n");
        template.push_str("max_attempts = 6\n");

        template
    }
}

// src/cli/commands.rs
use crate::config::DeviceSpec;
use crate::types::NoncePartition;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// DynMiner - multi-device proof-of-work miner
#[derive(Parser, Debug)]
#[command(name = "dynminer-rs")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Mine jobs from the configured work file
    Start(StartOptions),

    /// Mine synthetic jobs and report the hash rate
    Benchmark(BenchmarkOptions),

    /// Generate configuration file template
    Config(ConfigOptions),

    /// List the compute devices this build can drive
    Devices,
}

/// Options for starting the mining operation
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Device to mine on, `[CPU|GPU],<units>[,<batch>,<platform>,<device>]`
    /// (repeatable, replaces the configured devices)
    #[arg(short, long = "miner", value_name = "PARAMS")]
    pub miners: Vec<DeviceSpec>,

    /// Work file to poll (overrides config)
    #[arg(short, long)]
    pub work: Option<PathBuf>,

    /// Nonce assignment across devices (overrides config)
    #[arg(short, long)]
    pub partition: Option<NoncePartition>,
}

/// Options for running mining benchmarks
#[derive(Parser, Debug)]
pub struct BenchmarkOptions {
    /// Device to benchmark (repeatable); defaults to one CPU device
    #[arg(short, long = "miner", value_name = "PARAMS")]
    pub miners: Vec<DeviceSpec>,

    /// CPU threads when no device is given
    #[arg(short, long, default_value_t = num_cpus::get() as u32)]
    pub threads: u32,

    /// Duration of benchmark in seconds
    #[arg(short, long, default_value_t = 60)]
    pub duration: u64,

    /// Leading zero bits a share needs
    #[arg(long, default_value_t = 16)]
    pub difficulty: u32,

    /// Seconds between synthetic job replacements
    #[arg(long, default_value_t = 10)]
    pub refresh: u64,

    /// Synthetic program length in bytes
    #[arg(long, default_value_t = 4096)]
    pub program_len: usize,

    /// OpenCL kernel source for GPU devices
    #[arg(short, long, default_value = "dyn_miner2.cl")]
    pub kernel: PathBuf,
}

impl BenchmarkOptions {
    /// Devices to run, falling back to a single CPU device
    pub fn devices(&self) -> Vec<DeviceSpec> {
        if self.miners.is_empty() {
            vec![DeviceSpec::cpu(self.threads.max(1))]
        } else {
            self.miners.clone()
        }
    }
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,
}

// src/main.rs
use clap::{CommandFactory, Parser};
use dynminer_rs::cli::{Action, BenchmarkOptions, ConfigOptions, StartOptions};
use dynminer_rs::miner::supervisor::device_backends;
use dynminer_rs::network::{
    FileJobFeed, JsonLinesTransport, LocalVerifier, SyntheticJobFeed, outcome_channel, run_feed,
};
use dynminer_rs::stats::format_hashrate;
use dynminer_rs::utils::RetryConfig;
use dynminer_rs::utils::logging::init_bench_logging;
use dynminer_rs::{self, *};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// Main entry point for the miner
///
/// Configuration errors are printed with usage and exit with status 2;
/// anything else is propagated.
fn main() -> Result<(), MinerError> {
    let cli = Commands::parse();

    let result = match cli.action {
        Action::Start(opts) => start_mining(opts),
        Action::Benchmark(opts) => run_benchmark(opts),
        Action::Config(opts) => generate_config(opts),
        Action::Devices => list_devices(),
    };

    if let Err(MinerError::ConfigError(msg)) = &result {
        eprintln!("{}\n\n{}", msg, Commands::command().render_usage());
        std::process::exit(2);
    }
    result
}

/// Mines jobs from the configured work file until interrupted
///
/// # Flow
/// 1. Loads the configuration and applies CLI overrides
/// 2. Starts the pipeline threads (devices open once the first job arrives)
/// 3. Polls the work file on the async runtime
/// 4. Stops on Ctrl-C or once every device has stopped
fn start_mining(opts: StartOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let mut config = config::load(&opts.config)?;
    // Apply CLI overrides
    if !opts.miners.is_empty() {
        config.devices = opts.miners;
    }
    if let Some(work) = opts.work {
        config.work.path = work;
    }
    if let Some(partition) = opts.partition {
        config.nonce_partition = partition;
    }
    config.validate()?;

    let ctx = AppContext::new();
    let transport = JsonLinesTransport::open(&config.submit.output)?;
    // Verdicts for JSON-line shares come from outside the process; the sender
    // stays alive so the outcome listener keeps expiring pending shares.
    let (outcome_tx, outcome_rx) = outcome_channel();

    let supervisor = Supervisor::start(
        ctx.clone(),
        PipelineSettings::from_config(&config),
        device_backends(config.kernel_path.clone()),
        transport,
        outcome_rx,
    )?;

    let rt = Runtime::new()?;
    let feed = FileJobFeed::new(config.work.path.clone());
    let poll_interval = Duration::from_millis(config.work.poll_interval_ms);
    rt.block_on(async {
        tokio::select! {
            _ = run_feed(feed, ctx.feed_target(), poll_interval, config.retry.clone()) => {}
            _ = tokio::signal::ctrl_c() => log::info!("Interrupted, stopping"),
            _ = supervisor.dispatchers_exited() => log::error!("No device is mining any more, stopping"),
        }
    });

    let stopped = supervisor.shutdown();
    drop(outcome_tx);
    stopped
}

/// Mines synthetic jobs for a fixed time and reports the hash rate
///
/// Shares are checked against the CPU reference hash, so accepted/rejected
/// counts show whether a device computes the expected digests.
fn run_benchmark(opts: BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    if opts.difficulty > 256 {
        return Err(MinerError::InputError(format!(
            "Difficulty {} exceeds 256 bits",
            opts.difficulty
        )));
    }
    let devices = opts.devices();
    for device in &devices {
        device.validate()?;
    }

    let ctx = AppContext::new();
    let (outcome_tx, outcome_rx) = outcome_channel();
    let transport = LocalVerifier::new(Arc::clone(&ctx.jobs), outcome_tx);
    let settings = PipelineSettings {
        devices,
        partition: NoncePartition::default(),
        queue_capacity: 256,
        retry: RetryConfig::default(),
        stats_interval: Some(Duration::from_secs(5)),
    };
    let supervisor = Supervisor::start(
        ctx.clone(),
        settings,
        device_backends(opts.kernel.clone()),
        transport,
        outcome_rx,
    )?;

    log::info!(
        "Starting benchmark for {} seconds at difficulty {}",
        opts.duration,
        opts.difficulty
    );
    let feed = SyntheticJobFeed::new(
        Duration::from_secs(opts.refresh.max(1)),
        opts.program_len,
        opts.difficulty,
    );
    let started = Instant::now();
    let rt = Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            _ = run_feed(feed, ctx.feed_target(), Duration::from_millis(100), RetryConfig::default()) => {}
            _ = tokio::time::sleep(Duration::from_secs(opts.duration)) => {}
            _ = tokio::signal::ctrl_c() => log::info!("Interrupted, stopping early"),
            _ = supervisor.dispatchers_exited() => log::error!("No device is mining any more, stopping"),
        }
    });
    let elapsed = started.elapsed();
    supervisor.shutdown()?;

    // Report final results
    let stats = ctx.stats.snapshot();
    let hashrate = stats.hashes_tried as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    log::info!("Benchmark results:");
    log::info!("Total hashes: {}", stats.hashes_tried);
    log::info!("Average hashrate: {}", format_hashrate(hashrate));
    log::info!(
        "Shares: {} found, {} accepted, {} rejected",
        stats.shares_found,
        stats.shares_accepted,
        stats.shares_rejected
    );
    log::logger().flush(); // Ensure final results appear

    Ok(())
}

/// Writes the configuration template to `opts.output`
fn generate_config(opts: ConfigOptions) -> Result<(), MinerError> {
    std::fs::write(&opts.output, config::generate_template())?;
    println!("Configuration template written to {}", opts.output.display());
    Ok(())
}

fn list_devices() -> Result<(), MinerError> {
    utils::init_logging();
    miner::backend::list_devices()
}

// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! Sets up `env_logger` with the miner's log format. Both entry points respect
//! `RUST_LOG` when it is set.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes logging for normal mining runs
///
/// Defaults to Info unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    init_with_default(LevelFilter::Info);
}

/// Initializes logging for benchmark runs
///
/// Same format as [`init_logging`], but defaults to Debug so per-device
/// progress is visible.
pub fn init_bench_logging() {
    init_with_default(LevelFilter::Debug);
}

fn init_with_default(level: LevelFilter) {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(level);
    } else {
        builder.parse_env("RUST_LOG");
    }

    // A second init (e.g. from tests) is not an error worth failing over.
    let _ = builder.try_init();
}

/// Creates the base logger builder
///
/// Format: `[<epoch secs> <level> <module>:<line>] <message>` on stdout.
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();
            let line = record.line().unwrap_or(0);

            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                level,
                module,
                line,
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}

// src/stats/reporter.rs
use crate::stats::aggregator::{LinkStatus, StatsAggregator, StatsSnapshot};
use crate::utils::Shutdown;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::{Components, System};

const UNITS: [&str; 5] = ["H/s", "KH/s", "MH/s", "GH/s", "TH/s"];

/// Statistics related to host performance
#[derive(Debug, Clone)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently used (in bytes)
    pub memory_used: u64,
    /// Current CPU temperature in Celsius
    pub temperature: f32,
}

/// Periodically logs mining progress read from the [`StatsAggregator`]
pub struct StatsReporter {
    stats: Arc<StatsAggregator>,
    status: Arc<LinkStatus>,
    system: System,
    components: Components,
    report_interval: Duration,
    started: Instant,
}

impl StatsReporter {
    /// Creates a reporter logging every `report_interval`
    pub fn new(
        stats: Arc<StatsAggregator>,
        status: Arc<LinkStatus>,
        report_interval: Duration,
    ) -> Self {
        StatsReporter {
            stats,
            status,
            system: System::new_all(),
            components: Components::new_with_refreshed_list(),
            report_interval,
            started: Instant::now(),
        }
    }

    /// Average hash rate since the reporter started
    pub fn average_hashrate(&self, snapshot: &StatsSnapshot) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            snapshot.hashes_tried as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Refreshes and returns host statistics
    pub fn get_hardware_stats(&mut self) -> HardwareStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.components.refresh(true);

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let temperature = self
            .components
            .iter()
            .find(|c| c.label().contains("CPU"))
            .and_then(|c| c.temperature())
            .unwrap_or(0.0);

        HardwareStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
            temperature,
        }
    }

    /// One display line for the current counters
    pub fn report_line(&mut self) -> String {
        let snapshot = self.stats.snapshot();
        let hw = self.get_hardware_stats();

        let mut line = format!(
            "{} | Uptime: {} | S: {} | A: {} | R: {} | N: {} | CPU: {:.1}% | Mem: {} | Temp: {:.1}°C",
            format_hashrate(self.average_hashrate(&snapshot)),
            format_uptime(self.started.elapsed()),
            snapshot.shares_found,
            snapshot.shares_accepted,
            snapshot.shares_rejected,
            snapshot.hashes_tried,
            hw.cpu_usage,
            format_memory(hw.memory_used),
            hw.temperature,
        );
        if self.status.feed_degraded() {
            line.push_str(" | FEED DEGRADED");
        }
        if self.status.submit_degraded() {
            line.push_str(" | SUBMIT DEGRADED");
        }
        line
    }

    /// Spawns the display thread; it stops once `shutdown` is triggered
    pub fn start_reporting(mut self, shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("stats".into())
            .spawn(move || {
                while shutdown.sleep(self.report_interval) {
                    log::info!("{}", self.report_line());
                }
            })
    }
}

/// Scales a hash rate to the largest unit keeping the value >= 1
pub fn format_hashrate(hashrate: f64) -> String {
    let mut value = hashrate.max(0.0);
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Renders a byte count in whole MiB, or GiB with one decimal from 1 GiB up
pub fn format_memory(bytes: u64) -> String {
    const MIB: u64 = 1 << 20;
    const GIB: u64 = 1 << 30;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else {
        format!("{} MiB", bytes / MIB)
    }
}

/// Renders an uptime like `1d2h3m4s`, omitting leading zero units
pub fn format_uptime(uptime: Duration) -> String {
    let mut secs = uptime.as_secs();
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let minutes = secs / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{days}d{hours}h{minutes}m{seconds}s")
    } else if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

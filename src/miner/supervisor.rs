// src/miner/supervisor.rs
//! Thread ownership for the mining pipeline
//!
//! [`Supervisor::start`] spawns one named thread per role and keeps the join
//! handles. Work flows dispatchers -> evaluator -> submitter over bounded
//! channels; each stage ends when its upstream senders are gone, so
//! [`Supervisor::shutdown`] only has to stop the dispatchers and join in
//! pipeline order. If a spawn fails part way, the threads already started
//! are stopped and joined before the error is returned.

use crate::config::{Config, DeviceSpec};
use crate::miner::backend::{ComputeBackend, open_backend};
use crate::miner::dispatcher::{DeviceDispatcher, DispatchContext, HashBatch};
use crate::miner::evaluator::{ShareCandidate, ShareEvaluator};
use crate::miner::job::JobBroadcast;
use crate::miner::nonce::stride_unit;
use crate::miner::submitter::{OutcomeListener, PendingShares, Submitter};
use crate::network::feed::FeedTarget;
use crate::network::transport::{ShareOutcome, SubmitTransport};
use crate::stats::{LinkStatus, StatsAggregator, StatsReporter};
use crate::types::NoncePartition;
use crate::utils::{MinerError, RetryConfig, Shutdown};
use crossbeam_channel::{Receiver, bounded};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// State shared by every component, built once at startup
#[derive(Clone, Default)]
pub struct AppContext {
    pub jobs: Arc<JobBroadcast>,
    pub stats: Arc<StatsAggregator>,
    pub status: Arc<LinkStatus>,
    pub shutdown: Shutdown,
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publication target for a job feed
    pub fn feed_target(&self) -> FeedTarget {
        FeedTarget {
            jobs: Arc::clone(&self.jobs),
            status: Arc::clone(&self.status),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Pipeline shape, usually taken from [`Config`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub devices: Vec<DeviceSpec>,
    pub partition: NoncePartition,
    pub queue_capacity: usize,
    pub retry: RetryConfig,
    /// `None` disables the status line
    pub stats_interval: Option<Duration>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        PipelineSettings {
            devices: config.devices.clone(),
            partition: config.nonce_partition,
            queue_capacity: config.queue_capacity,
            retry: config.retry.clone(),
            stats_interval: Some(Duration::from_secs(config.stats_interval_secs)),
        }
    }
}

/// Opens the backend for `(spec, device index, first program length)`
pub type BackendFactory = Arc<
    dyn Fn(&DeviceSpec, usize, usize) -> Result<Box<dyn ComputeBackend>, MinerError> + Send + Sync,
>;

/// Factory opening real devices, GPUs loading `kernel_path`
pub fn device_backends(kernel_path: PathBuf) -> BackendFactory {
    Arc::new(move |spec: &DeviceSpec, index: usize, program_len: usize| {
        open_backend(spec, index, program_len, &kernel_path)
    })
}

/// Decrements the live dispatcher count when a dispatcher thread ends
struct LiveGuard(Arc<watch::Sender<usize>>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|live| *live -= 1);
    }
}

/// Owner of the pipeline threads
pub struct Supervisor {
    ctx: AppContext,
    dispatchers: Vec<(String, JoinHandle<()>)>,
    stages: Vec<(&'static str, JoinHandle<()>)>,
    reporter: Option<JoinHandle<()>>,
    live_dispatchers: Arc<watch::Sender<usize>>,
}

impl Supervisor {
    /// Spawns every worker
    ///
    /// Dispatchers wait for the first job before opening their device. A
    /// device that fails to open is logged and skipped; the rest keep mining.
    /// When the pipeline cannot be started, shutdown is triggered and every
    /// thread spawned so far is joined before the error is returned.
    pub fn start<T: SubmitTransport + 'static>(
        ctx: AppContext,
        settings: PipelineSettings,
        backends: BackendFactory,
        transport: T,
        outcomes: Receiver<ShareOutcome>,
    ) -> Result<Self, MinerError> {
        if settings.devices.is_empty() {
            return Err(MinerError::ConfigError("Missing argument: miner".into()));
        }

        let mut supervisor = Supervisor {
            ctx,
            dispatchers: Vec::with_capacity(settings.devices.len()),
            stages: Vec::new(),
            reporter: None,
            live_dispatchers: Arc::new(watch::Sender::new(0)),
        };

        if let Err(e) = supervisor.launch(&settings, backends, transport, outcomes) {
            log::error!("Pipeline failed to start: {}", e);
            if let Err(stop_err) = supervisor.shutdown() {
                log::error!("{}", stop_err);
            }
            return Err(e);
        }

        log::info!("Pipeline started with {} device(s)", settings.devices.len());
        Ok(supervisor)
    }

    fn launch<T: SubmitTransport + 'static>(
        &mut self,
        settings: &PipelineSettings,
        backends: BackendFactory,
        transport: T,
        outcomes: Receiver<ShareOutcome>,
    ) -> Result<(), MinerError> {
        let ctx = self.ctx.clone();
        let (batch_tx, batch_rx) = bounded::<HashBatch>(settings.queue_capacity);
        let (share_tx, share_rx) = bounded::<ShareCandidate>(settings.queue_capacity);
        let pending = Arc::new(PendingShares::new());

        // Downstream first, so nothing is sent before its consumer exists.
        let listener = OutcomeListener::new(Arc::clone(&ctx.stats), Arc::clone(&pending));
        let shutdown = ctx.shutdown.clone();
        self.spawn_stage("outcomes", move || listener.run(outcomes, shutdown))?;

        let submitter = Submitter::new(
            transport,
            Arc::clone(&ctx.jobs),
            pending,
            Arc::clone(&ctx.status),
            settings.retry.clone(),
        );
        let shutdown = ctx.shutdown.clone();
        self.spawn_stage("submitter", move || submitter.run(share_rx, shutdown))?;

        let evaluator = ShareEvaluator::new(Arc::clone(&ctx.stats), share_tx);
        self.spawn_stage("evaluator", move || evaluator.run(batch_rx))?;

        let batch_sizes = settings.devices.iter().map(|d| d.batch_size);
        let unit = match settings.partition {
            NoncePartition::Strided => stride_unit(batch_sizes)?,
            NoncePartition::Random => batch_sizes.max().unwrap_or(1),
        };
        let dispatch_ctx = DispatchContext {
            jobs: Arc::clone(&ctx.jobs),
            stats: Arc::clone(&ctx.stats),
            batches: batch_tx,
            partition: settings.partition,
            device_count: settings.devices.len(),
            stride_unit: unit,
        };
        for (index, spec) in settings.devices.iter().enumerate() {
            self.spawn_dispatcher(index, spec.clone(), Arc::clone(&backends), dispatch_ctx.clone())?;
        }
        // Only dispatcher threads hold batch senders from here on.
        drop(dispatch_ctx);

        if let Some(interval) = settings.stats_interval {
            let reporter = StatsReporter::new(Arc::clone(&ctx.stats), Arc::clone(&ctx.status), interval);
            self.reporter = Some(reporter.start_reporting(ctx.shutdown.clone())?);
        }
        Ok(())
    }

    fn spawn_stage<F>(&mut self, name: &'static str, body: F) -> Result<(), MinerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new().name(name.into()).spawn(body)?;
        self.stages.push((name, handle));
        Ok(())
    }

    fn spawn_dispatcher(
        &mut self,
        index: usize,
        spec: DeviceSpec,
        backends: BackendFactory,
        dispatch_ctx: DispatchContext,
    ) -> Result<(), MinerError> {
        let label = spec.label(index);
        let shutdown = self.ctx.shutdown.clone();
        self.live_dispatchers.send_modify(|live| *live += 1);
        let guard = LiveGuard(Arc::clone(&self.live_dispatchers));

        let thread_label = label.clone();
        let handle = std::thread::Builder::new().name(label.clone()).spawn(move || {
            let _guard = guard;
            run_device(&thread_label, index, spec, backends, dispatch_ctx, shutdown);
        })?;
        self.dispatchers.push((label, handle));
        Ok(())
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Number of dispatcher threads still running
    pub fn live_dispatchers(&self) -> usize {
        *self.live_dispatchers.borrow()
    }

    /// True once every dispatcher has stopped, e.g. all devices failed to open
    pub fn all_dispatchers_exited(&self) -> bool {
        self.live_dispatchers() == 0
    }

    /// Resolves once every dispatcher has stopped
    pub async fn dispatchers_exited(&self) {
        let mut live = self.live_dispatchers.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = live.wait_for(|count| *count == 0).await;
    }

    /// Stops the pipeline and joins every thread in pipeline order
    pub fn shutdown(self) -> Result<(), MinerError> {
        log::info!("Shutting down pipeline");
        self.ctx.shutdown.trigger();
        self.ctx.jobs.notify_waiters();

        let mut panicked = Vec::new();
        for (name, handle) in self.dispatchers {
            if handle.join().is_err() {
                panicked.push(name);
            }
        }
        // Stages were spawned downstream first.
        let reporter = self.reporter.map(|handle| ("stats", handle));
        for (name, handle) in self.stages.into_iter().rev().chain(reporter) {
            if handle.join().is_err() {
                panicked.push(name.to_string());
            }
        }

        if panicked.is_empty() {
            log::info!("Pipeline stopped");
            Ok(())
        } else {
            Err(MinerError::TaskError(format!(
                "Threads panicked: {}",
                panicked.join(", ")
            )))
        }
    }
}

fn run_device(
    label: &str,
    index: usize,
    spec: DeviceSpec,
    backends: BackendFactory,
    dispatch_ctx: DispatchContext,
    shutdown: Shutdown,
) {
    let Some(first) = dispatch_ctx.jobs.await_first_job(&shutdown) else {
        log::debug!("{}: stopped before the first job", label);
        return;
    };

    let backend = match backends(&spec, index, first.program.len()) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("{}: {} ({})", label, e, spec);
            return;
        }
    };
    log::info!("{}: mining on {} ({})", label, backend.name(), spec);

    let mut dispatcher = DeviceDispatcher::new(index, spec, backend, dispatch_ctx);
    if let Err(e) = dispatcher.run(&shutdown) {
        log::error!("{}: dispatcher stopped: {}", label, e);
    }
    dispatcher.release();
}

// src/miner/dispatcher.rs
//! Per-device dispatch loop
//!
//! A [`DeviceDispatcher`] repeatedly snapshots the current job, uploads its
//! program when the version changes and issues hash batches until the job is
//! replaced. The version check happens before every batch, so after a replace
//! becomes visible at most the batch already in flight still runs against the
//! old job.

use crate::config::DeviceSpec;
use crate::miner::backend::{BufferCapacities, ComputeBackend, Digest};
use crate::miner::job::{HEADER_LEN, Job, JobBroadcast, write_nonce};
use crate::miner::nonce::{NonceCursor, device_salt};
use crate::stats::StatsAggregator;
use crate::types::NoncePartition;
use crate::utils::{MinerError, Shutdown};
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Digests from one dispatch, tagged with the job they were computed for
#[derive(Debug, Clone)]
pub struct HashBatch {
    pub job_id: String,
    pub job_version: u64,
    pub difficulty_target: u32,
    /// Nonce of `digests[0]`; digest `i` belongs to `base_nonce + i` (wrapping)
    pub base_nonce: u32,
    pub digests: Vec<Digest>,
}

/// Shared pieces every dispatcher needs
#[derive(Clone)]
pub struct DispatchContext {
    pub jobs: Arc<JobBroadcast>,
    pub stats: Arc<StatsAggregator>,
    pub batches: Sender<HashBatch>,
    pub partition: NoncePartition,
    pub device_count: usize,
    /// Strided slot width, the largest batch size of any device
    pub stride_unit: u32,
}

/// Drives one compute device
pub struct DeviceDispatcher {
    index: usize,
    spec: DeviceSpec,
    backend: Box<dyn ComputeBackend>,
    ctx: DispatchContext,
    header: [u8; HEADER_LEN],
    cursor: NonceCursor,
    last_version: u64,
}

impl DeviceDispatcher {
    /// Wraps an opened backend; nothing is uploaded until the first job
    pub fn new(
        index: usize,
        spec: DeviceSpec,
        backend: Box<dyn ComputeBackend>,
        ctx: DispatchContext,
    ) -> Self {
        let cursor = NonceCursor::strided(index, ctx.device_count, ctx.stride_unit);
        DeviceDispatcher {
            index,
            spec,
            backend,
            ctx,
            header: [0u8; HEADER_LEN],
            cursor,
            last_version: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Version of the job whose program is loaded on the device
    pub fn last_version(&self) -> u64 {
        self.last_version
    }

    pub fn capacities(&self) -> BufferCapacities {
        self.backend.capacities()
    }

    /// Mines until shutdown, following every job replacement
    pub fn run(&mut self, shutdown: &Shutdown) -> Result<(), MinerError> {
        while !shutdown.is_triggered() {
            let job = self.ctx.jobs.snapshot();
            if !job.is_initialized() {
                self.ctx.jobs.await_first_job(shutdown);
                continue;
            }
            debug_assert!(job.version >= self.last_version);

            self.mine_job(&job, shutdown)?;
        }

        log::info!("{}: stopped at job version {}", self.name(), self.last_version);
        Ok(())
    }

    /// Hashes `job` until it stops being current; returns the batch count
    pub fn mine_job(&mut self, job: &Arc<Job>, shutdown: &Shutdown) -> Result<u64, MinerError> {
        if job.version != self.last_version {
            self.load_job(job)?;
        }

        self.cursor = NonceCursor::start(
            self.ctx.partition,
            device_salt(self.index, self.spec.platform_id, self.spec.device_id) ^ job.version,
            self.index,
            self.ctx.device_count,
            self.spec.batch_size,
            self.ctx.stride_unit,
        );

        let mut batches = 0;
        while self.ctx.jobs.current_version() == job.version && !shutdown.is_triggered() {
            self.dispatch_batch(job)?;
            batches += 1;
        }

        log::debug!(
            "{}: left job {} (v{}) after {} batches",
            self.name(),
            job.id,
            job.version,
            batches
        );
        Ok(batches)
    }

    /// Uploads a new job's program, growing the device buffer first if needed
    fn load_job(&mut self, job: &Job) -> Result<(), MinerError> {
        let capacity = self.backend.capacities().program;
        if job.program.len() > capacity {
            log::info!(
                "{}: growing program buffer {} -> {} bytes",
                self.name(),
                capacity,
                job.program.len()
            );
            self.backend.grow_program(job.program.len())?;
        }

        self.backend.upload_program(&job.program)?;
        self.header = job.header;
        self.last_version = job.version;

        log::debug!(
            "{}: loaded job {} (v{}, {} byte program, target {})",
            self.name(),
            job.id,
            job.version,
            job.program.len(),
            job.difficulty_target
        );
        Ok(())
    }

    fn dispatch_batch(&mut self, job: &Job) -> Result<(), MinerError> {
        let batch_size = self.spec.batch_size;
        let base_nonce = self.cursor.advance();

        write_nonce(&mut self.header, base_nonce);
        self.backend.upload_header(&self.header)?;

        let mut digests = Vec::with_capacity(batch_size as usize);
        self.backend.dispatch(batch_size, &mut digests)?;
        if digests.len() != batch_size as usize {
            return Err(MinerError::DeviceError(format!(
                "{}: expected {} digests, got {}",
                self.name(),
                batch_size,
                digests.len()
            )));
        }

        self.ctx.batches.send(HashBatch {
            job_id: job.id.clone(),
            job_version: job.version,
            difficulty_target: job.difficulty_target,
            base_nonce,
            digests,
        })?;
        self.ctx.stats.add_hashes(batch_size as u64);
        Ok(())
    }

    /// Releases the device resources held by this dispatcher
    pub fn release(self) {
        log::debug!("{}: releasing device resources", self.backend.name());
        drop(self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::job::read_nonce;
    use crossbeam_channel::{Receiver, unbounded};
    use std::sync::Mutex;

    type Hook = Box<dyn FnMut(usize) + Send>;

    /// Records what each dispatch ran against
    #[derive(Debug, Clone)]
    struct Dispatched {
        marker: u8,
        program: Vec<u8>,
        nonce: u32,
    }

    struct MockBackend {
        capacities: BufferCapacities,
        program: Vec<u8>,
        header: [u8; HEADER_LEN],
        dispatched: Arc<Mutex<Vec<Dispatched>>>,
        grown: Arc<Mutex<Vec<usize>>>,
        hook: Hook,
    }

    impl ComputeBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        fn capacities(&self) -> BufferCapacities {
            self.capacities
        }

        fn grow_program(&mut self, len: usize) -> Result<(), MinerError> {
            self.grown.lock().unwrap().push(len);
            self.capacities.program = len;
            Ok(())
        }

        fn upload_program(&mut self, program: &[u8]) -> Result<(), MinerError> {
            assert!(program.len() <= self.capacities.program, "program overflow");
            self.program = program.to_vec();
            Ok(())
        }

        fn upload_header(&mut self, header: &[u8; HEADER_LEN]) -> Result<(), MinerError> {
            self.header = *header;
            Ok(())
        }

        fn dispatch(&mut self, work_items: u32, out: &mut Vec<Digest>) -> Result<(), MinerError> {
            let count = {
                let mut dispatched = self.dispatched.lock().unwrap();
                dispatched.push(Dispatched {
                    marker: self.header[0],
                    program: self.program.clone(),
                    nonce: read_nonce(&self.header),
                });
                dispatched.len()
            };
            out.extend(std::iter::repeat_n([0xFFu8; 32], work_items as usize));
            (self.hook)(count);
            Ok(())
        }
    }

    struct Harness {
        jobs: Arc<JobBroadcast>,
        stats: Arc<StatsAggregator>,
        batches: Receiver<HashBatch>,
        dispatched: Arc<Mutex<Vec<Dispatched>>>,
        grown: Arc<Mutex<Vec<usize>>>,
        dispatcher: DeviceDispatcher,
    }

    fn job(marker: u8, program_len: usize) -> Job {
        Job::new(format!("job-{marker}"), [marker; HEADER_LEN], vec![marker; program_len], 8)
    }

    /// Where a dispatcher sits among its peers
    #[derive(Clone, Copy)]
    struct Placement {
        partition: NoncePartition,
        index: usize,
        device_count: usize,
        stride_unit: u32,
    }

    impl Placement {
        fn alone(batch: u32) -> Self {
            Placement {
                partition: NoncePartition::Strided,
                index: 0,
                device_count: 1,
                stride_unit: batch,
            }
        }
    }

    fn harness(jobs: Arc<JobBroadcast>, batch: u32, program_cap: usize, hook: Hook) -> Harness {
        placed_harness(jobs, batch, program_cap, hook, Placement::alone(batch))
    }

    fn placed_harness(
        jobs: Arc<JobBroadcast>,
        batch: u32,
        program_cap: usize,
        hook: Hook,
        placement: Placement,
    ) -> Harness {
        let stats = Arc::new(StatsAggregator::new());
        let (tx, rx) = unbounded();
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let grown = Arc::new(Mutex::new(Vec::new()));
        let backend = MockBackend {
            capacities: BufferCapacities::for_batch(program_cap, batch),
            program: Vec::new(),
            header: [0u8; HEADER_LEN],
            dispatched: Arc::clone(&dispatched),
            grown: Arc::clone(&grown),
            hook,
        };
        let spec = DeviceSpec {
            batch_size: batch,
            ..DeviceSpec::cpu(1)
        };
        let ctx = DispatchContext {
            jobs: Arc::clone(&jobs),
            stats: Arc::clone(&stats),
            batches: tx,
            partition: placement.partition,
            device_count: placement.device_count,
            stride_unit: placement.stride_unit,
        };
        Harness {
            jobs,
            stats,
            batches: rx,
            dispatched,
            grown,
            dispatcher: DeviceDispatcher::new(placement.index, spec, Box::new(backend), ctx),
        }
    }

    #[test]
    fn replace_mid_loop_abandons_old_job_within_one_batch() {
        let jobs = Arc::new(JobBroadcast::new());
        jobs.replace(job(1, 32));
        let shutdown = Shutdown::new();

        let hook: Hook = {
            let jobs = Arc::clone(&jobs);
            let shutdown = shutdown.clone();
            Box::new(move |count| match count {
                3 => {
                    jobs.replace(job(2, 32));
                }
                7 => shutdown.trigger(),
                _ => {}
            })
        };
        let mut h = harness(jobs, 16, 32, hook);
        h.dispatcher.run(&shutdown).unwrap();

        let dispatched = h.dispatched.lock().unwrap().clone();
        assert_eq!(dispatched.len(), 7);
        let old: Vec<_> = dispatched.iter().filter(|d| d.marker == 1).collect();
        assert_eq!(old.len(), 3, "v1 dispatches after the replace became visible");
        assert!(dispatched[3..].iter().all(|d| d.marker == 2 && d.program == vec![2; 32]));
        assert!(dispatched[..3].iter().all(|d| d.program == vec![1; 32]));
        assert_eq!(h.dispatcher.last_version(), 2);
        assert_eq!(h.jobs.current_version(), 2);
    }

    #[test]
    fn observed_versions_never_go_backwards() {
        let jobs = Arc::new(JobBroadcast::new());
        jobs.replace(job(1, 8));
        let shutdown = Shutdown::new();

        let hook: Hook = {
            let jobs = Arc::clone(&jobs);
            let shutdown = shutdown.clone();
            Box::new(move |count| {
                if count % 2 == 0 {
                    jobs.replace(job((count / 2 + 1) as u8, 8));
                }
                if count == 20 {
                    shutdown.trigger();
                }
            })
        };
        let mut h = harness(jobs, 4, 8, hook);
        h.dispatcher.run(&shutdown).unwrap();
        drop(h.dispatcher);

        let versions: Vec<u64> = h.batches.iter().map(|b| b.job_version).collect();
        assert_eq!(versions.len(), 20);
        assert!(versions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*versions.last().unwrap(), 10);
    }

    #[test]
    fn larger_program_grows_the_buffer_before_upload() {
        let jobs = Arc::new(JobBroadcast::new());
        jobs.replace(job(1, 16));
        let shutdown = Shutdown::new();

        let hook: Hook = {
            let jobs = Arc::clone(&jobs);
            let shutdown = shutdown.clone();
            Box::new(move |count| match count {
                1 => {
                    jobs.replace(job(2, 200));
                }
                2 => {
                    jobs.replace(job(3, 100));
                }
                3 => shutdown.trigger(),
                _ => {}
            })
        };
        let mut h = harness(jobs, 4, 16, hook);
        h.dispatcher.run(&shutdown).unwrap();

        assert_eq!(*h.grown.lock().unwrap(), vec![200]);
        assert_eq!(h.dispatcher.capacities().program, 200);
        let dispatched = h.dispatched.lock().unwrap();
        assert_eq!(dispatched[1].program.len(), 200);
        assert_eq!(dispatched[2].program.len(), 100);
    }

    #[test]
    fn batches_are_tagged_and_counted() {
        let jobs = Arc::new(JobBroadcast::new());
        jobs.replace(job(5, 8));
        let shutdown = Shutdown::new();

        let hook: Hook = {
            let shutdown = shutdown.clone();
            Box::new(move |count| {
                if count == 4 {
                    shutdown.trigger();
                }
            })
        };
        let mut h = harness(jobs, 32, 8, hook);
        let snapshot = h.jobs.snapshot();
        let batches = h.dispatcher.mine_job(&snapshot, &shutdown).unwrap();
        assert_eq!(batches, 4);
        assert_eq!(h.stats.snapshot().hashes_tried, 4 * 32);

        let received: Vec<HashBatch> = h.batches.try_iter().collect();
        assert_eq!(received.len(), 4);
        for (i, batch) in received.iter().enumerate() {
            assert_eq!(batch.job_id, "job-5");
            assert_eq!(batch.job_version, 1);
            assert_eq!(batch.difficulty_target, 8);
            assert_eq!(batch.digests.len(), 32);
            assert_eq!(batch.base_nonce, 32 * i as u32);
        }

        let dispatched = h.dispatched.lock().unwrap();
        let nonces: Vec<u32> = dispatched.iter().map(|d| d.nonce).collect();
        assert_eq!(nonces, vec![0, 32, 64, 96]);
    }

    /// Mines `batches` batches of the current job and returns their base nonces
    fn mine_batches(h: &mut Harness, batches: usize, shutdown: &Shutdown) -> Vec<u32> {
        let snapshot = h.jobs.snapshot();
        h.dispatcher.mine_job(&snapshot, shutdown).unwrap();
        let bases: Vec<u32> = h.batches.try_iter().map(|b| b.base_nonce).collect();
        assert_eq!(bases.len(), batches);
        bases
    }

    fn stop_after(batches: usize, shutdown: &Shutdown) -> Hook {
        let shutdown = shutdown.clone();
        Box::new(move |count| {
            if count == batches {
                shutdown.trigger();
            }
        })
    }

    #[test]
    fn random_partition_issues_contiguous_batches() {
        let jobs = Arc::new(JobBroadcast::new());
        jobs.replace(job(3, 8));
        let shutdown = Shutdown::new();

        let placement = Placement {
            partition: NoncePartition::Random,
            index: 1,
            device_count: 3,
            stride_unit: 64,
        };
        let mut h = placed_harness(jobs, 48, 8, stop_after(6, &shutdown), placement);
        let bases = mine_batches(&mut h, 6, &shutdown);

        for pair in bases.windows(2) {
            assert_eq!(pair[1], pair[0].wrapping_add(48));
        }
        let nonces: Vec<u32> = h.dispatched.lock().unwrap().iter().map(|d| d.nonce).collect();
        assert_eq!(nonces, bases);
    }

    #[test]
    fn strided_devices_with_mixed_batches_never_overlap() {
        let batch_sizes = [16u32, 64];
        let unit = 64;
        let mut ranges: Vec<(u64, u64)> = Vec::new();

        for (index, &batch) in batch_sizes.iter().enumerate() {
            let jobs = Arc::new(JobBroadcast::new());
            jobs.replace(job(4, 8));
            let shutdown = Shutdown::new();
            let placement = Placement {
                partition: NoncePartition::Strided,
                index,
                device_count: batch_sizes.len(),
                stride_unit: unit,
            };
            let mut h = placed_harness(jobs, batch, 8, stop_after(8, &shutdown), placement);
            let bases = mine_batches(&mut h, 8, &shutdown);

            assert_eq!(bases[0], index as u32 * unit);
            let nonces: Vec<u32> = h.dispatched.lock().unwrap().iter().map(|d| d.nonce).collect();
            assert_eq!(nonces, bases);
            ranges.extend(bases.iter().map(|&b| (b as u64, b as u64 + batch as u64)));
        }

        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn shutdown_before_first_job_returns_cleanly() {
        let jobs = Arc::new(JobBroadcast::new());
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut h = harness(jobs, 4, 4, Box::new(|_| {}));
        h.dispatcher.run(&shutdown).unwrap();
        assert!(h.dispatched.lock().unwrap().is_empty());
        h.dispatcher.release();
    }
}

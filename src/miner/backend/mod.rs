// src/miner/backend/mod.rs
//! Compute device backends
//!
//! A backend owns the device-side resources of one dispatcher: the program
//! buffer, the 80-byte header buffer and the digest result buffer. They are
//! acquired when the backend is opened and released when it is dropped.

/// CPU reference backend
pub mod cpu;

/// OpenCL GPU backend
#[cfg(feature = "opencl")]
pub mod opencl;

use crate::config::DeviceSpec;
use crate::miner::job::HEADER_LEN;
use crate::types::DeviceKind;
use crate::utils::error::MinerError;
use std::path::Path;

pub use cpu::CpuBackend;

/// One 256-bit hash result
pub type Digest = [u8; 32];

/// Size in bytes of one digest in the result buffer
pub const DIGEST_LEN: usize = 32;

/// Byte sizes of the device buffers currently allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCapacities {
    pub program: usize,
    pub header: usize,
    pub results: usize,
}

impl BufferCapacities {
    /// Capacities for a program of `program_len` bytes and `batch_size` work-items
    pub fn for_batch(program_len: usize, batch_size: u32) -> Self {
        BufferCapacities {
            program: program_len.max(1),
            header: HEADER_LEN,
            results: batch_size as usize * DIGEST_LEN,
        }
    }
}

/// Device-side half of a dispatcher
///
/// Work-item `i` of a dispatch hashes the uploaded header with its nonce
/// replaced by `read_nonce(header).wrapping_add(i)`. Digests come back packed
/// in dispatch order.
pub trait ComputeBackend: Send {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Buffer sizes currently allocated on the device
    fn capacities(&self) -> BufferCapacities;

    /// Reallocates the program buffer to hold at least `len` bytes
    fn grow_program(&mut self, len: usize) -> Result<(), MinerError>;

    /// Copies the job program into the program buffer
    ///
    /// Callers grow the buffer first when the program exceeds its capacity.
    fn upload_program(&mut self, program: &[u8]) -> Result<(), MinerError>;

    /// Copies the header (nonce included) into the header buffer
    fn upload_header(&mut self, header: &[u8; HEADER_LEN]) -> Result<(), MinerError>;

    /// Runs `work_items` hashes and appends their digests to `out`
    fn dispatch(&mut self, work_items: u32, out: &mut Vec<Digest>) -> Result<(), MinerError>;
}

/// Opens the backend described by `spec`
///
/// `program_len` sizes the initial program buffer; it grows later if needed.
pub fn open_backend(
    spec: &DeviceSpec,
    index: usize,
    program_len: usize,
    kernel_path: &Path,
) -> Result<Box<dyn ComputeBackend>, MinerError> {
    match spec.kind {
        DeviceKind::Cpu => Ok(Box::new(CpuBackend::open(spec, index, program_len)?)),
        DeviceKind::Gpu => open_gpu(spec, index, program_len, kernel_path),
    }
}

#[cfg(feature = "opencl")]
fn open_gpu(
    spec: &DeviceSpec,
    index: usize,
    program_len: usize,
    kernel_path: &Path,
) -> Result<Box<dyn ComputeBackend>, MinerError> {
    Ok(Box::new(opencl::OpenClBackend::open(
        spec,
        index,
        program_len,
        kernel_path,
    )?))
}

#[cfg(not(feature = "opencl"))]
fn open_gpu(
    spec: &DeviceSpec,
    _index: usize,
    _program_len: usize,
    _kernel_path: &Path,
) -> Result<Box<dyn ComputeBackend>, MinerError> {
    Err(MinerError::DeviceInitError(format!(
        "{}: built without OpenCL support (enable the `opencl` feature)",
        spec
    )))
}

/// Logs the compute devices this build can drive
pub fn list_devices() -> Result<(), MinerError> {
    log::info!("CPU: {} logical cores", num_cpus::get());

    #[cfg(feature = "opencl")]
    opencl::list_devices()?;

    #[cfg(not(feature = "opencl"))]
    log::info!("OpenCL support not compiled in");

    Ok(())
}

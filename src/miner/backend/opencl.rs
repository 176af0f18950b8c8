// src/miner/backend/opencl.rs
//! OpenCL GPU backend
//!
//! Loads the hash kernel from source at startup and binds it as
//! `dyn_hash(program, results, header)`. The program buffer is tracked and
//! rebuilt whenever a job's program outgrows it.

use crate::config::DeviceSpec;
use crate::miner::backend::{BufferCapacities, ComputeBackend, DIGEST_LEN, Digest};
use crate::miner::job::HEADER_LEN;
use crate::utils::error::MinerError;
use ocl::{Buffer, Context, Device, Kernel, Platform, Program, Queue};
use std::path::Path;

const KERNEL_NAME: &str = "dyn_hash";

fn init_err(name: &str, e: impl std::fmt::Display) -> MinerError {
    MinerError::DeviceInitError(format!("{}: {}", name, e))
}

pub struct OpenClBackend {
    name: String,
    queue: Queue,
    kernel: Kernel,
    program_buf: Buffer<u8>,
    header_buf: Buffer<u8>,
    result_buf: Buffer<u8>,
    results: Vec<u8>,
    work_group: usize,
    capacities: BufferCapacities,
}

impl OpenClBackend {
    pub fn open(
        spec: &DeviceSpec,
        index: usize,
        program_len: usize,
        kernel_path: &Path,
    ) -> Result<Self, MinerError> {
        let label = spec.label(index);

        let platform = *Platform::list()
            .get(spec.platform_id)
            .ok_or_else(|| init_err(&label, format!("no OpenCL platform {}", spec.platform_id)))?;
        let devices = Device::list(platform, Some(ocl::flags::DEVICE_TYPE_GPU))
            .map_err(|e| init_err(&label, e))?;
        let device = *devices
            .get(spec.device_id)
            .ok_or_else(|| init_err(&label, format!("no GPU device {}", spec.device_id)))?;
        let name = format!("{} ({})", label, device.name().unwrap_or_default());

        let source = std::fs::read_to_string(kernel_path).map_err(|e| {
            init_err(
                &name,
                format!("failed to load kernel {}: {}", kernel_path.display(), e),
            )
        })?;

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| init_err(&name, e))?;
        let queue = Queue::new(&context, device, None).map_err(|e| init_err(&name, e))?;
        let program = Program::builder()
            .src(source)
            .devices(device)
            .build(&context)
            .map_err(|e| init_err(&name, format!("error building kernel:\n{}", e)))?;

        let capacities = BufferCapacities::for_batch(program_len, spec.batch_size);
        let program_buf = Self::alloc(&queue, capacities.program).map_err(|e| init_err(&name, e))?;
        let result_buf = Self::alloc(&queue, capacities.results).map_err(|e| init_err(&name, e))?;
        let header_buf = Self::alloc(&queue, capacities.header).map_err(|e| init_err(&name, e))?;

        let kernel = Kernel::builder()
            .program(&program)
            .name(KERNEL_NAME)
            .queue(queue.clone())
            .global_work_size(spec.batch_size as usize)
            .local_work_size(spec.units as usize)
            .arg(&program_buf)
            .arg(&result_buf)
            .arg(&header_buf)
            .build()
            .map_err(|e| init_err(&name, e))?;

        log::info!(
            "{}: work-group {}, batch {}, program buffer {} bytes",
            name,
            spec.units,
            spec.batch_size,
            capacities.program
        );

        Ok(OpenClBackend {
            name,
            queue,
            kernel,
            program_buf,
            header_buf,
            result_buf,
            results: vec![0u8; capacities.results],
            work_group: spec.units as usize,
            capacities,
        })
    }

    fn alloc(queue: &Queue, len: usize) -> ocl::Result<Buffer<u8>> {
        Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(ocl::flags::MEM_READ_WRITE | ocl::flags::MEM_ALLOC_HOST_PTR)
            .len(len)
            .build()
    }
}

impl ComputeBackend for OpenClBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capacities(&self) -> BufferCapacities {
        self.capacities
    }

    fn grow_program(&mut self, len: usize) -> Result<(), MinerError> {
        if len <= self.capacities.program {
            return Ok(());
        }
        let buffer = Self::alloc(&self.queue, len)?;
        self.kernel.set_arg(0, &buffer)?;
        self.program_buf = buffer;
        self.capacities.program = len;
        Ok(())
    }

    fn upload_program(&mut self, program: &[u8]) -> Result<(), MinerError> {
        if program.len() > self.capacities.program {
            return Err(MinerError::DeviceError(format!(
                "{}: program of {} bytes exceeds buffer of {}",
                self.name,
                program.len(),
                self.capacities.program
            )));
        }
        if !program.is_empty() {
            self.program_buf.write(program).enq()?;
        }
        Ok(())
    }

    fn upload_header(&mut self, header: &[u8; HEADER_LEN]) -> Result<(), MinerError> {
        self.header_buf.write(&header[..]).enq()?;
        Ok(())
    }

    fn dispatch(&mut self, work_items: u32, out: &mut Vec<Digest>) -> Result<(), MinerError> {
        let work_items = work_items as usize;
        let bytes = work_items * DIGEST_LEN;
        if bytes > self.capacities.results || work_items % self.work_group != 0 {
            return Err(MinerError::DeviceError(format!(
                "{}: dispatch of {} work-items does not fit the result buffer",
                self.name, work_items
            )));
        }

        unsafe {
            self.kernel
                .cmd()
                .global_work_size(work_items)
                .local_work_size(self.work_group)
                .enq()?;
        }
        self.queue.finish()?;

        self.result_buf.read(&mut self.results[..bytes]).enq()?;
        out.extend(self.results[..bytes].chunks_exact(DIGEST_LEN).map(|chunk| {
            let mut digest = [0u8; DIGEST_LEN];
            digest.copy_from_slice(chunk);
            digest
        }));
        Ok(())
    }
}

/// Logs every OpenCL GPU visible to this host
pub fn list_devices() -> Result<(), MinerError> {
    let platforms = Platform::list();
    if platforms.is_empty() {
        log::info!("No OpenCL platforms detected.");
        return Ok(());
    }

    log::info!("OpenCL GPUs detected:");
    for (p, platform) in platforms.iter().enumerate() {
        let devices = Device::list(*platform, Some(ocl::flags::DEVICE_TYPE_GPU))?;
        for (d, device) in devices.iter().enumerate() {
            log::info!(
                "platform {}, device {} [{}, memory {}, compute units {}]",
                p,
                d,
                device.name().unwrap_or_default(),
                device
                    .info(ocl::enums::DeviceInfo::GlobalMemSize)
                    .map(|info| info.to_string())
                    .unwrap_or_default(),
                device
                    .info(ocl::enums::DeviceInfo::MaxComputeUnits)
                    .map(|info| info.to_string())
                    .unwrap_or_default(),
            );
        }
    }
    Ok(())
}

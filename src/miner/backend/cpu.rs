// src/miner/backend/cpu.rs
//! CPU reference backend
//!
//! Hashes on a dedicated rayon pool. The job program is folded into the hash
//! through its SHA-256 digest:
//!
//! `digest = SHA-256(SHA-256(SHA-256(program) || header_with_nonce))`

use crate::config::DeviceSpec;
use crate::miner::backend::{BufferCapacities, ComputeBackend, Digest};
use crate::miner::job::{HEADER_LEN, read_nonce, write_nonce};
use crate::utils::error::MinerError;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use sha2::{Digest as _, Sha256};

/// SHA-256 of a job program, the key the reference hash is built on
pub fn program_digest(program: &[u8]) -> Digest {
    Sha256::digest(program).into()
}

/// Reference digest for one nonce
pub fn reference_digest(program_digest: &Digest, header: &[u8; HEADER_LEN], nonce: u32) -> Digest {
    let mut header = *header;
    write_nonce(&mut header, nonce);

    let first = Sha256::new()
        .chain_update(program_digest)
        .chain_update(header)
        .finalize();
    Sha256::digest(first).into()
}

/// Host CPU compute device
pub struct CpuBackend {
    name: String,
    pool: ThreadPool,
    program: Vec<u8>,
    program_digest: Digest,
    header: [u8; HEADER_LEN],
    capacities: BufferCapacities,
}

impl CpuBackend {
    /// Builds the hashing pool with `spec.units` threads
    pub fn open(spec: &DeviceSpec, index: usize, program_len: usize) -> Result<Self, MinerError> {
        let name = spec.label(index);
        let pool = ThreadPoolBuilder::new()
            .num_threads(spec.units as usize)
            .thread_name({
                let name = name.clone();
                move |i| format!("{}-hash{}", name, i)
            })
            .build()
            .map_err(|e| MinerError::DeviceInitError(format!("{}: {}", name, e)))?;

        let capacities = BufferCapacities::for_batch(program_len, spec.batch_size);
        log::info!(
            "{}: {} hashing threads, batch {}",
            name,
            spec.units,
            spec.batch_size
        );

        Ok(CpuBackend {
            name,
            pool,
            program: Vec::with_capacity(capacities.program),
            program_digest: program_digest(&[]),
            header: [0u8; HEADER_LEN],
            capacities,
        })
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capacities(&self) -> BufferCapacities {
        self.capacities
    }

    fn grow_program(&mut self, len: usize) -> Result<(), MinerError> {
        if len > self.capacities.program {
            self.program.reserve_exact(len - self.program.len());
            self.capacities.program = len;
        }
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
        self.program.clear();
        self.program.extend_from_slice(program);
        self.program_digest = program_digest(&self.program);
        Ok(())
    }

    fn upload_header(&mut self, header: &[u8; HEADER_LEN]) -> Result<(), MinerError> {
        self.header = *header;
        Ok(())
    }

    fn dispatch(&mut self, work_items: u32, out: &mut Vec<Digest>) -> Result<(), MinerError> {
        let base = read_nonce(&self.header);
        let key = self.program_digest;
        let header = self.header;

        let digests: Vec<Digest> = self.pool.install(|| {
            (0..work_items)
                .into_par_iter()
                .map(|i| reference_digest(&key, &header, base.wrapping_add(i)))
                .collect()
        });
        out.extend(digests);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(batch: u32) -> CpuBackend {
        let spec: DeviceSpec = format!("CPU,2,{}", batch).parse().unwrap();
        CpuBackend::open(&spec, 0, 8).unwrap()
    }

    #[test]
    fn dispatch_matches_reference_per_nonce() {
        let mut cpu = backend(16);
        let program = b"dyn-program".to_vec();
        cpu.grow_program(program.len()).unwrap();
        cpu.upload_program(&program).unwrap();

        let mut header = [7u8; HEADER_LEN];
        write_nonce(&mut header, u32::MAX - 3);
        cpu.upload_header(&header).unwrap();

        let mut out = Vec::new();
        cpu.dispatch(8, &mut out).unwrap();

        assert_eq!(out.len(), 8);
        let key = program_digest(&program);
        for (i, digest) in out.iter().enumerate() {
            let nonce = (u32::MAX - 3).wrapping_add(i as u32);
            assert_eq!(*digest, reference_digest(&key, &header, nonce));
        }
        assert_ne!(out[0], out[1]);
    }

    #[test]
    fn program_changes_the_hash() {
        let header = [1u8; HEADER_LEN];
        assert_ne!(
            reference_digest(&program_digest(b"a"), &header, 5),
            reference_digest(&program_digest(b"b"), &header, 5)
        );
    }

    #[test]
    fn oversized_program_needs_growth() {
        let mut cpu = backend(4);
        assert_eq!(cpu.capacities().program, 8);

        let program = vec![0xAB; 64];
        assert!(matches!(
            cpu.upload_program(&program),
            Err(MinerError::DeviceError(_))
        ));

        cpu.grow_program(64).unwrap();
        assert_eq!(cpu.capacities().program, 64);
        cpu.upload_program(&program).unwrap();
    }
}

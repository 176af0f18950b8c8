// src/miner/nonce.rs
//! Nonce range assignment for a dispatcher
//!
//! With [`NoncePartition::Random`] each device seeds its cursor from the clock
//! mixed with a per-device salt. Two devices can still land on overlapping
//! ranges; for a 32-bit space and typical batch sizes this is rare and only
//! wastes work. [`NoncePartition::Strided`] splits the space into slots of
//! one shared `unit` (the largest batch size of any device): device `i` of
//! `n` starts its batches at `i*unit + k*n*unit`. Every batch fits in its
//! slot, so devices never overlap until the space wraps.

use crate::types::NoncePartition;
use crate::utils::MinerError;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// Position of a dispatcher in the 32-bit nonce space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceCursor {
    next: u32,
    step: u32,
}

impl NonceCursor {
    /// Cursor for a fresh job
    ///
    /// `salt` distinguishes devices in random mode; `device_index`,
    /// `device_count` and the shared `stride_unit` place the device in strided
    /// mode.
    pub fn start(
        partition: NoncePartition,
        salt: u64,
        device_index: usize,
        device_count: usize,
        batch_size: u32,
        stride_unit: u32,
    ) -> Self {
        match partition {
            NoncePartition::Random => Self::seeded(time_seed() ^ salt, batch_size),
            NoncePartition::Strided => Self::strided(device_index, device_count, stride_unit),
        }
    }

    pub fn seeded(seed: u64, batch_size: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        NonceCursor {
            next: rng.next_u32(),
            step: batch_size,
        }
    }

    /// Cursor for slot `device_index` of `device_count`, each `unit` wide
    ///
    /// `unit` must come from [`stride_unit`] so the stride cannot wrap to zero.
    pub fn strided(device_index: usize, device_count: usize, unit: u32) -> Self {
        let count = device_count.max(1) as u32;
        NonceCursor {
            next: (device_index as u32).wrapping_mul(unit),
            step: count.wrapping_mul(unit),
        }
    }

    /// Base nonce of the next batch
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Returns the base nonce for this batch and moves past it, wrapping on overflow
    pub fn advance(&mut self) -> u32 {
        let base = self.next;
        self.next = self.next.wrapping_add(self.step);
        base
    }
}

/// Slot width shared by every device in strided mode: the largest batch
///
/// Fails when `device_count` slots of that width do not fit the 32-bit nonce
/// space, where the stride would wrap and devices would repeat nonces.
pub fn stride_unit(batch_sizes: impl IntoIterator<Item = u32>) -> Result<u32, MinerError> {
    let mut count = 0u64;
    let mut unit = 0u32;
    for batch in batch_sizes {
        count += 1;
        unit = unit.max(batch);
    }
    if count * unit as u64 > u32::MAX as u64 {
        return Err(MinerError::ConfigError(format!(
            "{} devices with batch size {} exceed the 32-bit nonce space in strided mode",
            count, unit
        )));
    }
    Ok(unit.max(1))
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Salt mixing a device's position and identity
pub fn device_salt(index: usize, platform_id: usize, device_id: usize) -> u64 {
    let raw = ((index as u64) << 32) ^ ((platform_id as u64) << 16) ^ device_id as u64;
    // SplitMix64 finaliser, so neighbouring devices get unrelated seeds
    let mut z = raw.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

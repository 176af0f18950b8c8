// src/miner/evaluator.rs
//! Difficulty evaluation of hash batches
//!
//! Scans every digest a device produced, turns the ones meeting the job's
//! leading-zero target into [`ShareCandidate`]s and hands them to the
//! submitter without ever blocking the evaluation path.

use crate::miner::backend::Digest;
use crate::miner::dispatcher::HashBatch;
use crate::stats::StatsAggregator;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::Arc;

/// A digest meeting the job's difficulty target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareCandidate {
    /// Nonce that produced the digest
    pub nonce: u32,
    /// Job token used by the transport for submission
    pub job_id: String,
    /// Version of the job the digest was computed under
    pub job_version: u64,
    /// Resulting digest
    #[serde(serialize_with = "hex_digest")]
    pub digest: Digest,
    /// Leading zero bits of `digest`
    pub leading_zero_bits: u32,
}

fn hex_digest<S: serde::Serializer>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(digest))
}

/// Counts the leading zero bits of a 256-bit digest
///
/// The digest is read as eight big-endian 32-bit words, most significant
/// first. Scanning stops at the first word that is not entirely zero.
pub fn leading_zero_bits(digest: &Digest) -> u32 {
    let mut count = 0;
    for word in digest.chunks_exact(4) {
        let word = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        count += word.leading_zeros();
        if word != 0 {
            break;
        }
    }
    count
}

/// Scans hash batches and emits share candidates
pub struct ShareEvaluator {
    stats: Arc<StatsAggregator>,
    candidates: Sender<ShareCandidate>,
}

impl ShareEvaluator {
    /// `candidates` should be bounded; a full queue drops shares instead of
    /// stalling the devices.
    pub fn new(stats: Arc<StatsAggregator>, candidates: Sender<ShareCandidate>) -> Self {
        ShareEvaluator { stats, candidates }
    }

    /// Evaluates one batch and returns how many shares it contained
    pub fn evaluate(&self, batch: &HashBatch) -> usize {
        let mut found = 0;

        for (index, digest) in batch.digests.iter().enumerate() {
            let zeros = leading_zero_bits(digest);
            if zeros < batch.difficulty_target {
                continue;
            }

            found += 1;
            self.stats.share_found();

            let candidate = ShareCandidate {
                nonce: batch.base_nonce.wrapping_add(index as u32),
                job_id: batch.job_id.clone(),
                job_version: batch.job_version,
                digest: *digest,
                leading_zero_bits: zeros,
            };
            log::debug!(
                "Share found: job {} nonce {:#010x} ({} zero bits)",
                candidate.job_id,
                candidate.nonce,
                zeros
            );

            match self.candidates.try_send(candidate) {
                Ok(()) => {}
                Err(TrySendError::Full(candidate)) => log::warn!(
                    "Submit queue full, dropping share for job {} nonce {:#010x}",
                    candidate.job_id,
                    candidate.nonce
                ),
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("Submitter is gone, share discarded")
                }
            }
        }

        found
    }

    /// Worker loop: evaluates batches until every dispatcher has hung up
    pub fn run(self, batches: Receiver<HashBatch>) {
        let mut total = 0usize;
        for batch in batches {
            total += self.evaluate(&batch);
        }
        log::debug!("Evaluator finished after {} shares", total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use hex_literal::hex;

    fn batch(digests: Vec<Digest>, target: u32) -> HashBatch {
        HashBatch {
            job_id: "job-1".to_string(),
            job_version: 1,
            difficulty_target: target,
            base_nonce: 1_000,
            digests,
        }
    }

    fn digest_with_prefix(zero_bits: u32) -> Digest {
        let mut digest = [0xFFu8; 32];
        for bit in 0..zero_bits.min(256) {
            digest[(bit / 8) as usize] &= !(0x80 >> (bit % 8));
        }
        digest
    }

    #[test]
    fn leading_zero_bits_known_values() {
        assert_eq!(leading_zero_bits(&[0u8; 32]), 256);
        assert_eq!(leading_zero_bits(&[0xFFu8; 32]), 0);
        assert_eq!(
            leading_zero_bits(&hex!(
                "0000000000000000000000000000000000000000000000000000000000000001"
            )),
            255
        );
        assert_eq!(
            leading_zero_bits(&hex!(
                "00000000 00000001 ffffffff ffffffff ffffffff ffffffff ffffffff ffffffff"
            )),
            63
        );
        assert_eq!(
            leading_zero_bits(&hex!(
                "000fffff 00000000 00000000 00000000 00000000 00000000 00000000 00000000"
            )),
            12
        );
    }

    #[test]
    fn leading_zero_bits_matches_prefix_length() {
        for zeros in 0..=256 {
            assert_eq!(leading_zero_bits(&digest_with_prefix(zeros)), zeros);
        }
    }

    #[test]
    fn leading_zero_bits_is_word_clz_after_zero_words() {
        for k in 0..8usize {
            for bit in 0..32u32 {
                let mut digest = [0u8; 32];
                let word = 1u32 << bit;
                digest[k * 4..k * 4 + 4].copy_from_slice(&word.to_be_bytes());
                // Trailing words are ignored once a nonzero word is seen.
                for byte in digest.iter_mut().skip(k * 4 + 4) {
                    *byte = 0xA5;
                }
                assert_eq!(
                    leading_zero_bits(&digest),
                    32 * k as u32 + word.leading_zeros()
                );
            }
        }
    }

    #[test]
    fn one_qualifying_digest_yields_one_candidate() {
        let stats = Arc::new(StatsAggregator::new());
        let (tx, rx) = bounded(16);
        let evaluator = ShareEvaluator::new(Arc::clone(&stats), tx);

        let mut digests = vec![digest_with_prefix(3); 64];
        digests[17] = digest_with_prefix(9);
        digests[40] = digest_with_prefix(7);

        assert_eq!(evaluator.evaluate(&batch(digests, 8)), 1);
        assert_eq!(stats.snapshot().shares_found, 1);

        let candidate = rx.try_recv().unwrap();
        assert_eq!(candidate.nonce, 1_017);
        assert_eq!(candidate.job_id, "job-1");
        assert_eq!(candidate.job_version, 1);
        assert_eq!(candidate.leading_zero_bits, 9);
        assert_eq!(candidate.digest, digest_with_prefix(9));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn nonce_wraps_within_a_batch() {
        let stats = Arc::new(StatsAggregator::new());
        let (tx, rx) = bounded(4);
        let evaluator = ShareEvaluator::new(stats, tx);

        let mut batch = batch(vec![digest_with_prefix(0), digest_with_prefix(20)], 16);
        batch.base_nonce = u32::MAX;
        evaluator.evaluate(&batch);

        assert_eq!(rx.try_recv().unwrap().nonce, 0);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let stats = Arc::new(StatsAggregator::new());
        let (tx, rx) = bounded(1);
        let evaluator = ShareEvaluator::new(Arc::clone(&stats), tx);

        let found = evaluator.evaluate(&batch(vec![[0u8; 32]; 5], 8));

        assert_eq!(found, 5);
        assert_eq!(stats.snapshot().shares_found, 5);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn run_drains_until_senders_hang_up() {
        let stats = Arc::new(StatsAggregator::new());
        let (cand_tx, cand_rx) = bounded(16);
        let (batch_tx, batch_rx) = bounded(4);
        let evaluator = ShareEvaluator::new(Arc::clone(&stats), cand_tx);
        let worker = std::thread::spawn(move || evaluator.run(batch_rx));

        batch_tx.send(batch(vec![[0u8; 32], [0xFF; 32]], 1)).unwrap();
        batch_tx.send(batch(vec![[0u8; 32]], 1)).unwrap();
        drop(batch_tx);
        worker.join().unwrap();

        assert_eq!(stats.snapshot().shares_found, 2);
        assert_eq!(cand_rx.iter().count(), 2);
    }
}

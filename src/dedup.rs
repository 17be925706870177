// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The write-path pipeline: fingerprint, deduplicate, adaptively compress.
//! Mirrors `dedup_process_block_on_write` / `dedup_process_diff_blocks` from
//! the original engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::block::{fingerprint_of, Block};
use crate::compression::adaptive_compress;
use crate::config::Config;
use crate::error::Result;
use crate::fingerprint_index::FingerprintIndex;
use crate::metrics::Stats;

/// Runs one block of freshly-written plaintext through dedup + adaptive
/// compression, returning the block that should now occupy the slot.
///
/// Caller must have already performed copy-on-write — this function always
/// treats `plaintext` as a private buffer it is free to compress or hand off
/// for indexing.
pub fn process_block_on_write(
    plaintext: Vec<u8>,
    cfg: &Config,
    fi: &FingerprintIndex,
    stats: &Stats,
) -> Result<Arc<Block>> {
    let fp = fingerprint_of(&plaintext);

    if cfg.enable_dedup {
        if let Some(existing) = fi.find(&fp) {
            existing.inc();
            stats.record_dedup_hit(existing.plain_size);
            return Ok(existing);
        }
    }

    let outcome = adaptive_compress(&plaintext, cfg)?;
    let raw_len = plaintext.len() as u64;
    let stored_len = if outcome.stored_size > 0 {
        outcome.stored_size
    } else {
        raw_len
    };
    stats.record_compress_class(outcome.class, raw_len, stored_len);
    if outcome.stored_size > 0 {
        stats.record_compress(raw_len, raw_len - outcome.stored_size);
    }

    let block = Arc::new(Block::from_compressed(&plaintext, outcome));
    stats.record_unique_block();

    if cfg.enable_dedup {
        fi.index(block.clone());
    }

    Ok(block)
}

/// Applies [`process_block_on_write`] to every entry of a diff set (slot
/// index -> new plaintext), returning the replacement blocks keyed by the
/// same slot indices. Mirrors `dedup_process_diff_blocks`.
pub fn process_diff_blocks(
    diffs: BTreeMap<usize, Vec<u8>>,
    cfg: &Config,
    fi: &FingerprintIndex,
    stats: &Stats,
) -> Result<BTreeMap<usize, Arc<Block>>> {
    let mut out = BTreeMap::new();
    for (slot, plaintext) in diffs {
        out.insert(slot, process_block_on_write(plaintext, cfg, fi, stats)?);
    }
    Ok(out)
}

/// Releases a reference to `block`, freeing it from the fingerprint index
/// once the last reference is gone. Mirrors `dedup_release_block`.
pub fn release_block(block: &Arc<Block>, fi: &FingerprintIndex, stats: &Stats) {
    if block.dec() {
        fi.remove_if(&block.fingerprint, block.id);
        stats.record_unique_block_removed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_across_writes_shares_one_block() {
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config::default();

        let a = process_block_on_write(vec![0x41; 4096], &cfg, &fi, &stats).unwrap();
        let b = process_block_on_write(vec![0x41; 4096], &cfg, &fi, &stats).unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(a.refs(), 2);
        assert_eq!(stats.snapshot().dedup_saved_bytes, 4096);
    }

    #[test]
    fn distinct_content_gets_distinct_blocks() {
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config::default();

        let a = process_block_on_write(vec![1u8; 16], &cfg, &fi, &stats).unwrap();
        let b = process_block_on_write(vec![2u8; 16], &cfg, &fi, &stats).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn release_last_ref_frees_from_index() {
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config::default();

        let a = process_block_on_write(vec![9u8; 16], &cfg, &fi, &stats).unwrap();
        assert!(fi.find(&a.fingerprint).is_some());
        release_block(&a, &fi, &stats);
        assert!(fi.find(&a.fingerprint).is_none());
    }

    #[test]
    fn dedup_disabled_never_consults_index() {
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config {
            enable_dedup: false,
            ..Config::default()
        };

        let a = process_block_on_write(vec![5u8; 16], &cfg, &fi, &stats).unwrap();
        let b = process_block_on_write(vec![5u8; 16], &cfg, &fi, &stats).unwrap();
        assert_ne!(a.id, b.id);
        assert!(fi.is_empty());
    }
}

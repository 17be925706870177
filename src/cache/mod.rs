// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The three-tier block cache. Lookup order is L1 -> L2 -> L3, with
//! promotion on every hit below L1. Mirrors `multi_level_cache_t` /
//! `cache_get_block` / `cache_put_block` / `multi_level_cache_manage`.

mod l1;
mod l2;
mod l3;

use std::sync::Arc;

use crate::block::Block;
use crate::config::Config;
use crate::error::Result;
use crate::metrics::Stats;

pub use l1::L1Cache;
pub use l2::L2Cache;
pub use l3::L3Cache;

pub struct CacheSystem {
    l1: L1Cache,
    l2: L2Cache,
    l3: L3Cache,
    stats: Arc<Stats>,
}

impl CacheSystem {
    pub fn new(cfg: &Config, stats: Arc<Stats>) -> Result<Self> {
        // Slot size tracks the largest block the splitter can produce, so
        // every block fits in one L2 slot regardless of its actual size.
        let slot_size = cfg.max_block_size;
        Ok(CacheSystem {
            l1: L1Cache::new(cfg.l1_max_bytes),
            l2: L2Cache::new(&cfg.l2_backing_path, slot_size, cfg.l2_capacity_bytes)?,
            l3: L3Cache::new(
                &cfg.l3_cache_dir,
                cfg.l3_capacity_bytes,
                cfg.l3_max_entries,
                cfg.l3_expire_seconds,
            )?,
            stats,
        })
    }

    /// Returns the plaintext bytes for `id` if resident in any tier,
    /// promoting on a lower-tier hit. Does not consult the block itself.
    pub fn get(&self, id: u64) -> Option<Vec<u8>> {
        if let Some(block) = self.l1.get(id) {
            self.stats.record_cache_hit(1);
            return block.plaintext().ok();
        }
        if let Some(plaintext) = self.l2.get(id) {
            self.stats.record_cache_hit(2);
            self.l1.put(Arc::new(Block::with_id(id, plaintext.clone())));
            return Some(plaintext);
        }
        if let Some(plaintext) = self.l3.get(id) {
            self.stats.record_cache_hit(3);
            self.l2.put(id, &plaintext);
            self.l1.put(Arc::new(Block::with_id(id, plaintext.clone())));
            return Some(plaintext);
        }
        self.stats.record_cache_miss();
        None
    }

    /// Inserts `block` into every tier, decompressing once for L2/L3 (which
    /// always hold plaintext).
    pub fn put(&self, block: Arc<Block>) -> Result<()> {
        let plaintext = block.plaintext()?;
        self.l1.put(block.clone());
        if let Some(displaced) = self.l2.put(block.id, &plaintext) {
            self.stats.record_l2_slot_collision();
            self.l3.remove(displaced);
        }
        self.l3.put(block.id, &plaintext)?;
        Ok(())
    }

    /// Fetches `block`'s plaintext through the cache, seeding every tier on
    /// a full miss so the next read is served from L1.
    pub fn get_or_insert(&self, block: &Arc<Block>) -> Result<Vec<u8>> {
        if let Some(bytes) = self.get(block.id) {
            return Ok(bytes);
        }
        let plaintext = block.plaintext()?;
        self.put(block.clone())?;
        Ok(plaintext)
    }

    pub fn invalidate(&self, id: u64) {
        self.l1.invalidate(id);
        self.l2.invalidate(id);
        self.l3.remove(id);
    }

    /// Syncs dirty L2 slots and trims expired L3 entries. Returns the L2
    /// dirty fraction observed before the flush, so callers can decide
    /// whether to schedule another immediate pass.
    pub fn manage(&self) -> Result<f64> {
        let fraction_before = self.l2.dirty_fraction();
        self.l2.flush_dirty()?;
        self.l3.trim_expired();
        Ok(fraction_before)
    }

    pub fn l1_bytes(&self) -> (usize, usize) {
        (self.l1.current_bytes(), self.l1.max_bytes())
    }

    pub fn l3_entries(&self) -> usize {
        self.l3.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make(dir: &std::path::Path) -> CacheSystem {
        let mut cfg = Config {
            l2_backing_path: dir.join("l2.cache"),
            l3_cache_dir: dir.join("l3"),
            l1_max_bytes: 1024 * 1024,
            l2_capacity_bytes: 1024 * 1024,
            ..Config::default()
        };
        cfg.validate();
        CacheSystem::new(&cfg, Arc::new(Stats::default())).unwrap()
    }

    #[test]
    fn l3_only_promotes_through_l2_to_l1() {
        let dir = tempdir().unwrap();
        let cache = make(dir.path());
        let block = Arc::new(Block::new(b"cached payload".to_vec()));

        // Seed only L3, simulating data that fell out of L1/L2.
        cache.l3.put(block.id, &block.plaintext().unwrap()).unwrap();

        let first = cache.get(block.id).unwrap();
        assert_eq!(first, block.plaintext().unwrap());
        assert_eq!(cache.stats.snapshot().l3_hits, 1);

        // get() itself must have promoted the block into L1 — no manual seed.
        let l1_hits_before = cache.stats.snapshot().l1_hits;
        let second = cache.get(block.id).unwrap();
        assert_eq!(second, block.plaintext().unwrap());
        assert_eq!(cache.stats.snapshot().l1_hits, l1_hits_before + 1);
    }

    #[test]
    fn l2_only_promotes_to_l1() {
        let dir = tempdir().unwrap();
        let cache = make(dir.path());
        let block = Arc::new(Block::new(b"l2 seeded payload".to_vec()));

        cache.l2.put(block.id, &block.plaintext().unwrap());

        let first = cache.get(block.id).unwrap();
        assert_eq!(first, block.plaintext().unwrap());
        assert_eq!(cache.stats.snapshot().l2_hits, 1);

        let l1_hits_before = cache.stats.snapshot().l1_hits;
        let second = cache.get(block.id).unwrap();
        assert_eq!(second, block.plaintext().unwrap());
        assert_eq!(cache.stats.snapshot().l1_hits, l1_hits_before + 1);
    }

    #[test]
    fn put_seeds_all_tiers() {
        let dir = tempdir().unwrap();
        let cache = make(dir.path());
        let block = Arc::new(Block::new(b"hello".to_vec()));
        cache.put(block.clone()).unwrap();
        assert!(cache.l1.get(block.id).is_some());
        assert!(cache.l2.get(block.id).is_some());
        assert!(cache.l3.get(block.id).is_some());
    }

    #[test]
    fn get_or_insert_miss_then_hit() {
        let dir = tempdir().unwrap();
        let cache = make(dir.path());
        let block = Arc::new(Block::new(b"fresh block".to_vec()));
        let bytes = cache.get_or_insert(&block).unwrap();
        assert_eq!(bytes, b"fresh block");
        assert!(cache.l1.get(block.id).is_some());
    }
}

// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Memory-mapped tier: a fixed-size backing file divided into equal slots,
//! direct-mapped by `id mod slot_count`. Mirrors `l2_cache_t` / `l2_init` /
//! `l2_copy_into_slot` / `l2_shutdown`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::error::{Error, Result};

struct Inner {
    map: MmapMut,
    slot_ids: Vec<Option<u64>>,
    slot_lens: Vec<usize>,
    dirty: Vec<bool>,
}

/// Blocks compressed in memory are always decompressed before entering L2 —
/// this tier stores plaintext only, so reads never pay a decompression cost.
pub struct L2Cache {
    inner: RwLock<Inner>,
    slot_size: usize,
    slot_count: usize,
    backing_path: PathBuf,
}

impl L2Cache {
    pub fn new(backing_path: &Path, slot_size: usize, capacity_bytes: usize) -> Result<Self> {
        let slot_count = (capacity_bytes / slot_size).max(1);
        let total = slot_size * slot_count;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(backing_path)
            .map_err(|source| Error::IoError {
                path: backing_path.to_path_buf(),
                source,
            })?;
        file.set_len(total as u64).map_err(|source| Error::IoError {
            path: backing_path.to_path_buf(),
            source,
        })?;

        let map = unsafe {
            MmapMut::map_mut(&file).map_err(|source| Error::IoError {
                path: backing_path.to_path_buf(),
                source,
            })?
        };

        Ok(L2Cache {
            inner: RwLock::new(Inner {
                map,
                slot_ids: vec![None; slot_count],
                slot_lens: vec![0; slot_count],
                dirty: vec![false; slot_count],
            }),
            slot_size,
            slot_count,
            backing_path: backing_path.to_path_buf(),
        })
    }

    fn slot_of(&self, id: u64) -> usize {
        (id % self.slot_count as u64) as usize
    }

    /// Returns the block's plaintext, trimmed to the length recorded at
    /// `put` time rather than the full zero-padded slot.
    pub fn get(&self, id: u64) -> Option<Vec<u8>> {
        let slot = self.slot_of(id);
        let inner = self.inner.read();
        if inner.slot_ids[slot] != Some(id) {
            return None;
        }
        let start = slot * self.slot_size;
        let len = inner.slot_lens[slot];
        Some(inner.map[start..start + len].to_vec())
    }

    /// Writes `plaintext` (padded/truncated to `slot_size`) into the
    /// direct-mapped slot for `id`. Returns the id that previously occupied
    /// the slot, if any and different, so the caller can evict it from L3
    /// too (avoids split-brain between tiers).
    pub fn put(&self, id: u64, plaintext: &[u8]) -> Option<u64> {
        let slot = self.slot_of(id);
        let mut inner = self.inner.write();
        let displaced = match inner.slot_ids[slot] {
            Some(prev) if prev != id => Some(prev),
            _ => None,
        };
        let start = slot * self.slot_size;
        let len = plaintext.len().min(self.slot_size);
        inner.map[start..start + len].copy_from_slice(&plaintext[..len]);
        for b in &mut inner.map[start + len..start + self.slot_size] {
            *b = 0;
        }
        inner.slot_ids[slot] = Some(id);
        inner.slot_lens[slot] = len;
        inner.dirty[slot] = true;
        displaced
    }

    pub fn invalidate(&self, id: u64) {
        let slot = self.slot_of(id);
        let mut inner = self.inner.write();
        if inner.slot_ids[slot] == Some(id) {
            inner.slot_ids[slot] = None;
            inner.dirty[slot] = false;
        }
    }

    /// Syncs every dirty slot's page range and clears its dirty flag.
    pub fn flush_dirty(&self) -> Result<usize> {
        let mut inner = self.inner.write();
        let mut flushed = 0;
        for slot in 0..self.slot_count {
            if !inner.dirty[slot] {
                continue;
            }
            let start = slot * self.slot_size;
            inner
                .map
                .flush_range(start, self.slot_size)
                .map_err(|source| Error::IoError {
                    path: self.backing_path.clone(),
                    source,
                })?;
            inner.dirty[slot] = false;
            flushed += 1;
        }
        Ok(flushed)
    }

    pub fn dirty_fraction(&self) -> f64 {
        let inner = self.inner.read();
        let dirty = inner.dirty.iter().filter(|d| **d).count();
        dirty as f64 / self.slot_count as f64
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let l2 = L2Cache::new(&dir.path().join("l2.cache"), 16, 64).unwrap();
        l2.put(3, b"hello world12345");
        let out = l2.get(3).unwrap();
        assert_eq!(&out[..11], b"hello world");
    }

    #[test]
    fn get_trims_to_actual_length() {
        let dir = tempdir().unwrap();
        let l2 = L2Cache::new(&dir.path().join("l2.cache"), 64, 128).unwrap();
        l2.put(5, b"short");
        let out = l2.get(5).unwrap();
        assert_eq!(out, b"short");
    }

    #[test]
    fn colliding_ids_evict_each_other() {
        let dir = tempdir().unwrap();
        let l2 = L2Cache::new(&dir.path().join("l2.cache"), 16, 16);
        let l2 = l2.unwrap();
        assert_eq!(l2.slot_count(), 1);
        let displaced = l2.put(1, b"aaaaaaaaaaaaaaaa");
        assert_eq!(displaced, None);
        let displaced2 = l2.put(2, b"bbbbbbbbbbbbbbbb");
        assert_eq!(displaced2, Some(1));
        assert!(l2.get(1).is_none());
        assert!(l2.get(2).is_some());
    }

    #[test]
    fn flush_dirty_clears_flags() {
        let dir = tempdir().unwrap();
        let l2 = L2Cache::new(&dir.path().join("l2.cache"), 16, 32).unwrap();
        l2.put(1, b"xxxxxxxxxxxxxxxx");
        assert!(l2.dirty_fraction() > 0.0);
        l2.flush_dirty().unwrap();
        assert_eq!(l2.dirty_fraction(), 0.0);
    }
}

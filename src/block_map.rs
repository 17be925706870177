// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The block map: a file's logical block index -> [`Block`] mapping, plus
//! the block-size splitter. One read/write lock per file, third in the
//! engine's lock hierarchy (below the version chain, above a block's own
//! refcount mutex).

use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::Block;
use crate::cache::CacheSystem;
use crate::config::Config;
use crate::dedup::{process_block_on_write, release_block};
use crate::error::Result;
use crate::fingerprint_index::FingerprintIndex;
use crate::metrics::Stats;

const MIN_BLOCK_SIZE: usize = 4096;
const MAX_BLOCK_SIZE: usize = 65536;
const DEFAULT_BLOCK_SIZE: usize = 4096;
const SMALL_FILE_HINT: u64 = 1024 * 1024;
const LARGE_FILE_HINT: u64 = 64 * 1024 * 1024;

/// Picks a block size in `[4 KiB, 64 KiB]`, linearly interpolated between a
/// 1 MiB and a 64 MiB file-size hint. Mirrors `block_splitter_pick_size`.
pub fn pick_block_size(size_hint: Option<u64>) -> usize {
    let Some(hint) = size_hint else {
        return DEFAULT_BLOCK_SIZE;
    };
    if hint <= SMALL_FILE_HINT {
        return MIN_BLOCK_SIZE;
    }
    if hint >= LARGE_FILE_HINT {
        return MAX_BLOCK_SIZE;
    }
    let span = (LARGE_FILE_HINT - SMALL_FILE_HINT) as f64;
    let frac = (hint - SMALL_FILE_HINT) as f64 / span;
    let size = MIN_BLOCK_SIZE as f64 + frac * (MAX_BLOCK_SIZE - MIN_BLOCK_SIZE) as f64;
    (size as usize).clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

struct Inner {
    slots: Vec<Option<Arc<Block>>>,
    block_size: usize,
    file_size: u64,
}

/// The live block map for one file. Sparse slots (`None`) read as zeros and
/// allocate nothing.
pub struct BlockMap {
    inner: RwLock<Inner>,
}

impl BlockMap {
    pub fn new(block_size: usize) -> Self {
        BlockMap {
            inner: RwLock::new(Inner {
                slots: Vec::new(),
                block_size,
                file_size: 0,
            }),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.inner.read().file_size
    }

    pub fn block_size(&self) -> usize {
        self.inner.read().block_size
    }

    /// The block currently occupying a logical slot, if any. Used by the
    /// integrity/backup subsystem to prefetch or verify without going
    /// through a read offset/size pair.
    pub fn block_at(&self, index: usize) -> Option<Arc<Block>> {
        self.inner.read().slots.get(index).and_then(|s| s.clone())
    }

    /// A read-only snapshot of current slots, used by the version chain to
    /// build a new snapshot node.
    pub fn slots_snapshot(&self) -> (Vec<Option<Arc<Block>>>, u64) {
        let inner = self.inner.read();
        (inner.slots.clone(), inner.file_size)
    }

    pub fn read(&self, offset: u64, size: usize, cache: &CacheSystem) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(size);
        let block_size = inner.block_size as u64;
        let end = (offset + size as u64).min(inner.file_size);
        if offset >= end {
            return Ok(out);
        }

        let mut pos = offset;
        while pos < end {
            let block_index = (pos / block_size) as usize;
            let intra = (pos % block_size) as usize;
            let want = ((end - pos) as usize).min(inner.block_size - intra);

            match inner.slots.get(block_index).and_then(|s| s.as_ref()) {
                None => out.extend(std::iter::repeat(0u8).take(want)),
                Some(block) => {
                    let plaintext = cache.get_or_insert(block)?;
                    let hi = (intra + want).min(plaintext.len());
                    if intra < plaintext.len() {
                        out.extend_from_slice(&plaintext[intra..hi]);
                        out.extend(std::iter::repeat(0u8).take(want - (hi - intra)));
                    } else {
                        out.extend(std::iter::repeat(0u8).take(want));
                    }
                }
            }
            pos += want as u64;
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &self,
        offset: u64,
        data: &[u8],
        cfg: &Config,
        fi: &FingerprintIndex,
        stats: &Stats,
        cache: &CacheSystem,
    ) -> Result<usize> {
        let mut inner = self.inner.write();
        let block_size = inner.block_size as u64;
        let end = offset + data.len() as u64;
        let last_index = ((end.saturating_sub(1)) / block_size) as usize;
        if inner.slots.len() <= last_index {
            inner.slots.resize(last_index + 1, None);
        }

        let mut pos = offset;
        let mut written = 0usize;
        while pos < end {
            let block_index = (pos / block_size) as usize;
            let intra = (pos % block_size) as usize;
            let want = ((end - pos) as usize).min(inner.block_size - intra);

            let mut plaintext = match &inner.slots[block_index] {
                Some(block) => cache.get_or_insert(block)?,
                None => vec![0u8; inner.block_size],
            };
            if plaintext.len() < inner.block_size {
                plaintext.resize(inner.block_size, 0);
            }
            let src_start = written;
            plaintext[intra..intra + want].copy_from_slice(&data[src_start..src_start + want]);

            let old = inner.slots[block_index].clone();
            let new_block = process_block_on_write(plaintext, cfg, fi, stats)?;
            cache.put(new_block.clone())?;
            inner.slots[block_index] = Some(new_block);
            if let Some(old) = old {
                release_block(&old, fi, stats);
            }

            pos += want as u64;
            written += want;
        }

        if end > inner.file_size {
            inner.file_size = end;
        }
        Ok(written)
    }
}

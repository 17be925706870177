// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-inode registry of live [`BlockMap`]/[`VersionChain`] pairs. A lookup
//! clones the `Arc` and drops the registry's own lock before any chain lock
//! is taken, so the lock hierarchy in `Engine` never nests a chain lock
//! inside the registry lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::multiple::RefMulti;

use crate::block_map::BlockMap;
use crate::version::VersionChain;

pub struct FileState {
    pub inode: u64,
    pub bm: BlockMap,
    pub vc: VersionChain,
    pinned: AtomicBool,
}

impl FileState {
    pub fn new(inode: u64, block_size: usize) -> Self {
        FileState {
            inode,
            bm: BlockMap::new(block_size),
            vc: VersionChain::new(),
            pinned: AtomicBool::new(false),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Relaxed)
    }

    pub fn set_pinned(&self, pinned: bool) {
        self.pinned.store(pinned, Ordering::Relaxed);
        self.vc.set_pinned(pinned);
    }
}

#[derive(Default)]
pub struct FileRegistry {
    files: DashMap<u64, Arc<FileState>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, inode: u64, block_size: usize) -> Arc<FileState> {
        self.files
            .entry(inode)
            .or_insert_with(|| Arc::new(FileState::new(inode, block_size)))
            .clone()
    }

    pub fn get(&self, inode: u64) -> Option<Arc<FileState>> {
        self.files.get(&inode).map(|r| r.clone())
    }

    pub fn remove(&self, inode: u64) -> Option<Arc<FileState>> {
        self.files.remove(&inode).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<FileState>> + '_ {
        self.files.iter().map(|r: RefMulti<'_, u64, Arc<FileState>>| r.value().clone())
    }
}

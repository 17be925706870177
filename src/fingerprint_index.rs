// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The deduplication index: fingerprint -> canonical block. One global
//! read/write lock; outermost in the engine's lock hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::{fingerprint_key, Block, Fingerprint};

#[derive(Default)]
pub struct FingerprintIndex {
    table: RwLock<HashMap<u64, Arc<Block>>>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a block by its full fingerprint. Returns `None` unless a
    /// block is indexed under the truncated key *and* its full fingerprint
    /// matches (truncation collisions never produce a false duplicate).
    pub fn find(&self, fp: &Fingerprint) -> Option<Arc<Block>> {
        let key = fingerprint_key(fp);
        let table = self.table.read();
        table
            .get(&key)
            .filter(|b| &b.fingerprint == fp)
            .cloned()
    }

    /// Indexes `block` under its fingerprint if no block is already indexed
    /// there. Returns `true` if this block became the canonical entry.
    pub fn index(&self, block: Arc<Block>) -> bool {
        let key = fingerprint_key(&block.fingerprint);
        let mut table = self.table.write();
        if table.contains_key(&key) {
            return false;
        }
        table.insert(key, block);
        true
    }

    /// Removes the indexed entry for `fp` only if it still points at `id`
    /// (guards against removing a newer block that reused the same key).
    pub fn remove_if(&self, fp: &Fingerprint, id: u64) {
        let key = fingerprint_key(fp);
        let mut table = self.table.write();
        if table.get(&key).is_some_and(|b| b.id == id) {
            table.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_then_find() {
        let fi = FingerprintIndex::new();
        let b = Arc::new(Block::new(b"payload".to_vec()));
        assert!(fi.index(b.clone()));
        let found = fi.find(&b.fingerprint).unwrap();
        assert_eq!(found.id, b.id);
    }

    #[test]
    fn second_index_for_same_key_loses() {
        let fi = FingerprintIndex::new();
        let b1 = Arc::new(Block::new(b"same".to_vec()));
        let b2 = Arc::new(Block::new(b"same".to_vec()));
        assert!(fi.index(b1.clone()));
        assert!(!fi.index(b2));
        assert_eq!(fi.find(&b1.fingerprint).unwrap().id, b1.id);
    }

    #[test]
    fn remove_if_guards_against_stale_id() {
        let fi = FingerprintIndex::new();
        let b = Arc::new(Block::new(b"gone".to_vec()));
        fi.index(b.clone());
        fi.remove_if(&b.fingerprint, b.id + 1);
        assert!(fi.find(&b.fingerprint).is_some());
        fi.remove_if(&b.fingerprint, b.id);
        assert!(fi.find(&b.fingerprint).is_none());
    }
}

// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! A bounded LRU over `(inode, version_id) -> description` so repeat
//! `<name>@<selector>` lookups don't walk the version chain every time.
//! Entries are dropped whenever the backing version node is removed.

use hashlink::LruCache;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct VersionView {
    pub version_id: u64,
    pub description: String,
    pub file_size: u64,
}

pub struct VersionMetadataCache {
    inner: Mutex<LruCache<(u64, u64), VersionView>>,
}

impl VersionMetadataCache {
    pub fn new(capacity: usize) -> Self {
        VersionMetadataCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, inode: u64, version_id: u64) -> Option<VersionView> {
        self.inner.lock().get(&(inode, version_id)).cloned()
    }

    pub fn put(&self, inode: u64, view: VersionView) {
        self.inner.lock().insert((inode, view.version_id), view);
    }

    pub fn invalidate(&self, inode: u64, version_id: u64) {
        self.inner.lock().remove(&(inode, version_id));
    }

    pub fn invalidate_file(&self, inode: u64) {
        let mut guard = self.inner.lock();
        let keys: Vec<(u64, u64)> = guard.iter().map(|(k, _)| *k).filter(|(i, _)| *i == inode).collect();
        for key in keys {
            guard.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let cache = VersionMetadataCache::new(4);
        cache.put(
            1,
            VersionView {
                version_id: 7,
                description: "snap".into(),
                file_size: 100,
            },
        );
        assert_eq!(cache.get(1, 7).unwrap().description, "snap");
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = VersionMetadataCache::new(4);
        cache.put(
            1,
            VersionView {
                version_id: 7,
                description: "snap".into(),
                file_size: 100,
            },
        );
        cache.invalidate(1, 7);
        assert!(cache.get(1, 7).is_none());
    }
}

// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Filesystem tier: one file per block in a private directory, with a TTL
//! and byte/entry budget. Mirrors `l3_cache_t` / `l3_init` / `l3_load_entry`
//! / `l3_evict_if_needed`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{Error, Result};

struct Entry {
    stored_bytes: usize,
    last_access: Instant,
}

struct Inner {
    index: HashMap<u64, Entry>,
    current_bytes: usize,
}

pub struct L3Cache {
    dir: PathBuf,
    capacity_bytes: usize,
    max_entries: usize,
    expire: Duration,
    inner: RwLock<Inner>,
}

impl L3Cache {
    pub fn new(dir: &Path, capacity_bytes: usize, max_entries: usize, expire_seconds: i64) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| Error::IoError {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(L3Cache {
            dir: dir.to_path_buf(),
            capacity_bytes,
            max_entries: max_entries.max(1),
            expire: Duration::from_secs(expire_seconds.max(0) as u64),
            inner: RwLock::new(Inner {
                index: HashMap::new(),
                current_bytes: 0,
            }),
        })
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.bin"))
    }

    pub fn get(&self, id: u64) -> Option<Vec<u8>> {
        let expired = {
            let mut inner = self.inner.write();
            match inner.index.get_mut(&id) {
                None => return None,
                Some(entry) => {
                    if entry.last_access.elapsed() > self.expire {
                        true
                    } else {
                        entry.last_access = Instant::now();
                        false
                    }
                }
            }
        };
        if expired {
            self.remove(id);
            return None;
        }
        fs::read(self.path_for(id)).ok()
    }

    pub fn put(&self, id: u64, plaintext: &[u8]) -> Result<()> {
        let path = self.path_for(id);
        fs::write(&path, plaintext).map_err(|source| Error::IoError {
            path: path.clone(),
            source,
        })?;

        let mut inner = self.inner.write();
        if let Some(old) = inner.index.remove(&id) {
            inner.current_bytes -= old.stored_bytes;
        }
        inner.index.insert(
            id,
            Entry {
                stored_bytes: plaintext.len(),
                last_access: Instant::now(),
            },
        );
        inner.current_bytes += plaintext.len();
        drop(inner);

        self.evict_if_needed();
        Ok(())
    }

    pub fn remove(&self, id: u64) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.index.remove(&id) {
            inner.current_bytes -= entry.stored_bytes;
            let _ = fs::remove_file(self.path_for(id));
        }
    }

    fn evict_if_needed(&self) {
        loop {
            let over_capacity;
            let over_entries;
            let oldest;
            {
                let inner = self.inner.read();
                over_capacity = inner.current_bytes > self.capacity_bytes;
                over_entries = inner.index.len() > self.max_entries;
                if !over_capacity && !over_entries {
                    return;
                }
                if inner.index.len() <= 1 {
                    return;
                }
                oldest = inner
                    .index
                    .iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(id, _)| *id);
            }
            match oldest {
                Some(id) => self.remove(id),
                None => return,
            }
        }
    }

    /// Drops entries whose TTL has expired, without requiring a `get`.
    pub fn trim_expired(&self) {
        let expired: Vec<u64> = {
            let inner = self.inner.read();
            inner
                .index
                .iter()
                .filter(|(_, e)| e.last_access.elapsed() > self.expire)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in expired {
            self.remove(id);
        }
    }

    pub fn entry_count(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn current_bytes(&self) -> usize {
        self.inner.read().current_bytes
    }
}

// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-file version history. One read/write lock per chain, second in the
//! engine's lock hierarchy (below the fingerprint index, above a file's
//! block map).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::block_map::BlockMap;
use crate::error::{Error, Result};
use crate::version::node::{rolling_checksum, SlotSnapshot, VersionNode};
use crate::version::selector::Selector;

struct Inner {
    nodes: HashMap<u64, VersionNode>,
    head_id: Option<u64>,
    tail_id: Option<u64>,
    next_id: u64,
    last_version_time: DateTime<Utc>,
    pinned: bool,
}

pub struct VersionChain {
    inner: RwLock<Inner>,
}

impl Default for VersionChain {
    fn default() -> Self {
        VersionChain {
            inner: RwLock::new(Inner {
                nodes: HashMap::new(),
                head_id: None,
                tail_id: None,
                next_id: 1,
                last_version_time: Utc::now(),
                pinned: false,
            }),
        }
    }
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pinned(&self, pinned: bool) {
        self.inner.write().pinned = pinned;
    }

    pub fn is_pinned(&self) -> bool {
        self.inner.read().pinned
    }

    pub fn version_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn head_id(&self) -> Option<u64> {
        self.inner.read().head_id
    }

    /// Snapshots the live block map into a new version node, storing bytes
    /// only for slots that diverge from the current head (inheritance), then
    /// runs retention. Returns the new version id.
    pub fn create(&self, bm: &BlockMap, description: &str, now: DateTime<Utc>) -> Result<u64> {
        let (slots, file_size) = bm.slots_snapshot();
        let mut checksums = Vec::with_capacity(slots.len());
        let mut plaintexts: Vec<Option<Vec<u8>>> = Vec::with_capacity(slots.len());
        for slot in &slots {
            match slot {
                None => {
                    checksums.push(0);
                    plaintexts.push(None);
                }
                Some(block) => {
                    let pt = block.plaintext()?;
                    checksums.push(rolling_checksum(&pt));
                    plaintexts.push(Some(pt));
                }
            }
        }

        let mut inner = self.inner.write();
        let version_id = inner.next_id;
        inner.next_id += 1;
        let parent_id = inner.head_id;

        let parent_checksums = parent_id
            .and_then(|p| inner.nodes.get(&p))
            .map(|n| n.block_checksums.clone());

        let mut snapshots = Vec::with_capacity(slots.len());
        let mut diff_indices = Vec::new();
        for (i, pt) in plaintexts.into_iter().enumerate() {
            let differs = match &parent_checksums {
                None => true,
                Some(parent) => parent.get(i).copied() != Some(checksums[i]) || pt.is_none(),
            };
            if differs {
                if pt.is_some() {
                    diff_indices.push(i);
                }
                snapshots.push(SlotSnapshot {
                    has_data: pt.is_some(),
                    bytes: pt,
                });
            } else {
                snapshots.push(SlotSnapshot {
                    has_data: false,
                    bytes: None,
                });
            }
        }
        let stored_bytes = snapshots
            .iter()
            .filter_map(|s| s.bytes.as_ref())
            .map(|b| b.len() as u64)
            .sum();

        let node = VersionNode {
            version_id,
            parent_id,
            children: Vec::new(),
            create_time: now,
            description: description.to_string(),
            file_size,
            block_count: slots.len(),
            block_checksums: checksums,
            snapshots,
            diff_indices,
            stored_bytes,
            important: false,
        };

        if let Some(parent) = parent_id {
            if let Some(parent_node) = inner.nodes.get_mut(&parent) {
                parent_node.children.push(version_id);
            }
        } else {
            inner.tail_id = Some(version_id);
        }
        inner.nodes.insert(version_id, node);
        inner.head_id = Some(version_id);
        inner.last_version_time = now;
        drop(inner);

        self.run_retention(now)?;
        Ok(version_id)
    }

    /// True if more than `threshold` of live slots diverge from head.
    pub fn should_create_on_change(&self, bm: &BlockMap, threshold: f64) -> bool {
        let inner = self.inner.read();
        let Some(head_id) = inner.head_id else {
            return true;
        };
        let Some(head) = inner.nodes.get(&head_id) else {
            return true;
        };
        let (slots, _) = bm.slots_snapshot();
        if slots.is_empty() {
            return false;
        }
        let mut changed = 0usize;
        for (i, slot) in slots.iter().enumerate() {
            let checksum = match slot {
                None => 0,
                Some(block) => block.plaintext().map(|p| rolling_checksum(&p)).unwrap_or(0),
            };
            if head.block_checksums.get(i).copied() != Some(checksum) {
                changed += 1;
            }
        }
        (changed as f64 / slots.len() as f64) > threshold
    }

    pub fn should_create_periodic(&self, now: DateTime<Utc>, period_seconds: i64) -> bool {
        let inner = self.inner.read();
        if inner.head_id.is_none() {
            return true;
        }
        (now - inner.last_version_time).num_seconds() >= period_seconds
    }

    fn resolve_locked(inner: &Inner, selector: Selector) -> Option<u64> {
        match selector {
            Selector::Latest => inner.head_id,
            Selector::Exact(id) => inner.nodes.contains_key(&id).then_some(id),
            Selector::AtOrBefore(target) => inner
                .nodes
                .values()
                .filter(|n| n.create_time <= target)
                .max_by_key(|n| n.create_time)
                .map(|n| n.version_id),
        }
    }

    pub fn resolve(&self, selector: Selector) -> Option<u64> {
        let inner = self.inner.read();
        Self::resolve_locked(&inner, selector)
    }

    /// Reads `size` bytes at `offset` from `version_id`, walking ancestors
    /// to find inherited slot data. Mirrors `dedup_read_version_data`.
    pub fn read_version_data(&self, version_id: u64, offset: u64, size: usize, block_size: usize) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let node = inner
            .nodes
            .get(&version_id)
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;

        let mut out = Vec::with_capacity(size);
        let end = (offset + size as u64).min(node.file_size);
        if offset >= end {
            return Ok(out);
        }
        let mut pos = offset;
        while pos < end {
            let slot_index = (pos / block_size as u64) as usize;
            let intra = (pos % block_size as u64) as usize;
            let want = ((end - pos) as usize).min(block_size - intra);

            let bytes = Self::find_inherited(&inner, version_id, slot_index);
            match bytes {
                None => out.extend(std::iter::repeat(0u8).take(want)),
                Some(buf) => {
                    let hi = (intra + want).min(buf.len());
                    if intra < buf.len() {
                        out.extend_from_slice(&buf[intra..hi]);
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

    fn find_inherited(inner: &Inner, mut version_id: u64, slot_index: usize) -> Option<Vec<u8>> {
        loop {
            let node = inner.nodes.get(&version_id)?;
            if let Some(snap) = node.snapshots.get(slot_index) {
                if snap.has_data {
                    return snap.bytes.clone();
                }
            } else {
                return None;
            }
            version_id = node.parent_id?;
        }
    }

    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut versions: Vec<&VersionNode> = inner.nodes.values().collect();
        versions.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        versions
            .into_iter()
            .map(|n| {
                format!(
                    "v{} | {} | {}",
                    n.version_id,
                    n.create_time.to_rfc3339(),
                    n.description
                )
            })
            .collect()
    }

    pub fn diff(&self, a: u64, b: u64) -> Result<usize> {
        let inner = self.inner.read();
        let na = inner
            .nodes
            .get(&a)
            .ok_or_else(|| Error::NotFound(format!("version {a}")))?;
        let nb = inner
            .nodes
            .get(&b)
            .ok_or_else(|| Error::NotFound(format!("version {b}")))?;
        let max_len = na.block_checksums.len().max(nb.block_checksums.len());
        let mut diff = 0;
        for i in 0..max_len {
            if na.block_checksums.get(i) != nb.block_checksums.get(i) {
                diff += 1;
            }
        }
        Ok(diff)
    }

    pub fn mark_important(&self, version_id: u64, important: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner
            .nodes
            .get_mut(&version_id)
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;
        node.important = important;
        Ok(())
    }

    /// Explicit caller-requested delete. Refuses an "important" version.
    pub fn delete(&self, version_id: u64) -> Result<()> {
        let mut inner = self.inner.write();
        let important = inner
            .nodes
            .get(&version_id)
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?
            .important;
        if important {
            return Err(Error::Permission(format!(
                "version {version_id} is marked important"
            )));
        }
        Self::remove_node(&mut inner, version_id);
        Ok(())
    }

    /// Materializes inherited bytes into every child of `version_id`, then
    /// unlinks and frees it. The chain's head/tail pointers are updated if
    /// the removed node held either.
    fn remove_node(inner: &mut Inner, version_id: u64) {
        let Some(node) = inner.nodes.get(&version_id).cloned() else {
            return;
        };

        for &child_id in &node.children {
            for slot_index in 0..node.block_count {
                let already_has = inner
                    .nodes
                    .get(&child_id)
                    .and_then(|c| c.snapshots.get(slot_index))
                    .map(|s| s.has_data)
                    .unwrap_or(true);
                if already_has {
                    continue;
                }
                let inherited = Self::find_inherited(inner, version_id, slot_index);
                if let (Some(bytes), Some(child)) = (inherited, inner.nodes.get_mut(&child_id)) {
                    if let Some(snap) = child.snapshots.get_mut(slot_index) {
                        child.stored_bytes += bytes.len() as u64;
                        snap.has_data = true;
                        snap.bytes = Some(bytes);
                    }
                }
            }
            if let Some(child) = inner.nodes.get_mut(&child_id) {
                child.parent_id = node.parent_id;
            }
        }

        if let Some(parent_id) = node.parent_id {
            if let Some(parent) = inner.nodes.get_mut(&parent_id) {
                parent.children.retain(|c| *c != version_id);
                parent.children.extend(node.children.iter().copied());
            }
        }

        if inner.head_id == Some(version_id) {
            inner.head_id = node.parent_id.or_else(|| node.children.first().copied());
        }
        if inner.tail_id == Some(version_id) {
            inner.tail_id = node.children.first().copied().or(node.parent_id);
        }

        inner.nodes.remove(&version_id);
    }

    /// Background/creation-time retention pass. Pinned files are skipped
    /// entirely; within an unpinned file, individually "important" versions
    /// are skipped. A version is removed once the chain both exceeds
    /// `max_versions` and the version is older than `expire_days`, or once
    /// total stored bytes exceed `size_limit_bytes` (chain must keep at
    /// least one node either way).
    pub fn run_retention(&self, now: DateTime<Utc>) -> Result<()> {
        self.run_retention_with(now, 10, 30, 512 * 1024 * 1024)
    }

    pub fn run_retention_with(
        &self,
        now: DateTime<Utc>,
        max_versions: usize,
        expire_days: i64,
        size_limit_bytes: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.pinned {
            return Ok(());
        }

        loop {
            if inner.nodes.len() <= 1 {
                return Ok(());
            }
            let total_bytes: u64 = inner.nodes.values().map(|n| n.stored_bytes).sum();
            let over_count = inner.nodes.len() > max_versions;
            let over_bytes = total_bytes > size_limit_bytes;
            if !over_count && !over_bytes {
                return Ok(());
            }

            let mut oldest: Vec<&VersionNode> = inner.nodes.values().filter(|n| !n.important).collect();
            oldest.sort_by_key(|n| n.create_time);
            let Some(candidate) = oldest.into_iter().find(|n| {
                let age_days = (now - n.create_time).num_days();
                (over_count && age_days > expire_days) || over_bytes
            }) else {
                return Ok(());
            };
            let candidate_id = candidate.version_id;
            Self::remove_node(&mut inner, candidate_id);
        }
    }

    pub fn get_description(&self, version_id: u64) -> Option<String> {
        self.inner.read().nodes.get(&version_id).map(|n| n.description.clone())
    }

    /// `(create_time, file_size)` for every version node, the raw material
    /// `predict_storage_usage_internal` draws its regression samples from.
    pub fn history_samples(&self) -> Vec<(DateTime<Utc>, u64)> {
        self.inner
            .read()
            .nodes
            .values()
            .map(|n| (n.create_time, n.file_size))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_map::BlockMap;
    use crate::config::Config;
    use crate::fingerprint_index::FingerprintIndex;
    use crate::metrics::Stats;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, h, 0, 0).unwrap()
    }

    fn cache_for(dir: &std::path::Path) -> crate::cache::CacheSystem {
        let mut cfg = Config {
            l2_backing_path: dir.join("l2.cache"),
            l3_cache_dir: dir.join("l3"),
            ..Config::default()
        };
        cfg.validate();
        crate::cache::CacheSystem::new(&cfg, std::sync::Arc::new(Stats::default())).unwrap()
    }

    #[test]
    fn version_snapshot_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(dir.path());
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config::default();
        let bm = BlockMap::new(4096);
        let chain = VersionChain::new();

        bm.write(0, b"hello", &cfg, &fi, &stats, &cache).unwrap();
        let v1 = chain.create(&bm, "v1", ts(1)).unwrap();

        bm.write(0, b"H", &cfg, &fi, &stats, &cache).unwrap();

        let old = chain.read_version_data(v1, 0, 5, 4096).unwrap();
        assert_eq!(&old, b"hello");

        let live = bm.read(0, 5, &cache).unwrap();
        assert_eq!(&live, b"Hello");
    }

    #[test]
    fn retention_materializes_into_child() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(dir.path());
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config::default();
        let bm = BlockMap::new(4096);
        let chain = VersionChain::new();

        bm.write(0, b"AAAA", &cfg, &fi, &stats, &cache).unwrap();
        let v1 = chain.create(&bm, "v1", ts(0)).unwrap();

        bm.write(4096, b"BBBB", &cfg, &fi, &stats, &cache).unwrap();
        let _v2 = chain.create(&bm, "v2", ts(1)).unwrap();

        bm.write(8192, b"CCCC", &cfg, &fi, &stats, &cache).unwrap();
        let v3 = chain.create(&bm, "v3", ts(2)).unwrap();

        let before = chain.read_version_data(v3, 0, 4, 4096).unwrap();

        // Force v1 out via byte-limit retention (keep >1 node so it's eligible).
        chain.run_retention_with(ts(100), 100, 0, 0).unwrap();

        let after = chain.read_version_data(v3, 0, 4, 4096).unwrap();
        assert_eq!(before, after);
        assert_eq!(before, b"AAAA");
    }

    #[test]
    fn important_version_rejects_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(dir.path());
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config::default();
        let bm = BlockMap::new(4096);
        let chain = VersionChain::new();

        bm.write(0, b"data", &cfg, &fi, &stats, &cache).unwrap();
        let v1 = chain.create(&bm, "v1", ts(0)).unwrap();
        bm.write(0, b"more", &cfg, &fi, &stats, &cache).unwrap();
        chain.create(&bm, "v2", ts(1)).unwrap();

        chain.mark_important(v1, true).unwrap();
        let err = chain.delete(v1).unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
    }

    #[test]
    fn list_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(dir.path());
        let fi = FingerprintIndex::new();
        let stats = Stats::default();
        let cfg = Config::default();
        let bm = BlockMap::new(4096);
        let chain = VersionChain::new();

        bm.write(0, b"a", &cfg, &fi, &stats, &cache).unwrap();
        chain.create(&bm, "first", ts(0)).unwrap();
        bm.write(0, b"b", &cfg, &fi, &stats, &cache).unwrap();
        chain.create(&bm, "second", ts(1)).unwrap();

        let lines = chain.list();
        assert!(lines[0].contains("second"));
        assert!(lines[1].contains("first"));
    }
}

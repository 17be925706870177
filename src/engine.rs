// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The storage engine's public surface: the handle a host process (the
//! fuse/POSIX bridge, a test harness, or the integrity subsystem) drives.
//! Owns every component named in the data model; constructible multiple
//! times per process so tests can run isolated engines side by side.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::info;

use crate::block_map::pick_block_size;
use crate::cache::CacheSystem;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file_registry::FileRegistry;
use crate::fingerprint_index::FingerprintIndex;
use crate::metrics::{Stats, StatsSnapshot};
use crate::scheduler::BackgroundScheduler;
use crate::version::selector::parse as parse_selector;
use crate::version_cache::{VersionMetadataCache, VersionView};

const VERSION_METADATA_CACHE_CAPACITY: usize = 4096;

pub struct Engine {
    config: Arc<Mutex<Config>>,
    fi: FingerprintIndex,
    cache: Arc<CacheSystem>,
    stats: Arc<Stats>,
    files: Arc<FileRegistry>,
    version_meta: VersionMetadataCache,
    scheduler: Option<BackgroundScheduler>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let mut config = config;
        config.validate();
        let stats = Arc::new(Stats::default());
        let cache = Arc::new(CacheSystem::new(&config, stats.clone())?);
        Ok(Engine {
            config: Arc::new(Mutex::new(config)),
            fi: FingerprintIndex::new(),
            cache,
            stats,
            files: Arc::new(FileRegistry::new()),
            version_meta: VersionMetadataCache::new(VERSION_METADATA_CACHE_CAPACITY),
            scheduler: None,
        })
    }

    /// Spawns the background writeback/retention workers onto the current
    /// Tokio runtime. No-op if already spawned.
    pub fn start_background_workers(&mut self) {
        if self.scheduler.is_some() {
            return;
        }
        info!("starting background workers");
        self.scheduler = Some(BackgroundScheduler::spawn(
            self.cache.clone(),
            self.files.clone(),
            self.config.clone(),
        ));
    }

    pub async fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
    }

    fn block_size_for(&self, size_hint: Option<u64>) -> usize {
        let cfg = self.config.lock();
        pick_block_size(size_hint).clamp(cfg.min_block_size, cfg.max_block_size)
    }

    pub fn read_file(&self, inode: u64, offset: u64, size: usize) -> Result<Vec<u8>> {
        let Some(file) = self.files.get(inode) else {
            return Ok(Vec::new());
        };
        file.bm.read(offset, size, &self.cache)
    }

    pub fn write_file(&self, inode: u64, offset: u64, data: &[u8], size_hint: Option<u64>) -> Result<usize> {
        let file = self
            .files
            .get(inode)
            .unwrap_or_else(|| self.files.get_or_create(inode, self.block_size_for(size_hint)));
        let cfg = self.config.lock().clone();
        let written = file.bm.write(offset, data, &cfg, &self.fi, &self.stats, &self.cache)?;

        if file.vc.should_create_on_change(&file.bm, cfg.change_ratio_threshold) {
            file.vc.create(&file.bm, "content-change", Utc::now())?;
            self.version_meta.invalidate_file(inode);
        } else if file.vc.should_create_periodic(Utc::now(), cfg.version_period_seconds) {
            file.vc.create(&file.bm, "periodic", Utc::now())?;
            self.version_meta.invalidate_file(inode);
        }
        Ok(written)
    }

    pub fn resolve_version(&self, inode: u64, selector: &str) -> Result<VersionView> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        let parsed = parse_selector(selector, Utc::now())?;
        let version_id = file
            .vc
            .resolve(parsed)
            .ok_or_else(|| Error::NotFound(format!("no version matches {selector}")))?;

        if let Some(view) = self.version_meta.get(inode, version_id) {
            return Ok(view);
        }
        let description = file
            .vc
            .get_description(version_id)
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;
        let view = VersionView {
            version_id,
            description,
            file_size: file.bm.file_size(),
        };
        self.version_meta.put(inode, view.clone());
        Ok(view)
    }

    pub fn read_version(&self, inode: u64, version_id: u64, offset: u64, size: usize) -> Result<Vec<u8>> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        file.vc
            .read_version_data(version_id, offset, size, file.bm.block_size())
    }

    pub fn list_versions(&self, inode: u64) -> Result<Vec<String>> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        Ok(file.vc.list())
    }

    pub fn create_version(&self, inode: u64, reason: &str) -> Result<u64> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        let id = file.vc.create(&file.bm, reason, Utc::now())?;
        self.version_meta.invalidate_file(inode);
        Ok(id)
    }

    pub fn delete_version(&self, inode: u64, version_id: u64) -> Result<()> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        file.vc.delete(version_id)?;
        self.version_meta.invalidate(inode, version_id);
        Ok(())
    }

    pub fn mark_important(&self, inode: u64, version_id: u64, important: bool) -> Result<()> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        file.vc.mark_important(version_id, important)
    }

    pub fn set_pinned(&self, inode: u64, pinned: bool) -> Result<()> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        file.set_pinned(pinned);
        Ok(())
    }

    pub fn update_config(&self, f: impl FnOnce(&mut Config)) {
        let mut cfg = self.config.lock();
        f(&mut cfg);
        cfg.validate();
    }

    pub fn persist_config(&self, path: &Path) -> Result<()> {
        self.config.lock().persist(path)
    }

    pub fn load_config(&self, path: &Path) -> Result<()> {
        let loaded = Config::load(path)?;
        *self.config.lock() = loaded;
        Ok(())
    }

    pub fn snapshot_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Forecasts total stored bytes `horizon_days` from now via least-squares
    /// regression over every file's version history, mirroring
    /// `predict_storage_usage_internal`'s sampling and math. Capped at the
    /// same 2048-sample ceiling the original collector used.
    pub fn predict_storage_usage(&self, horizon_days: u32) -> crate::metrics::StoragePrediction {
        const MAX_SAMPLES: usize = 2048;
        let mut samples = Vec::new();
        'outer: for file in self.files.iter() {
            for sample in file.vc.history_samples() {
                samples.push(sample);
                if samples.len() >= MAX_SAMPLES {
                    break 'outer;
                }
            }
        }
        crate::metrics::predict_storage_usage(&samples, horizon_days, Utc::now())
    }

    /// Forces an immediate writeback pass. Routed through the background
    /// scheduler (and waits for that pass to finish) when one is running;
    /// otherwise runs the pass inline.
    pub fn force_cache_writeback(&self) -> Result<()> {
        match &self.scheduler {
            Some(scheduler) => scheduler.request_writeback_and_wait(),
            None => self.cache.manage().map(|_| ()),
        }
    }

    pub fn block_fingerprint(&self, plaintext: &[u8]) -> u64 {
        crate::block::fingerprint_key(&crate::block::fingerprint_of(plaintext))
    }

    /// Looks up the canonical block for a 32-byte fingerprint, as held by
    /// the deduplication index.
    pub fn find_by_fingerprint(&self, fp: &crate::block::Fingerprint) -> Option<Arc<crate::block::Block>> {
        self.fi.find(fp)
    }

    /// Warms the cache for one logical slot of a file, ahead of an
    /// anticipated read. A no-op if the slot is sparse or already resident.
    pub fn cache_prefetch(&self, inode: u64, block_index: usize) -> Result<()> {
        let Some(file) = self.files.get(inode) else {
            return Ok(());
        };
        if let Some(block) = file.bm.block_at(block_index) {
            self.cache.get_or_insert(&block)?;
        }
        Ok(())
    }

    /// Recomputes and checks a slot's fingerprint against the one recorded
    /// when it was written, surfacing silent corruption in stored bytes.
    pub fn verify_block(&self, inode: u64, block_index: usize) -> Result<bool> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        match file.bm.block_at(block_index) {
            Some(block) => block.verify(),
            None => Ok(true),
        }
    }

    /// Counts slot positions whose content fingerprint differs between two
    /// versions of the same file.
    pub fn diff_versions(&self, inode: u64, a: u64, b: u64) -> Result<usize> {
        let file = self
            .files
            .get(inode)
            .ok_or_else(|| Error::NotFound(format!("inode {inode}")))?;
        file.vc.diff(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config {
            l2_backing_path: dir.path().join("l2.cache"),
            l3_cache_dir: dir.path().join("l3"),
            ..Config::default()
        };
        cfg.validate();
        (Engine::new(cfg).unwrap(), dir)
    }

    #[test]
    fn dedup_across_files_end_to_end() {
        let (engine, _dir) = test_engine();
        engine.write_file(1, 0, &[0x41; 4096], None).unwrap();
        engine.write_file(2, 0, &[0x41; 4096], None).unwrap();

        let a = engine.read_file(1, 0, 4096).unwrap();
        let b = engine.read_file(2, 0, 4096).unwrap();
        assert_eq!(a, vec![0x41; 4096]);
        assert_eq!(b, vec![0x41; 4096]);
        assert_eq!(engine.snapshot_stats().dedup_saved_bytes, 4096);
    }

    #[test]
    fn version_then_overwrite_then_restore() {
        let (engine, _dir) = test_engine();
        engine.write_file(10, 0, b"hello", None).unwrap();
        let v1 = engine.create_version(10, "manual").unwrap();
        engine.write_file(10, 0, b"H", None).unwrap();

        let restored = engine.read_version(10, v1, 0, 5).unwrap();
        assert_eq!(&restored, b"hello");
        let live = engine.read_file(10, 0, 5).unwrap();
        assert_eq!(&live, b"Hello");
    }

    #[test]
    fn resolve_latest_selector() {
        let (engine, _dir) = test_engine();
        engine.write_file(20, 0, b"x", None).unwrap();
        engine.create_version(20, "first").unwrap();
        let view = engine.resolve_version(20, "latest").unwrap();
        assert_eq!(view.description, "first");
    }

    #[test]
    fn important_version_cannot_be_deleted() {
        let (engine, _dir) = test_engine();
        engine.write_file(30, 0, b"x", None).unwrap();
        let v1 = engine.create_version(30, "keep-me").unwrap();
        engine.mark_important(30, v1, true).unwrap();
        assert!(engine.delete_version(30, v1).is_err());
    }

    #[test]
    fn unwritten_inode_reads_as_empty() {
        let (engine, _dir) = test_engine();
        let out = engine.read_file(999, 0, 10).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn storage_prediction_with_no_versions_is_zero() {
        let (engine, _dir) = test_engine();
        let pred = engine.predict_storage_usage(30);
        assert_eq!(pred.predicted_bytes, 0);
        assert_eq!(pred.sample_count, 0);
    }

    #[test]
    fn storage_prediction_has_samples_after_versioning() {
        let (engine, _dir) = test_engine();
        engine.write_file(40, 0, b"hello", None).unwrap();
        engine.create_version(40, "v1").unwrap();
        engine.write_file(40, 0, b"hello world", None).unwrap();
        engine.create_version(40, "v2").unwrap();

        let pred = engine.predict_storage_usage(7);
        assert_eq!(pred.sample_count, 2);
        assert_eq!(pred.horizon_days, 7);
    }
}

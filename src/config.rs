// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Engine configuration: dedup/compression knobs, cache sizing, versioning
//! policy. Persisted as flat `key=value` lines, mirroring the engine's own
//! on-disk contract rather than pulling in a structured format for a file
//! nobody but this engine reads.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgo {
    None,
    Lz4,
    Zstd,
    Gzip,
}

impl CompressionAlgo {
    fn as_u8(self) -> u8 {
        match self {
            CompressionAlgo::None => 0,
            CompressionAlgo::Lz4 => 1,
            CompressionAlgo::Zstd => 2,
            CompressionAlgo::Gzip => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => CompressionAlgo::Lz4,
            2 => CompressionAlgo::Zstd,
            3 => CompressionAlgo::Gzip,
            _ => CompressionAlgo::None,
        }
    }
}

impl fmt::Display for CompressionAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Engine-wide tunables, validated on every mutation.
#[derive(Debug, Clone)]
pub struct Config {
    pub enable_dedup: bool,
    pub enable_compression: bool,
    pub algo: CompressionAlgo,
    pub level: i32,
    pub min_compress_size: usize,

    pub l1_max_bytes: usize,
    pub l2_capacity_bytes: usize,
    pub l2_backing_path: PathBuf,
    pub l3_capacity_bytes: usize,
    pub l3_max_entries: usize,
    pub l3_expire_seconds: i64,
    pub l3_cache_dir: PathBuf,

    pub version_period_seconds: i64,
    pub max_versions: usize,
    pub version_expire_days: i64,
    pub version_size_limit_bytes: u64,
    pub change_ratio_threshold: f64,

    pub min_block_size: usize,
    pub max_block_size: usize,

    pub writeback_interval_seconds: u64,
    pub dirty_fraction_trigger: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enable_dedup: true,
            enable_compression: true,
            algo: CompressionAlgo::None,
            level: 3,
            min_compress_size: 512,

            l1_max_bytes: 64 * 1024 * 1024,
            l2_capacity_bytes: 256 * 1024 * 1024,
            l2_backing_path: PathBuf::from("/tmp/blockvault_l2.cache"),
            l3_capacity_bytes: 1024 * 1024 * 1024,
            l3_max_entries: 65536,
            l3_expire_seconds: 3600,
            l3_cache_dir: PathBuf::from("/tmp/blockvault_l3"),

            version_period_seconds: 3600,
            max_versions: 10,
            version_expire_days: 30,
            version_size_limit_bytes: 512 * 1024 * 1024,
            change_ratio_threshold: 0.10,

            min_block_size: 4096,
            max_block_size: 65536,

            writeback_interval_seconds: 30,
            dirty_fraction_trigger: 0.20,
        }
    }
}

impl Config {
    /// Clamps/normalizes fields into valid ranges. Invalid combinations
    /// (compression requested with no algorithm selected) resolve by
    /// disabling compression rather than erroring.
    pub fn validate(&mut self) {
        self.level = self.level.clamp(1, 9);
        self.min_compress_size = self.min_compress_size.max(512);
        if self.enable_compression && self.algo == CompressionAlgo::None {
            self.enable_compression = false;
        }
        if self.min_block_size == 0 {
            self.min_block_size = 4096;
        }
        if self.max_block_size < self.min_block_size {
            self.max_block_size = self.min_block_size;
        }
        self.change_ratio_threshold = self.change_ratio_threshold.clamp(0.0, 1.0);
        self.dirty_fraction_trigger = self.dirty_fraction_trigger.clamp(0.0, 1.0);
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!("dedup={}\n", self.enable_dedup as u8));
        out.push_str(&format!("comp={}\n", self.enable_compression as u8));
        out.push_str(&format!("algo={}\n", self.algo));
        out.push_str(&format!("level={}\n", self.level));
        out.push_str(&format!("min={}\n", self.min_compress_size));
        out.push_str(&format!("l1_max_bytes={}\n", self.l1_max_bytes));
        out.push_str(&format!("l2_capacity_bytes={}\n", self.l2_capacity_bytes));
        out.push_str(&format!("l2_backing_path={}\n", self.l2_backing_path.display()));
        out.push_str(&format!("l3_capacity_bytes={}\n", self.l3_capacity_bytes));
        out.push_str(&format!("l3_max_entries={}\n", self.l3_max_entries));
        out.push_str(&format!("l3_expire_seconds={}\n", self.l3_expire_seconds));
        out.push_str(&format!("l3_cache_dir={}\n", self.l3_cache_dir.display()));
        out.push_str(&format!("version_period_seconds={}\n", self.version_period_seconds));
        out.push_str(&format!("max_versions={}\n", self.max_versions));
        out.push_str(&format!("version_expire_days={}\n", self.version_expire_days));
        out.push_str(&format!(
            "version_size_limit_bytes={}\n",
            self.version_size_limit_bytes
        ));
        out.push_str(&format!(
            "change_ratio_threshold={}\n",
            self.change_ratio_threshold
        ));
        out.push_str(&format!("min_block_size={}\n", self.min_block_size));
        out.push_str(&format!("max_block_size={}\n", self.max_block_size));
        out.push_str(&format!(
            "writeback_interval_seconds={}\n",
            self.writeback_interval_seconds
        ));
        out.push_str(&format!(
            "dirty_fraction_trigger={}\n",
            self.dirty_fraction_trigger
        ));
        fs::write(path, out).map_err(|source| Error::IoError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads a config file written by [`Config::persist`]. Unknown keys are
    /// ignored (forward compatibility); missing keys keep their default.
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|source| Error::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Config::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "dedup" => cfg.enable_dedup = value == "1",
                "comp" => cfg.enable_compression = value == "1",
                "algo" => {
                    if let Ok(v) = value.parse::<u8>() {
                        cfg.algo = CompressionAlgo::from_u8(v);
                    }
                }
                "level" => {
                    if let Ok(v) = value.parse::<i32>() {
                        cfg.level = v;
                    }
                }
                "min" => {
                    if let Ok(v) = value.parse::<usize>() {
                        cfg.min_compress_size = v;
                    }
                }
                "l1_max_bytes" => {
                    if let Ok(v) = value.parse() {
                        cfg.l1_max_bytes = v;
                    }
                }
                "l2_capacity_bytes" => {
                    if let Ok(v) = value.parse() {
                        cfg.l2_capacity_bytes = v;
                    }
                }
                "l2_backing_path" => cfg.l2_backing_path = PathBuf::from(value),
                "l3_capacity_bytes" => {
                    if let Ok(v) = value.parse() {
                        cfg.l3_capacity_bytes = v;
                    }
                }
                "l3_max_entries" => {
                    if let Ok(v) = value.parse() {
                        cfg.l3_max_entries = v;
                    }
                }
                "l3_expire_seconds" => {
                    if let Ok(v) = value.parse() {
                        cfg.l3_expire_seconds = v;
                    }
                }
                "l3_cache_dir" => cfg.l3_cache_dir = PathBuf::from(value),
                "version_period_seconds" => {
                    if let Ok(v) = value.parse() {
                        cfg.version_period_seconds = v;
                    }
                }
                "max_versions" => {
                    if let Ok(v) = value.parse() {
                        cfg.max_versions = v;
                    }
                }
                "version_expire_days" => {
                    if let Ok(v) = value.parse() {
                        cfg.version_expire_days = v;
                    }
                }
                "version_size_limit_bytes" => {
                    if let Ok(v) = value.parse() {
                        cfg.version_size_limit_bytes = v;
                    }
                }
                "change_ratio_threshold" => {
                    if let Ok(v) = value.parse() {
                        cfg.change_ratio_threshold = v;
                    }
                }
                "min_block_size" => {
                    if let Ok(v) = value.parse() {
                        cfg.min_block_size = v;
                    }
                }
                "max_block_size" => {
                    if let Ok(v) = value.parse() {
                        cfg.max_block_size = v;
                    }
                }
                "writeback_interval_seconds" => {
                    if let Ok(v) = value.parse() {
                        cfg.writeback_interval_seconds = v;
                    }
                }
                "dirty_fraction_trigger" => {
                    if let Ok(v) = value.parse() {
                        cfg.dirty_fraction_trigger = v;
                    }
                }
                _ => {}
            }
        }
        cfg.validate();
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_disables_compression_without_algo() {
        let mut cfg = Config {
            enable_compression: true,
            algo: CompressionAlgo::None,
            ..Config::default()
        };
        cfg.validate();
        assert!(!cfg.enable_compression);
    }

    #[test]
    fn validate_clamps_level() {
        let mut cfg = Config {
            level: 42,
            ..Config::default()
        };
        cfg.validate();
        assert_eq!(cfg.level, 9);
    }

    #[test]
    fn persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockvault.conf");
        let mut cfg = Config {
            algo: CompressionAlgo::Zstd,
            enable_compression: true,
            level: 5,
            ..Config::default()
        };
        cfg.validate();
        cfg.persist(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.algo, CompressionAlgo::Zstd);
        assert_eq!(loaded.level, 5);
        assert!(loaded.enable_compression);
    }
}

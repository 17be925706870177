// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Engine-wide counters: dedup/compression savings, per-class compression
//! totals, and cache tier hit/miss rates. Mirrors `basic_storage_stats_t`
//! from the original engine's monitoring module; exposed both as plain
//! atomics on [`Stats`] (cheap, per-`Engine` instance) and as process-global
//! `prometheus` gauges for host-level scraping.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

use crate::block::BlockClass;

lazy_static! {
    pub static ref DEDUP_HITS_TOTAL: IntCounter =
        register_int_counter!("blockvault_dedup_hits_total", "Total deduplication hits")
            .expect("metric can be registered");
    pub static ref DEDUP_SAVED_BYTES_TOTAL: IntCounter = register_int_counter!(
        "blockvault_dedup_saved_bytes_total",
        "Total bytes saved by deduplication"
    )
    .expect("metric can be registered");
    pub static ref COMPRESS_SAVED_BYTES_TOTAL: IntCounter = register_int_counter!(
        "blockvault_compress_saved_bytes_total",
        "Total bytes saved by compression"
    )
    .expect("metric can be registered");
    pub static ref CACHE_L1_HITS_TOTAL: IntCounter =
        register_int_counter!("blockvault_cache_l1_hits_total", "L1 cache hits")
            .expect("metric can be registered");
    pub static ref CACHE_L2_HITS_TOTAL: IntCounter =
        register_int_counter!("blockvault_cache_l2_hits_total", "L2 cache hits")
            .expect("metric can be registered");
    pub static ref CACHE_L3_HITS_TOTAL: IntCounter =
        register_int_counter!("blockvault_cache_l3_hits_total", "L3 cache hits")
            .expect("metric can be registered");
    pub static ref CACHE_MISSES_TOTAL: IntCounter =
        register_int_counter!("blockvault_cache_misses_total", "Cache misses across all tiers")
            .expect("metric can be registered");
    pub static ref L2_SLOT_COLLISION_EVICTIONS_TOTAL: IntCounter = register_int_counter!(
        "blockvault_l2_slot_collision_evictions_total",
        "Evictions caused by two block ids mapping to the same direct-mapped L2 slot"
    )
    .expect("metric can be registered");
}

#[derive(Default)]
struct ClassTotals {
    raw: AtomicU64,
    compressed: AtomicU64,
}

/// Per-`Engine` snapshot counters, cheap to read without touching the
/// process-global `prometheus` registry.
#[derive(Default)]
pub struct Stats {
    total_unique_blocks: AtomicU64,
    dedup_saved_bytes: AtomicU64,
    compress_saved_bytes: AtomicU64,
    compress_input_bytes: AtomicU64,
    unknown: ClassTotals,
    text: ClassTotals,
    compressed: ClassTotals,
    binary: ClassTotals,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,
}

/// A point-in-time view returned by [`Stats::snapshot`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub total_unique_blocks: u64,
    pub dedup_saved_bytes: u64,
    pub compress_saved_bytes: u64,
    pub compress_input_bytes: u64,
    pub dedup_ratio: f64,
    pub compress_ratio: f64,
    /// Instantaneous estimate of the effective footprint at current dedup/
    /// compression ratios, extrapolated over `logical_bytes_written`. A
    /// static heuristic, not a time-series forecast — see
    /// [`predict_storage_usage`] for the horizon-based regression.
    pub projection_bytes: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,
}

/// Result of a [`predict_storage_usage`] regression.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoragePrediction {
    pub predicted_bytes: u64,
    pub horizon_days: u32,
    pub sample_count: u32,
    pub slope_bytes_per_day: f64,
}

/// Least-squares linear regression over `(create_time, file_size)` samples,
/// forecasting total size `horizon_days` past `now`. Mirrors the slope/
/// intercept math of `predict_storage_usage_internal`: `x` is days since the
/// earliest sample, `y` is file size, and the forecast point is `horizon_days`
/// past `now` rather than past the last sample.
pub fn predict_storage_usage(samples: &[(DateTime<Utc>, u64)], horizon_days: u32, now: DateTime<Utc>) -> StoragePrediction {
    if samples.is_empty() {
        return StoragePrediction {
            horizon_days,
            ..Default::default()
        };
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|(t, _)| *t);
    let origin = sorted[0].0;
    let count = sorted.len() as f64;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for (t, size) in &sorted {
        let x = (*t - origin).num_seconds() as f64 / 86400.0;
        let y = *size as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denom = count * sum_x2 - sum_x * sum_x;
    let slope = if sorted.len() > 1 && denom > 0.0 {
        (count * sum_xy - sum_x * sum_y) / denom
    } else {
        0.0
    };
    let intercept = (sum_y - slope * sum_x) / count;

    let horizon_x = (now - origin).num_seconds() as f64 / 86400.0 + horizon_days as f64;
    let predicted = (intercept + slope * horizon_x).max(0.0);

    StoragePrediction {
        predicted_bytes: predicted as u64,
        horizon_days,
        sample_count: sorted.len() as u32,
        slope_bytes_per_day: slope,
    }
}

impl Stats {
    pub fn record_unique_block(&self) {
        self.total_unique_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unique_block_removed(&self) {
        self.total_unique_blocks.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_dedup_hit(&self, saved_bytes: u64) {
        self.dedup_saved_bytes.fetch_add(saved_bytes, Ordering::Relaxed);
        DEDUP_HITS_TOTAL.inc();
        DEDUP_SAVED_BYTES_TOTAL.inc_by(saved_bytes);
    }

    pub fn record_compress(&self, input_bytes: u64, saved_bytes: u64) {
        self.compress_input_bytes.fetch_add(input_bytes, Ordering::Relaxed);
        self.compress_saved_bytes.fetch_add(saved_bytes, Ordering::Relaxed);
        COMPRESS_SAVED_BYTES_TOTAL.inc_by(saved_bytes);
    }

    pub fn record_compress_class(&self, class: BlockClass, raw: u64, stored: u64) {
        let totals = match class {
            BlockClass::Unknown => &self.unknown,
            BlockClass::Text => &self.text,
            BlockClass::Compressed => &self.compressed,
            BlockClass::Binary => &self.binary,
        };
        totals.raw.fetch_add(raw, Ordering::Relaxed);
        totals.compressed.fetch_add(stored, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self, level: u8) {
        match level {
            1 => {
                self.l1_hits.fetch_add(1, Ordering::Relaxed);
                CACHE_L1_HITS_TOTAL.inc();
            }
            2 => {
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                CACHE_L2_HITS_TOTAL.inc();
            }
            _ => {
                self.l3_hits.fetch_add(1, Ordering::Relaxed);
                CACHE_L3_HITS_TOTAL.inc();
            }
        }
    }

    pub fn record_cache_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        CACHE_MISSES_TOTAL.inc();
    }

    pub fn record_l2_slot_collision(&self) {
        L2_SLOT_COLLISION_EVICTIONS_TOTAL.inc();
    }

    pub fn class_stats(&self) -> [(BlockClass, u64, u64); 4] {
        [
            (
                BlockClass::Unknown,
                self.unknown.raw.load(Ordering::Relaxed),
                self.unknown.compressed.load(Ordering::Relaxed),
            ),
            (
                BlockClass::Text,
                self.text.raw.load(Ordering::Relaxed),
                self.text.compressed.load(Ordering::Relaxed),
            ),
            (
                BlockClass::Compressed,
                self.compressed.raw.load(Ordering::Relaxed),
                self.compressed.compressed.load(Ordering::Relaxed),
            ),
            (
                BlockClass::Binary,
                self.binary.raw.load(Ordering::Relaxed),
                self.binary.compressed.load(Ordering::Relaxed),
            ),
        ]
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let dedup_saved = self.dedup_saved_bytes.load(Ordering::Relaxed);
        let compress_saved = self.compress_saved_bytes.load(Ordering::Relaxed);
        let compress_input = self.compress_input_bytes.load(Ordering::Relaxed);
        let total_unique = self.total_unique_blocks.load(Ordering::Relaxed);

        let logical_written = dedup_saved + compress_input.max(1);
        let dedup_ratio = if logical_written > 0 {
            dedup_saved as f64 / logical_written as f64
        } else {
            0.0
        };
        let compress_ratio = if compress_input > 0 {
            compress_saved as f64 / compress_input as f64
        } else {
            0.0
        };
        let projection_bytes = ((1.0 - dedup_ratio).max(0.0)
            * (1.0 - compress_ratio).max(0.0)
            * logical_written as f64) as u64;

        StatsSnapshot {
            total_unique_blocks: total_unique,
            dedup_saved_bytes: dedup_saved,
            compress_saved_bytes: compress_saved,
            compress_input_bytes: compress_input,
            dedup_ratio,
            compress_ratio,
            projection_bytes,
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l3_hits: self.l3_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_hits() {
        let stats = Stats::default();
        stats.record_cache_hit(1);
        stats.record_cache_hit(2);
        stats.record_cache_miss();
        let snap = stats.snapshot();
        assert_eq!(snap.l1_hits, 1);
        assert_eq!(snap.l2_hits, 1);
        assert_eq!(snap.misses, 1);
    }

    #[test]
    fn dedup_ratio_reflects_savings() {
        let stats = Stats::default();
        stats.record_dedup_hit(4096);
        let snap = stats.snapshot();
        assert!(snap.dedup_ratio > 0.0);
    }

    #[test]
    fn prediction_empty_samples_is_zero() {
        let pred = predict_storage_usage(&[], 30, Utc::now());
        assert_eq!(pred.predicted_bytes, 0);
        assert_eq!(pred.sample_count, 0);
        assert_eq!(pred.horizon_days, 30);
    }

    #[test]
    fn prediction_follows_linear_growth() {
        use chrono::TimeZone;
        let day0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let samples: Vec<_> = (0..10).map(|i| (day0 + chrono::Duration::days(i), 1000 * (i as u64 + 1))).collect();
        let now = day0 + chrono::Duration::days(9);
        let pred = predict_storage_usage(&samples, 10, now);
        assert_eq!(pred.sample_count, 10);
        assert!(pred.slope_bytes_per_day > 0.0);
        // Growing ~1000 bytes/day, 10 more days out should roughly double the
        // last observed size.
        assert!(pred.predicted_bytes > 10_000);
    }

    #[test]
    fn prediction_single_sample_has_no_slope() {
        let pred = predict_storage_usage(&[(Utc::now(), 4096)], 7, Utc::now());
        assert_eq!(pred.sample_count, 1);
        assert_eq!(pred.slope_bytes_per_day, 0.0);
    }
}

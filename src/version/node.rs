// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use chrono::{DateTime, Utc};

/// Cheap, non-cryptographic rolling hash used only for O(n) per-slot change
/// detection between versions — identity across files is the fingerprint's
/// job, never this one. Mirrors `rolling_checksum`.
pub fn rolling_checksum(data: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in data {
        hash ^= ((hash << 5).wrapping_add(byte as u32).wrapping_add(hash >> 2)).wrapping_add(1315423911);
    }
    hash
}

#[derive(Debug, Clone, Default)]
pub struct SlotSnapshot {
    pub has_data: bool,
    pub bytes: Option<Vec<u8>>,
}

/// One node in a file's version history. Owned exclusively by the chain's
/// node table; `parent_id` is a non-owning lookup key, not a reference.
#[derive(Debug, Clone)]
pub struct VersionNode {
    pub version_id: u64,
    pub parent_id: Option<u64>,
    pub children: Vec<u64>,
    pub create_time: DateTime<Utc>,
    pub description: String,
    pub file_size: u64,
    pub block_count: usize,
    pub block_checksums: Vec<u32>,
    pub snapshots: Vec<SlotSnapshot>,
    pub diff_indices: Vec<usize>,
    pub stored_bytes: u64,
    pub important: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_checksum_is_deterministic() {
        assert_eq!(rolling_checksum(b"abc"), rolling_checksum(b"abc"));
    }

    #[test]
    fn rolling_checksum_differs_on_change() {
        assert_ne!(rolling_checksum(b"abc"), rolling_checksum(b"abd"));
    }

    #[test]
    fn rolling_checksum_empty_is_zero() {
        assert_eq!(rolling_checksum(b""), 0);
    }
}

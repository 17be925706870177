// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The [`Block`] type: an owned byte buffer with a content fingerprint,
//! compression state, and a reference count shared across every slot that
//! points at it.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::compression::CompressionKind;

/// A 256-bit content fingerprint. Identity only — not a secrecy guarantee.
pub type Fingerprint = [u8; 32];

pub fn fingerprint_of(plaintext: &[u8]) -> Fingerprint {
    let hash = blake2b_simd::Params::new().hash_length(32).hash(plaintext);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// Truncates a fingerprint to the key used by the fingerprint index.
pub fn fingerprint_key(fp: &Fingerprint) -> u64 {
    u64::from_le_bytes(fp[..8].try_into().unwrap())
}

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

fn allocate_block_id() -> u64 {
    NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed)
}

/// A content-addressed unit of storage. `refs` is the only mechanism
/// permitted to free a block — direct drop outside [`Block::dec`] bypasses
/// the fingerprint index bookkeeping and is a bug.
#[derive(Debug)]
pub struct Block {
    pub id: u64,
    pub payload: Vec<u8>,
    pub plain_size: u64,
    pub stored_size: u64,
    pub algo: CompressionKind,
    pub class: BlockClass,
    pub fingerprint: Fingerprint,
    refs: Mutex<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Unknown,
    Text,
    Compressed,
    Binary,
}

impl Block {
    /// Allocates a new, unshared block from plaintext content, stored
    /// uncompressed. `refs` starts at 1.
    pub fn new(plaintext: Vec<u8>) -> Self {
        let fingerprint = fingerprint_of(&plaintext);
        let plain_size = plaintext.len() as u64;
        Block {
            id: allocate_block_id(),
            payload: plaintext,
            plain_size,
            stored_size: 0,
            algo: CompressionKind::None,
            class: BlockClass::Unknown,
            fingerprint,
            refs: Mutex::new(1),
        }
    }

    /// Builds a block under a caller-chosen id rather than allocating a
    /// fresh one. Used when promoting a lower cache tier's plaintext into
    /// L1, where the block must be retrievable under the id the tier
    /// already indexed it by.
    pub fn with_id(id: u64, plaintext: Vec<u8>) -> Self {
        let fingerprint = fingerprint_of(&plaintext);
        let plain_size = plaintext.len() as u64;
        Block {
            id,
            payload: plaintext,
            plain_size,
            stored_size: 0,
            algo: CompressionKind::None,
            class: BlockClass::Unknown,
            fingerprint,
            refs: Mutex::new(1),
        }
    }

    /// Allocates a new, unshared block whose on-disk representation is
    /// already the result of running the adaptive compression pipeline.
    /// The fingerprint is always computed over `plaintext`, never the
    /// (possibly compressed) stored payload.
    pub fn from_compressed(
        plaintext: &[u8],
        outcome: crate::compression::CompressOutcome,
    ) -> Self {
        Block {
            id: allocate_block_id(),
            payload: outcome.payload,
            plain_size: plaintext.len() as u64,
            stored_size: outcome.stored_size,
            algo: outcome.algo,
            class: outcome.class,
            fingerprint: fingerprint_of(plaintext),
            refs: Mutex::new(1),
        }
    }

    pub fn refs(&self) -> u64 {
        *self.refs.lock()
    }

    pub fn inc(&self) {
        *self.refs.lock() += 1;
    }

    /// Decrements the reference count. Returns `true` when the count reached
    /// zero and the block is now free to drop / unindex.
    pub fn dec(&self) -> bool {
        let mut guard = self.refs.lock();
        debug_assert!(*guard > 0, "dec on a block with refs already at zero");
        *guard = guard.saturating_sub(1);
        *guard == 0
    }

    /// Returns the logical (decompressed) bytes, decompressing a copy if
    /// the stored payload is compressed. Does not mutate `self`.
    pub fn plaintext(&self) -> crate::error::Result<Vec<u8>> {
        if self.algo == CompressionKind::None {
            Ok(self.payload.clone())
        } else {
            crate::compression::decompress(self.algo, &self.payload, self.plain_size as usize)
        }
    }

    /// Decompresses and recomputes the fingerprint, comparing it against the
    /// one recorded at write time. Used by the integrity subsystem to detect
    /// silent corruption in the stored payload.
    pub fn verify(&self) -> crate::error::Result<bool> {
        let plaintext = self.plaintext()?;
        Ok(fingerprint_of(&plaintext) == self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint_of(b"hello world");
        let b = fingerprint_of(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_content() {
        assert_ne!(fingerprint_of(b"a"), fingerprint_of(b"b"));
    }

    #[test]
    fn refcount_lifecycle() {
        let b = Block::new(b"data".to_vec());
        assert_eq!(b.refs(), 1);
        b.inc();
        assert_eq!(b.refs(), 2);
        assert!(!b.dec());
        assert!(b.dec());
    }
}

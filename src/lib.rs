// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Content-defined deduplicating, adaptively-compressing block storage
//! engine with per-file version history and a three-tier block cache.
//!
//! [`Engine`] is the entry point: it owns the fingerprint index, the
//! per-inode block maps and version chains, the cache tiers, and the
//! background writeback/retention workers. A host process (a fuse bridge,
//! an integrity scanner, a test harness) drives it through the methods on
//! [`Engine`]; this crate does not itself dispatch POSIX operations or own
//! a directory tree.

pub mod block;
pub mod block_map;
pub mod cache;
pub mod compression;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod file_registry;
pub mod fingerprint_index;
pub mod metrics;
pub mod scheduler;
pub mod system;
pub mod version;
pub mod version_cache;

pub use block::{Block, BlockClass, Fingerprint};
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};

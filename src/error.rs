// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

/// Errors raised by the storage engine's public surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("I/O error on {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("integrity error: block {block_id} fingerprint mismatch")]
    IntegrityError { block_id: u64 },

    #[error("resource busy: {0}")]
    Busy(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Content classification and adaptive algorithm/level selection.
//!
//! Mirrors the original engine's `ac_detect_file_type` / `ac_select_algorithm`
//! / `ac_adaptive_compress_block` pipeline: classify by magic bytes and
//! printable-byte ratio, pick an algorithm biased by class, then downgrade
//! both algorithm and level under host load pressure.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::block::BlockClass;
use crate::config::{CompressionAlgo, Config};
use crate::error::{Error, Result};
use crate::system::normalized_load;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    Lz4,
    Zstd,
    Gzip,
}

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const ZLIB_MAGIC: &[u8] = &[0x78, 0x9C];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];
const LZ4_MAGIC: &[u8] = &[0x04, 0x22, 0x4D, 0x18];

fn has_magic(data: &[u8], magic: &[u8]) -> bool {
    data.len() >= magic.len() && &data[..magic.len()] == magic
}

/// True if the first bytes match a known compressed-archive magic number.
pub fn is_already_compressed(data: &[u8]) -> bool {
    has_magic(data, GZIP_MAGIC)
        || has_magic(data, ZIP_MAGIC)
        || has_magic(data, ZLIB_MAGIC)
        || has_magic(data, ZSTD_MAGIC)
        || has_magic(data, LZ4_MAGIC)
}

/// Printable-ratio heuristic over at most the first 4 KiB.
fn looks_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    let sample = &data[..data.len().min(4096)];
    let printable = sample
        .iter()
        .filter(|&&c| c == b'\n' || c == b'\r' || c == b'\t' || (c.is_ascii_graphic() || c == b' '))
        .count();
    (printable as f64) / (sample.len() as f64) > 0.8
}

pub fn detect_class(data: &[u8]) -> BlockClass {
    if data.is_empty() {
        return BlockClass::Unknown;
    }
    if is_already_compressed(data) {
        BlockClass::Compressed
    } else if looks_text(data) {
        BlockClass::Text
    } else {
        BlockClass::Binary
    }
}

fn algo_from_config(algo: CompressionAlgo) -> Option<CompressionKind> {
    match algo {
        CompressionAlgo::None => None,
        CompressionAlgo::Lz4 => Some(CompressionKind::Lz4),
        CompressionAlgo::Zstd => Some(CompressionKind::Zstd),
        CompressionAlgo::Gzip => Some(CompressionKind::Gzip),
    }
}

/// Chooses an algorithm for this content under the current host load.
pub fn select_algorithm(data: &[u8], cfg: &Config) -> CompressionKind {
    let class = detect_class(data);
    if class == BlockClass::Compressed {
        return CompressionKind::None;
    }

    let mut preferred = if class == BlockClass::Text {
        CompressionKind::Zstd
    } else {
        CompressionKind::Lz4
    };
    if let Some(configured) = algo_from_config(cfg.algo) {
        preferred = configured;
    }

    let load = normalized_load();
    if load > 1.5 {
        return CompressionKind::None;
    }
    if load > 1.2 && preferred == CompressionKind::Zstd {
        preferred = CompressionKind::Lz4;
    }
    preferred
}

fn adjusted_level(configured: i32) -> i32 {
    let load = normalized_load();
    let mut level = configured;
    if load > 1.5 {
        level -= 3;
    } else if load > 1.0 {
        level -= 2;
    } else if load < 0.5 {
        level += 1;
    }
    level.clamp(1, 9)
}

/// Result of running the adaptive pipeline on one block's plaintext.
pub struct CompressOutcome {
    pub algo: CompressionKind,
    pub class: BlockClass,
    pub payload: Vec<u8>,
    pub stored_size: u64,
}

/// Compresses `plaintext` under `cfg`, honoring the minimum-size gate and
/// falling back to plaintext when compression doesn't actually shrink the
/// data.
pub fn adaptive_compress(plaintext: &[u8], cfg: &Config) -> Result<CompressOutcome> {
    let class = detect_class(plaintext);

    if !cfg.enable_compression || plaintext.len() < cfg.min_compress_size {
        return Ok(CompressOutcome {
            algo: CompressionKind::None,
            class,
            payload: plaintext.to_vec(),
            stored_size: 0,
        });
    }

    let algo = select_algorithm(plaintext, cfg);
    if algo == CompressionKind::None {
        return Ok(CompressOutcome {
            algo: CompressionKind::None,
            class,
            payload: plaintext.to_vec(),
            stored_size: 0,
        });
    }

    let level = adjusted_level(cfg.level);
    match compress(algo, plaintext, level) {
        Ok(compressed) if compressed.len() < plaintext.len() => {
            let stored_size = compressed.len() as u64;
            Ok(CompressOutcome {
                algo,
                class,
                payload: compressed,
                stored_size,
            })
        }
        Ok(_) => Ok(CompressOutcome {
            algo: CompressionKind::None,
            class,
            payload: plaintext.to_vec(),
            stored_size: 0,
        }),
        Err(e) => {
            tracing::warn!("compression failed, falling back to plaintext: {e}");
            Ok(CompressOutcome {
                algo: CompressionKind::None,
                class,
                payload: plaintext.to_vec(),
                stored_size: 0,
            })
        }
    }
}

pub fn compress(algo: CompressionKind, data: &[u8], level: i32) -> Result<Vec<u8>> {
    match algo {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => zstd::encode_all(data, level)
            .map_err(|e| Error::IoError {
                path: "<zstd-compress>".into(),
                source: e,
            }),
        CompressionKind::Gzip => {
            let gz_level = GzLevel::new(level.clamp(0, 9) as u32);
            let mut encoder = GzEncoder::new(Vec::new(), gz_level);
            encoder.write_all(data).map_err(|e| Error::IoError {
                path: "<gzip-compress>".into(),
                source: e,
            })?;
            encoder.finish().map_err(|e| Error::IoError {
                path: "<gzip-compress>".into(),
                source: e,
            })
        }
    }
}

pub fn decompress(algo: CompressionKind, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    match algo {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Lz4 => lz4_flex::decompress_size_prepended(data).map_err(|e| {
            tracing::warn!("lz4 decompress failed: {e}");
            Error::IntegrityError {
                block_id: expected_size as u64,
            }
        }),
        CompressionKind::Zstd => zstd::decode_all(data).map_err(|e| Error::IoError {
            path: "<zstd-decompress>".into(),
            source: e,
        }),
        CompressionKind::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::with_capacity(expected_size);
            decoder.read_to_end(&mut out).map_err(|e| Error::IoError {
                path: "<gzip-decompress>".into(),
                source: e,
            })?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_text() {
        let text = "the quick brown fox jumps over the lazy dog\n".repeat(50);
        assert_eq!(detect_class(text.as_bytes()), BlockClass::Text);
    }

    #[test]
    fn detects_gzip_magic_as_compressed() {
        let mut data = vec![0x1F, 0x8B, 0x08, 0x00];
        data.extend(std::iter::repeat(0u8).take(100));
        assert_eq!(detect_class(&data), BlockClass::Compressed);
    }

    #[test]
    fn round_trips_zstd() {
        let cfg = Config {
            algo: CompressionAlgo::Zstd,
            enable_compression: true,
            min_compress_size: 1,
            ..Config::default()
        };
        let data = "hello hello hello hello hello hello".repeat(20);
        let out = adaptive_compress(data.as_bytes(), &cfg).unwrap();
        assert_eq!(out.algo, CompressionKind::Zstd);
        let back = decompress(out.algo, &out.payload, data.len()).unwrap();
        assert_eq!(back, data.as_bytes());
    }

    #[test]
    fn round_trips_lz4() {
        let data = b"abcabcabcabcabcabcabcabcabcabcabcabc".to_vec();
        let compressed = compress(CompressionKind::Lz4, &data, 1).unwrap();
        let back = decompress(CompressionKind::Lz4, &compressed, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn skips_compression_when_not_smaller() {
        let cfg = Config {
            algo: CompressionAlgo::Zstd,
            enable_compression: true,
            min_compress_size: 1,
            ..Config::default()
        };
        let data: Vec<u8> = (0..64u32).flat_map(|i| i.to_le_bytes()).collect();
        let out = adaptive_compress(&data, &cfg).unwrap();
        if out.algo == CompressionKind::None {
            assert_eq!(out.stored_size, 0);
        }
    }

    #[test]
    fn skips_below_min_size() {
        let cfg = Config {
            algo: CompressionAlgo::Zstd,
            enable_compression: true,
            min_compress_size: 4096,
            ..Config::default()
        };
        let out = adaptive_compress(b"short", &cfg).unwrap();
        assert_eq!(out.algo, CompressionKind::None);
    }
}

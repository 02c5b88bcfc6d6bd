//! Optional payload compression.
//!
//! Pass-through unless compression is switched on in [`MirrorConfig`].
//!
//! [`MirrorConfig`]: crate::config::MirrorConfig

use crate::error::MirrorResult;

const ZSTD_LEVEL: i32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Codec {
    compress_enabled: bool,
}

impl Codec {
    pub fn new(compress_enabled: bool) -> Self {
        Self { compress_enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.compress_enabled
    }

    /// # Errors
    /// Returns a codec error if the zstd encoder fails.
    pub fn compress(&self, data: &[u8]) -> MirrorResult<Vec<u8>> {
        if !self.compress_enabled {
            return Ok(data.to_vec());
        }
        Ok(zstd::encode_all(data, ZSTD_LEVEL)?)
    }

    /// # Errors
    /// Returns a codec error if the payload is not a valid zstd frame.
    pub fn decompress(&self, data: &[u8]) -> MirrorResult<Vec<u8>> {
        if !self.compress_enabled {
            return Ok(data.to_vec());
        }
        Ok(zstd::decode_all(data)?)
    }
}

/// Compressed size as a fraction of the original (1.0 for empty input).
pub fn compress_ratio(original: &[u8], compressed: &[u8]) -> f64 {
    if original.is_empty() {
        return 1.0;
    }
    compressed.len() as f64 / original.len() as f64
}

//! CRC32 trailer computation and repair
//!
//! Every image ends in a CRC32 over all preceding bytes, stored little
//! endian. Hand-edited or partially rebuilt images routinely carry a stale
//! trailer; [`fix_crc`] rewrites it in place and nothing else.

use crate::error::{Error, Result, ValidationError};
use std::fs;
use std::path::Path;

/// CRC32 (IEEE) over an image payload
pub fn image_crc(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Read the little-endian CRC trailer from the last four bytes
pub fn read_trailer(image: &[u8]) -> Result<u32> {
    if image.len() < 4 {
        return Err(ValidationError::TruncatedImage(image.len()).into());
    }
    let tail = &image[image.len() - 4..];
    Ok(u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]))
}

/// Outcome of a [`fix_crc`] run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcFixOutcome {
    /// Trailer already matched the payload; file untouched
    AlreadyCorrect {
        /// The verified trailer value
        crc: u32,
    },
    /// Trailer was stale and has been rewritten
    Updated {
        /// Stale trailer value that was replaced
        old: u32,
        /// Recomputed trailer now in the file
        new: u32,
    },
}

/// Recompute the CRC trailer of an image file, rewriting it only if stale
///
/// Idempotent: a second invocation is a no-op.
pub fn fix_crc(path: impl AsRef<Path>) -> Result<CrcFixOutcome> {
    let path = path.as_ref();
    let mut data = fs::read(path).map_err(Error::Io)?;
    if data.len() < 4 {
        return Err(ValidationError::TruncatedImage(data.len()).into());
    }

    let payload_len = data.len() - 4;
    let stored = read_trailer(&data)?;
    let computed = image_crc(&data[..payload_len]);

    if stored == computed {
        log::debug!("{}: CRC 0x{:08X} already correct", path.display(), stored);
        return Ok(CrcFixOutcome::AlreadyCorrect { crc: stored });
    }

    data[payload_len..].copy_from_slice(&computed.to_le_bytes());
    fs::write(path, &data)?;
    log::info!(
        "{}: CRC updated 0x{:08X} -> 0x{:08X}",
        path.display(),
        stored,
        computed
    );
    Ok(CrcFixOutcome::Updated {
        old: stored,
        new: computed,
    })
}

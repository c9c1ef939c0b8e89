//! Image validation
//!
//! Runs the checks the device bootloader will run, in the same order:
//! marker, size, device id, CRC. Size deviations are a warning only since
//! intermediate builds legitimately differ; everything else blocks an
//! upload. The sole auto-repair is the marker: images saved without one get
//! it re-prepended, matching the behavior of the NXP upload tooling.

use crate::error::{Result, ValidationError};
use crate::image::ImageKind;
use crate::layout::{MemoryLayout, IMAGE_HEADER_LEN};

use super::crc::{image_crc, read_trailer};

/// Accepted deviation from the declared image size before warning
const SIZE_TOLERANCE: usize = 4096;

/// Non-fatal size deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeWarning {
    /// Size the layout declares for this image kind
    pub expected: usize,
    /// Actual image length
    pub found: usize,
}

/// What a successful validation observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Marker had to be restored before the image validated
    pub repaired_marker: bool,
    /// Set when the image size is outside tolerance
    pub size_warning: Option<SizeWarning>,
    /// False when a UC image carries an unexpected device id
    pub device_verified: bool,
    /// The verified CRC trailer value
    pub crc: u32,
}

/// Validate an image against a layout
///
/// Check order: marker (`InvalidMarker`), size (warning only), device id
/// (`DeviceMismatch`, fatal only for switch images where the id is
/// authoritative), CRC (`CrcMismatch` with both values).
pub fn validate(
    image: &[u8],
    layout: &MemoryLayout,
    kind: ImageKind,
) -> Result<ValidationReport> {
    if image.len() < IMAGE_HEADER_LEN + 4 {
        return Err(ValidationError::TruncatedImage(image.len()).into());
    }

    if image[..8] != layout.marker {
        return Err(ValidationError::InvalidMarker.into());
    }

    let expected_size = kind.image_size(layout);
    let size_warning = if image.len().abs_diff(expected_size) > SIZE_TOLERANCE {
        log::warn!(
            "{} image is {} bytes, expected {}",
            kind,
            image.len(),
            expected_size
        );
        Some(SizeWarning {
            expected: expected_size,
            found: image.len(),
        })
    } else {
        None
    };

    let found_id = layout
        .byte_order
        .read_u32([image[8], image[9], image[10], image[11]]);
    let device_verified = found_id == layout.device_id;
    if !device_verified {
        // The id is authoritative only in the switch configuration; a UC
        // image may target a device the probe cannot see yet
        if kind == ImageKind::SwitchConfig {
            return Err(ValidationError::DeviceMismatch {
                expected: layout.device_id,
                found: found_id,
            }
            .into());
        }
        log::warn!(
            "{} device id 0x{found_id:08X} does not match expected 0x{:08X}",
            kind,
            layout.device_id
        );
    }

    let stored = read_trailer(image)?;
    let computed = image_crc(&image[..image.len() - 4]);
    if stored != computed {
        return Err(ValidationError::CrcMismatch {
            expected: computed,
            found: stored,
        }
        .into());
    }

    Ok(ValidationReport {
        repaired_marker: false,
        size_warning,
        device_verified,
        crc: stored,
    })
}

/// Validate, restoring the marker once if it is missing or corrupted
///
/// Two repair cases, tried a single time each way: if the device id sits at
/// offset 0 the image was saved without a marker and the canonical marker is
/// prepended; otherwise the first eight bytes are rewritten in place. Any
/// remaining failure is surfaced unchanged.
pub fn validate_or_repair(
    image: Vec<u8>,
    layout: &MemoryLayout,
    kind: ImageKind,
) -> Result<(Vec<u8>, ValidationReport)> {
    match validate(&image, layout, kind) {
        Ok(report) => Ok((image, report)),
        Err(crate::error::Error::Validation(ValidationError::InvalidMarker)) => {
            let mut repaired = image;
            let id_at_start = repaired.len() >= 4
                && layout
                    .byte_order
                    .read_u32([repaired[0], repaired[1], repaired[2], repaired[3]])
                    == layout.device_id;

            if id_at_start {
                log::warn!("{} image has no marker, prepending it", kind);
                let mut with_marker = Vec::with_capacity(repaired.len() + 8);
                with_marker.extend_from_slice(&layout.marker);
                with_marker.append(&mut repaired);
                repaired = with_marker;
            } else {
                log::warn!("{} image marker is corrupted, rewriting it", kind);
                repaired[..8].copy_from_slice(&layout.marker);
            }

            let mut report = validate(&repaired, layout, kind)?;
            report.repaired_marker = true;
            Ok((repaired, report))
        }
        Err(e) => Err(e),
    }
}

//! Flash image assembly, validation and repair

mod builder;
mod crc;
mod validate;

pub use builder::ImageBuilder;
pub use crc::{fix_crc, image_crc, read_trailer, CrcFixOutcome};
pub use validate::{validate, validate_or_repair, SizeWarning, ValidationReport};

use crate::error::Result;
use crate::layout::MemoryLayout;
use bitflags::bitflags;
use core::fmt;
use std::path::Path;

bitflags! {
    /// Switch configuration header flags
    ///
    /// Written right after the device id; tells the bootloader which parts
    /// of the image to check before applying it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlags: u32 {
        /// Global CRC check enabled
        const CRCCHKG  = 1 << 28;
        /// Device id check enabled
        const IDS      = 1 << 29;
        /// Local (per-table) CRC check enabled
        const CRCCHKL  = 1 << 30;
        /// Image carries configuration tables
        const CONFIGS  = 1 << 31;
    }
}

impl Default for ConfigFlags {
    fn default() -> Self {
        ConfigFlags::CONFIGS | ConfigFlags::CRCCHKL | ConfigFlags::IDS | ConfigFlags::CRCCHKG
    }
}

/// The two image types a target consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Microcontroller subsystem firmware (`sja1110_uc.bin`)
    UcFirmware,
    /// Static switch configuration (`sja1110_switch.bin`)
    SwitchConfig,
}

impl ImageKind {
    /// Declared total size of this image type in the given layout
    pub fn image_size(self, layout: &MemoryLayout) -> usize {
        match self {
            ImageKind::UcFirmware => layout.uc_image_size,
            ImageKind::SwitchConfig => layout.switch_image_size,
        }
    }

    /// Conventional firmware-directory file name
    pub fn file_name(self) -> &'static str {
        match self {
            ImageKind::UcFirmware => "sja1110_uc.bin",
            ImageKind::SwitchConfig => "sja1110_switch.bin",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::UcFirmware => f.write_str("UC firmware"),
            ImageKind::SwitchConfig => f.write_str("switch configuration"),
        }
    }
}

/// A fully assembled flash image
///
/// Exactly `image_size` bytes with the CRC trailer already in place; treated
/// as immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    kind: ImageKind,
    bytes: Vec<u8>,
}

impl EncodedImage {
    pub(crate) fn new(kind: ImageKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// Which of the two images this is
    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// The raw image bytes, trailer included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total image length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty (never true for a built image)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the image, yielding its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Write the image to a file
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.bytes)?;
        log::info!(
            "wrote {} to {} ({} bytes)",
            self.kind,
            path.display(),
            self.bytes.len()
        );
        Ok(())
    }
}

//! Memory layout of SJA1110 flash images
//!
//! The layout is the authoritative map of where each configuration table
//! lives inside an image, how wide its entries are, and which byte order the
//! device revision expects. The SJA1110 sources in circulation disagree on
//! several of these numbers, so the layout is injectable data rather than a
//! hard-coded constant: use one of the canonical constructors or load a
//! layout from a TOML file.

mod toml;

pub use self::toml::{load_layout, save_layout};

use crate::error::LayoutError;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 8-byte magic the bootloader requires at image offset 0
pub const IMAGE_VALID_MARKER: [u8; 8] = [0x6A, 0xA6, 0x6A, 0xA6, 0x6A, 0xA6, 0x6A, 0xA6];

/// SJA1110 device id as reported by the DEVICE_ID register
pub const SJA1110_DEVICE_ID: u32 = 0xB700030E;

/// Fixed image header: marker (8) + device id (4) + config flags (4)
pub const IMAGE_HEADER_LEN: usize = 16;

/// Byte order for multi-byte table fields
///
/// Fixed per device revision; one image never mixes orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

impl ByteOrder {
    /// Encode a u16 in this order
    pub fn u16_bytes(self, v: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    /// Encode a u32 in this order
    pub fn u32_bytes(self, v: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    /// Decode a u32 in this order
    pub fn read_u32(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        }
    }
}

/// The configuration tables an image carries
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SectionKind {
    /// FRMREPEN flag plus host/cascade port assignment
    GeneralParams,
    /// VLAN membership lookup table
    VlanLookup,
    /// CB sequence generation (replication) table
    SeqGeneration,
    /// CB individual recovery (elimination) table
    IndividualRecovery,
    /// Stream identification / deep packet inspection table
    Dpi,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionKind::GeneralParams => "general parameters",
            SectionKind::VlanLookup => "VLAN lookup",
            SectionKind::SeqGeneration => "sequence generation",
            SectionKind::IndividualRecovery => "individual recovery",
            SectionKind::Dpi => "DPI",
        };
        f.write_str(name)
    }
}

/// One table's region inside the switch configuration image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Byte offset of the first entry
    pub offset: usize,
    /// Size of one entry in bytes
    pub entry_size: usize,
    /// Maximum number of entries the region reserves room for
    pub capacity: usize,
}

impl Section {
    /// End of the reserved region (exclusive)
    pub fn end(&self) -> usize {
        self.offset + self.entry_size * self.capacity
    }

    /// Whether this region overlaps another
    pub fn overlaps(&self, other: &Section) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Authoritative byte map for one target device revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLayout {
    /// Magic bytes at image offset 0
    pub marker: [u8; 8],
    /// Expected DEVICE_ID register value
    pub device_id: u32,
    /// Byte order of all multi-byte table fields
    pub byte_order: ByteOrder,
    /// Total size of the microcontroller firmware image
    pub uc_image_size: usize,
    /// Total size of the switch configuration image
    pub switch_image_size: usize,
    /// Table regions, keyed by section
    pub sections: BTreeMap<SectionKind, Section>,
}

impl MemoryLayout {
    /// Canonical SJA1110 rev B layout (little-endian)
    ///
    /// Table offsets follow the UM11107-derived builder; the switch image is
    /// the 656 KiB variant, the smallest 16 KiB-aligned size that holds the
    /// DPI table at 0x0A0000 plus the CRC trailer. The UC firmware is the
    /// 320 KiB variant.
    pub fn sja1110_rev_b() -> Self {
        let mut sections = BTreeMap::new();
        sections.insert(
            SectionKind::GeneralParams,
            Section {
                offset: 0x034000,
                entry_size: 8,
                capacity: 1,
            },
        );
        sections.insert(
            SectionKind::VlanLookup,
            Section {
                offset: 0x040000,
                entry_size: 8,
                capacity: 4096,
            },
        );
        sections.insert(
            SectionKind::SeqGeneration,
            Section {
                offset: 0x080000,
                entry_size: 16,
                capacity: 1024,
            },
        );
        sections.insert(
            SectionKind::IndividualRecovery,
            Section {
                offset: 0x090000,
                entry_size: 20,
                capacity: 1024,
            },
        );
        sections.insert(
            SectionKind::Dpi,
            Section {
                offset: 0x0A0000,
                entry_size: 16,
                capacity: 512,
            },
        );
        Self {
            marker: IMAGE_VALID_MARKER,
            device_id: SJA1110_DEVICE_ID,
            byte_order: ByteOrder::Little,
            uc_image_size: 320 * 1024,
            switch_image_size: 0x0A4000,
            sections,
        }
    }

    /// Historical SJA1110 rev A layout (big-endian)
    ///
    /// Kept for images produced by the older builder generation: 256 KiB UC
    /// firmware, 640 KiB switch image, DPI table at 0x098000 with 32-byte
    /// entries. Not merged with rev B; pick one per target.
    pub fn sja1110_rev_a() -> Self {
        let mut layout = Self::sja1110_rev_b();
        layout.byte_order = ByteOrder::Big;
        layout.uc_image_size = 256 * 1024;
        layout.switch_image_size = 640 * 1024;
        layout.sections.insert(
            SectionKind::Dpi,
            Section {
                offset: 0x098000,
                entry_size: 32,
                capacity: 512,
            },
        );
        layout
    }

    /// Look up a section's region
    pub fn section(&self, kind: SectionKind) -> Result<&Section, LayoutError> {
        self.sections
            .get(&kind)
            .ok_or(LayoutError::MissingSection(kind))
    }

    /// Check the layout's internal consistency
    ///
    /// Section regions must start past the image header, never overlap, and
    /// leave the last four bytes of the image free for the CRC trailer.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut regions: Vec<(SectionKind, &Section)> =
            self.sections.iter().map(|(k, s)| (*k, s)).collect();
        regions.sort_by_key(|(_, s)| s.offset);

        for (kind, section) in &regions {
            if section.offset < IMAGE_HEADER_LEN {
                return Err(LayoutError::SectionInHeader(*kind));
            }
            if section.end() > self.switch_image_size - 4 {
                return Err(LayoutError::SectionOutOfBounds(*kind));
            }
        }
        for pair in regions.windows(2) {
            let (a_kind, a) = pair[0];
            let (b_kind, b) = pair[1];
            if a.overlaps(b) {
                return Err(LayoutError::OverlappingSections(a_kind, b_kind));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_layouts_are_consistent() {
        MemoryLayout::sja1110_rev_b().validate().unwrap();
        MemoryLayout::sja1110_rev_a().validate().unwrap();
    }

    #[test]
    fn rev_b_regions() {
        let layout = MemoryLayout::sja1110_rev_b();
        let seq = layout.section(SectionKind::SeqGeneration).unwrap();
        assert_eq!(seq.offset, 0x080000);
        assert_eq!(seq.entry_size, 16);
        let dpi = layout.section(SectionKind::Dpi).unwrap();
        assert!(dpi.end() <= layout.switch_image_size - 4);
    }

    #[test]
    fn overlap_is_rejected() {
        let mut layout = MemoryLayout::sja1110_rev_b();
        layout.sections.insert(
            SectionKind::IndividualRecovery,
            Section {
                offset: 0x080010,
                entry_size: 20,
                capacity: 1024,
            },
        );
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::OverlappingSections(_, _))
        ));
    }

    #[test]
    fn trailer_room_is_enforced() {
        let mut layout = MemoryLayout::sja1110_rev_b();
        layout.switch_image_size = 0x0A0000; // DPI table no longer fits
        assert_eq!(
            layout.validate(),
            Err(LayoutError::SectionOutOfBounds(SectionKind::Dpi))
        );
    }
}

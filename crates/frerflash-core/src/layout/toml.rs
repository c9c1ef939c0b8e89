//! TOML layout files
//!
//! Which layout is authoritative for a given board is not something this
//! library can decide, so layouts can be loaded from disk:
//!
//! ```toml
//! marker = [0x6A, 0xA6, 0x6A, 0xA6, 0x6A, 0xA6, 0x6A, 0xA6]
//! device_id = 3070231310
//! byte_order = "little"
//! uc_image_size = 327680
//! switch_image_size = 671744
//!
//! [sections.seq-generation]
//! offset = 0x080000
//! entry_size = 16
//! capacity = 1024
//! ```

use std::fs;
use std::path::Path;

use super::MemoryLayout;
use crate::error::LayoutError;

impl MemoryLayout {
    /// Parse a layout from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self, LayoutError> {
        let layout: MemoryLayout =
            ::toml::from_str(text).map_err(|e| LayoutError::Parse(e.to_string()))?;
        layout.validate()?;
        Ok(layout)
    }

    /// Render the layout as TOML text
    pub fn to_toml_string(&self) -> Result<String, LayoutError> {
        ::toml::to_string_pretty(self).map_err(|e| LayoutError::Parse(e.to_string()))
    }
}

/// Load and validate a layout file
pub fn load_layout(path: impl AsRef<Path>) -> Result<MemoryLayout, LayoutError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| LayoutError::Parse(format!("{}: {}", path.display(), e)))?;
    let layout = MemoryLayout::from_toml_str(&text)?;
    log::debug!("loaded layout from {}", path.display());
    Ok(layout)
}

/// Write a layout file
pub fn save_layout(layout: &MemoryLayout, path: impl AsRef<Path>) -> Result<(), LayoutError> {
    let path = path.as_ref();
    let text = layout.to_toml_string()?;
    fs::write(path, text).map_err(|e| LayoutError::Parse(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip() {
        let layout = MemoryLayout::sja1110_rev_b();
        let text = layout.to_toml_string().unwrap();
        let parsed = MemoryLayout::from_toml_str(&text).unwrap();
        assert_eq!(parsed, layout);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sja1110.toml");
        let layout = MemoryLayout::sja1110_rev_a();
        save_layout(&layout, &path).unwrap();
        assert_eq!(load_layout(&path).unwrap(), layout);
    }

    #[test]
    fn inconsistent_layout_file_is_rejected() {
        let mut layout = MemoryLayout::sja1110_rev_b();
        layout.switch_image_size = 0x1000;
        let text = layout.to_toml_string().unwrap();
        assert!(MemoryLayout::from_toml_str(&text).is_err());
    }
}

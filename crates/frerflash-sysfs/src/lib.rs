//! frerflash-sysfs - Kernel firmware-loader transport
//!
//! Uses the upstream sja1110 kernel driver: the image is staged as a file in
//! the firmware search path, then its name is written into the driver's
//! upload attribute, which makes the kernel load and apply it. Written bytes
//! accumulate in memory; nothing touches the filesystem until
//! `finish_upload`, so an aborted upload leaves no half-written firmware
//! file behind.

#![warn(rust_2018_idioms)]

use frerflash_core::error::{Result, TransportError};
use frerflash_core::transport::{Transport, TransportKind};
use frerflash_core::ImageKind;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default firmware search path of the kernel loader
pub const FIRMWARE_DIR: &str = "/lib/firmware";

/// Driver attribute that triggers a switch configuration load
pub const SWITCH_TRIGGER: &str = "switch_cfg_upload";
/// Driver attribute that triggers a UC firmware load
pub const UC_TRIGGER: &str = "uc_fw_upload";
/// Driver attribute that resets the switch
pub const RESET_TRIGGER: &str = "switch_reset";

/// Sysfs directory of the sja1110 kernel driver
pub const DRIVER_DIR: &str = "/sys/bus/spi/drivers/sja1110";

/// Locate the first device bound to the sja1110 driver
pub fn find_device_dir() -> Result<PathBuf> {
    find_device_dir_in(DRIVER_DIR)
}

/// Locate a bound device under a specific driver directory
///
/// A directory counts as a device when it carries the upload trigger
/// attributes.
pub fn find_device_dir_in(driver_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let driver_dir = driver_dir.as_ref();
    let entries = fs::read_dir(driver_dir)
        .map_err(|e| TransportError::OpenFailed(format!("{}: {e}", driver_dir.display())))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.join(SWITCH_TRIGGER).exists() {
            log::debug!("found sja1110 device at {}", path.display());
            return Ok(path);
        }
    }
    Err(TransportError::OpenFailed(format!(
        "no sja1110 device bound under {}",
        driver_dir.display()
    ))
    .into())
}

/// Firmware-loader transport
///
/// `device_dir` is the driver's sysfs directory, e.g.
/// `/sys/bus/spi/drivers/sja1110/spi0.0`.
pub struct SysfsTransport {
    device_dir: PathBuf,
    firmware_dir: PathBuf,
    image_kind: ImageKind,
    staged: Vec<u8>,
    closed: bool,
}

impl SysfsTransport {
    /// Stage into the default firmware directory
    pub fn new(device_dir: impl AsRef<Path>, image_kind: ImageKind) -> Self {
        Self::with_firmware_dir(device_dir, FIRMWARE_DIR, image_kind)
    }

    /// Stage into a custom firmware directory
    pub fn with_firmware_dir(
        device_dir: impl AsRef<Path>,
        firmware_dir: impl AsRef<Path>,
        image_kind: ImageKind,
    ) -> Self {
        Self {
            device_dir: device_dir.as_ref().to_path_buf(),
            firmware_dir: firmware_dir.as_ref().to_path_buf(),
            image_kind,
            staged: Vec::new(),
            closed: false,
        }
    }

    fn trigger_file(&self) -> PathBuf {
        let name = match self.image_kind {
            ImageKind::SwitchConfig => SWITCH_TRIGGER,
            ImageKind::UcFirmware => UC_TRIGGER,
        };
        self.device_dir.join(name)
    }
}

impl Transport for SysfsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sysfs
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        self.staged.extend_from_slice(data);
        Ok(())
    }

    // The kernel never talks back through this interface
    fn read(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        Ok(0)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.staged.clear();
        Ok(())
    }

    /// Commit: write the staged image into the firmware directory, then poke
    /// the driver's upload attribute with the file name.
    fn finish_upload(&mut self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        let file_name = self.image_kind.file_name();
        let firmware_path = self.firmware_dir.join(file_name);
        fs::write(&firmware_path, &self.staged)
            .map_err(|e| TransportError::Io(format!("{}: {e}", firmware_path.display())))?;
        log::info!(
            "staged {} bytes at {}",
            self.staged.len(),
            firmware_path.display()
        );

        let trigger = self.trigger_file();
        fs::write(&trigger, file_name)
            .map_err(|e| TransportError::Io(format!("{}: {e}", trigger.display())))?;
        log::info!("triggered load via {}", trigger.display());
        self.staged.clear();
        Ok(())
    }

    /// Reset the switch through the driver's reset attribute
    fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        let trigger = self.device_dir.join(RESET_TRIGGER);
        fs::write(&trigger, "1")
            .map_err(|e| TransportError::Io(format!("{}: {e}", trigger.display())))?;
        log::info!("reset switch via {}", trigger.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_bytes_land_in_firmware_dir_on_commit() {
        let fw = tempfile::tempdir().unwrap();
        let dev = tempfile::tempdir().unwrap();
        let mut transport =
            SysfsTransport::with_firmware_dir(dev.path(), fw.path(), ImageKind::SwitchConfig);

        transport.write(&[1, 2, 3]).unwrap();
        transport.write(&[4, 5]).unwrap();
        assert!(!fw.path().join("sja1110_switch.bin").exists());

        transport.finish_upload().unwrap();
        let staged = fs::read(fw.path().join("sja1110_switch.bin")).unwrap();
        assert_eq!(staged, [1, 2, 3, 4, 5]);
        let trigger = fs::read_to_string(dev.path().join(SWITCH_TRIGGER)).unwrap();
        assert_eq!(trigger, "sja1110_switch.bin");
    }

    #[test]
    fn reset_pokes_the_reset_attribute() {
        let fw = tempfile::tempdir().unwrap();
        let dev = tempfile::tempdir().unwrap();
        let mut transport =
            SysfsTransport::with_firmware_dir(dev.path(), fw.path(), ImageKind::SwitchConfig);
        transport.reset().unwrap();
        assert_eq!(
            fs::read_to_string(dev.path().join(RESET_TRIGGER)).unwrap(),
            "1"
        );
    }

    #[test]
    fn discovery_wants_the_trigger_attribute() {
        let root = tempfile::tempdir().unwrap();
        let plain = root.path().join("spi0.1");
        fs::create_dir(&plain).unwrap();
        assert!(find_device_dir_in(root.path()).is_err());

        let bound = root.path().join("spi0.0");
        fs::create_dir(&bound).unwrap();
        fs::write(bound.join(SWITCH_TRIGGER), "").unwrap();
        assert_eq!(find_device_dir_in(root.path()).unwrap(), bound);
    }

    #[test]
    fn closed_transport_rejects_writes() {
        let mut transport = SysfsTransport::new("/nonexistent", ImageKind::UcFirmware);
        transport.close().unwrap();
        assert!(transport.write(&[0]).is_err());
    }
}

//! Transport abstraction for reaching the target device
//!
//! The upload protocol only needs raw byte I/O plus a completion hook; where
//! the bytes go (a serial console, SPI register writes, the kernel firmware
//! loader) is a backend concern. Backends live in their own crates and
//! implement [`Transport`].

mod register;

pub use register::{encode_read, encode_write, regs, RegisterAccess, CMD_READ, CMD_WRITE};

use crate::error::Result;
use core::fmt;
use std::time::Duration;

/// The wire a transport speaks over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bootloader console over a serial line
    Serial,
    /// Direct register access (SPI or a register-mapped bus)
    Register,
    /// Kernel driver via sysfs attribute files
    Sysfs,
}

impl TransportKind {
    /// Preferred upload chunk size for this wire
    pub fn default_chunk_size(self) -> usize {
        match self {
            TransportKind::Serial => 1024,
            TransportKind::Register => 256,
            // The kernel loader takes whole files; chunking only drives
            // progress reporting
            TransportKind::Sysfs => 4096,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => f.write_str("serial"),
            TransportKind::Register => f.write_str("register"),
            TransportKind::Sysfs => f.write_str("sysfs"),
        }
    }
}

/// Byte-level access to the target device
///
/// `read` returns the number of bytes actually received; `Ok(0)` means the
/// timeout expired without data, which the protocol layer treats as "no
/// response yet", not as an error. Backends map their own failures into
/// [`crate::error::TransportError`].
pub trait Transport {
    /// Which wire this transport speaks over
    fn kind(&self) -> TransportKind;

    /// Write all of `data` to the device
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Release the underlying device
    fn close(&mut self) -> Result<()>;

    /// Commit a finished upload
    ///
    /// Most wires deliver data as it is written and need nothing here; the
    /// sysfs backend uses this to write the trigger file after staging.
    fn finish_upload(&mut self) -> Result<()> {
        Ok(())
    }

    /// Ask the device to reset itself
    ///
    /// No-op for wires whose reset runs through the protocol layer; the
    /// sysfs backend pokes the driver's reset attribute here.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn finish_upload(&mut self) -> Result<()> {
        (**self).finish_upload()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn finish_upload(&mut self) -> Result<()> {
        (**self).finish_upload()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}

//! Register access protocol
//!
//! Frame format shared by every register-capable backend: a command byte
//! (read 0x00, write 0x80), a 3-byte big-endian register address, then the
//! payload. Addresses are always sent big endian regardless of the device
//! revision's table byte order.

use crate::error::{Result, TransportError};
use std::time::Duration;

/// Command byte for a register read
pub const CMD_READ: u8 = 0x00;
/// Command byte for a register write
pub const CMD_WRITE: u8 = 0x80;

/// Well-known register addresses
pub mod regs {
    /// Device identification register
    pub const DEVICE_ID: u32 = 0x000000;
    /// Staging area the configuration image is streamed into
    pub const CONFIG_START: u32 = 0x020000;
    /// Reset control register
    pub const RESET_CTRL: u32 = 0x1C6000;
    /// RESET_CTRL value that requests a cold reset
    pub const RESET_COLD: u32 = 0x20;
}

fn addr_bytes(addr: u32) -> [u8; 3] {
    let b = addr.to_be_bytes();
    [b[1], b[2], b[3]]
}

/// Frame a register read request for `len` bytes
pub fn encode_read(addr: u32, len: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + len);
    frame.push(CMD_READ);
    frame.extend_from_slice(&addr_bytes(addr));
    frame.resize(4 + len, 0);
    frame
}

/// Frame a register write of `data`
pub fn encode_write(addr: u32, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + data.len());
    frame.push(CMD_WRITE);
    frame.extend_from_slice(&addr_bytes(addr));
    frame.extend_from_slice(data);
    frame
}

/// Convenience layer over a raw byte wire that speaks the register protocol
///
/// Implemented by the register-capable transports; the default methods do the
/// framing so backends only provide `transfer`.
pub trait RegisterAccess {
    /// Send a frame and read back `read_len` response bytes
    fn transfer(&mut self, frame: &[u8], read_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Read a 32-bit register (big-endian response)
    fn read_register(&mut self, addr: u32, timeout: Duration) -> Result<u32> {
        let frame = encode_read(addr, 4);
        let resp = self.transfer(&frame, 4, timeout)?;
        if resp.len() < 4 {
            return Err(TransportError::Timeout.into());
        }
        Ok(u32::from_be_bytes([resp[0], resp[1], resp[2], resp[3]]))
    }

    /// Write a 32-bit register
    fn write_register(&mut self, addr: u32, value: u32, timeout: Duration) -> Result<()> {
        let frame = encode_write(addr, &value.to_be_bytes());
        self.transfer(&frame, 0, timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_frame_layout() {
        let frame = encode_read(regs::DEVICE_ID, 4);
        assert_eq!(&frame[..4], &[CMD_READ, 0x00, 0x00, 0x00]);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn write_frame_uses_big_endian_address() {
        let frame = encode_write(regs::RESET_CTRL, &regs::RESET_COLD.to_be_bytes());
        assert_eq!(&frame[..4], &[CMD_WRITE, 0x1C, 0x60, 0x00]);
        assert_eq!(&frame[4..], &[0x00, 0x00, 0x00, 0x20]);
    }

    #[test]
    fn short_register_response_is_a_timeout() {
        struct ShortWire;
        impl RegisterAccess for ShortWire {
            fn transfer(
                &mut self,
                _frame: &[u8],
                _read_len: usize,
                _timeout: Duration,
            ) -> Result<Vec<u8>> {
                Ok(vec![0xB7, 0x00])
            }
        }

        let err = ShortWire
            .read_register(regs::DEVICE_ID, Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Transport(TransportError::Timeout)
        ));
    }

    #[test]
    fn config_chunk_frame() {
        let chunk = [0xABu8; 256];
        let frame = encode_write(regs::CONFIG_START + 256, &chunk);
        assert_eq!(&frame[..4], &[CMD_WRITE, 0x02, 0x01, 0x00]);
        assert_eq!(frame.len(), 4 + 256);
    }
}

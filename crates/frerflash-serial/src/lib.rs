//! frerflash-serial - Serial console transport
//!
//! Talks to the SJA1110 bootloader console over a serial line
//! (`/dev/ttyUSB0` and friends). The console speaks CRLF-terminated text
//! commands and ends each response with a prompt character; all of that is
//! handled by the protocol layer in `frerflash-core`, this crate only moves
//! bytes.

#![warn(rust_2018_idioms)]

use frerflash_core::error::{Result, TransportError};
use frerflash_core::transport::{Transport, TransportKind};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Console baud rate of the SJA1110 evaluation boards
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial console transport
///
/// 8N1, no flow control. The port is held until [`Transport::close`] or
/// drop; operations after close fail with [`TransportError::Closed`].
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    path: String,
}

impl SerialTransport {
    /// Open a serial device at [`DEFAULT_BAUD`]
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_baud(path, DEFAULT_BAUD)
    }

    /// Open a serial device at a specific baud rate
    pub fn open_with_baud(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_secs(5))
            .open()
            .map_err(|e| TransportError::OpenFailed(format!("{path}: {e}")))?;

        log::info!("opened serial console {path} at {baud} baud");
        Ok(Self {
            port: Some(port),
            path: path.to_string(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| TransportError::Closed.into())
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(data)
            .and_then(|()| port.flush())
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(TransportError::Io(e.to_string()).into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            log::debug!("closed serial console {}", self.path);
        }
        Ok(())
    }
}

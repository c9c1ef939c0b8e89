//! frerflash-spi - Linux spidev register transport
//!
//! Reaches the SJA1110 register file directly over `/dev/spidevX.Y`. Frames
//! produced by the protocol layer (command byte, 3-byte address, payload) go
//! out verbatim; responses are clocked in with a follow-up receive transfer
//! while chip select stays asserted.

#![warn(rust_2018_idioms)]

use frerflash_core::error::{Result, TransportError};
use frerflash_core::transport::{RegisterAccess, Transport, TransportKind};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// Default SPI clock in Hz
pub const DEFAULT_SPEED_HZ: u32 = 2_000_000;

/// SPI mode 1 (CPOL=0, CPHA=1), what the SJA1110 host interface expects
pub const DEFAULT_MODE: u8 = 1;

mod ioctl {
    use nix::ioctl_write_ptr;

    const SPI_IOC_MAGIC: u8 = b'k';
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    /// Size of the kernel's `struct spi_ioc_transfer`
    pub const SPI_IOC_TRANSFER_SIZE: usize = 32;

    /// SPI_IOC_MESSAGE(n) = _IOW('k', 0, char[n * sizeof(spi_ioc_transfer)])
    pub fn spi_ioc_message(n: u8) -> libc::c_ulong {
        let size = (n as usize) * SPI_IOC_TRANSFER_SIZE;
        ((1u32 << 30) | ((size as u32) << 16) | ((SPI_IOC_MAGIC as u32) << 8)) as libc::c_ulong
    }
}

/// Must match the kernel's `struct spi_ioc_transfer` layout
#[repr(C)]
#[derive(Debug, Default, Clone)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    _pad: u8,
}

/// Options for opening a spidev device
#[derive(Debug, Clone)]
pub struct SpiConfig {
    /// Device path, e.g. `/dev/spidev0.0`
    pub device: String,
    /// Clock speed in Hz
    pub speed_hz: u32,
    /// SPI mode (0-3)
    pub mode: u8,
}

impl SpiConfig {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            speed_hz: DEFAULT_SPEED_HZ,
            mode: DEFAULT_MODE,
        }
    }

    pub fn with_speed(mut self, speed_hz: u32) -> Self {
        self.speed_hz = speed_hz;
        self
    }

    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }
}

/// Register transport over Linux spidev
pub struct SpiTransport {
    file: Option<File>,
    path: String,
    speed_hz: u32,
}

impl SpiTransport {
    /// Open and configure a spidev device
    pub fn open(config: &SpiConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(|e| TransportError::OpenFailed(format!("{}: {e}", config.device)))?;

        let fd = file.as_raw_fd();
        let mode = config.mode;
        let bits: u8 = 8;
        let speed = config.speed_hz;
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode)
                .map_err(|e| TransportError::OpenFailed(format!("set mode {mode}: {e}")))?;
            ioctl::spi_ioc_wr_bits_per_word(fd, &bits)
                .map_err(|e| TransportError::OpenFailed(format!("set bits per word: {e}")))?;
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed)
                .map_err(|e| TransportError::OpenFailed(format!("set speed {speed}: {e}")))?;
        }

        log::info!(
            "opened {} (mode={}, speed={} kHz)",
            config.device,
            mode,
            speed / 1000
        );
        Ok(Self {
            file: Some(file),
            path: config.device.clone(),
            speed_hz: speed,
        })
    }

    fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| TransportError::Closed.into())
    }

    /// One SPI_IOC_MESSAGE with an optional transmit and an optional receive
    /// phase; chip select stays asserted between the two.
    fn spi_transfer(&self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let fd = self.file()?.as_raw_fd();

        let mut transfers = Vec::with_capacity(2);
        if !tx.is_empty() {
            transfers.push(SpiIocTransfer {
                tx_buf: tx.as_ptr() as u64,
                len: tx.len() as u32,
                speed_hz: self.speed_hz,
                bits_per_word: 8,
                ..Default::default()
            });
        }
        if !rx.is_empty() {
            transfers.push(SpiIocTransfer {
                rx_buf: rx.as_mut_ptr() as u64,
                len: rx.len() as u32,
                speed_hz: self.speed_hz,
                bits_per_word: 8,
                ..Default::default()
            });
        }
        if transfers.is_empty() {
            return Ok(());
        }

        let ret = unsafe {
            libc::ioctl(
                fd,
                ioctl::spi_ioc_message(transfers.len() as u8),
                transfers.as_ptr(),
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(TransportError::Io(format!("{}: {err}", self.path)).into());
        }
        Ok(())
    }
}

impl Transport for SpiTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Register
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.spi_transfer(data, &mut [])
    }

    // SPI has no notion of waiting; the response is clocked in immediately
    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        self.spi_transfer(&[], buf)?;
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            log::debug!("closed {}", self.path);
        }
        Ok(())
    }
}

impl RegisterAccess for SpiTransport {
    fn transfer(&mut self, frame: &[u8], read_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
        let mut resp = vec![0u8; read_len];
        self.spi_transfer(frame, &mut resp)?;
        Ok(resp)
    }
}

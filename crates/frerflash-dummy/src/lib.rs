//! frerflash-dummy - In-memory device emulators for testing
//!
//! Emulates the two wire-visible faces of an SJA1110 target without
//! hardware: the bootloader serial console and the register file. Both
//! implement [`Transport`], so the full upload protocol can run against them
//! in tests and development.

#![warn(rust_2018_idioms)]

use frerflash_core::error::{Result, TransportError};
use frerflash_core::transport::{regs, Transport, TransportKind, CMD_READ, CMD_WRITE};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// How the emulated console reacts to an upload request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleBehavior {
    /// Accept the upload and confirm completion
    #[default]
    Normal,
    /// Reject the announced size before any payload is accepted
    RejectSize,
    /// Never answer anything
    Silent,
    /// Accept the upload but end it with a bare prompt, no `success` token
    NoConfirmation,
}

/// Emulated bootloader serial console
///
/// Speaks the console protocol: CRLF-terminated commands, `> ` prompt after
/// every response, `ready` on an accepted upload request, raw payload bytes
/// until the announced size arrives, then `success`.
pub struct DummyConsole {
    behavior: ConsoleBehavior,
    line: Vec<u8>,
    out: VecDeque<u8>,
    commands: Vec<String>,
    remaining_payload: usize,
    received: Vec<u8>,
    resets: usize,
}

impl DummyConsole {
    pub fn new(behavior: ConsoleBehavior) -> Self {
        Self {
            behavior,
            line: Vec::new(),
            out: VecDeque::new(),
            commands: Vec::new(),
            remaining_payload: 0,
            received: Vec::new(),
            resets: 0,
        }
    }

    /// Commands the console has seen, in order
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Upload payload received so far
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// Number of `reset` commands handled
    pub fn resets(&self) -> usize {
        self.resets
    }

    fn respond(&mut self, text: &str) {
        if self.behavior != ConsoleBehavior::Silent {
            self.out.extend(text.bytes());
        }
    }

    fn handle_command(&mut self, command: &str) {
        self.commands.push(command.to_string());
        match command.split_once(' ').unwrap_or((command, "")) {
            ("version", _) => self.respond("SJA1110 boot 1.2\r\n> "),
            ("status", _) => self.respond("idle\r\n> "),
            ("reset", _) => {
                self.resets += 1;
                self.respond("> ");
            }
            ("upload", size) => match (self.behavior, size.parse::<usize>()) {
                (ConsoleBehavior::RejectSize, _) | (_, Err(_)) => {
                    self.respond("error: bad size\r\n> ")
                }
                (_, Ok(size)) => {
                    self.remaining_payload = size;
                    self.respond("ready\r\n> ");
                }
            },
            _ => self.respond("error: unknown command\r\n> "),
        }
    }
}

impl Transport for DummyConsole {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.remaining_payload > 0 {
            let take = data.len().min(self.remaining_payload);
            self.received.extend_from_slice(&data[..take]);
            self.remaining_payload -= take;
            if self.remaining_payload == 0 {
                if self.behavior == ConsoleBehavior::NoConfirmation {
                    self.respond("> ");
                } else {
                    self.respond("success\r\n> ");
                }
            }
            return Ok(());
        }

        self.line.extend_from_slice(data);
        while let Some(pos) = self.line.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.line.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            if !command.is_empty() {
                self.handle_command(&command);
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.out.len());
        for slot in buf.iter_mut().take(n) {
            *slot = match self.out.pop_front() {
                Some(b) => b,
                None => break,
            };
        }
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emulated SJA1110 register file
///
/// Understands the framed register protocol (command byte, 3-byte big-endian
/// address, payload). Writes into the configuration staging area are
/// captured for inspection; everything else lands in a plain register map.
pub struct DummyRegisterDevice {
    device_id: u32,
    registers: BTreeMap<u32, u32>,
    config: Vec<u8>,
    out: VecDeque<u8>,
    resets: usize,
    closed: bool,
}

impl DummyRegisterDevice {
    /// Emulate a device reporting the given DEVICE_ID
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            registers: BTreeMap::new(),
            config: Vec::new(),
            out: VecDeque::new(),
            resets: 0,
            closed: false,
        }
    }

    /// Bytes streamed into the configuration staging area so far
    pub fn config_bytes(&self) -> &[u8] {
        &self.config
    }

    /// Number of cold resets requested via RESET_CTRL
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// A register's last written value
    pub fn register(&self, addr: u32) -> Option<u32> {
        self.registers.get(&addr).copied()
    }

    fn handle_write(&mut self, addr: u32, payload: &[u8]) {
        if addr >= regs::CONFIG_START && addr < regs::RESET_CTRL {
            let offset = (addr - regs::CONFIG_START) as usize;
            if self.config.len() < offset + payload.len() {
                self.config.resize(offset + payload.len(), 0);
            }
            self.config[offset..offset + payload.len()].copy_from_slice(payload);
            return;
        }
        if payload.len() >= 4 {
            let value = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            if addr == regs::RESET_CTRL && value == regs::RESET_COLD {
                self.resets += 1;
                // A cold reset clears the staging area
                self.config.clear();
            }
            self.registers.insert(addr, value);
        }
    }

    fn handle_read(&mut self, addr: u32) {
        let value = if addr == regs::DEVICE_ID {
            self.device_id
        } else {
            self.registers.get(&addr).copied().unwrap_or(0)
        };
        self.out.extend(value.to_be_bytes());
    }
}

impl Transport for DummyRegisterDevice {
    fn kind(&self) -> TransportKind {
        TransportKind::Register
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        if frame.len() < 4 {
            return Err(TransportError::UnexpectedResponse(format!(
                "short frame: {} bytes",
                frame.len()
            ))
            .into());
        }
        let addr = u32::from_be_bytes([0, frame[1], frame[2], frame[3]]);
        match frame[0] {
            CMD_WRITE => self.handle_write(addr, &frame[4..]),
            CMD_READ => self.handle_read(addr),
            other => {
                return Err(TransportError::UnexpectedResponse(format!(
                    "unknown command byte 0x{other:02X}"
                ))
                .into())
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.out.len());
        for slot in buf.iter_mut().take(n) {
            *slot = match self.out.pop_front() {
                Some(b) => b,
                None => break,
            };
        }
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_answers_version() {
        let mut console = DummyConsole::new(ConsoleBehavior::Normal);
        console.write(b"version\r\n").unwrap();
        let mut buf = [0u8; 64];
        let n = console.read(&mut buf, Duration::from_millis(1)).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
        assert!(text.contains("SJA1110"));
        assert!(text.ends_with("> "));
    }

    #[test]
    fn register_device_reports_its_id() {
        let mut dev = DummyRegisterDevice::new(0xB700030E);
        dev.write(&[CMD_READ, 0x00, 0x00, 0x00]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf, Duration::from_millis(1)).unwrap(), 4);
        assert_eq!(u32::from_be_bytes(buf), 0xB700030E);
    }

    #[test]
    fn config_writes_land_at_their_offset() {
        let mut dev = DummyRegisterDevice::new(0xB700030E);
        let addr = regs::CONFIG_START + 0x100;
        let frame = frerflash_core::transport::encode_write(addr, &[0xAA, 0xBB]);
        dev.write(&frame).unwrap();
        assert_eq!(&dev.config_bytes()[0x100..0x102], &[0xAA, 0xBB]);
    }
}

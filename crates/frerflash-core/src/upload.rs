//! Upload protocol state machine
//!
//! Drives a built image onto the target over any [`Transport`]. The flow is
//! the same for every wire: optional reset, device verification, chunked
//! transfer, completion. What each step means differs per wire:
//!
//! * serial: bootloader console commands (`reset`, `version`,
//!   `upload <size>`), raw chunks after the device reports `ready`, then a
//!   prompt read for completion
//! * register: a cold reset via RESET_CTRL, a DEVICE_ID probe, framed writes
//!   into the configuration staging area; no completion signal exists
//! * sysfs: staged writes plus the trigger commit in `finish_upload`; the
//!   kernel gives no synchronous completion signal either
//!
//! Steps a wire cannot perform are skipped and reported as unverified in the
//! [`UploadReport`] instead of failing the upload.

use crate::error::{Result, TransportError};
use crate::image::EncodedImage;
use crate::transport::{regs, Transport, TransportKind, CMD_WRITE};
use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often the serial reader polls for new bytes
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upload chunk size on a serial console
pub const SERIAL_CHUNK: usize = 1024;
/// Upload chunk size for framed register writes
pub const REGISTER_CHUNK: usize = 256;

/// States of the upload protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Session created, nothing sent yet
    Idle,
    /// Reset requested, waiting for the device to settle
    Reset,
    /// Confirming we are talking to the expected device
    Verifying,
    /// Device accepted the transfer request
    Ready,
    /// Image chunks in flight
    Downloading,
    /// All chunks sent, waiting for the device to confirm
    Completing,
    /// Upload confirmed (or confirmed as far as the wire allows)
    Done,
    /// Upload aborted
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Idle => "idle",
            UploadState::Reset => "reset",
            UploadState::Verifying => "verifying",
            UploadState::Ready => "ready",
            UploadState::Downloading => "downloading",
            UploadState::Completing => "completing",
            UploadState::Done => "done",
            UploadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tunable timings and sizes of an upload
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Reset the device before uploading
    pub reset_first: bool,
    /// How long the device gets to come back after a reset
    pub reset_settle: Duration,
    /// Timeout for a single command/response exchange
    pub command_timeout: Duration,
    /// Timeout for the device to confirm a finished upload
    pub completion_timeout: Duration,
    /// Pause between chunks so slow devices can drain their buffer
    pub inter_chunk_delay: Duration,
    /// Override the wire's default chunk size
    pub chunk_size: Option<usize>,
    /// Send a `reboot` command once the upload is confirmed (serial only)
    pub reboot_after: bool,
    /// DEVICE_ID value verification expects; `None` skips the probe
    pub expected_device_id: Option<u32>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            reset_first: false,
            reset_settle: Duration::from_millis(500),
            command_timeout: Duration::from_secs(5),
            completion_timeout: Duration::from_secs(30),
            inter_chunk_delay: Duration::from_millis(10),
            chunk_size: None,
            reboot_after: false,
            expected_device_id: None,
        }
    }
}

/// Progress callbacks during an upload
pub trait UploadProgress {
    /// State machine advanced
    fn state_changed(&mut self, state: UploadState);

    /// Transfer is about to start
    fn starting(&mut self, total_bytes: usize, total_chunks: usize);

    /// One more chunk made it onto the wire
    fn chunk_sent(&mut self, chunks_sent: usize, total_chunks: usize);
}

/// A no-op progress reporter
pub struct NoProgress;

impl UploadProgress for NoProgress {
    fn state_changed(&mut self, _state: UploadState) {}
    fn starting(&mut self, _total_bytes: usize, _total_chunks: usize) {}
    fn chunk_sent(&mut self, _chunks_sent: usize, _total_chunks: usize) {}
}

/// Cooperative cancellation handle
///
/// Cloneable; cancelling from any clone aborts the upload at the next chunk
/// boundary with [`TransportError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// What an upload achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Final protocol state, [`UploadState::Done`] on success
    pub state: UploadState,
    /// Chunks that made it onto the wire
    pub chunks_sent: usize,
    /// Chunks the image divides into at the negotiated chunk size
    pub total_chunks: usize,
    /// Device identity was positively confirmed before the transfer
    pub device_verified: bool,
    /// Device positively confirmed the finished upload
    pub completion_verified: bool,
}

/// One upload of one image over one transport
pub struct UploadSession<T: Transport> {
    transport: T,
    options: UploadOptions,
    state: UploadState,
    closed: bool,
}

impl<T: Transport> UploadSession<T> {
    /// Session with default options
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, UploadOptions::default())
    }

    /// Session with explicit options; takes exclusive ownership of the
    /// transport until a terminal state releases it
    pub fn with_options(transport: T, options: UploadOptions) -> Self {
        Self {
            transport,
            options,
            state: UploadState::Idle,
            closed: false,
        }
    }

    /// Current protocol state
    pub fn state(&self) -> UploadState {
        self.state
    }

    fn enter(&mut self, state: UploadState, progress: &mut dyn UploadProgress) {
        log::debug!("upload state {} -> {}", self.state, state);
        self.state = state;
        progress.state_changed(state);
    }

    /// Run the full upload
    ///
    /// On any error the state machine lands in [`UploadState::Failed`] and
    /// the error is returned. Either terminal state releases the transport;
    /// drop only backstops a session abandoned mid-flight.
    pub fn upload(
        &mut self,
        image: &EncodedImage,
        progress: &mut dyn UploadProgress,
        cancel: &CancelToken,
    ) -> Result<UploadReport> {
        let result = self.run(image, progress, cancel);
        if result.is_err() {
            self.enter(UploadState::Failed, progress);
        }
        self.release();
        result
    }

    fn run(
        &mut self,
        image: &EncodedImage,
        progress: &mut dyn UploadProgress,
        cancel: &CancelToken,
    ) -> Result<UploadReport> {
        let kind = self.transport.kind();
        let chunk_size = self
            .options
            .chunk_size
            .unwrap_or_else(|| kind.default_chunk_size());
        let total_chunks = image.len().div_ceil(chunk_size);

        log::info!(
            "uploading {} over {}: {} bytes in {} chunks of {}",
            image.kind(),
            kind,
            image.len(),
            total_chunks,
            chunk_size
        );

        if self.options.reset_first {
            self.enter(UploadState::Reset, progress);
            self.reset_device(kind, cancel)?;
        }

        self.enter(UploadState::Verifying, progress);
        let device_verified = self.verify_device(kind, cancel)?;

        self.request_transfer(kind, image.len(), cancel)?;
        self.enter(UploadState::Ready, progress);

        self.enter(UploadState::Downloading, progress);
        progress.starting(image.len(), total_chunks);
        let mut chunks_sent = 0;
        for (index, chunk) in image.as_bytes().chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }
            self.send_chunk(kind, index * chunk_size, chunk)?;
            chunks_sent += 1;
            progress.chunk_sent(chunks_sent, total_chunks);
            if !self.options.inter_chunk_delay.is_zero() {
                thread::sleep(self.options.inter_chunk_delay);
            }
        }

        self.enter(UploadState::Completing, progress);
        self.transport.finish_upload()?;
        let completion_verified = self.await_completion(kind, cancel)?;

        if self.options.reboot_after && kind == TransportKind::Serial {
            // Fire and forget: the device drops the console immediately
            self.send_command("reboot")?;
        }

        self.enter(UploadState::Done, progress);
        log::info!(
            "upload finished: {} chunks, device {}verified, completion {}verified",
            chunks_sent,
            if device_verified { "" } else { "un" },
            if completion_verified { "" } else { "un" },
        );
        Ok(UploadReport {
            state: UploadState::Done,
            chunks_sent,
            total_chunks,
            device_verified,
            completion_verified,
        })
    }

    fn reset_device(&mut self, kind: TransportKind, cancel: &CancelToken) -> Result<()> {
        match kind {
            TransportKind::Serial => {
                self.send_command("reset")?;
                self.read_until_prompt(self.options.command_timeout, cancel)?;
            }
            TransportKind::Register => {
                let frame =
                    crate::transport::encode_write(regs::RESET_CTRL, &regs::RESET_COLD.to_be_bytes());
                self.transport.write(&frame)?;
            }
            TransportKind::Sysfs => self.transport.reset()?,
        }
        thread::sleep(self.options.reset_settle);
        Ok(())
    }

    /// Returns whether the device identity was positively confirmed
    ///
    /// An id mismatch is a warning, not a hard failure: some legitimate
    /// images intentionally target a device id the probe cannot see yet.
    fn verify_device(&mut self, kind: TransportKind, cancel: &CancelToken) -> Result<bool> {
        match kind {
            TransportKind::Serial => {
                self.send_command("version")?;
                let response = self.read_until_prompt(self.options.command_timeout, cancel)?;
                if response.trim().is_empty() {
                    return Err(TransportError::UnexpectedResponse(response).into());
                }
                log::debug!("device version: {}", response.trim());
                Ok(true)
            }
            TransportKind::Register => {
                let Some(expected) = self.options.expected_device_id else {
                    return Ok(false);
                };
                let frame = crate::transport::encode_read(regs::DEVICE_ID, 4);
                self.transport.write(&frame)?;
                let mut resp = [0u8; 4];
                let n = self.transport.read(&mut resp, self.options.command_timeout)?;
                if n < 4 {
                    return Err(TransportError::Timeout.into());
                }
                let found = u32::from_be_bytes(resp);
                if found != expected {
                    log::warn!(
                        "device id 0x{found:08X} does not match expected 0x{expected:08X}, \
                         continuing unverified"
                    );
                    return Ok(false);
                }
                Ok(true)
            }
            // Nothing to probe through the firmware loader
            TransportKind::Sysfs => Ok(false),
        }
    }

    fn request_transfer(
        &mut self,
        kind: TransportKind,
        size: usize,
        cancel: &CancelToken,
    ) -> Result<()> {
        match kind {
            TransportKind::Serial => {
                self.send_command(&format!("upload {size}"))?;
                let response = self.read_until_prompt(self.options.command_timeout, cancel)?;
                let reply = response.trim();
                if reply.contains("error") {
                    return Err(TransportError::UnexpectedResponse(reply.to_string()).into());
                }
                if !reply.contains("ready") {
                    return Err(TransportError::UnexpectedResponse(reply.to_string()).into());
                }
                Ok(())
            }
            TransportKind::Register | TransportKind::Sysfs => Ok(()),
        }
    }

    fn send_chunk(&mut self, kind: TransportKind, offset: usize, chunk: &[u8]) -> Result<()> {
        match kind {
            TransportKind::Serial | TransportKind::Sysfs => self.transport.write(chunk),
            TransportKind::Register => {
                let addr = regs::CONFIG_START + offset as u32;
                let mut frame = Vec::with_capacity(4 + chunk.len());
                frame.push(CMD_WRITE);
                let a = addr.to_be_bytes();
                frame.extend_from_slice(&[a[1], a[2], a[3]]);
                frame.extend_from_slice(chunk);
                self.transport.write(&frame)
            }
        }
    }

    /// Returns whether the device positively confirmed completion
    ///
    /// Serial completion means the `success` token; a prompt alone is not a
    /// confirmation, and `error` fails the upload.
    fn await_completion(&mut self, kind: TransportKind, cancel: &CancelToken) -> Result<bool> {
        match kind {
            TransportKind::Serial => {
                let response = self.read_until_token(
                    &["success", "error"],
                    self.options.completion_timeout,
                    cancel,
                )?;
                if response.contains("error") {
                    return Err(
                        TransportError::UnexpectedResponse(response.trim().to_string()).into(),
                    );
                }
                Ok(true)
            }
            // Neither wire reports back; the caller re-probes if it cares
            TransportKind::Register | TransportKind::Sysfs => Ok(false),
        }
    }

    /// Send one console command, CRLF terminated
    fn send_command(&mut self, command: &str) -> Result<()> {
        log::trace!("> {command}");
        self.transport.write(command.as_bytes())?;
        self.transport.write(b"\r\n")
    }

    /// Accumulate console output until a prompt character arrives
    ///
    /// The bootloader ends every response with `>` (normal mode) or `#`
    /// (bootloader mode). Polls every 10 ms, honoring the cancel token at
    /// each iteration; expiry of `timeout` without a prompt is
    /// [`TransportError::Timeout`].
    fn read_until_prompt(&mut self, timeout: Duration, cancel: &CancelToken) -> Result<String> {
        self.read_console(timeout, cancel, |collected| {
            collected.iter().any(|&b| b == b'>' || b == b'#')
        })
    }

    /// Accumulate console output until one of `tokens` appears
    fn read_until_token(
        &mut self,
        tokens: &[&str],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<String> {
        self.read_console(timeout, cancel, |collected| {
            let text = String::from_utf8_lossy(collected);
            tokens.iter().any(|t| text.contains(t))
        })
    }

    fn read_console(
        &mut self,
        timeout: Duration,
        cancel: &CancelToken,
        done: impl Fn(&[u8]) -> bool,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }
            let n = self.transport.read(&mut buf, POLL_INTERVAL)?;
            collected.extend_from_slice(&buf[..n]);
            if done(&collected) {
                let text = String::from_utf8_lossy(&collected).into_owned();
                log::trace!("< {}", text.trim_end());
                return Ok(text);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout.into());
            }
        }
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.transport.close() {
                log::warn!("failed to close transport: {e}");
            }
        }
    }

    /// Release the transport early, before any upload ran
    pub fn close(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()
    }
}

impl<T: Transport> Drop for UploadSession<T> {
    fn drop(&mut self) {
        self.release();
    }
}

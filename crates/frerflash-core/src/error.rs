//! Error types for frerflash-core
//!
//! Each stage of the pipeline (encode, validate, transfer) has its own error
//! enum; `Error` wraps them for callers that drive the whole flow.

use crate::layout::SectionKind;
use thiserror::Error;

/// Errors raised while encoding streams into configuration tables
///
/// Encoding errors are always fatal to the current build; no partial image
/// is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// A port is outside the device's valid range
    #[error("port {port} is not a valid port (device has {port_count} ports)")]
    InvalidPort { port: u8, port_count: u8 },

    /// More entries than the section has room for
    #[error("{section} table overflow: {requested} entries, capacity {capacity}")]
    CapacityExceeded {
        section: SectionKind,
        capacity: usize,
        requested: usize,
    },

    /// Two streams share the same id
    #[error("duplicate stream id {0}")]
    DuplicateStreamId(u16),

    /// VLAN id above 4095
    #[error("VLAN id {0} out of range (0-4095)")]
    InvalidVlan(u16),

    /// Priority above 7
    #[error("priority {0} out of range (0-7)")]
    InvalidPriority(u8),

    /// A replication stream with no egress ports is meaningless
    #[error("stream {0} has an empty egress port set")]
    EmptyEgressSet(u16),

    /// Stream was built without an ingress port
    #[error("stream {0} has no ingress port")]
    MissingIngressPort(u16),

    /// The entry fields do not fit the layout's declared entry size
    #[error("{section} entry needs {required} bytes, layout allows {entry_size}")]
    EntryTooWide {
        section: SectionKind,
        entry_size: usize,
        required: usize,
    },
}

/// Errors raised while validating an existing image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The 8-byte marker at offset 0 does not match
    #[error("image valid marker not found at offset 0")]
    InvalidMarker,

    /// Device id in the image header differs from the layout's
    #[error("device id mismatch: expected 0x{expected:08X}, found 0x{found:08X}")]
    DeviceMismatch { expected: u32, found: u32 },

    /// Image length is far from the declared size
    #[error("image size {found} outside tolerance of expected {expected}")]
    SizeOutOfRange { expected: usize, found: usize },

    /// Stored CRC trailer does not match the recomputed payload CRC
    #[error("CRC mismatch: expected 0x{expected:08X}, found 0x{found:08X}")]
    CrcMismatch { expected: u32, found: u32 },

    /// Image is too short to hold even the header and trailer
    #[error("image truncated: {0} bytes")]
    TruncatedImage(usize),
}

/// Errors raised by transports and the upload protocol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not open the underlying device
    #[error("failed to open transport: {0}")]
    OpenFailed(String),

    /// No (or incomplete) response within the allotted time
    #[error("timed out waiting for device response")]
    Timeout,

    /// The device answered with something the protocol does not expect;
    /// carries the raw response text for diagnostics
    #[error("unexpected device response: {0:?}")]
    UnexpectedResponse(String),

    /// I/O failure on the transport
    #[error("transport I/O error: {0}")]
    Io(String),

    /// Upload aborted through a cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Operation attempted on a transport that was already closed
    #[error("transport is closed")]
    Closed,
}

/// Errors raised by memory layout validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// A table the builder needs is not present in the layout
    #[error("layout is missing the {0} section")]
    MissingSection(SectionKind),

    /// Two section regions overlap
    #[error("{0} and {1} sections overlap")]
    OverlappingSections(SectionKind, SectionKind),

    /// A section region does not fit inside the image (CRC trailer included)
    #[error("{0} section does not fit inside the image")]
    SectionOutOfBounds(SectionKind),

    /// A section starts inside the fixed image header
    #[error("{0} section overlaps the image header")]
    SectionInHeader(SectionKind),

    /// Layout file could not be parsed
    #[error("failed to parse layout: {0}")]
    Parse(String),
}

/// Top-level error for callers driving build + validate + upload
#[derive(Debug, Error)]
pub enum Error {
    /// Stream-to-table encoding failed
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    /// Image validation failed
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Transport or upload protocol failure
    #[error("upload failed: {0}")]
    Transport(#[from] TransportError),

    /// Layout is internally inconsistent
    #[error("invalid memory layout: {0}")]
    Layout(#[from] LayoutError),

    /// Plain file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the top-level error
pub type Result<T> = std::result::Result<T, Error>;

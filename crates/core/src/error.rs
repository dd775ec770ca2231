//! Error types for open-deck-core.

use crate::info::DeviceIdentity;
use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A host query (config manager, HID class driver) returned a failure code.
    #[error("{op} failed with code 0x{code:X}")]
    Query { op: &'static str, code: u32 },

    /// A two-call query kept reporting a too-small buffer.
    #[error("{op}: buffer still too small after {attempts} attempts")]
    BufferTooSmall { op: &'static str, attempts: usize },

    /// A property exists but carries a different type tag than requested.
    #[error("property {key:?} has unexpected type")]
    PropertyType { key: crate::platform::DeviceProperty },

    /// Device, node, or property not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// The device path could not be opened or configured.
    #[error("open failed: {0}")]
    Open(String),

    /// Hard I/O failure on an opened device.
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation did not complete within its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Caller handed an empty payload or buffer.
    #[error("empty payload")]
    EmptyPayload,

    /// Report kind is not valid for the requested operation.
    #[error("report kind {kind:?} not supported by {op}")]
    UnsupportedReportKind {
        op: &'static str,
        kind: crate::transport::ReportKind,
    },

    /// Value out of safe range.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Operation not supported by this host or device.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A failed `DeviceHandle::open`; the identity is handed back unconsumed.
#[derive(Debug, Error)]
#[error("cannot open {}: {source}", identity.path)]
pub struct OpenError {
    #[source]
    pub source: Error,
    pub identity: DeviceIdentity,
}

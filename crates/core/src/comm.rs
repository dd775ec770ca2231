//! Error classification and device status.
//!
//! Lookup misses never reach callers of the discovery layer; the classes
//! here cover what `open` and the report operations can return, so callers
//! can decide whether a handle is still worth keeping.

use crate::deck::StreamDeck;
use crate::error::Error;
use crate::platform::HidDevice;
use tracing::{debug, warn};

/// Classification of errors surfaced by the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A property, attribute or node lookup missed.
    LookupMiss,
    /// The device could not be opened or configured.
    OpenFailure,
    /// Access denied, usually another process holding the device
    /// exclusively.
    PermissionDenied,
    /// The operation is still outstanding in the driver.
    Timeout,
    /// The device has gone away.
    Disconnected,
    /// Hard I/O failure; the handle may be unusable.
    HandleFailure,
    /// The request was rejected before reaching the device.
    InvalidRequest,
}

impl ErrorClass {
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Query { .. }
            | Error::BufferTooSmall { .. }
            | Error::PropertyType { .. }
            | Error::NotFound(_) => Self::LookupMiss,
            Error::Open(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("access denied") || lower.contains("access is denied") {
                    Self::PermissionDenied
                } else {
                    Self::OpenFailure
                }
            }
            Error::Timeout(_) => Self::Timeout,
            Error::Io(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("disconnect")
                    || lower.contains("not connected")
                    || lower.contains("no such device")
                {
                    Self::Disconnected
                } else {
                    Self::HandleFailure
                }
            }
            Error::EmptyPayload
            | Error::UnsupportedReportKind { .. }
            | Error::OutOfRange { .. }
            | Error::Config(_)
            | Error::Unsupported(_) => Self::InvalidRequest,
        }
    }

    /// Whether the same call may succeed later on the same handle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Whether the caller should close the handle.
    pub fn should_close(&self) -> bool {
        matches!(self, Self::Disconnected | Self::HandleFailure)
    }
}

/// Health of an opened deck as reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The firmware report came back.
    Connected,
    /// The interface is gone from the host.
    Disconnected,
    /// Another process holds the device.
    PermissionError,
    /// Any other failure on the handle.
    Error,
}

impl From<ErrorClass> for DeviceStatus {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Disconnected | ErrorClass::LookupMiss => Self::Disconnected,
            ErrorClass::PermissionDenied => Self::PermissionError,
            _ => Self::Error,
        }
    }
}

/// Check deck connectivity by fetching the firmware feature report.
pub fn check_device_status<D: HidDevice>(deck: &StreamDeck<D>) -> DeviceStatus {
    match deck.firmware_report() {
        Ok(_) => DeviceStatus::Connected,
        Err(ref e) => {
            let class = ErrorClass::classify(e);
            if class.should_close() {
                warn!(class = ?class, error = %e, "Device check failed");
            } else {
                debug!(class = ?class, error = %e, "Device check failed");
            }
            class.into()
        }
    }
}

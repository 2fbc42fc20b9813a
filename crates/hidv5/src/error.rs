//! Error types for the HID v5 resource
//!
//! None of these ever reach the guest directly. Every request-level failure
//! is logged and degrades to `ReturnCode::InvalidArgument`.

use common::MemoryError;
use protocol::{DeviceHandle, ProtocolError};
use thiserror::Error;

/// Failure reported by a host USB device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Transfer timed out")]
    Timeout,

    #[error("Endpoint stalled")]
    Pipe,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Entity not found")]
    NotFound,

    #[error("Resource busy")]
    Busy,

    #[error("Buffer overflow")]
    Overflow,

    #[error("I/O error")]
    Io,

    #[error("Invalid parameter")]
    InvalidParam,

    #[error("Access denied")]
    Access,

    #[error("Device is not open")]
    NotOpen,

    #[error("Device is shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Other(String),
}

/// Reasons a device-scoped request is answered with InvalidArgument
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Guest memory fault: {0}")]
    Memory(#[from] MemoryError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unknown device handle {0:?}")]
    UnknownDevice(DeviceHandle),

    #[error("Bad output buffer (address {address:#x}, size {size:#x})")]
    BadOutputBuffer { address: u32, size: u32 },

    #[error("Bad input buffer (address {address:#x}, size {size:#x})")]
    BadInputBuffer { address: u32, size: u32 },

    #[error("Device has no configuration")]
    NoConfiguration,

    #[error("No interface {interface} with alternate setting {alt_setting}")]
    NoMatchingInterface { interface: u8, alt_setting: u8 },

    #[error("Expected 2 vectors, got {0}")]
    VectorCount(usize),

    #[error("A device change hook is already pending")]
    HookPending,
}

/// Reasons a transfer submission fails before reaching the host
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Unsupported transfer opcode {0:#x}")]
    UnsupportedOpcode(u32),

    #[error("Host rejected transfer: {0}")]
    Rejected(HostError),
}

impl From<MemoryError> for SubmitError {
    fn from(err: MemoryError) -> Self {
        SubmitError::Request(RequestError::Memory(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RequestError::NoMatchingInterface {
            interface: 1,
            alt_setting: 2,
        };
        assert_eq!(
            format!("{}", err),
            "No interface 1 with alternate setting 2"
        );

        let err = SubmitError::Rejected(HostError::NotOpen);
        assert_eq!(format!("{}", err), "Host rejected transfer: Device is not open");
    }

    #[test]
    fn test_memory_error_converts() {
        let fault = MemoryError::OutOfRange {
            address: 0x10,
            len: 4,
            size: 8,
        };
        let err: SubmitError = fault.into();
        assert!(matches!(
            err,
            SubmitError::Request(RequestError::Memory(_))
        ));
    }
}

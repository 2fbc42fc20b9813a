//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(String),

    #[error("Guest memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Guest memory access failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("Access of {len} bytes at {address:#010x} is outside guest memory ({size:#x} bytes)")]
    OutOfRange { address: u32, len: usize, size: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Opcode outside the known set for the surface it arrived on
    #[error("Unknown opcode: {0:#x}")]
    UnknownOpcode(u32),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

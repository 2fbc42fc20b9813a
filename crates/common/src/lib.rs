//! Common utilities for rust-hidv5
//!
//! This crate provides the collaborators shared by the HID resource and its
//! tests: guest memory access, the deferred-reply channel, error handling and
//! logging setup.

pub mod channel;
pub mod error;
pub mod logging;
pub mod memory;
/// Fixtures for tests; built for this crate's own tests or with the
/// `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{Completion, ReplyReceiver, ReplySender, create_reply_channel};
pub use error::{Error, MemoryError, Result};
pub use logging::setup_logging;
pub use memory::{GuestMemory, GuestRam};

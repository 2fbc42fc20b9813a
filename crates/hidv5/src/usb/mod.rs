//! USB subsystem
//!
//! Host-side half of the resource: the [`HostDevice`] abstraction, the
//! transfer messages exchanged with it, and the libusb implementation.
//!
//! Transfers run on one dedicated thread per opened device so blocking
//! libusb calls never stall request handling.

pub mod device;
pub mod host;
pub mod manager;
pub mod message;
pub mod transfers;
pub mod worker;

// Re-export public types
pub use device::RusbHostDevice;
pub use host::{HostDevice, HostId, Rejected};
pub use manager::{DeviceChanges, DeviceManager};
pub use message::{ControlSetup, TransferKind, TransferMessage, TransferOutcome, TransferRequest};
pub use worker::TransferQueue;

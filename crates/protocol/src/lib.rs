//! Protocol library for rust-hidv5
//!
//! This crate defines the guest-facing contract of the USBv5 HID resource:
//! opcode numbers, request shapes, return codes, the fixed reply layouts and
//! the big-endian serialization of USB descriptors.
//!
//! # Example
//!
//! ```
//! use protocol::{EndpointDescriptor, GuestLayout};
//!
//! let endpoint = EndpointDescriptor {
//!     length: 7,
//!     descriptor_type: 5,
//!     endpoint_address: 0x81,
//!     attributes: 0x03,
//!     max_packet_size: 0x0040,
//!     interval: 10,
//! };
//!
//! let mut guest = [0u8; EndpointDescriptor::SIZE];
//! endpoint.write_guest(&mut guest).unwrap();
//! assert_eq!(guest, [7, 5, 0x81, 0x03, 0x00, 0x40, 10]);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, GuestLayout, InterfaceDescriptor,
    encode_guest,
};
pub use error::{ProtocolError, Result};
pub use messages::{IoctlOpcode, IoctlvOpcode, layout};
pub use types::{
    DeviceHandle, IoVector, IoctlRequest, IoctlvRequest, IpcResult, RequestId, ReturnCode,
    TRANSFER_CANCELED, TRANSFER_SHUTDOWN,
};
pub use version::{CURRENT_VERSION, ProtocolVersion, USBV5_VERSION};

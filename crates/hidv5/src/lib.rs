//! USB HID v5 passthrough
//!
//! Exposes host USB HID devices to an emulated guest through the USBv5
//! request interface. [`HidV5`] decodes guest requests, keeps the table of
//! virtual devices, fills device-info replies, forwards transfers to a
//! [`usb::HostDevice`] and notifies the guest of device arrival and removal.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use common::{GuestMemory, GuestRam, create_reply_channel};
//! use hidv5::HidV5;
//! use hidv5::test_utils::StubHostDevice;
//! use protocol::{IoctlOpcode, IoctlRequest, IpcResult, RequestId};
//!
//! let memory = Arc::new(GuestRam::new(0x1000));
//! let (replies, _receiver) = create_reply_channel();
//! let resource = HidV5::new(memory.clone(), replies);
//!
//! let handles = resource.attach_host_device(Arc::new(StubHostDevice::hid(1, 0x057e, 0x0306)));
//! assert_eq!(handles.len(), 1);
//!
//! let request = IoctlRequest {
//!     id: RequestId(1),
//!     opcode: IoctlOpcode::GetVersion.value(),
//!     buffer_in: 0,
//!     buffer_in_size: 0,
//!     buffer_out: 0x100,
//!     buffer_out_size: 4,
//! };
//! assert_eq!(resource.handle_ioctl(&request), IpcResult::success());
//! assert_eq!(memory.read_u32(0x100).unwrap(), 0x50001);
//! ```

pub mod cancel;
pub mod config;
pub mod describe;
pub mod device_change;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod registry;
pub mod submit;
/// Host device doubles; built for this crate's own tests or with the
/// `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb;

pub use dispatcher::HidV5;
pub use error::{HostError, RequestError, SubmitError};
pub use registry::{DeviceRegistry, EndpointCache, VirtualDevice};

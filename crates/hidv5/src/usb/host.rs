//! Host device abstraction
//!
//! The resource never talks to libusb directly. Everything it needs from a
//! physical device goes through [`HostDevice`], implemented by the rusb
//! backend and by test doubles.

use crate::error::HostError;
use crate::usb::message::TransferMessage;
use protocol::{ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};
use std::fmt;

/// Stable identity of a physical device on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u64);

impl HostId {
    /// Identity derived from the bus topology
    pub fn from_bus_address(bus: u8, address: u8) -> Self {
        Self(u64::from(bus) << 8 | u64::from(address))
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", (self.0 >> 8) & 0xff, self.0 & 0xff)
    }
}

/// A transfer the host refused to queue
///
/// The message is handed back unanswered so the caller decides how the
/// guest learns about the failure.
#[derive(Debug)]
pub struct Rejected {
    pub message: TransferMessage,
    pub error: HostError,
}

/// A physical USB device exposed to the guest
///
/// Descriptors are returned with host-native field values. Implementations
/// must be usable from several threads at once.
pub trait HostDevice: Send + Sync {
    fn id(&self) -> HostId;

    fn device_descriptor(&self) -> DeviceDescriptor;

    fn configurations(&self) -> Vec<ConfigDescriptor>;

    /// Interfaces (all alternate settings) of the configuration at `config`
    fn interfaces(&self, config: u8) -> Vec<InterfaceDescriptor>;

    fn endpoints(&self, config: u8, interface: u8, alt_setting: u8) -> Vec<EndpointDescriptor>;

    /// Whether the device or any of its interfaces declares `class`
    fn has_class(&self, class: u8) -> bool {
        if self.device_descriptor().device_class == class {
            return true;
        }
        (0..self.configurations().len()).any(|index| {
            u8::try_from(index).is_ok_and(|config| {
                self.interfaces(config)
                    .iter()
                    .any(|interface| interface.interface_class == class)
            })
        })
    }

    /// Take ownership of `interface` from the host OS
    ///
    /// Must be idempotent: the resource calls it before every transfer.
    fn attach(&self, interface: u8) -> Result<(), HostError>;

    /// Queue a transfer
    ///
    /// On success the device owns the message and answers it exactly once.
    fn submit_transfer(&self, message: TransferMessage) -> Result<(), Rejected>;

    /// Cancel every transfer queued or running on `endpoint`
    ///
    /// Every affected message is answered with the cancellation status before
    /// this returns.
    fn cancel_transfers(&self, endpoint: u8);

    fn suspend_resume(&self, resume: bool) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_id_display() {
        let id = HostId::from_bus_address(1, 12);
        assert_eq!(id, HostId(0x010c));
        assert_eq!(id.to_string(), "001:012");
    }
}

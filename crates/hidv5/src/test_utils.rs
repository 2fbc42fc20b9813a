//! Test utilities for the HID v5 resource
//!
//! [`StubHostDevice`] stands in for a physical device: it serves fixed
//! descriptors, records every call, and keeps submitted transfers queued
//! until the test completes or cancels them.
//!
//! # Example
//!
//! ```
//! use hidv5::test_utils::StubHostDevice;
//! use hidv5::usb::HostDevice;
//!
//! let host = StubHostDevice::hid(1, 0x057e, 0x0306);
//! assert_eq!(host.device_descriptor().vendor_id, 0x057e);
//! assert_eq!(host.endpoints(0, 0, 0).len(), 2);
//! ```

use crate::error::HostError;
use crate::usb::{HostDevice, HostId, Rejected, TransferMessage, TransferOutcome};
use common::test_utils::{
    create_mock_config_descriptor, create_mock_hid_device_descriptor, create_mock_hid_interface,
    create_mock_interrupt_endpoint,
};
use parking_lot::Mutex;
use protocol::{ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};

struct StubInterface {
    descriptor: InterfaceDescriptor,
    endpoints: Vec<EndpointDescriptor>,
}

#[derive(Default)]
struct StubState {
    queued: Vec<TransferMessage>,
    attached: Vec<u8>,
    cancelled: Vec<u8>,
    power_requests: Vec<bool>,
    fail_attach: bool,
    reject_submissions: bool,
    fail_power: bool,
}

/// In-memory [`HostDevice`] with a single configuration
pub struct StubHostDevice {
    id: HostId,
    device: DeviceDescriptor,
    configurations: Vec<ConfigDescriptor>,
    interfaces: Vec<StubInterface>,
    state: Mutex<StubState>,
}

impl StubHostDevice {
    /// Device with the given descriptor and no configuration
    pub fn new(id: u64, device: DeviceDescriptor) -> Self {
        Self {
            id: HostId(id),
            device,
            configurations: Vec::new(),
            interfaces: Vec::new(),
            state: Mutex::new(StubState::default()),
        }
    }

    /// HID device with interface 0 exposing interrupt IN 0x81 and OUT 0x02
    pub fn hid(id: u64, vendor_id: u16, product_id: u16) -> Self {
        Self::new(id, create_mock_hid_device_descriptor(vendor_id, product_id))
            .with_configuration(create_mock_config_descriptor(2))
            .with_interface(
                create_mock_hid_interface(0, 0, 2),
                vec![
                    create_mock_interrupt_endpoint(0x81),
                    create_mock_interrupt_endpoint(0x02),
                ],
            )
    }

    pub fn with_configuration(mut self, config: ConfigDescriptor) -> Self {
        self.configurations.push(config);
        self
    }

    /// Add an interface (alternate setting) to the first configuration
    pub fn with_interface(
        mut self,
        descriptor: InterfaceDescriptor,
        endpoints: Vec<EndpointDescriptor>,
    ) -> Self {
        self.interfaces.push(StubInterface {
            descriptor,
            endpoints,
        });
        self
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.state.lock().fail_attach = fail;
    }

    pub fn set_reject_submissions(&self, reject: bool) {
        self.state.lock().reject_submissions = reject;
    }

    pub fn set_fail_power(&self, fail: bool) {
        self.state.lock().fail_power = fail;
    }

    /// Number of transfers waiting for completion
    pub fn queued_len(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Endpoints of the queued transfers, oldest first
    pub fn queued_endpoints(&self) -> Vec<u8> {
        self.state.lock().queued.iter().map(|m| m.endpoint()).collect()
    }

    /// Take every queued transfer
    pub fn take_queued(&self) -> Vec<TransferMessage> {
        std::mem::take(&mut self.state.lock().queued)
    }

    /// Complete the oldest queued transfer; false if none is queued
    pub fn complete_next(&self, outcome: TransferOutcome) -> bool {
        let message = {
            let mut state = self.state.lock();
            if state.queued.is_empty() {
                return false;
            }
            state.queued.remove(0)
        };
        message.complete(outcome);
        true
    }

    /// Interfaces passed to `attach`, in call order
    pub fn attached(&self) -> Vec<u8> {
        self.state.lock().attached.clone()
    }

    /// Endpoints passed to `cancel_transfers`, in call order
    pub fn cancelled(&self) -> Vec<u8> {
        self.state.lock().cancelled.clone()
    }

    /// Arguments passed to `suspend_resume`, in call order
    pub fn power_requests(&self) -> Vec<bool> {
        self.state.lock().power_requests.clone()
    }
}

impl HostDevice for StubHostDevice {
    fn id(&self) -> HostId {
        self.id
    }

    fn device_descriptor(&self) -> DeviceDescriptor {
        self.device
    }

    fn configurations(&self) -> Vec<ConfigDescriptor> {
        self.configurations.clone()
    }

    fn interfaces(&self, config: u8) -> Vec<InterfaceDescriptor> {
        if config != 0 || self.configurations.is_empty() {
            return Vec::new();
        }
        self.interfaces.iter().map(|i| i.descriptor).collect()
    }

    fn endpoints(&self, config: u8, interface: u8, alt_setting: u8) -> Vec<EndpointDescriptor> {
        if config != 0 {
            return Vec::new();
        }
        self.interfaces
            .iter()
            .find(|i| {
                i.descriptor.interface_number == interface
                    && i.descriptor.alternate_setting == alt_setting
            })
            .map(|i| i.endpoints.clone())
            .unwrap_or_default()
    }

    fn attach(&self, interface: u8) -> Result<(), HostError> {
        let mut state = self.state.lock();
        state.attached.push(interface);
        if state.fail_attach {
            return Err(HostError::Access);
        }
        Ok(())
    }

    fn submit_transfer(&self, message: TransferMessage) -> Result<(), Rejected> {
        let mut state = self.state.lock();
        if state.reject_submissions {
            return Err(Rejected {
                message,
                error: HostError::NoDevice,
            });
        }
        state.queued.push(message);
        Ok(())
    }

    fn cancel_transfers(&self, endpoint: u8) {
        let cancelled: Vec<TransferMessage> = {
            let mut state = self.state.lock();
            state.cancelled.push(endpoint);
            let (matching, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.queued)
                .into_iter()
                .partition(|m| m.endpoint() == endpoint);
            state.queued = kept;
            matching
        };
        for message in cancelled {
            message.cancel();
        }
    }

    fn suspend_resume(&self, resume: bool) -> Result<(), HostError> {
        let mut state = self.state.lock();
        state.power_requests.push(resume);
        if state.fail_power {
            return Err(HostError::NotOpen);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::codec::HID_CLASS;

    #[test]
    fn test_stub_hid_descriptors() {
        let host = StubHostDevice::hid(7, 0x057e, 0x0306);
        assert_eq!(host.id(), HostId(7));
        assert_eq!(host.configurations().len(), 1);
        assert_eq!(host.interfaces(0).len(), 1);
        assert!(host.interfaces(1).is_empty());
        assert!(host.endpoints(0, 0, 1).is_empty());
        assert!(host.has_class(HID_CLASS));
    }

    #[test]
    fn test_stub_records_calls() {
        let host = StubHostDevice::hid(1, 0x057e, 0x0306);
        host.attach(0).unwrap();
        host.set_fail_attach(true);
        assert!(host.attach(0).is_err());
        host.cancel_transfers(0x81);
        host.suspend_resume(true).unwrap();

        assert_eq!(host.attached(), vec![0, 0]);
        assert_eq!(host.cancelled(), vec![0x81]);
        assert_eq!(host.power_requests(), vec![true]);
        assert!(!host.complete_next(TransferOutcome::Sent(0)));
    }
}

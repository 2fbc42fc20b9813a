//! Device filter: which host devices this resource exposes

use crate::usb::HostDevice;
use protocol::codec::HID_CLASS;

/// True for devices declaring the HID class on the device or any interface
pub fn matches(host: &dyn HostDevice) -> bool {
    host.has_class(HID_CLASS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubHostDevice;
    use common::test_utils::{
        create_mock_config_descriptor, create_mock_hid_device_descriptor,
        create_mock_hid_interface,
    };

    #[test]
    fn test_hid_interface_matches() {
        assert!(matches(&StubHostDevice::hid(1, 0x057e, 0x0306)));
    }

    #[test]
    fn test_hid_device_class_matches() {
        let mut device = create_mock_hid_device_descriptor(0x046d, 0xc216);
        device.device_class = HID_CLASS;
        assert!(matches(&StubHostDevice::new(1, device)));
    }

    #[test]
    fn test_non_hid_rejected() {
        let mut interface = create_mock_hid_interface(0, 0, 2);
        interface.interface_class = 0x08; // Mass storage
        let host = StubHostDevice::new(1, create_mock_hid_device_descriptor(0x0781, 0x5567))
            .with_configuration(create_mock_config_descriptor(2))
            .with_interface(interface, Vec::new());
        assert!(!matches(&host));
    }

    #[test]
    fn test_device_without_configuration() {
        let host = StubHostDevice::new(1, create_mock_hid_device_descriptor(0x0781, 0x5567));
        assert!(!matches(&host));
    }
}

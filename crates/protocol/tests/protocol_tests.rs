//! Integration tests for the guest-facing protocol contract
//!
//! Covers opcode numbering, the device-info reply layout and the big-endian
//! descriptor serialization.

use protocol::codec::{
    DESCRIPTOR_TYPE_CONFIG, DESCRIPTOR_TYPE_DEVICE, DESCRIPTOR_TYPE_ENDPOINT,
    DESCRIPTOR_TYPE_INTERFACE,
};
use protocol::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, GuestLayout, InterfaceDescriptor,
    IoctlOpcode, IoctlvOpcode, ProtocolError, ReturnCode, USBV5_VERSION, encode_guest, layout,
};
use proptest::prelude::*;

// ============================================================================
// Opcode Contract Tests
// ============================================================================

mod opcodes {
    use super::*;

    #[test]
    fn test_scalar_opcode_numbers() {
        assert_eq!(IoctlOpcode::GetVersion.value(), 0);
        assert_eq!(IoctlOpcode::GetDeviceChange.value(), 1);
        assert_eq!(IoctlOpcode::Shutdown.value(), 2);
        assert_eq!(IoctlOpcode::GetDeviceParams.value(), 3);
        assert_eq!(IoctlOpcode::AttachFinish.value(), 6);
        assert_eq!(IoctlOpcode::SuspendResume.value(), 16);
        assert_eq!(IoctlOpcode::CancelEndpoint.value(), 17);
    }

    #[test]
    fn test_vectored_opcode_numbers() {
        assert_eq!(IoctlvOpcode::ControlMessage.value(), 18);
        assert_eq!(IoctlvOpcode::InterruptMessage.value(), 19);
    }

    #[test]
    fn test_unknown_scalar_opcodes_are_rejected_by_parser() {
        for value in [4u32, 5, 7, 15, 18, 19, 0xffff_ffff] {
            assert_eq!(
                IoctlOpcode::try_from(value),
                Err(ProtocolError::UnknownOpcode(value))
            );
        }
    }

    #[test]
    fn test_version_constant() {
        assert_eq!(USBV5_VERSION, 0x50001);
    }

    #[test]
    fn test_return_codes() {
        assert_eq!(ReturnCode::Success.as_i32(), 0);
        assert_eq!(ReturnCode::InvalidArgument.as_i32(), -4);
        assert_eq!(protocol::TRANSFER_CANCELED, -7022);
    }
}

// ============================================================================
// Device Info Layout Tests
// ============================================================================

mod device_info_layout {
    use super::*;

    #[test]
    fn test_descriptor_regions_do_not_overlap() {
        let regions = [
            (layout::INFO_HANDLE, 4usize),
            (layout::INFO_MARKER, 4),
            (layout::INFO_DEVICE_DESCRIPTOR, DeviceDescriptor::SIZE),
            (layout::INFO_CONFIG_DESCRIPTOR, ConfigDescriptor::SIZE),
            (layout::INFO_INTERFACE_DESCRIPTOR, InterfaceDescriptor::SIZE),
            (layout::INFO_ENDPOINT_IN, EndpointDescriptor::SIZE),
            (layout::INFO_ENDPOINT_OUT, EndpointDescriptor::SIZE),
        ];

        for pair in regions.windows(2) {
            let (start, len) = pair[0];
            let (next, _) = pair[1];
            assert!(start as usize + len <= next as usize);
        }

        let (last, len) = regions[regions.len() - 1];
        assert!(last as usize + len <= layout::DEVICE_INFO_SIZE as usize);
    }

    #[test]
    fn test_device_info_size() {
        assert_eq!(layout::DEVICE_INFO_SIZE, 96);
    }
}

// ============================================================================
// Descriptor Serialization Tests
// ============================================================================

mod descriptor_serialization {
    use super::*;

    #[test]
    fn test_descriptor_sizes() {
        assert_eq!(DeviceDescriptor::SIZE, 18);
        assert_eq!(ConfigDescriptor::SIZE, 9);
        assert_eq!(InterfaceDescriptor::SIZE, 9);
        assert_eq!(EndpointDescriptor::SIZE, 7);
    }

    #[test]
    fn test_interface_descriptor_byte_order_free() {
        let interface = InterfaceDescriptor {
            length: 9,
            descriptor_type: DESCRIPTOR_TYPE_INTERFACE,
            interface_number: 1,
            alternate_setting: 2,
            num_endpoints: 2,
            interface_class: 3,
            interface_subclass: 1,
            interface_protocol: 1,
            interface_index: 4,
        };
        assert_eq!(
            encode_guest(&interface).unwrap(),
            vec![9, 4, 1, 2, 2, 3, 1, 1, 4]
        );
    }

    #[test]
    fn test_endpoint_max_packet_size_swapped() {
        let endpoint = EndpointDescriptor {
            length: 7,
            descriptor_type: DESCRIPTOR_TYPE_ENDPOINT,
            endpoint_address: 0x01,
            attributes: 0x03,
            max_packet_size: 0x0140,
            interval: 8,
        };
        assert_eq!(
            encode_guest(&endpoint).unwrap(),
            vec![7, 5, 0x01, 0x03, 0x01, 0x40, 8]
        );
    }

    proptest! {
        #[test]
        fn prop_device_descriptor_words_are_big_endian(
            usb_version in any::<u16>(),
            vendor_id in any::<u16>(),
            product_id in any::<u16>(),
            device_version in any::<u16>(),
        ) {
            let descriptor = DeviceDescriptor {
                length: 18,
                descriptor_type: DESCRIPTOR_TYPE_DEVICE,
                usb_version,
                vendor_id,
                product_id,
                device_version,
                ..Default::default()
            };
            let bytes = encode_guest(&descriptor).unwrap();
            prop_assert_eq!(&bytes[2..4], &usb_version.to_be_bytes());
            prop_assert_eq!(&bytes[8..10], &vendor_id.to_be_bytes());
            prop_assert_eq!(&bytes[10..12], &product_id.to_be_bytes());
            prop_assert_eq!(&bytes[12..14], &device_version.to_be_bytes());
        }

        #[test]
        fn prop_config_total_length_is_big_endian(total_length in any::<u16>()) {
            let descriptor = ConfigDescriptor {
                length: 9,
                descriptor_type: DESCRIPTOR_TYPE_CONFIG,
                total_length,
                ..Default::default()
            };
            let bytes = encode_guest(&descriptor).unwrap();
            prop_assert_eq!(&bytes[2..4], &total_length.to_be_bytes());
        }
    }
}

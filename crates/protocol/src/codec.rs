//! USB descriptors and their guest serialization
//!
//! Descriptors are held with native field values, as the host backend
//! reports them. The guest expects every multi-byte field big-endian, at the
//! packed USB field positions, so serialization always goes through
//! [`GuestLayout::write_guest`] and never through a raw memory copy.
//!
//! # Guest Layout
//!
//! ```text
//! Device    (18): len type bcdUSB[2] class sub proto mps0 vid[2] pid[2] bcdDevice[2] iMfr iProd iSer nCfg
//! Config     (9): len type wTotalLength[2] nIf value iCfg attrs maxPower
//! Interface  (9): len type number alt nEp class sub proto iIf
//! Endpoint   (7): len type address attrs wMaxPacketSize[2] interval
//! ```

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ByteOrder};

pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const DESCRIPTOR_TYPE_CONFIG: u8 = 0x02;
pub const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
pub const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

/// Direction bit of `bEndpointAddress`
pub const ENDPOINT_DIR_IN: u8 = 0x80;
/// Transfer type bits of `bmAttributes`
pub const ENDPOINT_TRANSFER_TYPE_MASK: u8 = 0x03;
pub const ENDPOINT_TRANSFER_INTERRUPT: u8 = 0x03;

/// USB class code for Human Interface Devices
pub const HID_CLASS: u8 = 0x03;

/// A descriptor with a fixed big-endian guest representation
pub trait GuestLayout {
    /// Serialized size in bytes
    const SIZE: usize;

    /// Write the guest representation into the start of `buf`
    fn write_guest(&self, buf: &mut [u8]) -> Result<()>;
}

/// Serialize a descriptor into a freshly allocated guest-order buffer
pub fn encode_guest<T: GuestLayout>(descriptor: &T) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; T::SIZE];
    descriptor.write_guest(&mut buf)?;
    Ok(buf)
}

fn guest_region<T: GuestLayout>(buf: &mut [u8]) -> Result<&mut [u8]> {
    let available = buf.len();
    buf.get_mut(..T::SIZE).ok_or(ProtocolError::BufferTooSmall {
        needed: T::SIZE,
        available,
    })
}

/// Standard device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// bcdUSB
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl GuestLayout for DeviceDescriptor {
    const SIZE: usize = 18;

    fn write_guest(&self, buf: &mut [u8]) -> Result<()> {
        let out = guest_region::<Self>(buf)?;
        out[0] = self.length;
        out[1] = self.descriptor_type;
        BigEndian::write_u16(&mut out[2..4], self.usb_version);
        out[4] = self.device_class;
        out[5] = self.device_subclass;
        out[6] = self.device_protocol;
        out[7] = self.max_packet_size0;
        BigEndian::write_u16(&mut out[8..10], self.vendor_id);
        BigEndian::write_u16(&mut out[10..12], self.product_id);
        BigEndian::write_u16(&mut out[12..14], self.device_version);
        out[14] = self.manufacturer_index;
        out[15] = self.product_index;
        out[16] = self.serial_number_index;
        out[17] = self.num_configurations;
        Ok(())
    }
}

/// Standard configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    /// In 2 mA units
    pub max_power: u8,
}

impl GuestLayout for ConfigDescriptor {
    const SIZE: usize = 9;

    fn write_guest(&self, buf: &mut [u8]) -> Result<()> {
        let out = guest_region::<Self>(buf)?;
        out[0] = self.length;
        out[1] = self.descriptor_type;
        BigEndian::write_u16(&mut out[2..4], self.total_length);
        out[4] = self.num_interfaces;
        out[5] = self.configuration_value;
        out[6] = self.configuration_index;
        out[7] = self.attributes;
        out[8] = self.max_power;
        Ok(())
    }
}

/// Standard interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_index: u8,
}

impl GuestLayout for InterfaceDescriptor {
    const SIZE: usize = 9;

    fn write_guest(&self, buf: &mut [u8]) -> Result<()> {
        let out = guest_region::<Self>(buf)?;
        out.copy_from_slice(&[
            self.length,
            self.descriptor_type,
            self.interface_number,
            self.alternate_setting,
            self.num_endpoints,
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
            self.interface_index,
        ]);
        Ok(())
    }
}

/// Standard endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Device-to-host endpoint
    pub fn is_in(&self) -> bool {
        self.endpoint_address & ENDPOINT_DIR_IN != 0
    }

    pub fn is_interrupt(&self) -> bool {
        self.attributes & ENDPOINT_TRANSFER_TYPE_MASK == ENDPOINT_TRANSFER_INTERRUPT
    }
}

impl GuestLayout for EndpointDescriptor {
    const SIZE: usize = 7;

    fn write_guest(&self, buf: &mut [u8]) -> Result<()> {
        let out = guest_region::<Self>(buf)?;
        out[0] = self.length;
        out[1] = self.descriptor_type;
        out[2] = self.endpoint_address;
        out[3] = self.attributes;
        BigEndian::write_u16(&mut out[4..6], self.max_packet_size);
        out[6] = self.interval;
        Ok(())
    }
}

//! Test utilities for rust-hidv5
//!
//! Provides instrumented guest memory, descriptor fixtures and helper
//! functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::GuestMemory;
//! use common::test_utils::{CountingMemory, create_mock_hid_device_descriptor};
//!
//! let memory = CountingMemory::new(0x100);
//! memory.write_u32(0, 1).unwrap();
//! assert_eq!(memory.writes(), 1);
//!
//! let device = create_mock_hid_device_descriptor(0x057e, 0x0306);
//! assert_eq!(device.vendor_id, 0x057e);
//! ```

use crate::error::MemoryError;
use crate::memory::{GuestMemory, GuestRam};
use parking_lot::Mutex;
use protocol::codec::{
    DESCRIPTOR_TYPE_CONFIG, DESCRIPTOR_TYPE_DEVICE, DESCRIPTOR_TYPE_ENDPOINT,
    DESCRIPTOR_TYPE_INTERFACE, HID_CLASS,
};
use protocol::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, RequestId,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Guest RAM that counts every access
///
/// Used to prove that a handler rejected a request without touching guest
/// memory at all.
pub struct CountingMemory {
    ram: GuestRam,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingMemory {
    pub fn new(size: usize) -> Self {
        Self {
            ram: GuestRam::new(size),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of read calls (including typed reads)
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write and fill calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Forget all previous accesses
    pub fn reset_counts(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Read without being counted, for assertions
    pub fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        self.ram
            .read_vec(address, len)
            .unwrap_or_else(|e| panic!("peek outside test memory: {}", e))
    }

    /// Write without being counted, for test setup
    pub fn poke(&self, address: u32, data: &[u8]) {
        self.ram
            .write_bytes(address, data)
            .unwrap_or_else(|e| panic!("poke outside test memory: {}", e));
    }

    /// Big-endian u32 write without being counted
    pub fn poke_u32(&self, address: u32, value: u32) {
        self.poke(address, &value.to_be_bytes());
    }
}

impl GuestMemory for CountingMemory {
    fn read_bytes(&self, address: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.ram.read_bytes(address, buf)
    }

    fn write_bytes(&self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.ram.write_bytes(address, data)
    }

    fn fill(&self, address: u32, value: u8, len: u32) -> Result<(), MemoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.ram.fill(address, value, len)
    }
}

/// Guest memory whose addresses wrap modulo its size
///
/// Mirrors a guest address space where offsets added to a buffer near the
/// top of the 32-bit range roll over to the bottom. The size must divide
/// 2^32 for the mapping to stay contiguous across the rollover.
pub struct WrappingMemory {
    bytes: Mutex<Vec<u8>>,
}

impl WrappingMemory {
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "wrapping memory size must be a power of two");
        Self {
            bytes: Mutex::new(vec![0u8; size]),
        }
    }

    fn index(address: u32, offset: usize, size: usize) -> usize {
        address.wrapping_add(offset as u32) as usize % size
    }

    /// Read for assertions
    pub fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.copy_out(address, &mut buf);
        buf
    }

    /// Write for test setup
    pub fn poke(&self, address: u32, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        let size = bytes.len();
        for (i, b) in data.iter().enumerate() {
            bytes[Self::index(address, i, size)] = *b;
        }
    }

    /// Big-endian u32 write for test setup
    pub fn poke_u32(&self, address: u32, value: u32) {
        self.poke(address, &value.to_be_bytes());
    }

    fn copy_out(&self, address: u32, buf: &mut [u8]) {
        let bytes = self.bytes.lock();
        let size = bytes.len();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = bytes[Self::index(address, i, size)];
        }
    }
}

impl GuestMemory for WrappingMemory {
    fn read_bytes(&self, address: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.copy_out(address, buf);
        Ok(())
    }

    fn write_bytes(&self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.poke(address, data);
        Ok(())
    }
}

/// Create a mock device descriptor for a composite HID device
pub fn create_mock_hid_device_descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        length: 18,
        descriptor_type: DESCRIPTOR_TYPE_DEVICE,
        usb_version: 0x0200,
        device_class: 0x00, // Class defined per interface
        device_subclass: 0x00,
        device_protocol: 0x00,
        max_packet_size0: 64,
        vendor_id,
        product_id,
        device_version: 0x0100,
        manufacturer_index: 1,
        product_index: 2,
        serial_number_index: 3,
        num_configurations: 1,
    }
}

/// Create a mock configuration descriptor
///
/// `total_length` follows from one interface with `num_endpoints` endpoints
/// plus a 9-byte HID class descriptor.
pub fn create_mock_config_descriptor(num_endpoints: u8) -> ConfigDescriptor {
    ConfigDescriptor {
        length: 9,
        descriptor_type: DESCRIPTOR_TYPE_CONFIG,
        total_length: 9 + 9 + 9 + 7 * u16::from(num_endpoints),
        num_interfaces: 1,
        configuration_value: 1,
        configuration_index: 0,
        attributes: 0xa0, // Bus-powered, remote wakeup
        max_power: 50,    // 100mA
    }
}

/// Create a mock HID interface descriptor
pub fn create_mock_hid_interface(
    interface_number: u8,
    alternate_setting: u8,
    num_endpoints: u8,
) -> InterfaceDescriptor {
    InterfaceDescriptor {
        length: 9,
        descriptor_type: DESCRIPTOR_TYPE_INTERFACE,
        interface_number,
        alternate_setting,
        num_endpoints,
        interface_class: HID_CLASS,
        interface_subclass: 0x00,
        interface_protocol: 0x00,
        interface_index: 0,
    }
}

/// Create a mock interrupt endpoint (direction taken from `address`)
pub fn create_mock_interrupt_endpoint(address: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        length: 7,
        descriptor_type: DESCRIPTOR_TYPE_ENDPOINT,
        endpoint_address: address,
        attributes: 0x03,
        max_packet_size: 0x0040,
        interval: 1,
    }
}

/// Create a mock bulk endpoint
pub fn create_mock_bulk_endpoint(address: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        length: 7,
        descriptor_type: DESCRIPTOR_TYPE_ENDPOINT,
        endpoint_address: address,
        attributes: 0x02,
        max_packet_size: 0x0200,
        interval: 0,
    }
}

/// Create a mock RequestId for testing
pub fn create_mock_request_id(id: u64) -> RequestId {
    RequestId(id)
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_memory_rolls_over() {
        let memory = WrappingMemory::new(0x100);
        memory.write_u32(0xFFFF_FFFE, 0x0102_0304).unwrap();
        assert_eq!(memory.peek(0xFE, 2), vec![1, 2]);
        assert_eq!(memory.peek(0, 2), vec![3, 4]);
        assert_eq!(memory.read_u32(0xFFFF_FFFE).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_counting_memory_counts_typed_access() {
        let memory = CountingMemory::new(16);
        memory.write_u32(0, 5).unwrap();
        assert_eq!(memory.read_u32(0).unwrap(), 5);
        memory.fill(0, 0, 16).unwrap();

        assert_eq!(memory.reads(), 1);
        assert_eq!(memory.writes(), 2);

        memory.reset_counts();
        memory.poke_u32(4, 9);
        assert_eq!(memory.peek(4, 4), vec![0, 0, 0, 9]);
        assert_eq!(memory.reads(), 0);
        assert_eq!(memory.writes(), 0);
    }

    #[test]
    fn test_mock_config_total_length() {
        let config = create_mock_config_descriptor(2);
        assert_eq!(config.total_length, 41);
    }

    #[test]
    fn test_mock_endpoints() {
        assert!(create_mock_interrupt_endpoint(0x81).is_in());
        assert!(create_mock_interrupt_endpoint(0x81).is_interrupt());
        assert!(!create_mock_interrupt_endpoint(0x02).is_in());
        assert!(!create_mock_bulk_endpoint(0x82).is_interrupt());
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}

//! Virtual device registry
//!
//! Maps guest-visible handles to host devices. One lock guards every record
//! including its endpoint cache. Lookups hand out snapshots so no host call
//! ever runs with the lock held.

use crate::usb::{HostDevice, HostId};
use parking_lot::Mutex;
use protocol::DeviceHandle;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Interrupt endpoints learned from the last device-info query
///
/// Both start at 0 until the guest asks for the device parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointCache {
    pub interrupt_in: u8,
    pub interrupt_out: u8,
}

/// One interface of a host device, as seen by the guest
#[derive(Clone)]
pub struct VirtualDevice {
    pub handle: DeviceHandle,
    pub host: Arc<dyn HostDevice>,
    pub interface_number: u8,
    pub alt_setting_count: u8,
    /// Guest-visible slot number
    pub number: u16,
    pub endpoints: EndpointCache,
}

impl fmt::Debug for VirtualDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDevice")
            .field("handle", &self.handle)
            .field("host", &self.host.id())
            .field("interface_number", &self.interface_number)
            .field("alt_setting_count", &self.alt_setting_count)
            .field("number", &self.number)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

struct RegistryInner {
    devices: BTreeMap<DeviceHandle, VirtualDevice>,
    next_handle: u32,
    next_number: u16,
}

/// Registry of attached virtual devices
pub struct DeviceRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                devices: BTreeMap::new(),
                next_handle: 1,
                next_number: 0,
            }),
        }
    }

    /// Register one interface of `host` and return its new handle
    pub fn insert(
        &self,
        host: Arc<dyn HostDevice>,
        interface_number: u8,
        alt_setting_count: u8,
    ) -> DeviceHandle {
        let mut inner = self.inner.lock();

        // Handle 0 never names a device
        let handle = DeviceHandle(inner.next_handle);
        inner.next_handle = inner.next_handle.wrapping_add(1).max(1);
        let number = inner.next_number;
        inner.next_number = inner.next_number.wrapping_add(1);

        inner.devices.insert(
            handle,
            VirtualDevice {
                handle,
                host,
                interface_number,
                alt_setting_count,
                number,
                endpoints: EndpointCache::default(),
            },
        );
        handle
    }

    /// Snapshot of the device behind `handle`
    pub fn lookup(&self, handle: DeviceHandle) -> Option<VirtualDevice> {
        self.inner.lock().devices.get(&handle).cloned()
    }

    /// Apply `update` to the endpoint cache of `handle`
    ///
    /// Returns false if the device has been removed in the meantime.
    pub fn update_endpoints(
        &self,
        handle: DeviceHandle,
        update: impl FnOnce(&mut EndpointCache),
    ) -> bool {
        match self.inner.lock().devices.get_mut(&handle) {
            Some(device) => {
                update(&mut device.endpoints);
                true
            }
            None => false,
        }
    }

    /// Remove every virtual device backed by `host`
    pub fn remove_host(&self, host: HostId) -> Vec<VirtualDevice> {
        let mut inner = self.inner.lock();
        let handles: Vec<DeviceHandle> = inner
            .devices
            .values()
            .filter(|device| device.host.id() == host)
            .map(|device| device.handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| inner.devices.remove(&handle))
            .collect()
    }

    /// Snapshot of all devices, ordered by handle
    pub fn devices(&self) -> Vec<VirtualDevice> {
        self.inner.lock().devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubHostDevice;

    fn stub(id: u64) -> Arc<dyn HostDevice> {
        Arc::new(StubHostDevice::hid(id, 0x057e, 0x0306))
    }

    #[test]
    fn test_handles_are_unique_and_nonzero() {
        let registry = DeviceRegistry::new();
        let host = stub(1);
        let first = registry.insert(host.clone(), 0, 1);
        let second = registry.insert(host, 1, 2);

        assert_ne!(first, second);
        assert_ne!(first, DeviceHandle(0));
        assert_eq!(registry.len(), 2);

        let device = registry.lookup(second).unwrap();
        assert_eq!(device.interface_number, 1);
        assert_eq!(device.alt_setting_count, 2);
        assert_eq!(device.number, 1);
        assert_eq!(device.endpoints, EndpointCache::default());
    }

    #[test]
    fn test_endpoint_update_is_keyed_by_handle() {
        let registry = DeviceRegistry::new();
        let host = stub(1);
        let first = registry.insert(host.clone(), 0, 1);
        let second = registry.insert(host, 1, 1);

        assert!(registry.update_endpoints(second, |cache| cache.interrupt_in = 0x82));

        assert_eq!(registry.lookup(first).unwrap().endpoints.interrupt_in, 0);
        assert_eq!(registry.lookup(second).unwrap().endpoints.interrupt_in, 0x82);
    }

    #[test]
    fn test_snapshot_does_not_track_updates() {
        let registry = DeviceRegistry::new();
        let handle = registry.insert(stub(1), 0, 1);
        let snapshot = registry.lookup(handle).unwrap();

        registry.update_endpoints(handle, |cache| cache.interrupt_out = 0x01);
        assert_eq!(snapshot.endpoints.interrupt_out, 0);
    }

    #[test]
    fn test_remove_host() {
        let registry = DeviceRegistry::new();
        let a = stub(1);
        let b = stub(2);
        let a0 = registry.insert(a.clone(), 0, 1);
        let b0 = registry.insert(b, 0, 1);
        let a1 = registry.insert(a, 1, 1);

        let removed = registry.remove_host(HostId(1));
        assert_eq!(removed.len(), 2);
        assert!(registry.lookup(a0).is_none());
        assert!(registry.lookup(a1).is_none());
        assert!(registry.lookup(b0).is_some());

        // A detached device's cache can no longer be written
        assert!(!registry.update_endpoints(a0, |cache| cache.interrupt_in = 0x81));
    }

    #[test]
    fn test_devices_ordered_by_handle() {
        let registry = DeviceRegistry::new();
        let host = stub(1);
        let handles: Vec<_> = (0..3).map(|i| registry.insert(host.clone(), i, 1)).collect();
        let listed: Vec<_> = registry.devices().iter().map(|d| d.handle).collect();
        assert_eq!(listed, handles);
    }
}

//! USB device manager
//!
//! Enumerates host devices through libusb and reports arrivals and removals
//! between scans. Devices are kept alive here for as long as they are
//! plugged in.

use crate::usb::device::RusbHostDevice;
use crate::usb::host::HostId;
use rusb::{Context, Device, UsbContext};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Devices that appeared or vanished since the previous scan
#[derive(Default)]
pub struct DeviceChanges {
    pub arrived: Vec<Arc<RusbHostDevice>>,
    pub left: Vec<HostId>,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.left.is_empty()
    }
}

/// USB device manager
pub struct DeviceManager {
    /// USB context for device operations
    context: Context,
    /// Devices seen by the last scan
    devices: HashMap<HostId, Arc<RusbHostDevice>>,
    /// Device filters (VID:PID patterns)
    allowed_filters: Vec<String>,
    /// Timeout applied to every transfer
    transfer_timeout: Duration,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new(
        allowed_filters: Vec<String>,
        transfer_timeout: Duration,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            devices: HashMap::new(),
            allowed_filters,
            transfer_timeout,
        })
    }

    /// Enumerate connected devices and diff against the previous scan
    pub fn scan(&mut self) -> Result<DeviceChanges, rusb::Error> {
        let mut changes = DeviceChanges::default();
        let mut present = HashSet::new();

        for device in self.context.devices()?.iter() {
            let id = HostId::from_bus_address(device.bus_number(), device.address());
            present.insert(id);

            if self.devices.contains_key(&id) || !self.is_device_allowed(&device) {
                continue;
            }

            match RusbHostDevice::new(device, self.transfer_timeout) {
                Ok(host) => {
                    let host = Arc::new(host);
                    debug!("Device {} arrived", id);
                    self.devices.insert(id, host.clone());
                    changes.arrived.push(host);
                }
                Err(e) => warn!("Failed to read descriptors of device {}: {}", id, e),
            }
        }

        let gone: Vec<HostId> = self
            .devices
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in gone {
            debug!("Device {} left", id);
            self.devices.remove(&id);
            changes.left.push(id);
        }

        if !changes.is_empty() {
            info!(
                "USB scan: {} arrived, {} left, {} present",
                changes.arrived.len(),
                changes.left.len(),
                self.devices.len()
            );
        }
        Ok(changes)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Arc<RusbHostDevice>> {
        self.devices.values()
    }

    /// Check if a device is allowed by the configured filters
    fn is_device_allowed(&self, device: &Device<Context>) -> bool {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => return false,
        };

        Self::check_filter(desc.vendor_id(), desc.product_id(), &self.allowed_filters)
    }

    /// Check if a VID/PID pair is allowed by the filters
    pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
        // If no filters are defined, all devices are allowed
        if filters.is_empty() {
            return true;
        }

        filters.iter().any(|filter| {
            // Filter format: "0xVID:0xPID" or "0xVID:*", validated by the config loader
            let Some((vid_part, pid_part)) = filter.split_once(':') else {
                return false;
            };
            matches_id(vid_part, vid) && matches_id(pid_part, pid)
        })
    }
}

fn matches_id(pattern: &str, id: u16) -> bool {
    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    pattern == "*" || u16::from_str_radix(hex, 16).is_ok_and(|v| v == id)
}

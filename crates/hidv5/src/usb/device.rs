//! rusb-backed host device
//!
//! Wraps a `rusb::Device` with its descriptors rebuilt into guest wire
//! structures at enumeration time. The device is opened lazily on the first
//! [`HostDevice::attach`]; from then on a dedicated worker thread runs its
//! transfers.

use crate::error::HostError;
use crate::usb::host::{HostDevice, HostId, Rejected};
use crate::usb::message::TransferMessage;
use crate::usb::transfers::{execute_transfer, map_rusb_error};
use crate::usb::worker::{TransferQueue, spawn_transfer_worker};
use parking_lot::Mutex;
use protocol::codec::{
    DESCRIPTOR_TYPE_CONFIG, DESCRIPTOR_TYPE_DEVICE, DESCRIPTOR_TYPE_ENDPOINT,
    DESCRIPTOR_TYPE_INTERFACE,
};
use protocol::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, GuestLayout, InterfaceDescriptor,
};
use rusb::{Context, Device, DeviceHandle, SyncType, TransferType, UsageType, Version};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

struct InterfaceTree {
    descriptor: InterfaceDescriptor,
    endpoints: Vec<EndpointDescriptor>,
}

struct ConfigurationTree {
    descriptor: ConfigDescriptor,
    interfaces: Vec<InterfaceTree>,
}

#[derive(Default)]
struct OpenState {
    handle: Option<Arc<DeviceHandle<Context>>>,
    /// Interfaces claimed by us
    claimed_interfaces: Vec<u8>,
    worker: Option<JoinHandle<()>>,
}

/// USB device on the host, driven through libusb
pub struct RusbHostDevice {
    device: Device<Context>,
    id: HostId,
    descriptor: DeviceDescriptor,
    configurations: Vec<ConfigurationTree>,
    string_indices: (Option<u8>, Option<u8>),
    timeout: Duration,
    queue: Arc<TransferQueue>,
    state: Mutex<OpenState>,
}

impl RusbHostDevice {
    /// Wrap a device and read all of its descriptors
    ///
    /// Configurations that fail to parse are skipped with a warning.
    pub fn new(device: Device<Context>, timeout: Duration) -> Result<Self, rusb::Error> {
        let raw = device.device_descriptor()?;
        let id = HostId::from_bus_address(device.bus_number(), device.address());

        let configurations = (0..raw.num_configurations())
            .filter_map(|index| match device.config_descriptor(index) {
                Ok(config) => Some(convert_configuration(&config)),
                Err(e) => {
                    warn!("Device {}: cannot read configuration {}: {}", id, index, e);
                    None
                }
            })
            .collect();

        Ok(Self {
            id,
            descriptor: convert_device_descriptor(&raw),
            configurations,
            string_indices: (raw.manufacturer_string_index(), raw.product_string_index()),
            timeout,
            queue: Arc::new(TransferQueue::new()),
            state: Mutex::new(OpenState::default()),
            device,
        })
    }

    pub fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    pub fn device_address(&self) -> u8 {
        self.device.address()
    }

    /// Manufacturer and product strings, when the device can be opened
    pub fn read_strings(&self) -> (Option<String>, Option<String>) {
        let read = |handle: &DeviceHandle<Context>, index: Option<u8>| {
            index.and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        };

        let state = self.state.lock();
        let temporary;
        let handle = match state.handle.as_deref() {
            Some(handle) => handle,
            None => match self.device.open() {
                Ok(handle) => {
                    temporary = handle;
                    &temporary
                }
                Err(e) => {
                    debug!("Device {}: cannot open to read strings: {}", self.id, e);
                    return (None, None);
                }
            },
        };

        (
            read(handle, self.string_indices.0),
            read(handle, self.string_indices.1),
        )
    }

    fn open(&self, state: &mut OpenState) -> Result<Arc<DeviceHandle<Context>>, HostError> {
        if let Some(handle) = &state.handle {
            return Ok(handle.clone());
        }

        let handle = Arc::new(self.device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", self.id, e);
            map_rusb_error(e)
        })?);

        let worker_handle = handle.clone();
        let timeout = self.timeout;
        let worker = spawn_transfer_worker(
            format!("usb-{}", self.id),
            self.queue.clone(),
            move |request, payload| execute_transfer(&worker_handle, request, payload, timeout),
        )
        .map_err(|e| HostError::Other(format!("Failed to spawn transfer worker: {}", e)))?;

        debug!("Opened device {}", self.id);
        state.handle = Some(handle.clone());
        state.worker = Some(worker);
        Ok(handle)
    }

    /// Stop the worker and hand the device back to the kernel
    fn close(&self) {
        self.queue.shutdown();

        let mut state = self.state.lock();
        if let Some(worker) = state.worker.take()
            && worker.join().is_err()
        {
            warn!("Transfer worker for device {} panicked", self.id);
        }

        if let Some(handle) = state.handle.take() {
            for interface in state.claimed_interfaces.drain(..) {
                if let Err(e) = handle.release_interface(interface) {
                    warn!("Failed to release interface {}: {}", interface, e);
                }

                // Reattach kernel driver to restore device to kernel control
                if let Err(e) = handle.attach_kernel_driver(interface) {
                    debug!(
                        "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                        interface, e
                    );
                }
            }
            debug!("Closed device {}", self.id);
        }
    }

    fn configuration(&self, config: u8) -> Option<&ConfigurationTree> {
        self.configurations.get(usize::from(config))
    }
}

impl Drop for RusbHostDevice {
    fn drop(&mut self) {
        self.close();
    }
}

impl HostDevice for RusbHostDevice {
    fn id(&self) -> HostId {
        self.id
    }

    fn device_descriptor(&self) -> DeviceDescriptor {
        self.descriptor
    }

    fn configurations(&self) -> Vec<ConfigDescriptor> {
        self.configurations.iter().map(|c| c.descriptor).collect()
    }

    fn interfaces(&self, config: u8) -> Vec<InterfaceDescriptor> {
        self.configuration(config)
            .map(|c| c.interfaces.iter().map(|i| i.descriptor).collect())
            .unwrap_or_default()
    }

    fn endpoints(&self, config: u8, interface: u8, alt_setting: u8) -> Vec<EndpointDescriptor> {
        self.configuration(config)
            .and_then(|c| {
                c.interfaces.iter().find(|i| {
                    i.descriptor.interface_number == interface
                        && i.descriptor.alternate_setting == alt_setting
                })
            })
            .map(|i| i.endpoints.clone())
            .unwrap_or_default()
    }

    fn attach(&self, interface: u8) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.claimed_interfaces.contains(&interface) {
            return Ok(());
        }

        let handle = self.open(&mut state)?;

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on device {}",
                    interface, self.id
                );
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    // Claiming will most likely fail next
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => {
                debug!("No kernel driver active on interface {}", interface);
            }
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }

        handle.claim_interface(interface).map_err(|e| {
            warn!("Failed to claim interface {}: {}", interface, e);
            map_rusb_error(e)
        })?;

        info!("Claimed interface {} on device {}", interface, self.id);
        state.claimed_interfaces.push(interface);
        Ok(())
    }

    fn submit_transfer(&self, message: TransferMessage) -> Result<(), Rejected> {
        if self.state.lock().handle.is_none() {
            return Err(Rejected {
                message,
                error: HostError::NotOpen,
            });
        }

        self.queue.push(message).map_err(|message| Rejected {
            message,
            error: HostError::ShuttingDown,
        })
    }

    fn cancel_transfers(&self, endpoint: u8) {
        let cancelled = self.queue.cancel_endpoint(endpoint);
        debug!(
            "Cancelled {} transfers on endpoint {:#04x} of device {}",
            cancelled, endpoint, self.id
        );
    }

    fn suspend_resume(&self, resume: bool) -> Result<(), HostError> {
        // libusb exposes no portable power management
        debug!(
            "Ignoring {} request for device {}",
            if resume { "resume" } else { "suspend" },
            self.id
        );
        Ok(())
    }
}

/// Encode a libusb version as a USB bcd word (e.g. 2.0.0 -> 0x0200)
fn version_to_bcd(version: Version) -> u16 {
    let major = u16::from(version.major());
    (major / 10) << 12
        | (major % 10) << 8
        | u16::from(version.minor() & 0x0f) << 4
        | u16::from(version.sub_minor() & 0x0f)
}

fn convert_device_descriptor(raw: &rusb::DeviceDescriptor) -> DeviceDescriptor {
    DeviceDescriptor {
        length: DeviceDescriptor::SIZE as u8,
        descriptor_type: DESCRIPTOR_TYPE_DEVICE,
        usb_version: version_to_bcd(raw.usb_version()),
        device_class: raw.class_code(),
        device_subclass: raw.sub_class_code(),
        device_protocol: raw.protocol_code(),
        max_packet_size0: raw.max_packet_size(),
        vendor_id: raw.vendor_id(),
        product_id: raw.product_id(),
        device_version: version_to_bcd(raw.device_version()),
        manufacturer_index: raw.manufacturer_string_index().unwrap_or(0),
        product_index: raw.product_string_index().unwrap_or(0),
        serial_number_index: raw.serial_number_string_index().unwrap_or(0),
        num_configurations: raw.num_configurations(),
    }
}

fn convert_interface(raw: &rusb::InterfaceDescriptor<'_>) -> InterfaceDescriptor {
    InterfaceDescriptor {
        length: InterfaceDescriptor::SIZE as u8,
        descriptor_type: DESCRIPTOR_TYPE_INTERFACE,
        interface_number: raw.interface_number(),
        alternate_setting: raw.setting_number(),
        num_endpoints: raw.num_endpoints(),
        interface_class: raw.class_code(),
        interface_subclass: raw.sub_class_code(),
        interface_protocol: raw.protocol_code(),
        interface_index: raw.description_string_index().unwrap_or(0),
    }
}

fn endpoint_attributes(transfer: TransferType, sync: SyncType, usage: UsageType) -> u8 {
    let transfer = match transfer {
        TransferType::Control => 0,
        TransferType::Isochronous => 1,
        TransferType::Bulk => 2,
        TransferType::Interrupt => 3,
    };
    let sync = match sync {
        SyncType::NoSync => 0,
        SyncType::Asynchronous => 1,
        SyncType::Adaptive => 2,
        SyncType::Synchronous => 3,
    };
    let usage = match usage {
        UsageType::Data => 0,
        UsageType::Feedback => 1,
        UsageType::FeedbackData => 2,
        UsageType::Reserved => 3,
    };
    transfer | sync << 2 | usage << 4
}

fn convert_endpoint(raw: &rusb::EndpointDescriptor<'_>) -> EndpointDescriptor {
    EndpointDescriptor {
        length: EndpointDescriptor::SIZE as u8,
        descriptor_type: DESCRIPTOR_TYPE_ENDPOINT,
        endpoint_address: raw.address(),
        attributes: endpoint_attributes(raw.transfer_type(), raw.sync_type(), raw.usage_type()),
        max_packet_size: raw.max_packet_size(),
        interval: raw.interval(),
    }
}

fn convert_configuration(raw: &rusb::ConfigDescriptor) -> ConfigurationTree {
    let mut total_length = ConfigDescriptor::SIZE + raw.extra().len();
    let mut interfaces = Vec::new();

    for interface in raw.interfaces() {
        for setting in interface.descriptors() {
            let endpoints: Vec<_> = setting
                .endpoint_descriptors()
                .map(|endpoint| convert_endpoint(&endpoint))
                .collect();
            // Class-specific endpoint descriptors are not counted
            total_length += InterfaceDescriptor::SIZE
                + setting.extra().len()
                + EndpointDescriptor::SIZE * endpoints.len();
            interfaces.push(InterfaceTree {
                descriptor: convert_interface(&setting),
                endpoints,
            });
        }
    }

    let mut attributes = 0x80;
    if raw.self_powered() {
        attributes |= 0x40;
    }
    if raw.remote_wakeup() {
        attributes |= 0x20;
    }

    ConfigurationTree {
        descriptor: ConfigDescriptor {
            length: ConfigDescriptor::SIZE as u8,
            descriptor_type: DESCRIPTOR_TYPE_CONFIG,
            total_length: u16::try_from(total_length).unwrap_or(u16::MAX),
            num_interfaces: raw.num_interfaces(),
            configuration_value: raw.number(),
            configuration_index: raw.description_string_index().unwrap_or(0),
            attributes,
            // Stored in units of 2mA
            max_power: u8::try_from(raw.max_power() / 2).unwrap_or(u8::MAX),
        },
        interfaces,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_to_bcd() {
        assert_eq!(version_to_bcd(Version(2, 0, 0)), 0x0200);
        assert_eq!(version_to_bcd(Version(1, 1, 0)), 0x0110);
        assert_eq!(version_to_bcd(Version(3, 2, 0)), 0x0320);
        assert_eq!(version_to_bcd(Version(10, 0, 1)), 0x1001);
    }

    #[test]
    fn test_endpoint_attributes() {
        assert_eq!(
            endpoint_attributes(TransferType::Interrupt, SyncType::NoSync, UsageType::Data),
            0x03
        );
        assert_eq!(
            endpoint_attributes(TransferType::Bulk, SyncType::NoSync, UsageType::Data),
            0x02
        );
        assert_eq!(
            endpoint_attributes(
                TransferType::Isochronous,
                SyncType::Adaptive,
                UsageType::Feedback
            ),
            0x19
        );
    }
}

//! The HID v5 resource
//!
//! [`HidV5`] is the entry point for guest requests. Scalar requests are
//! answered immediately (except the device-change hook); transfers are
//! answered later through the reply channel.
//!
//! Every device-scoped request starts with a device handle (u32) at the
//! start of its input buffer. The registry lock is only held while that
//! handle is resolved.

use crate::cancel::cancel_endpoint;
use crate::describe::describe;
use crate::device_change::DeviceChangeNotifier;
use crate::error::RequestError;
use crate::filter;
use crate::registry::{DeviceRegistry, VirtualDevice};
use crate::submit::submit;
use crate::usb::{HostDevice, HostId};
use common::{GuestMemory, ReplySender};
use protocol::{
    DeviceHandle, IoctlOpcode, IoctlRequest, IoctlvOpcode, IoctlvRequest, IpcResult, ReturnCode,
    USBV5_VERSION, layout,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Guest-facing USB HID v5 resource
pub struct HidV5 {
    memory: Arc<dyn GuestMemory>,
    registry: Arc<DeviceRegistry>,
    replies: ReplySender,
    device_change: DeviceChangeNotifier,
}

impl HidV5 {
    pub fn new(memory: Arc<dyn GuestMemory>, replies: ReplySender) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let device_change =
            DeviceChangeNotifier::new(memory.clone(), registry.clone(), replies.clone());
        Self {
            memory,
            registry,
            replies,
            device_change,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Handle a scalar request
    pub fn handle_ioctl(&self, request: &IoctlRequest) -> IpcResult {
        let Ok(opcode) = IoctlOpcode::try_from(request.opcode) else {
            error!("Unknown USBv5 ioctl {:#x}", request.opcode);
            return IpcResult::success();
        };
        debug!("{:?} ({:?})", opcode, request.id);

        match opcode {
            IoctlOpcode::GetVersion => self.get_version(request).into(),
            IoctlOpcode::GetDeviceChange => match self.device_change.get_device_change(request) {
                Ok(result) => result,
                Err(e) => rejected(opcode, e),
            },
            IoctlOpcode::Shutdown => match self.device_change.shutdown(request) {
                Ok(()) => IpcResult::success(),
                Err(e) => rejected(opcode, e),
            },
            IoctlOpcode::GetDeviceParams => self.with_device(opcode, request, |device| {
                describe(self.memory.as_ref(), &self.registry, device, request)
            }),
            IoctlOpcode::AttachFinish => IpcResult::success(),
            IoctlOpcode::SuspendResume => self.with_device(opcode, request, |device| {
                let flag = self
                    .memory
                    .read_u32(request.buffer_in.wrapping_add(layout::RESUME_FLAG))?;
                if let Err(e) = device.host.suspend_resume(flag != 0) {
                    warn!("Suspend/resume of {:?} failed: {}", device.handle, e);
                }
                Ok(())
            }),
            IoctlOpcode::CancelEndpoint => self.with_device(opcode, request, |device| {
                cancel_endpoint(self.memory.as_ref(), device, request)
            }),
        }
    }

    /// Handle a vectored request
    ///
    /// Requests that do not carry exactly two vectors are refused before any
    /// guest memory is read.
    pub fn handle_ioctlv(&self, request: &IoctlvRequest) -> IpcResult {
        if IoctlvOpcode::try_from(request.opcode).is_err() {
            warn!("Unknown USBv5 ioctlv {:#x}", request.opcode);
            return IpcResult::invalid();
        }

        let count = request.vector_count();
        if count != 2 {
            warn!(
                "Refusing ioctlv {:#x} with {} vectors ({:?})",
                request.opcode, count, request.id
            );
            return IpcResult::invalid();
        }

        let device = match request
            .vector(0)
            .ok_or(RequestError::VectorCount(count))
            .and_then(|params| self.resolve(params.address))
        {
            Ok(device) => device,
            Err(e) => {
                warn!("Refusing ioctlv {:#x}: {}", request.opcode, e);
                return IpcResult::invalid();
            }
        };

        if let Err(e) = device.host.attach(device.interface_number) {
            warn!(
                "Failed to attach interface {} of {:?}: {}",
                device.interface_number, device.handle, e
            );
        }

        match submit(&self.memory, &self.replies, &device, request) {
            Ok(()) => IpcResult::Deferred,
            Err(e) => {
                warn!("Transfer for {:?} not submitted: {}", device.handle, e);
                IpcResult::invalid()
            }
        }
    }

    /// Expose a host device to the guest
    ///
    /// Registers one virtual device per interface of the first
    /// configuration. Devices that are not HID are ignored.
    pub fn attach_host_device(&self, host: Arc<dyn HostDevice>) -> Vec<DeviceHandle> {
        if !filter::matches(host.as_ref()) {
            debug!("Ignoring non-HID device {}", host.id());
            return Vec::new();
        }

        let mut alt_settings: BTreeMap<u8, u8> = BTreeMap::new();
        for interface in host.interfaces(0) {
            let count = alt_settings.entry(interface.interface_number).or_default();
            *count = count.saturating_add(1);
        }

        let handles: Vec<DeviceHandle> = alt_settings
            .into_iter()
            .map(|(interface, count)| self.registry.insert(host.clone(), interface, count))
            .collect();

        if !handles.is_empty() {
            let descriptor = host.device_descriptor();
            info!(
                "Attached HID device {} ({:04x}:{:04x}) as {:?}",
                host.id(),
                descriptor.vendor_id,
                descriptor.product_id,
                handles
            );
            self.device_change.notify();
        }
        handles
    }

    /// Withdraw every virtual device backed by `host`
    ///
    /// Transfers still queued on their endpoints are cancelled.
    pub fn detach_host_device(&self, host: HostId) -> usize {
        let removed = self.registry.remove_host(host);
        if removed.is_empty() {
            return 0;
        }

        for device in &removed {
            cancel_all(device);
        }
        info!("Detached host device {} ({} interfaces)", host, removed.len());
        self.device_change.notify();
        removed.len()
    }

    fn get_version(&self, request: &IoctlRequest) -> ReturnCode {
        match self.memory.write_u32(request.buffer_out, USBV5_VERSION) {
            Ok(()) => ReturnCode::Success,
            Err(e) => {
                warn!("Cannot write version: {}", e);
                ReturnCode::InvalidArgument
            }
        }
    }

    fn resolve(&self, buffer: u32) -> Result<VirtualDevice, RequestError> {
        let handle = DeviceHandle(self.memory.read_u32(buffer.wrapping_add(layout::HANDLE))?);
        self.registry
            .lookup(handle)
            .ok_or(RequestError::UnknownDevice(handle))
    }

    fn with_device<F>(&self, opcode: IoctlOpcode, request: &IoctlRequest, handler: F) -> IpcResult
    where
        F: FnOnce(&VirtualDevice) -> Result<(), RequestError>,
    {
        match self.resolve(request.buffer_in).and_then(|device| handler(&device)) {
            Ok(()) => IpcResult::success(),
            Err(e) => rejected(opcode, e),
        }
    }
}

fn rejected(opcode: IoctlOpcode, error: RequestError) -> IpcResult {
    warn!("{:?} failed: {}", opcode, error);
    IpcResult::invalid()
}

fn cancel_all(device: &VirtualDevice) {
    let mut endpoints = vec![0x00, device.endpoints.interrupt_in, device.endpoints.interrupt_out];
    endpoints.sort_unstable();
    endpoints.dedup();
    for endpoint in endpoints {
        device.host.cancel_transfers(endpoint);
    }
}

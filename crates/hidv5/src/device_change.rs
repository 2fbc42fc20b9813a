//! Device-change hook (GET_DEVICE_CHANGE / SHUTDOWN)
//!
//! The guest parks one GET_DEVICE_CHANGE request; it is answered with the
//! current device list whenever a device is attached or detached, and once
//! right away on the very first call. SHUTDOWN releases a parked hook.

use crate::error::RequestError;
use crate::registry::DeviceRegistry;
use common::{Completion, GuestMemory, MemoryError, ReplySender};
use parking_lot::Mutex;
use protocol::{IoctlRequest, IpcResult, ReturnCode, TRANSFER_SHUTDOWN, layout};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct HookState {
    pending: Option<IoctlRequest>,
    fired_once: bool,
}

/// Owner of the parked device-change request
pub struct DeviceChangeNotifier {
    memory: Arc<dyn GuestMemory>,
    registry: Arc<DeviceRegistry>,
    replies: ReplySender,
    state: Mutex<HookState>,
}

impl DeviceChangeNotifier {
    pub fn new(
        memory: Arc<dyn GuestMemory>,
        registry: Arc<DeviceRegistry>,
        replies: ReplySender,
    ) -> Self {
        Self {
            memory,
            registry,
            replies,
            state: Mutex::new(HookState::default()),
        }
    }

    /// Park a GET_DEVICE_CHANGE request
    pub fn get_device_change(&self, request: &IoctlRequest) -> Result<IpcResult, RequestError> {
        if request.buffer_out_size != layout::DEVICE_CHANGE_SIZE {
            return Err(RequestError::BadOutputBuffer {
                address: request.buffer_out,
                size: request.buffer_out_size,
            });
        }

        let fire_now = {
            let mut state = self.state.lock();
            if state.pending.is_some() {
                return Err(RequestError::HookPending);
            }
            if state.fired_once {
                state.pending = Some(*request);
                false
            } else {
                state.fired_once = true;
                true
            }
        };

        if fire_now {
            self.fire(request);
        } else {
            debug!("Device change hook parked ({:?})", request.id);
        }
        Ok(IpcResult::Deferred)
    }

    /// Release a parked hook with the shutdown status
    pub fn shutdown(&self, request: &IoctlRequest) -> Result<(), RequestError> {
        if request.buffer_in != 0
            || request.buffer_in_size != 0
            || request.buffer_out != 0
            || request.buffer_out_size != 0
        {
            return Err(RequestError::BadInputBuffer {
                address: request.buffer_in,
                size: request.buffer_in_size,
            });
        }

        if let Some(hook) = self.state.lock().pending.take() {
            info!("Releasing device change hook on shutdown");
            self.send(&hook, TRANSFER_SHUTDOWN);
        }
        Ok(())
    }

    /// Answer the parked hook, if any, with the current device list
    pub fn notify(&self) -> bool {
        let hook = self.state.lock().pending.take();
        match hook {
            Some(hook) => {
                self.fire(&hook);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    fn fire(&self, hook: &IoctlRequest) {
        let value = match self.write_entries(hook.buffer_out) {
            Ok(count) => {
                debug!("Device change hook fired with {} entries", count);
                count
            }
            Err(e) => {
                warn!("Failed to write device change entries: {}", e);
                ReturnCode::InvalidArgument.as_i32()
            }
        };
        self.send(hook, value);
    }

    fn write_entries(&self, out: u32) -> Result<i32, MemoryError> {
        let memory = self.memory.as_ref();
        memory.fill(out, 0, layout::DEVICE_CHANGE_SIZE)?;

        let devices = self.registry.devices();
        let mut count = 0;
        for (slot, device) in devices.iter().take(layout::MAX_DEVICE_ENTRIES).enumerate() {
            let entry = out.wrapping_add(slot as u32 * layout::DEVICE_ENTRY_SIZE);
            let descriptor = device.host.device_descriptor();
            memory.write_u32(entry.wrapping_add(layout::ENTRY_HANDLE), device.handle.0)?;
            memory.write_u16(entry.wrapping_add(layout::ENTRY_VENDOR_ID), descriptor.vendor_id)?;
            memory.write_u16(
                entry.wrapping_add(layout::ENTRY_PRODUCT_ID),
                descriptor.product_id,
            )?;
            memory.write_u16(entry.wrapping_add(layout::ENTRY_NUMBER), device.number)?;
            memory.write_u8(
                entry.wrapping_add(layout::ENTRY_INTERFACE),
                device.interface_number,
            )?;
            memory.write_u8(
                entry.wrapping_add(layout::ENTRY_ALT_SETTINGS),
                device.alt_setting_count,
            )?;
            count += 1;
        }

        if devices.len() > layout::MAX_DEVICE_ENTRIES {
            warn!(
                "{} devices attached, reporting only the first {}",
                devices.len(),
                layout::MAX_DEVICE_ENTRIES
            );
        }
        Ok(count)
    }

    fn send(&self, hook: &IoctlRequest, return_value: i32) {
        let completion = Completion {
            request: hook.id,
            return_value,
        };
        if let Err(e) = self.replies.send(completion) {
            warn!("Dropping device change reply: {}", e);
        }
    }
}

//! CANCEL_ENDPOINT

use crate::error::RequestError;
use crate::registry::{EndpointCache, VirtualDevice};
use common::GuestMemory;
use protocol::{IoctlRequest, layout};
use tracing::{debug, warn};

/// Which endpoint the guest wants cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSelector {
    Control,
    InterruptIn,
    InterruptOut,
}

impl EndpointSelector {
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(EndpointSelector::Control),
            1 => Some(EndpointSelector::InterruptIn),
            2 => Some(EndpointSelector::InterruptOut),
            _ => None,
        }
    }

    /// Endpoint address this selector names for a device
    pub fn resolve(self, cache: &EndpointCache) -> u8 {
        match self {
            EndpointSelector::Control => 0x00,
            EndpointSelector::InterruptIn => cache.interrupt_in,
            EndpointSelector::InterruptOut => cache.interrupt_out,
        }
    }
}

/// Cancel the transfers on the endpoint named by the request
///
/// An unknown selector cancels nothing and still succeeds.
pub fn cancel_endpoint(
    memory: &dyn GuestMemory,
    device: &VirtualDevice,
    request: &IoctlRequest,
) -> Result<(), RequestError> {
    // Stored as a big-endian u32; only its low byte selects the endpoint
    let raw = memory.read_u32(request.buffer_in.wrapping_add(layout::CANCEL_SELECTOR))? as u8;

    match EndpointSelector::from_raw(raw) {
        Some(selector) => {
            let endpoint = selector.resolve(&device.endpoints);
            debug!(
                "Cancelling {:?} (endpoint {:#04x}) on {:?}",
                selector, endpoint, device.handle
            );
            device.host.cancel_transfers(endpoint);
        }
        None => warn!(
            "Ignoring cancel with unknown endpoint selector {} on {:?}",
            raw, device.handle
        ),
    }
    Ok(())
}

//! Device-info reply (GET_DEVICE_PARAMS)
//!
//! Fills the guest's 96-byte device-info buffer:
//!
//! | Offset | Content |
//! |---|---|
//! | 0 | handle echoed from the request |
//! | 4 | `1` |
//! | 36 | device descriptor |
//! | 56 | first configuration descriptor |
//! | 68 | requested interface descriptor |
//! | 80 | interrupt IN endpoint descriptor |
//! | 88 | interrupt OUT endpoint descriptor |
//!
//! Interrupt endpoints found along the way are remembered in the device's
//! endpoint cache for later interrupt and cancel requests.

use crate::error::RequestError;
use crate::registry::{DeviceRegistry, VirtualDevice};
use common::GuestMemory;
use protocol::{GuestLayout, IoctlRequest, encode_guest, layout};
use tracing::debug;

fn write_descriptor<T: GuestLayout>(
    memory: &dyn GuestMemory,
    address: u32,
    descriptor: &T,
) -> Result<(), RequestError> {
    let bytes = encode_guest(descriptor)?;
    memory.write_bytes(address, &bytes)?;
    Ok(())
}

/// Answer a device-info request for `device`
///
/// Nothing is written when the output buffer is missing or has the wrong
/// size.
pub fn describe(
    memory: &dyn GuestMemory,
    registry: &DeviceRegistry,
    device: &VirtualDevice,
    request: &IoctlRequest,
) -> Result<(), RequestError> {
    if request.buffer_out == 0 || request.buffer_out_size != layout::DEVICE_INFO_SIZE {
        return Err(RequestError::BadOutputBuffer {
            address: request.buffer_out,
            size: request.buffer_out_size,
        });
    }

    let handle = memory.read_u32(request.buffer_in.wrapping_add(layout::HANDLE))?;
    let alt_setting = memory.read_u8(request.buffer_in.wrapping_add(layout::ALT_SETTING))?;
    let out = request.buffer_out;
    let host = &device.host;

    memory.fill(out, 0, layout::DEVICE_INFO_SIZE)?;
    memory.write_u32(out.wrapping_add(layout::INFO_HANDLE), handle)?;
    memory.write_u32(out.wrapping_add(layout::INFO_MARKER), 1)?;

    write_descriptor(
        memory,
        out.wrapping_add(layout::INFO_DEVICE_DESCRIPTOR),
        &host.device_descriptor(),
    )?;

    let config = host
        .configurations()
        .into_iter()
        .next()
        .ok_or(RequestError::NoConfiguration)?;
    write_descriptor(
        memory,
        out.wrapping_add(layout::INFO_CONFIG_DESCRIPTOR),
        &config,
    )?;

    let interface = host
        .interfaces(0)
        .into_iter()
        .find(|i| {
            i.interface_number == device.interface_number && i.alternate_setting == alt_setting
        })
        .ok_or(RequestError::NoMatchingInterface {
            interface: device.interface_number,
            alt_setting,
        })?;
    write_descriptor(
        memory,
        out.wrapping_add(layout::INFO_INTERFACE_DESCRIPTOR),
        &interface,
    )?;

    let mut interrupt_in = None;
    let mut interrupt_out = None;
    for endpoint in host
        .endpoints(0, interface.interface_number, interface.alternate_setting)
        .iter()
        .filter(|e| e.is_interrupt())
    {
        let offset = if endpoint.is_in() {
            interrupt_in = Some(endpoint.endpoint_address);
            layout::INFO_ENDPOINT_IN
        } else {
            interrupt_out = Some(endpoint.endpoint_address);
            layout::INFO_ENDPOINT_OUT
        };
        write_descriptor(memory, out.wrapping_add(offset), endpoint)?;
    }

    let committed = registry.update_endpoints(device.handle, |cache| {
        if let Some(address) = interrupt_in {
            cache.interrupt_in = address;
        }
        if let Some(address) = interrupt_out {
            cache.interrupt_out = address;
        }
    });
    if !committed {
        debug!(
            "Device {:?} detached while being described",
            device.handle
        );
    }

    debug!(
        "Described device {:?}: interface {} alt {}, endpoints in={:?} out={:?}",
        device.handle, interface.interface_number, alt_setting, interrupt_in, interrupt_out
    );
    Ok(())
}

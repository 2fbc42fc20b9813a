//! USB transfer execution
//!
//! Runs a single guest transfer against an open rusb handle using the
//! blocking API. Called only from a device's worker thread.

use crate::error::HostError;
use crate::usb::message::{TransferKind, TransferOutcome, TransferRequest};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Execute a transfer and report how it went
///
/// `payload` holds the host-to-device bytes; it is ignored for IN transfers,
/// which read up to the request's usable length.
pub fn execute_transfer(
    handle: &DeviceHandle<Context>,
    request: &TransferRequest,
    payload: Vec<u8>,
    timeout: Duration,
) -> TransferOutcome {
    let result = match request.kind {
        TransferKind::Control(setup) => {
            debug!(
                "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, length={}",
                setup.request_type, setup.request, setup.value, setup.index, setup.length
            );
            if setup.is_in() {
                let mut buffer = vec![0u8; request.usable_length()];
                handle
                    .read_control(
                        setup.request_type,
                        setup.request,
                        setup.value,
                        setup.index,
                        &mut buffer,
                        timeout,
                    )
                    .map(|len| {
                        buffer.truncate(len);
                        TransferOutcome::Received(buffer)
                    })
            } else {
                handle
                    .write_control(
                        setup.request_type,
                        setup.request,
                        setup.value,
                        setup.index,
                        &payload,
                        timeout,
                    )
                    .map(TransferOutcome::Sent)
            }
        }
        TransferKind::Interrupt { endpoint } => {
            debug!(
                "Interrupt transfer: endpoint={:#x}, length={}",
                endpoint, request.length
            );
            if request.is_in() {
                let mut buffer = vec![0u8; request.usable_length()];
                handle
                    .read_interrupt(endpoint, &mut buffer, timeout)
                    .map(|len| {
                        buffer.truncate(len);
                        TransferOutcome::Received(buffer)
                    })
            } else {
                handle
                    .write_interrupt(endpoint, &payload, timeout)
                    .map(TransferOutcome::Sent)
            }
        }
    };

    result.unwrap_or_else(|e| {
        let error = map_rusb_error(e);
        match error {
            // Interrupt IN polls routinely time out when no report is pending
            HostError::Timeout => debug!("Transfer on endpoint {:#x} timed out", request.endpoint()),
            _ => warn!("Transfer on endpoint {:#x} failed: {}", request.endpoint(), error),
        }
        TransferOutcome::Failed(error)
    })
}

/// Map rusb::Error to HostError
pub fn map_rusb_error(err: rusb::Error) -> HostError {
    match err {
        rusb::Error::Timeout => HostError::Timeout,
        rusb::Error::Pipe => HostError::Pipe,
        rusb::Error::NoDevice => HostError::NoDevice,
        rusb::Error::NotFound => HostError::NotFound,
        rusb::Error::Busy => HostError::Busy,
        rusb::Error::Overflow => HostError::Overflow,
        rusb::Error::Io => HostError::Io,
        rusb::Error::InvalidParam => HostError::InvalidParam,
        rusb::Error::Access => HostError::Access,
        _ => HostError::Other(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), HostError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), HostError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), HostError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::NotFound), HostError::NotFound);
        assert!(matches!(
            map_rusb_error(rusb::Error::NotSupported),
            HostError::Other(_)
        ));
    }
}

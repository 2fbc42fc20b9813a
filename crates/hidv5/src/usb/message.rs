//! Transfer messages handed to host devices
//!
//! A [`TransferMessage`] carries everything a host backend needs to run one
//! guest transfer, plus the obligation to answer it. The answer is sent
//! exactly once: by [`TransferMessage::complete`], by
//! [`TransferMessage::cancel`], or as a cancellation when the message is
//! dropped unanswered.

use crate::error::HostError;
use common::{Completion, GuestMemory, MemoryError, ReplySender};
use protocol::codec::ENDPOINT_DIR_IN;
use protocol::{RequestId, ReturnCode, TRANSFER_CANCELED};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Setup packet of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlSetup {
    /// Bit 7 of bmRequestType selects device-to-host
    pub fn is_in(&self) -> bool {
        self.request_type & ENDPOINT_DIR_IN != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Control transfer on endpoint 0
    Control(ControlSetup),
    /// Interrupt transfer; direction comes from the endpoint address
    Interrupt { endpoint: u8 },
}

/// Transfer parameters, without the reply obligation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub kind: TransferKind,
    /// Requested transfer length in bytes
    pub length: u16,
    /// Guest address of the data buffer
    pub data_address: u32,
    /// Size of the guest data buffer
    pub data_size: u32,
}

impl TransferRequest {
    pub fn endpoint(&self) -> u8 {
        match self.kind {
            TransferKind::Control(_) => 0,
            TransferKind::Interrupt { endpoint } => endpoint,
        }
    }

    pub fn is_in(&self) -> bool {
        match self.kind {
            TransferKind::Control(setup) => setup.is_in(),
            TransferKind::Interrupt { endpoint } => endpoint & ENDPOINT_DIR_IN != 0,
        }
    }

    /// Bytes that may move through the guest buffer
    pub fn usable_length(&self) -> usize {
        usize::from(self.length).min(self.data_size as usize)
    }
}

/// Result of running a transfer on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Device-to-host transfer finished with this payload
    Received(Vec<u8>),
    /// Host-to-device transfer finished after sending this many bytes
    Sent(usize),
    Failed(HostError),
}

/// A guest transfer in flight
pub struct TransferMessage {
    id: RequestId,
    request: TransferRequest,
    memory: Arc<dyn GuestMemory>,
    replies: ReplySender,
    armed: bool,
}

impl TransferMessage {
    pub fn new(
        id: RequestId,
        request: TransferRequest,
        memory: Arc<dyn GuestMemory>,
        replies: ReplySender,
    ) -> Self {
        Self {
            id,
            request,
            memory,
            replies,
            armed: true,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn endpoint(&self) -> u8 {
        self.request.endpoint()
    }

    pub fn is_in(&self) -> bool {
        self.request.is_in()
    }

    /// Read the host-to-device payload out of guest memory
    pub fn out_payload(&self) -> Result<Vec<u8>, MemoryError> {
        self.memory
            .read_vec(self.request.data_address, self.request.usable_length())
    }

    /// Answer the guest with the outcome of the transfer
    ///
    /// Received data is copied into the guest buffer, truncated to the
    /// requested length. The reply value is the number of bytes moved, or
    /// InvalidArgument on failure.
    pub fn complete(mut self, outcome: TransferOutcome) {
        let value = match outcome {
            TransferOutcome::Received(mut data) => {
                data.truncate(self.request.usable_length());
                match self.memory.write_bytes(self.request.data_address, &data) {
                    Ok(()) => saturating_i32(data.len()),
                    Err(e) => {
                        warn!("Failed to copy transfer {:?} into guest: {}", self.id, e);
                        ReturnCode::InvalidArgument.as_i32()
                    }
                }
            }
            TransferOutcome::Sent(len) => saturating_i32(len),
            TransferOutcome::Failed(error) => {
                debug!(
                    "Transfer {:?} on endpoint {:#04x} failed: {}",
                    self.id,
                    self.endpoint(),
                    error
                );
                ReturnCode::InvalidArgument.as_i32()
            }
        };
        self.finish(value);
    }

    /// Answer the guest with the cancellation status
    pub fn cancel(mut self) {
        self.finish(TRANSFER_CANCELED);
    }

    /// Drop the message without answering
    ///
    /// Only valid when the submitter replies to the guest itself.
    pub(crate) fn discard(mut self) {
        self.armed = false;
    }

    fn finish(&mut self, return_value: i32) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let completion = Completion {
            request: self.id,
            return_value,
        };
        if let Err(e) = self.replies.send(completion) {
            warn!("Dropping completion for {:?}: {}", self.id, e);
        }
    }
}

impl Drop for TransferMessage {
    fn drop(&mut self) {
        if self.armed {
            debug!("Transfer {:?} dropped unanswered, cancelling", self.id);
            self.finish(TRANSFER_CANCELED);
        }
    }
}

impl fmt::Debug for TransferMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferMessage")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("armed", &self.armed)
            .finish()
    }
}

fn saturating_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

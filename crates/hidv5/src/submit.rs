//! Transfer submitter (CONTROL_MESSAGE / INTERRUPT_MESSAGE)
//!
//! Turns a vectored guest request into a [`TransferMessage`] and hands it to
//! the host device. The first vector holds the parameters, the second one is
//! the data buffer.

use crate::error::{RequestError, SubmitError};
use crate::registry::VirtualDevice;
use crate::usb::{ControlSetup, TransferKind, TransferMessage, TransferRequest};
use common::{GuestMemory, ReplySender};
use protocol::{IoctlvOpcode, IoctlvRequest, layout};
use std::sync::Arc;
use tracing::debug;

/// Read the setup packet of a control message
fn read_setup(memory: &dyn GuestMemory, params: u32) -> Result<ControlSetup, RequestError> {
    Ok(ControlSetup {
        request_type: memory.read_u8(params.wrapping_add(layout::CTRL_REQUEST_TYPE))?,
        request: memory.read_u8(params.wrapping_add(layout::CTRL_REQUEST))?,
        value: memory.read_u16(params.wrapping_add(layout::CTRL_VALUE))?,
        index: memory.read_u16(params.wrapping_add(layout::CTRL_INDEX))?,
        length: memory.read_u16(params.wrapping_add(layout::CTRL_LENGTH))?,
    })
}

/// Build the transfer for `request` and submit it to the device
///
/// On success the device owns the reply; exactly one completion will be
/// sent on `replies`. On error nothing is sent and the caller answers the
/// guest directly.
pub fn submit(
    memory: &Arc<dyn GuestMemory>,
    replies: &ReplySender,
    device: &VirtualDevice,
    request: &IoctlvRequest,
) -> Result<(), SubmitError> {
    let opcode = IoctlvOpcode::try_from(request.opcode)
        .map_err(|_| SubmitError::UnsupportedOpcode(request.opcode))?;

    let count = request.vector_count();
    let (Some(params), Some(data)) = (request.vector(0), request.vector(layout::DATA_VECTOR))
    else {
        return Err(RequestError::VectorCount(count).into());
    };

    let (kind, length) = match opcode {
        IoctlvOpcode::ControlMessage => {
            let setup = read_setup(memory.as_ref(), params.address)?;
            (TransferKind::Control(setup), setup.length)
        }
        IoctlvOpcode::InterruptMessage => {
            let to_device =
                memory.read_u32(params.address.wrapping_add(layout::INTR_DIRECTION))? != 0;
            let length = memory.read_u16(params.address.wrapping_add(layout::INTR_LENGTH))?;
            // An unpopulated cache yields endpoint 0, submitted as-is
            let endpoint = if to_device {
                device.endpoints.interrupt_out
            } else {
                device.endpoints.interrupt_in
            };
            (TransferKind::Interrupt { endpoint }, length)
        }
    };

    let transfer = TransferRequest {
        kind,
        length,
        data_address: data.address,
        data_size: data.size,
    };
    debug!(
        "Submitting {:?} for {:?} ({:?})",
        transfer, device.handle, request.id
    );

    let message = TransferMessage::new(request.id, transfer, memory.clone(), replies.clone());
    device.host.submit_transfer(message).map_err(|rejected| {
        rejected.message.discard();
        SubmitError::Rejected(rejected.error)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::test_utils::StubHostDevice;
    use crate::usb::TransferOutcome;
    use common::test_utils::CountingMemory;
    use common::{ReplyReceiver, create_reply_channel};
    use protocol::{IoVector, RequestId};

    const PARAMS: u32 = 0x100;
    const DATA: u32 = 0x200;

    struct Fixture {
        memory: Arc<CountingMemory>,
        host: Arc<StubHostDevice>,
        registry: DeviceRegistry,
        device: VirtualDevice,
        replies: ReplySender,
        receiver: ReplyReceiver,
    }

    impl Fixture {
        fn new() -> Self {
            let host = Arc::new(StubHostDevice::hid(1, 0x057e, 0x0306));
            let registry = DeviceRegistry::new();
            let handle = registry.insert(host.clone(), 0, 1);
            registry.update_endpoints(handle, |cache| {
                cache.interrupt_in = 0x81;
                cache.interrupt_out = 0x02;
            });
            let device = registry.lookup(handle).unwrap();
            let (replies, receiver) = create_reply_channel();
            Self {
                memory: Arc::new(CountingMemory::new(0x400)),
                host,
                registry,
                device,
                replies,
                receiver,
            }
        }

        fn request(&self, opcode: IoctlvOpcode) -> IoctlvRequest {
            IoctlvRequest {
                id: RequestId(11),
                opcode: opcode.value(),
                in_vectors: vec![IoVector::new(PARAMS, 0x20)],
                io_vectors: vec![IoVector::new(DATA, 0x40)],
            }
        }

        fn submit(&self, request: &IoctlvRequest) -> Result<(), SubmitError> {
            let memory: Arc<dyn GuestMemory> = self.memory.clone();
            submit(&memory, &self.replies, &self.device, request)
        }
    }

    #[test]
    fn test_interrupt_direction_selects_endpoint() {
        let fixture = Fixture::new();
        let request = fixture.request(IoctlvOpcode::InterruptMessage);

        fixture.memory.poke_u32(PARAMS + 8, 0);
        fixture.submit(&request).unwrap();
        fixture.memory.poke_u32(PARAMS + 8, 1);
        fixture.submit(&request).unwrap();

        assert_eq!(fixture.host.queued_endpoints(), vec![0x81, 0x02]);
    }

    #[test]
    fn test_interrupt_length_and_completion() {
        let fixture = Fixture::new();
        fixture.memory.poke(PARAMS + 12, &[0x00, 0x08]);
        fixture
            .submit(&fixture.request(IoctlvOpcode::InterruptMessage))
            .unwrap();

        let queued = fixture.host.take_queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].request().length, 8);
        assert_eq!(queued[0].request().data_address, DATA);

        for message in queued {
            message.complete(TransferOutcome::Received(vec![0x5a; 16]));
        }
        let completion = fixture.receiver.try_recv().unwrap();
        assert_eq!(completion.request, RequestId(11));
        assert_eq!(completion.return_value, 8);
        assert_eq!(fixture.memory.peek(DATA, 9), [vec![0x5au8; 8], vec![0u8]].concat());
    }

    #[test]
    fn test_empty_cache_uses_endpoint_zero() {
        let mut fixture = Fixture::new();
        let handle = fixture
            .registry
            .insert(fixture.host.clone(), 1, 1);
        fixture.device = fixture.registry.lookup(handle).unwrap();

        fixture
            .submit(&fixture.request(IoctlvOpcode::InterruptMessage))
            .unwrap();
        assert_eq!(fixture.host.queued_endpoints(), vec![0x00]);
    }

    #[test]
    fn test_control_setup_packet() {
        let fixture = Fixture::new();
        fixture.memory.poke(
            PARAMS + 8,
            &[0xa1, 0x01, 0x01, 0x00, 0x00, 0x02, 0x00, 0x10],
        );
        fixture
            .submit(&fixture.request(IoctlvOpcode::ControlMessage))
            .unwrap();

        let queued = fixture.host.take_queued();
        let request = queued[0].request();
        assert_eq!(
            request.kind,
            TransferKind::Control(ControlSetup {
                request_type: 0xa1,
                request: 0x01,
                value: 0x0100,
                index: 0x0002,
                length: 0x0010,
            })
        );
        assert_eq!(request.length, 0x10);
        assert_eq!(request.endpoint(), 0);
        assert!(request.is_in());
        for message in queued {
            message.discard();
        }
    }

    #[test]
    fn test_data_vector_counts_in_vectors_first() {
        let fixture = Fixture::new();
        let request = IoctlvRequest {
            id: RequestId(12),
            opcode: IoctlvOpcode::ControlMessage.value(),
            in_vectors: vec![IoVector::new(PARAMS, 0x20), IoVector::new(0x300, 0x10)],
            io_vectors: Vec::new(),
        };
        fixture.submit(&request).unwrap();
        assert_eq!(fixture.host.take_queued()[0].request().data_address, 0x300);
    }

    #[test]
    fn test_rejected_submission_sends_no_completion() {
        let fixture = Fixture::new();
        fixture.host.set_reject_submissions(true);
        let err = fixture
            .submit(&fixture.request(IoctlvOpcode::InterruptMessage))
            .unwrap_err();
        assert!(matches!(err, SubmitError::Rejected(_)));
        assert!(fixture.receiver.try_recv().is_none());
    }

    #[test]
    fn test_unsupported_opcode() {
        let fixture = Fixture::new();
        let mut request = fixture.request(IoctlvOpcode::ControlMessage);
        request.opcode = 20;
        let err = fixture.submit(&request).unwrap_err();
        assert!(matches!(err, SubmitError::UnsupportedOpcode(20)));
        assert_eq!(fixture.memory.reads(), 0);
    }

    #[test]
    fn test_params_out_of_range() {
        let fixture = Fixture::new();
        let mut request = fixture.request(IoctlvOpcode::InterruptMessage);
        request.in_vectors[0].address = 0x3fc;
        let err = fixture.submit(&request).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Request(RequestError::Memory(_))
        ));
        assert_eq!(fixture.host.queued_len(), 0);
    }
}

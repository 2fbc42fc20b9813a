//! Request, reply and handle types
//!
//! Requests reference guest memory by 32-bit physical address. Neither request
//! type owns any payload: every field a handler needs is read through the
//! guest memory accessor at the offsets in [`crate::layout`].

/// Guest-visible device handle
///
/// Assigned by the device registry when a host interface is attached and
/// echoed back by the guest in every device-scoped request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u32);

/// Request ID for matching deferred replies
///
/// Assigned by the transport that hands requests to this resource. A deferred
/// reply carries the ID of the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Return value written for a transfer cancelled by CANCEL_ENDPOINT or detach
pub const TRANSFER_CANCELED: i32 = -7022;

/// Return value for a parked device-change hook released by SHUTDOWN
pub const TRANSFER_SHUTDOWN: i32 = -1;

/// Guest-visible result of a request
///
/// Richer error information stays in the logs; the guest only ever sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// IPC_SUCCESS
    Success,
    /// IPC_EINVAL
    InvalidArgument,
}

impl ReturnCode {
    /// Numeric value delivered to the guest
    pub const fn as_i32(self) -> i32 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::InvalidArgument => -4,
        }
    }
}

impl From<ReturnCode> for i32 {
    fn from(code: ReturnCode) -> Self {
        code.as_i32()
    }
}

/// Outcome of handing a request to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcResult {
    /// Reply now with this code
    Reply(ReturnCode),
    /// Reply will be delivered later on the reply channel
    Deferred,
}

impl IpcResult {
    pub const fn success() -> Self {
        IpcResult::Reply(ReturnCode::Success)
    }

    pub const fn invalid() -> Self {
        IpcResult::Reply(ReturnCode::InvalidArgument)
    }

    /// Immediate return code, if any
    pub fn return_code(&self) -> Option<ReturnCode> {
        match self {
            IpcResult::Reply(code) => Some(*code),
            IpcResult::Deferred => None,
        }
    }
}

impl From<ReturnCode> for IpcResult {
    fn from(code: ReturnCode) -> Self {
        IpcResult::Reply(code)
    }
}

/// Scalar request: one input region and one output region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoctlRequest {
    pub id: RequestId,
    pub opcode: u32,
    pub buffer_in: u32,
    pub buffer_in_size: u32,
    pub buffer_out: u32,
    pub buffer_out_size: u32,
}

/// One region of a vectored request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVector {
    pub address: u32,
    pub size: u32,
}

impl IoVector {
    pub const fn new(address: u32, size: u32) -> Self {
        Self { address, size }
    }
}

/// Vectored request: input regions followed by in/out regions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoctlvRequest {
    pub id: RequestId,
    pub opcode: u32,
    pub in_vectors: Vec<IoVector>,
    pub io_vectors: Vec<IoVector>,
}

impl IoctlvRequest {
    /// Total number of regions across both lists
    pub fn vector_count(&self) -> usize {
        self.in_vectors.len() + self.io_vectors.len()
    }

    /// Region by position, counting input regions first
    pub fn vector(&self, index: usize) -> Option<&IoVector> {
        self.in_vectors
            .get(index)
            .or_else(|| self.io_vectors.get(index.checked_sub(self.in_vectors.len())?))
    }
}

//! Opcode definitions and fixed guest layouts
//!
//! The numeric opcode values are a fixed contract with guest software and
//! must never be renumbered.

use crate::error::ProtocolError;

/// Scalar (ioctl) opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoctlOpcode {
    /// Report the interface version
    GetVersion,
    /// Register a hook fired on device insertion/removal
    GetDeviceChange,
    /// Release the device-change hook
    Shutdown,
    /// Describe a device (96-byte reply)
    GetDeviceParams,
    /// Handshake after the guest processed a device change
    AttachFinish,
    /// Suspend or resume a device
    SuspendResume,
    /// Cancel transfers queued on one endpoint
    CancelEndpoint,
}

impl IoctlOpcode {
    pub const fn value(self) -> u32 {
        match self {
            IoctlOpcode::GetVersion => 0,
            IoctlOpcode::GetDeviceChange => 1,
            IoctlOpcode::Shutdown => 2,
            IoctlOpcode::GetDeviceParams => 3,
            IoctlOpcode::AttachFinish => 6,
            IoctlOpcode::SuspendResume => 16,
            IoctlOpcode::CancelEndpoint => 17,
        }
    }
}

impl TryFrom<u32> for IoctlOpcode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => IoctlOpcode::GetVersion,
            1 => IoctlOpcode::GetDeviceChange,
            2 => IoctlOpcode::Shutdown,
            3 => IoctlOpcode::GetDeviceParams,
            6 => IoctlOpcode::AttachFinish,
            16 => IoctlOpcode::SuspendResume,
            17 => IoctlOpcode::CancelEndpoint,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }
}

/// Vectored (ioctlv) opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoctlvOpcode {
    /// Control transfer on endpoint 0
    ControlMessage,
    /// Interrupt transfer on the cached IN or OUT endpoint
    InterruptMessage,
}

impl IoctlvOpcode {
    pub const fn value(self) -> u32 {
        match self {
            IoctlvOpcode::ControlMessage => 18,
            IoctlvOpcode::InterruptMessage => 19,
        }
    }
}

impl TryFrom<u32> for IoctlvOpcode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            18 => Ok(IoctlvOpcode::ControlMessage),
            19 => Ok(IoctlvOpcode::InterruptMessage),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Byte offsets inside guest buffers
pub mod layout {
    /// Every device-scoped request starts with the device handle
    pub const HANDLE: u32 = 0;

    /// GET_DEVICE_PARAMS output size
    pub const DEVICE_INFO_SIZE: u32 = 0x60;
    /// Echoed handle in the device-info reply
    pub const INFO_HANDLE: u32 = 0;
    /// Constant `1` in the device-info reply
    pub const INFO_MARKER: u32 = 4;
    pub const INFO_DEVICE_DESCRIPTOR: u32 = 36;
    pub const INFO_CONFIG_DESCRIPTOR: u32 = 56;
    pub const INFO_INTERFACE_DESCRIPTOR: u32 = 68;
    pub const INFO_ENDPOINT_IN: u32 = 80;
    pub const INFO_ENDPOINT_OUT: u32 = 88;

    /// GET_DEVICE_PARAMS input: requested alternate setting (u8)
    pub const ALT_SETTING: u32 = 8;
    /// CANCEL_ENDPOINT input: endpoint selector (u32, low byte used)
    pub const CANCEL_SELECTOR: u32 = 8;
    /// SUSPEND_RESUME input: non-zero resumes (u32)
    pub const RESUME_FLAG: u32 = 8;

    /// INTERRUPT_MESSAGE input: non-zero selects the OUT endpoint (u32)
    pub const INTR_DIRECTION: u32 = 8;
    /// INTERRUPT_MESSAGE input: transfer length (u16)
    pub const INTR_LENGTH: u32 = 12;

    /// CONTROL_MESSAGE input: setup packet fields
    pub const CTRL_REQUEST_TYPE: u32 = 8;
    pub const CTRL_REQUEST: u32 = 9;
    pub const CTRL_VALUE: u32 = 10;
    pub const CTRL_INDEX: u32 = 12;
    pub const CTRL_LENGTH: u32 = 14;

    /// Position of the data buffer among the request's regions
    pub const DATA_VECTOR: usize = 1;

    /// GET_DEVICE_CHANGE output size
    pub const DEVICE_CHANGE_SIZE: u32 = 0x180;
    /// One entry in the device-change reply
    pub const DEVICE_ENTRY_SIZE: u32 = 0x40;
    pub const MAX_DEVICE_ENTRIES: usize = (DEVICE_CHANGE_SIZE / DEVICE_ENTRY_SIZE) as usize;
    pub const ENTRY_HANDLE: u32 = 0;
    pub const ENTRY_VENDOR_ID: u32 = 4;
    pub const ENTRY_PRODUCT_ID: u32 = 6;
    pub const ENTRY_NUMBER: u32 = 8;
    pub const ENTRY_INTERFACE: u32 = 10;
    pub const ENTRY_ALT_SETTINGS: u32 = 11;
}

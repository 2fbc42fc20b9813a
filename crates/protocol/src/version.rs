//! Protocol version management

/// Version word reported by GET_VERSION
pub const USBV5_VERSION: u32 = 0x50001;

/// USBv5 interface version, packed as `major << 16 | minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

/// Version this resource implements
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::from_word(USBV5_VERSION);

impl ProtocolVersion {
    /// Split a packed version word
    pub const fn from_word(word: u32) -> Self {
        Self {
            major: (word >> 16) as u16,
            minor: (word & 0xffff) as u16,
        }
    }

    /// Pack into the word written to the guest
    pub const fn to_word(self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version() {
        assert_eq!(CURRENT_VERSION.major, 5);
        assert_eq!(CURRENT_VERSION.minor, 1);
        assert_eq!(CURRENT_VERSION.to_word(), 0x50001);
    }

    #[test]
    fn test_word_packing() {
        let version = ProtocolVersion { major: 4, minor: 2 };
        assert_eq!(ProtocolVersion::from_word(version.to_word()), version);
    }
}

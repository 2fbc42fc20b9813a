//! Guest memory access
//!
//! Guest buffers are addressed by 32-bit physical address and hold big-endian
//! data. Handlers only ever touch guest memory through [`GuestMemory`], which
//! lets tests substitute an instrumented implementation.

use crate::error::MemoryError;
use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;

/// Typed access to guest physical memory
///
/// Implementations must be shareable across threads: transfer completions
/// write their payload from the host backend's worker threads.
pub trait GuestMemory: Send + Sync {
    /// Copy `buf.len()` bytes out of guest memory
    fn read_bytes(&self, address: u32, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `data` into guest memory
    fn write_bytes(&self, address: u32, data: &[u8]) -> Result<(), MemoryError>;

    /// Set `len` bytes starting at `address` to `value`
    fn fill(&self, address: u32, value: u8, len: u32) -> Result<(), MemoryError> {
        self.write_bytes(address, &vec![value; len as usize])
    }

    fn read_vec(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0u8; len];
        self.read_bytes(address, &mut buf)?;
        Ok(buf)
    }

    fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read_bytes(address, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, address: u32) -> Result<u16, MemoryError> {
        let mut buf = [0u8; 2];
        self.read_bytes(address, &mut buf)?;
        Ok(BigEndian::read_u16(&buf))
    }

    fn read_u32(&self, address: u32) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf)?;
        Ok(BigEndian::read_u32(&buf))
    }

    fn write_u8(&self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.write_bytes(address, &[value])
    }

    fn write_u16(&self, address: u32, value: u16) -> Result<(), MemoryError> {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.write_bytes(address, &buf)
    }

    fn write_u32(&self, address: u32, value: u32) -> Result<(), MemoryError> {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value);
        self.write_bytes(address, &buf)
    }
}

/// Flat guest RAM starting at physical address 0
pub struct GuestRam {
    bytes: Mutex<Vec<u8>>,
}

impl GuestRam {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0u8; size]),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.lock().len()
    }
}

fn span(address: u32, len: usize, size: usize) -> Result<std::ops::Range<usize>, MemoryError> {
    let start = address as usize;
    start
        .checked_add(len)
        .filter(|end| *end <= size)
        .map(|end| start..end)
        .ok_or(MemoryError::OutOfRange { address, len, size })
}

impl GuestMemory for GuestRam {
    fn read_bytes(&self, address: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let bytes = self.bytes.lock();
        let range = span(address, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write_bytes(&self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        let mut bytes = self.bytes.lock();
        let range = span(address, data.len(), bytes.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn fill(&self, address: u32, value: u8, len: u32) -> Result<(), MemoryError> {
        let mut bytes = self.bytes.lock();
        let range = span(address, len as usize, bytes.len())?;
        bytes[range].fill(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_big_endian() {
        let ram = GuestRam::new(16);
        ram.write_u32(4, 0x0005_0001).unwrap();
        assert_eq!(ram.read_vec(4, 4).unwrap(), vec![0x00, 0x05, 0x00, 0x01]);
        assert_eq!(ram.read_u32(4).unwrap(), 0x50001);
        assert_eq!(ram.read_u16(6).unwrap(), 0x0001);
        assert_eq!(ram.read_u8(5).unwrap(), 0x05);
    }

    #[test]
    fn test_out_of_range_access() {
        let ram = GuestRam::new(8);
        assert_eq!(
            ram.read_u32(6),
            Err(MemoryError::OutOfRange {
                address: 6,
                len: 4,
                size: 8
            })
        );
        assert!(ram.write_u32(u32::MAX, 1).is_err());
        assert!(ram.fill(0, 0, 9).is_err());
    }

    #[test]
    fn test_fill() {
        let ram = GuestRam::new(8);
        ram.write_bytes(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        ram.fill(2, 0, 4).unwrap();
        assert_eq!(ram.read_vec(0, 8).unwrap(), vec![1, 2, 0, 0, 0, 0, 7, 8]);
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let ram = GuestRam::new(4);
        assert!(ram.write_bytes(2, &[9, 9, 9]).is_err());
        assert_eq!(ram.read_vec(0, 4).unwrap(), vec![0; 4]);
    }
}

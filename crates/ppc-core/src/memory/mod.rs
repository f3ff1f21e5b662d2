//! Memory model primitives for the emulated RAM window.

/// Alignment and window legality helpers.
pub mod access;

pub use access::{validate_window_access, validate_word_alignment, WORD_ACCESS_BYTES};

use crate::FaultCode;

/// Default base of main memory as seen through the cached mirror.
pub const DEFAULT_RAM_BASE: u32 = 0x8000_0000;
/// Default main memory size (24 MiB).
pub const DEFAULT_RAM_SIZE: u32 = 0x0180_0000;

/// Flat big-endian RAM window mapped at a fixed base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    base: u32,
    bytes: Box<[u8]>,
}

impl Memory {
    /// Allocates a zeroed window of `size` bytes starting at `base`.
    #[must_use]
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            bytes: vec![0; size as usize].into_boxed_slice(),
        }
    }

    /// First mapped address.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Window size in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Returns `true` when a word at `addr` is readable.
    #[must_use]
    pub const fn is_ram_address(&self, addr: u32) -> bool {
        validate_window_access(self.base, self.size(), addr, WORD_ACCESS_BYTES).is_ok()
    }

    /// Reads a big-endian word.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::UnalignedAccess`] or [`FaultCode::UnmappedAccess`].
    pub fn read_u32(&self, addr: u32) -> Result<u32, FaultCode> {
        let offset = self.word_offset(addr)?;
        let word = [
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ];
        Ok(u32::from_be_bytes(word))
    }

    /// Writes a big-endian word.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::UnalignedAccess`] or [`FaultCode::UnmappedAccess`].
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), FaultCode> {
        let offset = self.word_offset(addr)?;
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Copies a raw image into memory starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::ImageOutOfRange`] when the image does not fit.
    pub fn load_image(&mut self, addr: u32, image: &[u8]) -> Result<(), FaultCode> {
        let len = u32::try_from(image.len()).map_err(|_| FaultCode::ImageOutOfRange)?;
        validate_window_access(self.base, self.size(), addr, len)
            .map_err(|_| FaultCode::ImageOutOfRange)?;
        let offset = (addr - self.base) as usize;
        self.bytes[offset..offset + image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Writes a sequence of instruction words starting at `addr`.
    ///
    /// # Errors
    ///
    /// Propagates the first failing [`Memory::write_u32`].
    pub fn write_words(&mut self, addr: u32, words: &[u32]) -> Result<(), FaultCode> {
        let mut cursor = addr;
        for word in words {
            self.write_u32(cursor, *word)?;
            cursor = cursor.wrapping_add(WORD_ACCESS_BYTES);
        }
        Ok(())
    }

    fn word_offset(&self, addr: u32) -> Result<usize, FaultCode> {
        validate_word_alignment(addr)?;
        validate_window_access(self.base, self.size(), addr, WORD_ACCESS_BYTES)?;
        Ok((addr - self.base) as usize)
    }
}

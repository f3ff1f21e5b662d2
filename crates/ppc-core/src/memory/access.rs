//! Access legality helpers for the RAM window.

use crate::FaultCode;

/// Width in bytes of an instruction fetch or word access.
pub const WORD_ACCESS_BYTES: u32 = 4;

/// Validates that a word access is naturally aligned.
///
/// # Errors
///
/// Returns [`FaultCode::UnalignedAccess`] when `addr` is not a multiple of 4.
pub const fn validate_word_alignment(addr: u32) -> Result<(), FaultCode> {
    if addr % WORD_ACCESS_BYTES == 0 {
        Ok(())
    } else {
        Err(FaultCode::UnalignedAccess)
    }
}

/// Validates that `[addr, addr + len)` lies inside `[base, base + size)`.
///
/// # Errors
///
/// Returns [`FaultCode::UnmappedAccess`] when any byte of the range falls
/// outside the window or the range wraps the address space.
pub const fn validate_window_access(base: u32, size: u32, addr: u32, len: u32) -> Result<(), FaultCode> {
    if addr < base {
        return Err(FaultCode::UnmappedAccess);
    }
    let offset = (addr - base) as u64;
    if offset + len as u64 > size as u64 {
        return Err(FaultCode::UnmappedAccess);
    }
    Ok(())
}

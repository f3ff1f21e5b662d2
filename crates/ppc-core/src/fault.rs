use thiserror::Error;

/// Fault classes used for log grouping and host policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Decoder rejected an instruction word.
    Decode,
    /// Instruction fetch or data access violated the memory map.
    Memory,
    /// Host-side image or configuration problem.
    Host,
}

/// Stable fault taxonomy raised by fetch, decode and execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultCode {
    /// Primary or extended opcode outside the supported subset.
    #[error("illegal instruction")]
    IllegalInstruction = 0x01,
    /// Fetch or data access outside the mapped RAM window.
    #[error("access to unmapped address")]
    UnmappedAccess = 0x02,
    /// Word access or fetch on an address that is not 4-byte aligned.
    #[error("unaligned word access")]
    UnalignedAccess = 0x03,
    /// `mfspr`/`mtspr` named a special register the core does not model.
    #[error("unsupported special-purpose register")]
    UnsupportedSpr = 0x04,
    /// Program image does not fit inside the RAM window.
    #[error("image does not fit in memory")]
    ImageOutOfRange = 0x05,
}

impl FaultCode {
    /// Converts a fault code to its stable byte value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte value back into a fault code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalInstruction),
            0x02 => Some(Self::UnmappedAccess),
            0x03 => Some(Self::UnalignedAccess),
            0x04 => Some(Self::UnsupportedSpr),
            0x05 => Some(Self::ImageOutOfRange),
            _ => None,
        }
    }

    /// Returns the fault class for this fault code.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::IllegalInstruction | Self::UnsupportedSpr => FaultClass::Decode,
            Self::UnmappedAccess | Self::UnalignedAccess => FaultClass::Memory,
            Self::ImageOutOfRange => FaultClass::Host,
        }
    }
}

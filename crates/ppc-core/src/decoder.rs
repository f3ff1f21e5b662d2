//! Instruction decoder for the supported Gekko integer and branch subset.
//!
//! Decoding is pure: it validates the primary and extended opcodes and
//! extracts operand fields so the interpreter and block cache can share one
//! representation.

use crate::encoding::{
    Instruction, OPCD_ADDI, OPCD_ADDIS, OPCD_B, OPCD_BC, OPCD_CMPI, OPCD_CMPLI, OPCD_LWZ,
    OPCD_ORI, OPCD_ORIS, OPCD_STW, OPCD_STWU, OPCD_X, OPCD_XL, SPR_CTR, SPR_LR, XO_ADD,
    XO_BCCTR, XO_BCLR, XO_CMP, XO_CMPL, XO_MFSPR, XO_MTSPR, XO_OR, XO_SUBF,
};
use crate::FaultCode;

/// Special-purpose registers modelled by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Spr {
    /// Link register.
    Lr,
    /// Count register.
    Ctr,
}

impl Spr {
    /// Maps an architectural SPR number onto a modelled register.
    #[must_use]
    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            SPR_LR => Some(Self::Lr),
            SPR_CTR => Some(Self::Ctr),
            _ => None,
        }
    }
}

/// Fully decoded instruction with extracted operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DecodedInstruction {
    Addi { rd: usize, ra: usize, simm: i32 },
    Addis { rd: usize, ra: usize, simm: i32 },
    Ori { ra: usize, rs: usize, uimm: u32 },
    Oris { ra: usize, rs: usize, uimm: u32 },
    Cmpi { crf: u32, ra: usize, simm: i32 },
    Cmpli { crf: u32, ra: usize, uimm: u32 },
    Lwz { rd: usize, ra: usize, d: i32 },
    Stw { rs: usize, ra: usize, d: i32 },
    Stwu { rs: usize, ra: usize, d: i32 },
    B { li: i32, aa: bool, lk: bool },
    Bc { bo: u32, bi: u32, bd: i32, aa: bool, lk: bool },
    Bclr { bo: u32, bi: u32, lk: bool },
    Bcctr { bo: u32, bi: u32, lk: bool },
    Add { rd: usize, ra: usize, rb: usize, rc: bool },
    Subf { rd: usize, ra: usize, rb: usize, rc: bool },
    Or { ra: usize, rs: usize, rb: usize, rc: bool },
    Cmp { crf: u32, ra: usize, rb: usize },
    Cmpl { crf: u32, ra: usize, rb: usize },
    Mfspr { rd: usize, spr: Spr },
    Mtspr { rs: usize, spr: Spr },
}

impl DecodedInstruction {
    /// Returns `true` when this instruction may redirect control flow.
    ///
    /// Blocks in the compiled cache end after the first such instruction.
    #[must_use]
    pub const fn ends_block(self) -> bool {
        matches!(
            self,
            Self::B { .. } | Self::Bc { .. } | Self::Bclr { .. } | Self::Bcctr { .. }
        )
    }
}

/// Stateless decoder entry point.
pub struct Decoder;

impl Decoder {
    /// Decodes one instruction word.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::IllegalInstruction`] for opcodes outside the
    /// supported subset and [`FaultCode::UnsupportedSpr`] for `mfspr`/`mtspr`
    /// on registers other than `LR` and `CTR`.
    pub fn decode(inst: Instruction) -> Result<DecodedInstruction, FaultCode> {
        let decoded = match inst.opcd() {
            OPCD_CMPLI => DecodedInstruction::Cmpli {
                crf: inst.crfd(),
                ra: inst.ra(),
                uimm: inst.uimm(),
            },
            OPCD_CMPI => DecodedInstruction::Cmpi {
                crf: inst.crfd(),
                ra: inst.ra(),
                simm: inst.simm(),
            },
            OPCD_ADDI => DecodedInstruction::Addi {
                rd: inst.rd(),
                ra: inst.ra(),
                simm: inst.simm(),
            },
            OPCD_ADDIS => DecodedInstruction::Addis {
                rd: inst.rd(),
                ra: inst.ra(),
                simm: inst.simm(),
            },
            OPCD_BC => DecodedInstruction::Bc {
                bo: inst.bo(),
                bi: inst.bi(),
                bd: inst.bd(),
                aa: inst.aa(),
                lk: inst.lk(),
            },
            OPCD_B => DecodedInstruction::B {
                li: inst.li(),
                aa: inst.aa(),
                lk: inst.lk(),
            },
            OPCD_XL => Self::decode_xl(inst)?,
            OPCD_ORI => DecodedInstruction::Ori {
                ra: inst.ra(),
                rs: inst.rs(),
                uimm: inst.uimm(),
            },
            OPCD_ORIS => DecodedInstruction::Oris {
                ra: inst.ra(),
                rs: inst.rs(),
                uimm: inst.uimm(),
            },
            OPCD_X => Self::decode_x(inst)?,
            OPCD_LWZ => DecodedInstruction::Lwz {
                rd: inst.rd(),
                ra: inst.ra(),
                d: inst.simm(),
            },
            OPCD_STW => DecodedInstruction::Stw {
                rs: inst.rs(),
                ra: inst.ra(),
                d: inst.simm(),
            },
            OPCD_STWU => {
                if inst.ra() == 0 {
                    return Err(FaultCode::IllegalInstruction);
                }
                DecodedInstruction::Stwu {
                    rs: inst.rs(),
                    ra: inst.ra(),
                    d: inst.simm(),
                }
            }
            _ => return Err(FaultCode::IllegalInstruction),
        };
        Ok(decoded)
    }

    fn decode_xl(inst: Instruction) -> Result<DecodedInstruction, FaultCode> {
        match inst.xo10() {
            XO_BCLR => Ok(DecodedInstruction::Bclr {
                bo: inst.bo(),
                bi: inst.bi(),
                lk: inst.lk(),
            }),
            // bcctr with a CTR-decrementing BO is an invalid form.
            XO_BCCTR if inst.bo() & 0b00100 != 0 => Ok(DecodedInstruction::Bcctr {
                bo: inst.bo(),
                bi: inst.bi(),
                lk: inst.lk(),
            }),
            _ => Err(FaultCode::IllegalInstruction),
        }
    }

    fn decode_x(inst: Instruction) -> Result<DecodedInstruction, FaultCode> {
        match inst.xo9() {
            XO_ADD => {
                return Ok(DecodedInstruction::Add {
                    rd: inst.rd(),
                    ra: inst.ra(),
                    rb: inst.rb(),
                    rc: inst.lk(),
                })
            }
            XO_SUBF => {
                return Ok(DecodedInstruction::Subf {
                    rd: inst.rd(),
                    ra: inst.ra(),
                    rb: inst.rb(),
                    rc: inst.lk(),
                })
            }
            _ => {}
        }

        match inst.xo10() {
            XO_CMP => Ok(DecodedInstruction::Cmp {
                crf: inst.crfd(),
                ra: inst.ra(),
                rb: inst.rb(),
            }),
            XO_CMPL => Ok(DecodedInstruction::Cmpl {
                crf: inst.crfd(),
                ra: inst.ra(),
                rb: inst.rb(),
            }),
            XO_OR => Ok(DecodedInstruction::Or {
                ra: inst.ra(),
                rs: inst.rs(),
                rb: inst.rb(),
                rc: inst.lk(),
            }),
            XO_MFSPR => Spr::from_number(inst.spr())
                .map(|spr| DecodedInstruction::Mfspr { rd: inst.rd(), spr })
                .ok_or(FaultCode::UnsupportedSpr),
            XO_MTSPR => Spr::from_number(inst.spr())
                .map(|spr| DecodedInstruction::Mtspr { rs: inst.rs(), spr })
                .ok_or(FaultCode::UnsupportedSpr),
            _ => Err(FaultCode::IllegalInstruction),
        }
    }
}

//! Gekko instruction word layout, field accessors and opcode tables.
//!
//! Field names follow the PowerPC architecture manuals. Bit positions are
//! given in LSB-0 terms in the accessors below.

/// Encoded `blr` (branch to link register, unconditional).
pub const RETURN_INSTRUCTION: u32 = 0x4E80_0020;
/// Encoded `nop` (`ori r0, r0, 0`).
pub const NOP_INSTRUCTION: u32 = 0x6000_0000;

/// Primary opcode of `cmpli`.
pub const OPCD_CMPLI: u32 = 10;
/// Primary opcode of `cmpi`.
pub const OPCD_CMPI: u32 = 11;
/// Primary opcode of `addi`.
pub const OPCD_ADDI: u32 = 14;
/// Primary opcode of `addis`.
pub const OPCD_ADDIS: u32 = 15;
/// Primary opcode of `bc`.
pub const OPCD_BC: u32 = 16;
/// Primary opcode of `b`.
pub const OPCD_B: u32 = 18;
/// Primary opcode of the XL-form table (`bclr`, `bcctr`).
pub const OPCD_XL: u32 = 19;
/// Primary opcode of `ori`.
pub const OPCD_ORI: u32 = 24;
/// Primary opcode of `oris`.
pub const OPCD_ORIS: u32 = 25;
/// Primary opcode of the X/XO-form integer table.
pub const OPCD_X: u32 = 31;
/// Primary opcode of `lwz`.
pub const OPCD_LWZ: u32 = 32;
/// Primary opcode of `stw`.
pub const OPCD_STW: u32 = 36;
/// Primary opcode of `stwu`.
pub const OPCD_STWU: u32 = 37;

/// Extended opcode of `bclr` in the XL table.
pub const XO_BCLR: u32 = 16;
/// Extended opcode of `bcctr` in the XL table.
pub const XO_BCCTR: u32 = 528;
/// Extended opcode of `cmp` in the X table.
pub const XO_CMP: u32 = 0;
/// Extended opcode of `cmpl` in the X table.
pub const XO_CMPL: u32 = 32;
/// Extended opcode of `subf` in the XO table (9-bit form).
pub const XO_SUBF: u32 = 40;
/// Extended opcode of `add` in the XO table (9-bit form).
pub const XO_ADD: u32 = 266;
/// Extended opcode of `mfspr` in the X table.
pub const XO_MFSPR: u32 = 339;
/// Extended opcode of `or` in the X table.
pub const XO_OR: u32 = 444;
/// Extended opcode of `mtspr` in the X table.
pub const XO_MTSPR: u32 = 467;

/// Special-purpose register number of `LR`.
pub const SPR_LR: u32 = 8;
/// Special-purpose register number of `CTR`.
pub const SPR_CTR: u32 = 9;

/// `BO` value meaning "branch always".
pub const BO_ALWAYS: u32 = 0b10100;

/// Immutable snapshot of a 32-bit instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Instruction(pub u32);

#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
impl Instruction {
    /// Raw encoded word.
    #[must_use]
    pub const fn hex(self) -> u32 {
        self.0
    }

    /// Primary opcode (bits 31..26).
    #[must_use]
    pub const fn opcd(self) -> u32 {
        self.0 >> 26
    }

    /// Destination / source register field (bits 25..21).
    #[must_use]
    pub const fn rd(self) -> usize {
        ((self.0 >> 21) & 0x1F) as usize
    }

    /// Alias of [`Instruction::rd`] for store and logical forms.
    #[must_use]
    pub const fn rs(self) -> usize {
        self.rd()
    }

    /// First operand register field (bits 20..16).
    #[must_use]
    pub const fn ra(self) -> usize {
        ((self.0 >> 16) & 0x1F) as usize
    }

    /// Second operand register field (bits 15..11).
    #[must_use]
    pub const fn rb(self) -> usize {
        ((self.0 >> 11) & 0x1F) as usize
    }

    /// Sign-extended 16-bit immediate.
    #[must_use]
    pub const fn simm(self) -> i32 {
        (self.0 & 0xFFFF) as u16 as i16 as i32
    }

    /// Zero-extended 16-bit immediate.
    #[must_use]
    pub const fn uimm(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// Sign-extended 26-bit branch displacement of `b`.
    #[must_use]
    pub const fn li(self) -> i32 {
        (((self.0 & 0x03FF_FFFC) << 6) as i32) >> 6
    }

    /// Sign-extended 16-bit branch displacement of `bc`.
    #[must_use]
    pub const fn bd(self) -> i32 {
        (self.0 & 0xFFFC) as u16 as i16 as i32
    }

    /// Branch options field.
    #[must_use]
    pub const fn bo(self) -> u32 {
        (self.0 >> 21) & 0x1F
    }

    /// Branch condition bit index into `CR`.
    #[must_use]
    pub const fn bi(self) -> u32 {
        (self.0 >> 16) & 0x1F
    }

    /// Absolute-address flag.
    #[must_use]
    pub const fn aa(self) -> bool {
        (self.0 >> 1) & 1 == 1
    }

    /// Link flag (also the record bit on non-branch forms).
    #[must_use]
    pub const fn lk(self) -> bool {
        self.0 & 1 == 1
    }

    /// 10-bit extended opcode of X and XL forms.
    #[must_use]
    pub const fn xo10(self) -> u32 {
        (self.0 >> 1) & 0x3FF
    }

    /// 9-bit extended opcode of XO forms.
    #[must_use]
    pub const fn xo9(self) -> u32 {
        (self.0 >> 1) & 0x1FF
    }

    /// Destination `CR` field of compares.
    #[must_use]
    pub const fn crfd(self) -> u32 {
        (self.0 >> 23) & 0x7
    }

    /// Special-purpose register number with the split halves swapped back.
    #[must_use]
    pub const fn spr(self) -> u32 {
        let field = (self.0 >> 11) & 0x3FF;
        ((field & 0x1F) << 5) | (field >> 5)
    }

    /// Returns `true` for the branch opcodes `b`, `bc`, `bclr` and `bcctr`.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        match self.opcd() {
            OPCD_B | OPCD_BC => true,
            OPCD_XL => matches!(self.xo10(), XO_BCLR | XO_BCCTR),
            _ => false,
        }
    }

    /// Returns `true` for a branch that writes the return address into `LR`.
    #[must_use]
    pub const fn is_linking_branch(self) -> bool {
        self.is_branch() && self.lk()
    }

    /// Returns `true` for the exact unconditional `blr` word.
    #[must_use]
    pub const fn is_return(self) -> bool {
        self.0 == RETURN_INSTRUCTION
    }

    /// Encodes `b`/`bl` from `from` to `to` as a relative branch.
    #[must_use]
    pub const fn branch(from: u32, to: u32, link: bool) -> Self {
        let offset = to.wrapping_sub(from) & 0x03FF_FFFC;
        Self((OPCD_B << 26) | offset | link as u32)
    }

    /// Encodes `bc BO, BI` from `from` to `to` as a relative branch.
    #[must_use]
    pub const fn branch_conditional(bo: u32, bi: u32, from: u32, to: u32, link: bool) -> Self {
        let offset = to.wrapping_sub(from) & 0xFFFC;
        Self((OPCD_BC << 26) | ((bo & 0x1F) << 21) | ((bi & 0x1F) << 16) | offset | link as u32)
    }

    /// Encodes `addi rd, ra, simm` (`li` when `ra` is 0).
    #[must_use]
    pub const fn addi(rd: usize, ra: usize, simm: i16) -> Self {
        Self(
            (OPCD_ADDI << 26)
                | (((rd as u32) & 0x1F) << 21)
                | (((ra as u32) & 0x1F) << 16)
                | (simm as u16 as u32),
        )
    }

    /// Encodes `cmpwi crf, ra, simm`.
    #[must_use]
    pub const fn cmpwi(crf: u32, ra: usize, simm: i16) -> Self {
        Self(
            (OPCD_CMPI << 26)
                | ((crf & 7) << 23)
                | (((ra as u32) & 0x1F) << 16)
                | (simm as u16 as u32),
        )
    }

    /// Encodes `stw rs, d(ra)`.
    #[must_use]
    pub const fn stw(rs: usize, ra: usize, d: i16) -> Self {
        Self(
            (OPCD_STW << 26)
                | (((rs as u32) & 0x1F) << 21)
                | (((ra as u32) & 0x1F) << 16)
                | (d as u16 as u32),
        )
    }

    /// Encodes `lwz rd, d(ra)`.
    #[must_use]
    pub const fn lwz(rd: usize, ra: usize, d: i16) -> Self {
        Self(
            (OPCD_LWZ << 26)
                | (((rd as u32) & 0x1F) << 21)
                | (((ra as u32) & 0x1F) << 16)
                | (d as u16 as u32),
        )
    }

    /// Encodes `mfspr rd, spr`.
    #[must_use]
    pub const fn mfspr(rd: usize, spr: u32) -> Self {
        Self(Self::x_form_spr(XO_MFSPR, rd, spr))
    }

    /// Encodes `mtspr spr, rs`.
    #[must_use]
    pub const fn mtspr(spr: u32, rs: usize) -> Self {
        Self(Self::x_form_spr(XO_MTSPR, rs, spr))
    }

    const fn x_form_spr(xo: u32, reg: usize, spr: u32) -> u32 {
        let split = ((spr & 0x1F) << 5) | ((spr >> 5) & 0x1F);
        (OPCD_X << 26) | (((reg as u32) & 0x1F) << 21) | (split << 11) | (xo << 1)
    }
}

impl From<u32> for Instruction {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

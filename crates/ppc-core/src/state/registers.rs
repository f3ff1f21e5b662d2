/// Number of architecturally visible general-purpose registers (`r0..r31`).
pub const GENERAL_REGISTER_COUNT: usize = 32;
/// Index of the stack pointer by ABI convention.
pub const STACK_POINTER: usize = 1;

/// `CR` field bit for "less than".
pub const CR_LT: u32 = 0x8;
/// `CR` field bit for "greater than".
pub const CR_GT: u32 = 0x4;
/// `CR` field bit for "equal".
pub const CR_EQ: u32 = 0x2;
/// `CR` field bit for summary overflow.
pub const CR_SO: u32 = 0x1;

/// Architectural register file for the Gekko core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    gpr: [u32; GENERAL_REGISTER_COUNT],
    pc: u32,
    lr: u32,
    ctr: u32,
    cr: u32,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            gpr: [0; GENERAL_REGISTER_COUNT],
            pc: 0,
            lr: 0,
            ctr: 0,
            cr: 0,
        }
    }
}

impl RegisterFile {
    /// Reads a general-purpose register. Indices wrap modulo 32.
    #[must_use]
    pub const fn gpr(&self, index: usize) -> u32 {
        self.gpr[index % GENERAL_REGISTER_COUNT]
    }

    /// Writes a general-purpose register. Indices wrap modulo 32.
    pub const fn set_gpr(&mut self, index: usize, value: u32) {
        self.gpr[index % GENERAL_REGISTER_COUNT] = value;
    }

    /// Reads the program counter.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Writes the program counter.
    pub const fn set_pc(&mut self, value: u32) {
        self.pc = value;
    }

    /// Reads the link register.
    #[must_use]
    pub const fn lr(&self) -> u32 {
        self.lr
    }

    /// Writes the link register.
    pub const fn set_lr(&mut self, value: u32) {
        self.lr = value;
    }

    /// Reads the count register.
    #[must_use]
    pub const fn ctr(&self) -> u32 {
        self.ctr
    }

    /// Writes the count register.
    pub const fn set_ctr(&mut self, value: u32) {
        self.ctr = value;
    }

    /// Reads the whole condition register.
    #[must_use]
    pub const fn cr(&self) -> u32 {
        self.cr
    }

    /// Writes the whole condition register.
    pub const fn set_cr(&mut self, value: u32) {
        self.cr = value;
    }

    /// Reads one 4-bit `CR` field (`0` is the most significant nibble).
    #[must_use]
    pub const fn cr_field(&self, field: u32) -> u32 {
        (self.cr >> (28 - 4 * (field & 7))) & 0xF
    }

    /// Replaces one 4-bit `CR` field.
    pub const fn set_cr_field(&mut self, field: u32, value: u32) {
        let shift = 28 - 4 * (field & 7);
        self.cr = (self.cr & !(0xF << shift)) | ((value & 0xF) << shift);
    }

    /// Reads a single `CR` bit using big-endian bit numbering (`0` is the MSB).
    #[must_use]
    pub const fn cr_bit(&self, bit: u32) -> bool {
        (self.cr >> (31 - (bit & 31))) & 1 == 1
    }

    /// Stack pointer (`r1`).
    #[must_use]
    pub const fn sp(&self) -> u32 {
        self.gpr[STACK_POINTER]
    }
}

#[cfg(test)]
mod tests {
    use super::{RegisterFile, CR_EQ, CR_GT, CR_LT};

    #[test]
    fn default_register_file_is_zeroed() {
        let regs = RegisterFile::default();
        assert_eq!(regs.pc(), 0);
        assert_eq!(regs.lr(), 0);
        assert_eq!(regs.ctr(), 0);
        assert_eq!(regs.cr(), 0);
        assert!((0..32).all(|i| regs.gpr(i) == 0));
    }

    #[test]
    fn cr_field_updates_only_touch_their_nibble() {
        let mut regs = RegisterFile::default();
        regs.set_cr(0xFFFF_FFFF);
        regs.set_cr_field(0, CR_EQ);
        assert_eq!(regs.cr(), 0x2FFF_FFFF);
        regs.set_cr_field(7, CR_LT);
        assert_eq!(regs.cr(), 0x2FFF_FFF8);
        assert_eq!(regs.cr_field(0), CR_EQ);
        assert_eq!(regs.cr_field(7), CR_LT);
    }

    #[test]
    fn cr_bits_use_big_endian_numbering() {
        let mut regs = RegisterFile::default();
        regs.set_cr_field(0, CR_GT);
        assert!(!regs.cr_bit(0));
        assert!(regs.cr_bit(1));
        assert!(!regs.cr_bit(2));
        regs.set_cr_field(1, CR_EQ);
        assert!(regs.cr_bit(6));
    }

    #[test]
    fn stack_pointer_aliases_r1() {
        let mut regs = RegisterFile::default();
        regs.set_gpr(1, 0x8000_1000);
        assert_eq!(regs.sp(), 0x8000_1000);
    }
}

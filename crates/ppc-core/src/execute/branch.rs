//! Branch condition evaluation for the `BO`/`BI` fields.

use crate::state::RegisterFile;

/// `BO` bit: do not test the condition register.
pub const BO_IGNORE_CONDITION: u32 = 0b10000;
/// `BO` bit: the condition value the tested `CR` bit must equal.
pub const BO_CONDITION_TRUE: u32 = 0b01000;
/// `BO` bit: do not decrement `CTR`.
pub const BO_KEEP_CTR: u32 = 0b00100;
/// `BO` bit: branch when the decremented `CTR` is zero instead of non-zero.
pub const BO_CTR_ZERO: u32 = 0b00010;

/// Result of evaluating a conditional branch against the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchDecision {
    /// Whether the branch is taken.
    pub taken: bool,
    /// `CTR` after the optional decrement.
    pub ctr: u32,
}

/// Evaluates the `BO`/`BI` condition, decrementing `CTR` when the form asks for it.
#[must_use]
pub const fn evaluate(bo: u32, bi: u32, regs: &RegisterFile) -> BranchDecision {
    let mut ctr = regs.ctr();
    let ctr_ok = if bo & BO_KEEP_CTR == 0 {
        ctr = ctr.wrapping_sub(1);
        (ctr != 0) != (bo & BO_CTR_ZERO != 0)
    } else {
        true
    };
    let cond_ok =
        bo & BO_IGNORE_CONDITION != 0 || regs.cr_bit(bi) == (bo & BO_CONDITION_TRUE != 0);
    BranchDecision {
        taken: ctr_ok && cond_ok,
        ctr,
    }
}

/// Resolves a relative or absolute displacement into a target address.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn displacement_target(pc: u32, displacement: i32, absolute: bool) -> u32 {
    if absolute {
        displacement as u32
    } else {
        pc.wrapping_add(displacement as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::{displacement_target, evaluate};
    use crate::encoding::BO_ALWAYS;
    use crate::state::{RegisterFile, CR_EQ};

    #[test]
    fn branch_always_keeps_ctr() {
        let mut regs = RegisterFile::default();
        regs.set_ctr(5);
        let decision = evaluate(BO_ALWAYS, 0, &regs);
        assert!(decision.taken);
        assert_eq!(decision.ctr, 5);
    }

    #[test]
    fn bdnz_counts_down_and_falls_through_at_zero() {
        let mut regs = RegisterFile::default();
        regs.set_ctr(2);
        let first = evaluate(16, 0, &regs);
        assert!(first.taken);
        assert_eq!(first.ctr, 1);
        regs.set_ctr(first.ctr);
        let second = evaluate(16, 0, &regs);
        assert!(!second.taken);
        assert_eq!(second.ctr, 0);
    }

    #[test]
    fn beq_tests_cr0_eq() {
        let mut regs = RegisterFile::default();
        // beq: BO = 12, BI = 2
        assert!(!evaluate(12, 2, &regs).taken);
        regs.set_cr_field(0, CR_EQ);
        assert!(evaluate(12, 2, &regs).taken);
        // bne: BO = 4, BI = 2
        assert!(!evaluate(4, 2, &regs).taken);
    }

    #[test]
    fn displacement_wraps_backwards() {
        assert_eq!(displacement_target(0x8000_0010, -16, false), 0x8000_0000);
        assert_eq!(displacement_target(0x8000_0010, 0x100, true), 0x100);
    }
}

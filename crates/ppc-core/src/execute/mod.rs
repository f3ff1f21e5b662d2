//! Precise interpreter for the decoded instruction subset.
//!
//! Execution happens in two phases: [`execute_instruction`] reads operands and
//! computes every side effect into an [`ExecuteState`], then
//! [`commit_execution`] applies them. A faulting instruction never reaches the
//! commit phase, so it leaves registers and memory untouched.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

mod branch;

pub use branch::{displacement_target, evaluate as evaluate_branch, BranchDecision};

use crate::decoder::{DecodedInstruction, Spr};
use crate::memory::Memory;
use crate::state::{RegisterFile, CR_EQ, CR_GT, CR_LT};
use crate::FaultCode;

/// Side effects accumulated by one instruction before commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteState {
    /// General-purpose register write.
    pub gpr_write: Option<(usize, u32)>,
    /// Second general-purpose register write (`stwu` base update).
    pub base_update: Option<(usize, u32)>,
    /// Word store to memory.
    pub memory_write: Option<(u32, u32)>,
    /// New link register value.
    pub lr: Option<u32>,
    /// New count register value.
    pub ctr: Option<u32>,
    /// Condition register field update.
    pub cr_field: Option<(u32, u32)>,
    /// Program counter after the instruction.
    pub next_pc: u32,
}

impl ExecuteState {
    const fn sequential(pc: u32) -> Self {
        Self {
            gpr_write: None,
            base_update: None,
            memory_write: None,
            lr: None,
            ctr: None,
            cr_field: None,
            next_pc: pc.wrapping_add(4),
        }
    }
}

/// Computes the side effects of `instr` located at `pc`.
///
/// # Errors
///
/// Returns the memory fault raised by a load or store. Nothing is committed.
pub fn execute_instruction(
    instr: DecodedInstruction,
    pc: u32,
    regs: &RegisterFile,
    memory: &Memory,
) -> Result<ExecuteState, FaultCode> {
    let mut exec = ExecuteState::sequential(pc);

    match instr {
        DecodedInstruction::Addi { rd, ra, simm } => {
            exec.gpr_write = Some((rd, base_or_zero(regs, ra).wrapping_add(simm as u32)));
        }
        DecodedInstruction::Addis { rd, ra, simm } => {
            let shifted = (simm as u32) << 16;
            exec.gpr_write = Some((rd, base_or_zero(regs, ra).wrapping_add(shifted)));
        }
        DecodedInstruction::Ori { ra, rs, uimm } => {
            exec.gpr_write = Some((ra, regs.gpr(rs) | uimm));
        }
        DecodedInstruction::Oris { ra, rs, uimm } => {
            exec.gpr_write = Some((ra, regs.gpr(rs) | (uimm << 16)));
        }
        DecodedInstruction::Cmpi { crf, ra, simm } => {
            exec.cr_field = Some((crf, compare_signed(regs.gpr(ra) as i32, simm, regs)));
        }
        DecodedInstruction::Cmpli { crf, ra, uimm } => {
            exec.cr_field = Some((crf, compare_unsigned(regs.gpr(ra), uimm, regs)));
        }
        DecodedInstruction::Cmp { crf, ra, rb } => {
            let value = compare_signed(regs.gpr(ra) as i32, regs.gpr(rb) as i32, regs);
            exec.cr_field = Some((crf, value));
        }
        DecodedInstruction::Cmpl { crf, ra, rb } => {
            exec.cr_field = Some((crf, compare_unsigned(regs.gpr(ra), regs.gpr(rb), regs)));
        }
        DecodedInstruction::Lwz { rd, ra, d } => {
            let ea = base_or_zero(regs, ra).wrapping_add(d as u32);
            exec.gpr_write = Some((rd, memory.read_u32(ea)?));
        }
        DecodedInstruction::Stw { rs, ra, d } => {
            let ea = base_or_zero(regs, ra).wrapping_add(d as u32);
            probe_store(memory, ea)?;
            exec.memory_write = Some((ea, regs.gpr(rs)));
        }
        DecodedInstruction::Stwu { rs, ra, d } => {
            let ea = regs.gpr(ra).wrapping_add(d as u32);
            probe_store(memory, ea)?;
            exec.memory_write = Some((ea, regs.gpr(rs)));
            exec.base_update = Some((ra, ea));
        }
        DecodedInstruction::Add { rd, ra, rb, rc } => {
            let value = regs.gpr(ra).wrapping_add(regs.gpr(rb));
            write_with_record(&mut exec, rd, value, rc, regs);
        }
        DecodedInstruction::Subf { rd, ra, rb, rc } => {
            let value = regs.gpr(rb).wrapping_sub(regs.gpr(ra));
            write_with_record(&mut exec, rd, value, rc, regs);
        }
        DecodedInstruction::Or { ra, rs, rb, rc } => {
            let value = regs.gpr(rs) | regs.gpr(rb);
            write_with_record(&mut exec, ra, value, rc, regs);
        }
        DecodedInstruction::Mfspr { rd, spr } => {
            let value = match spr {
                Spr::Lr => regs.lr(),
                Spr::Ctr => regs.ctr(),
            };
            exec.gpr_write = Some((rd, value));
        }
        DecodedInstruction::Mtspr { rs, spr } => match spr {
            Spr::Lr => exec.lr = Some(regs.gpr(rs)),
            Spr::Ctr => exec.ctr = Some(regs.gpr(rs)),
        },
        DecodedInstruction::B { li, aa, lk } => {
            exec.next_pc = displacement_target(pc, li, aa);
            link(&mut exec, pc, lk);
        }
        DecodedInstruction::Bc { bo, bi, bd, aa, lk } => {
            let decision = evaluate_branch(bo, bi, regs);
            if decision.ctr != regs.ctr() {
                exec.ctr = Some(decision.ctr);
            }
            if decision.taken {
                exec.next_pc = displacement_target(pc, bd, aa);
            }
            link(&mut exec, pc, lk);
        }
        DecodedInstruction::Bclr { bo, bi, lk } => {
            let decision = evaluate_branch(bo, bi, regs);
            if decision.ctr != regs.ctr() {
                exec.ctr = Some(decision.ctr);
            }
            if decision.taken {
                exec.next_pc = regs.lr() & !3;
            }
            link(&mut exec, pc, lk);
        }
        DecodedInstruction::Bcctr { bo, bi, lk } => {
            if evaluate_branch(bo, bi, regs).taken {
                exec.next_pc = regs.ctr() & !3;
            }
            link(&mut exec, pc, lk);
        }
    }

    Ok(exec)
}

/// Applies the side effects computed by [`execute_instruction`].
///
/// # Errors
///
/// Propagates a memory fault from the store. Stores are probed during
/// execution, so this only fails if memory changed shape in between.
pub fn commit_execution(
    exec: &ExecuteState,
    regs: &mut RegisterFile,
    memory: &mut Memory,
) -> Result<(), FaultCode> {
    if let Some((addr, value)) = exec.memory_write {
        memory.write_u32(addr, value)?;
    }
    if let Some((index, value)) = exec.gpr_write {
        regs.set_gpr(index, value);
    }
    if let Some((index, value)) = exec.base_update {
        regs.set_gpr(index, value);
    }
    if let Some(lr) = exec.lr {
        regs.set_lr(lr);
    }
    if let Some(ctr) = exec.ctr {
        regs.set_ctr(ctr);
    }
    if let Some((field, value)) = exec.cr_field {
        regs.set_cr_field(field, value);
    }
    regs.set_pc(exec.next_pc);
    Ok(())
}

/// Executes one already-decoded instruction at the current PC and commits it.
///
/// # Errors
///
/// Returns the fault raised by the instruction; state is unchanged on error.
pub fn step_decoded(
    instr: DecodedInstruction,
    regs: &mut RegisterFile,
    memory: &mut Memory,
) -> Result<(), FaultCode> {
    let exec = execute_instruction(instr, regs.pc(), regs, memory)?;
    commit_execution(&exec, regs, memory)
}

// rA = 0 means literal zero for D-form arithmetic and addressing.
const fn base_or_zero(regs: &RegisterFile, ra: usize) -> u32 {
    if ra == 0 {
        0
    } else {
        regs.gpr(ra)
    }
}

fn probe_store(memory: &Memory, ea: u32) -> Result<(), FaultCode> {
    memory.read_u32(ea).map(|_| ())
}

const fn link(exec: &mut ExecuteState, pc: u32, lk: bool) {
    if lk {
        exec.lr = Some(pc.wrapping_add(4));
    }
}

fn write_with_record(
    exec: &mut ExecuteState,
    rd: usize,
    value: u32,
    record: bool,
    regs: &RegisterFile,
) {
    exec.gpr_write = Some((rd, value));
    if record {
        exec.cr_field = Some((0, compare_signed(value as i32, 0, regs)));
    }
}

fn compare_signed(a: i32, b: i32, regs: &RegisterFile) -> u32 {
    ordering_bits(a.cmp(&b)) | summary_overflow(regs)
}

fn compare_unsigned(a: u32, b: u32, regs: &RegisterFile) -> u32 {
    ordering_bits(a.cmp(&b)) | summary_overflow(regs)
}

const fn ordering_bits(ordering: std::cmp::Ordering) -> u32 {
    match ordering {
        std::cmp::Ordering::Less => CR_LT,
        std::cmp::Ordering::Greater => CR_GT,
        std::cmp::Ordering::Equal => CR_EQ,
    }
}

// XER is not modelled; SO carries over from CR0.
const fn summary_overflow(regs: &RegisterFile) -> u32 {
    regs.cr_field(0) & crate::state::CR_SO
}

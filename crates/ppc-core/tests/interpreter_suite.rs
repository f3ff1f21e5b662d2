//! Interpreter and block cache integration coverage.

#![allow(clippy::pedantic, clippy::nursery)]

use log as _;
use ppc_core::{
    CoreConfig, Cpu, Decoder, ExecutionMode, FaultCode, Instruction, RunStop, StepOutcome,
    BO_ALWAYS, CR_EQ, CR_GT, CR_LT, NOP_INSTRUCTION, RETURN_INSTRUCTION, SPR_CTR, SPR_LR,
};
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const BASE: u32 = 0x8000_0000;

fn cpu_with(words: &[u32], mode: ExecutionMode) -> Cpu {
    let mut cpu = Cpu::new(CoreConfig {
        ram_size: 0x1_0000,
        initial_mode: mode,
        ..CoreConfig::default()
    });
    cpu.memory_mut().write_words(BASE, words).expect("program fits");
    cpu.regs_mut().set_gpr(1, BASE + 0x8000);
    cpu
}

/// Sums 1..=5 with a `bdnz` loop, calls a leaf that doubles r3, then spins on `b .`.
fn counting_program() -> Vec<u32> {
    vec![
        Instruction::addi(3, 0, 0).hex(),            // 00 li r3, 0
        Instruction::addi(4, 0, 5).hex(),            // 04 li r4, 5
        Instruction::mtspr(SPR_CTR, 4).hex(),        // 08 mtctr r4
        0x7C63_2214,                                 // 0c add r3, r3, r4
        Instruction::addi(4, 4, -1).hex(),           // 10 addi r4, r4, -1
        Instruction::branch_conditional(16, 0, BASE + 0x14, BASE + 0x0C, false).hex(), // 14 bdnz
        Instruction::branch(BASE + 0x18, BASE + 0x30, true).hex(), // 18 bl double
        Instruction::cmpwi(0, 3, 30).hex(),          // 1c cmpwi r3, 30
        Instruction::branch(BASE + 0x20, BASE + 0x20, false).hex(), // 20 b .
        NOP_INSTRUCTION,                             // 24
        NOP_INSTRUCTION,                             // 28
        NOP_INSTRUCTION,                             // 2c
        Instruction::mfspr(0, SPR_LR).hex(),         // 30 mflr r0
        Instruction::stw(0, 1, 4).hex(),             // 34 stw r0, 4(r1)
        0x7C63_1A14,                                 // 38 add r3, r3, r3
        Instruction::lwz(0, 1, 4).hex(),             // 3c lwz r0, 4(r1)
        Instruction::mtspr(SPR_LR, 0).hex(),         // 40 mtlr r0
        RETURN_INSTRUCTION,                          // 44 blr
    ]
}

#[rstest]
#[case::interpreted(ExecutionMode::Interpreted)]
#[case::compiled(ExecutionMode::Compiled)]
fn counting_program_reaches_spin_loop(#[case] mode: ExecutionMode) {
    let mut cpu = cpu_with(&counting_program(), mode);
    cpu.breakpoints_mut().add(BASE + 0x20, false);

    let outcome = cpu.run(1_000);

    assert_eq!(
        outcome.stop,
        RunStop::Breakpoint {
            pc: BASE + 0x20,
            temporary: false
        }
    );
    assert_eq!(cpu.regs().gpr(3), 30);
    assert_eq!(cpu.regs().cr_field(0), CR_EQ);
    assert_eq!(cpu.regs().ctr(), 0);
    assert_eq!(cpu.memory().read_u32(BASE + 0x8004), Ok(BASE + 0x1C));
    assert!(cpu.is_stepping());
}

#[rstest]
#[case::lt(5, 9, CR_LT)]
#[case::gt(9, 5, CR_GT)]
#[case::eq(7, 7, CR_EQ)]
#[case::negative(-1, 0, CR_LT)]
fn signed_compare_sets_cr0(#[case] value: i16, #[case] imm: i16, #[case] expected: u32) {
    let mut cpu = cpu_with(
        &[Instruction::addi(3, 0, value).hex(), Instruction::cmpwi(0, 3, imm).hex()],
        ExecutionMode::Interpreted,
    );
    cpu.enable_stepping(true);
    cpu.single_step();
    cpu.single_step();
    assert_eq!(cpu.regs().cr_field(0), expected);
}

#[rstest]
#[case::beq_taken(12, 2, CR_EQ, true)]
#[case::beq_not_taken(12, 2, CR_GT, false)]
#[case::bne_taken(4, 2, CR_LT, true)]
#[case::bgt_taken(12, 1, CR_GT, true)]
#[case::always(BO_ALWAYS, 0, 0, true)]
fn conditional_branches_follow_cr0(
    #[case] bo: u32,
    #[case] bi: u32,
    #[case] cr0: u32,
    #[case] taken: bool,
) {
    let mut cpu = cpu_with(
        &[Instruction::branch_conditional(bo, bi, BASE, BASE + 0x40, false).hex()],
        ExecutionMode::Interpreted,
    );
    cpu.regs_mut().set_cr_field(0, cr0);
    cpu.enable_stepping(true);
    cpu.single_step();
    let expected = if taken { BASE + 0x40 } else { BASE + 4 };
    assert_eq!(cpu.pc(), expected);
}

#[test]
fn stale_block_runs_until_invalidated() {
    let mut cpu = cpu_with(
        &[Instruction::addi(3, 0, 1).hex(), RETURN_INSTRUCTION],
        ExecutionMode::Compiled,
    );
    cpu.regs_mut().set_lr(BASE);
    cpu.enable_stepping(false);
    cpu.run(2);
    assert_eq!(cpu.regs().gpr(3), 1);

    cpu.memory_mut()
        .write_u32(BASE, Instruction::addi(3, 0, 2).hex())
        .expect("in range");
    cpu.run(2);
    assert_eq!(cpu.regs().gpr(3), 1, "cached block still executes old code");

    cpu.invalidate_icache(BASE, 4, false);
    cpu.run(2);
    assert_eq!(cpu.regs().gpr(3), 2);
}

#[test]
fn fault_in_middle_of_block_keeps_earlier_work() {
    let mut cpu = cpu_with(
        &[
            Instruction::addi(3, 0, 7).hex(),
            Instruction::lwz(4, 0, 0x10).hex(),
            NOP_INSTRUCTION,
        ],
        ExecutionMode::Compiled,
    );
    let outcome = cpu.run(10);
    assert_eq!(
        outcome.stop,
        RunStop::Fault {
            cause: FaultCode::UnmappedAccess,
            pc: BASE + 4
        }
    );
    assert_eq!(outcome.instructions, 1);
    assert_eq!(cpu.regs().gpr(3), 7);
    assert_eq!(cpu.pc(), BASE + 4);
}

proptest! {
    #[test]
    fn property_decode_faults_are_decode_class(word in any::<u32>()) {
        if let Err(cause) = Decoder::decode(Instruction(word)) {
            prop_assert!(matches!(cause, FaultCode::IllegalInstruction | FaultCode::UnsupportedSpr));
        }
    }

    #[test]
    fn property_faulting_step_is_precise(word in any::<u32>()) {
        let mut cpu = cpu_with(&[word], ExecutionMode::Interpreted);
        cpu.enable_stepping(true);
        let regs_before = cpu.regs().clone();
        let memory_before = cpu.memory().clone();
        if let StepOutcome::Fault { pc, .. } = cpu.single_step() {
            prop_assert_eq!(pc, BASE);
            prop_assert_eq!(cpu.regs(), &regs_before);
            prop_assert_eq!(cpu.memory(), &memory_before);
        }
    }

    #[test]
    fn property_linking_branch_sets_lr_to_next_instruction(offset in -0x1000i32..0x1000) {
        let target = BASE.wrapping_add(0x4000).wrapping_add((offset * 4) as u32);
        let from = BASE + 0x4000;
        let mut cpu = cpu_with(&[], ExecutionMode::Interpreted);
        cpu.memory_mut()
            .write_u32(from, Instruction::branch(from, target, true).hex())
            .expect("in range");
        cpu.set_pc(from);
        cpu.enable_stepping(true);
        prop_assert!(cpu.read_instruction(from).is_linking_branch());
        cpu.single_step();
        prop_assert_eq!(cpu.pc(), target);
        prop_assert_eq!(cpu.regs().lr(), from + 4);
    }
}

//! Capabilities the stepping controller needs from a CPU core.

use ppc_core::{Cpu, ExecutionMode, Instruction, StepOutcome};

/// CPU-side operations driven by [`crate::SteppingController`].
///
/// Implemented for [`ppc_core::Cpu`]; tests wrap it to observe call order.
pub trait CpuControl {
    /// Returns `true` while the core is paused for stepping.
    fn is_stepping(&self) -> bool;

    /// Pauses (`true`) or resumes (`false`) free execution.
    fn enable_stepping(&mut self, stepping: bool);

    /// Retires one unit of work at PC.
    fn single_step(&mut self) -> StepOutcome;

    /// Program counter.
    fn pc(&self) -> u32;

    /// Fetches the instruction word at `addr`; unmapped addresses read as `0`.
    fn read_instruction(&self, addr: u32) -> Instruction;

    /// Drops compiled code covering `[addr, addr + len)`.
    fn invalidate_icache(&mut self, addr: u32, len: u32, force: bool);

    /// Removes every temporary breakpoint.
    fn clear_temporary_breakpoints(&mut self);

    /// Installs a breakpoint.
    fn add_breakpoint(&mut self, addr: u32, temporary: bool);

    /// Flips a persistent breakpoint; returns whether one is now installed.
    fn toggle_breakpoint(&mut self, addr: u32) -> bool;

    /// Current execution mode.
    fn mode(&self) -> ExecutionMode;

    /// Switches execution mode.
    fn set_mode(&mut self, mode: ExecutionMode);

    /// Number of single steps a step-out may spend.
    fn ticks_per_second(&self) -> u64;
}

impl CpuControl for Cpu {
    fn is_stepping(&self) -> bool {
        Self::is_stepping(self)
    }

    fn enable_stepping(&mut self, stepping: bool) {
        Self::enable_stepping(self, stepping);
    }

    fn single_step(&mut self) -> StepOutcome {
        Self::single_step(self)
    }

    fn pc(&self) -> u32 {
        Self::pc(self)
    }

    fn read_instruction(&self, addr: u32) -> Instruction {
        Self::read_instruction(self, addr)
    }

    fn invalidate_icache(&mut self, addr: u32, len: u32, force: bool) {
        Self::invalidate_icache(self, addr, len, force);
    }

    fn clear_temporary_breakpoints(&mut self) {
        self.breakpoints_mut().clear_temporary();
    }

    fn add_breakpoint(&mut self, addr: u32, temporary: bool) {
        self.breakpoints_mut().add(addr, temporary);
    }

    fn toggle_breakpoint(&mut self, addr: u32) -> bool {
        self.breakpoints_mut().toggle(addr)
    }

    fn mode(&self) -> ExecutionMode {
        Self::mode(self)
    }

    fn set_mode(&mut self, mode: ExecutionMode) {
        Self::set_mode(self, mode);
    }

    fn ticks_per_second(&self) -> u64 {
        Self::ticks_per_second(self)
    }
}

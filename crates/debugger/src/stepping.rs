//! Step into / over / out and breakpoint toggling.
//!
//! Every operation is a no-op unless the core is paused in the stepping
//! state. Operations are serialized through an in-flight gate shared by all
//! clones of a [`SteppingController`], so a second request issued while one is
//! still pending is rejected instead of queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use ppc_core::{ExecutionMode, FaultCode, StepOutcome};
use thiserror::Error;

use crate::control::CpuControl;
use crate::mode_guard::ModeGuard;

/// Result of step-into, step-over and related commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// One instruction retired; the view should re-centre on `pc`.
    Stepped {
        /// PC after the step.
        pc: u32,
    },
    /// The core was resumed and will pause at the temporary breakpoint `until`.
    Resumed {
        /// Address of the temporary breakpoint.
        until: u32,
    },
    /// The instruction at `pc` faulted and did not retire.
    Faulted {
        /// Fault cause.
        cause: FaultCode,
        /// Address of the faulting instruction.
        pc: u32,
    },
    /// The core was not paused; nothing happened.
    NotApplicable,
}

/// Result of a step-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutResult {
    /// A `blr` was found and retired; `pc` is in the caller.
    ReturnedNormally {
        /// PC after the return.
        pc: u32,
        /// Single steps spent, including the return itself.
        steps: u64,
    },
    /// The step budget ran out before a return was reached.
    TimedOut {
        /// PC where stepping stopped.
        pc: u32,
        /// Single steps spent; equals the budget.
        steps: u64,
    },
    /// An instruction faulted before a return was reached.
    Faulted {
        /// Fault cause.
        cause: FaultCode,
        /// Address of the faulting instruction.
        pc: u32,
        /// Single steps retired before the fault.
        steps: u64,
    },
    /// The core was not paused; nothing happened.
    NotApplicable,
}

/// Result of toggling a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleStatus {
    /// A breakpoint is now installed at `addr`.
    Set {
        /// Breakpoint address.
        addr: u32,
    },
    /// The breakpoint at `addr` was removed.
    Cleared {
        /// Breakpoint address.
        addr: u32,
    },
    /// The core was not paused; nothing happened.
    NotApplicable,
}

/// Errors raised by the controller itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StepError {
    /// Another step operation has not finished yet.
    #[error("a step operation is already in flight")]
    Busy,
}

/// Holds the in-flight gate until dropped.
#[derive(Debug)]
pub struct Reservation {
    gate: Arc<AtomicBool>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.gate.store(false, Ordering::Release);
    }
}

/// Serializing front end for the stepping operations.
#[derive(Debug, Clone, Default)]
pub struct SteppingController {
    in_flight: Arc<AtomicBool>,
}

impl SteppingController {
    /// Creates a controller with an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a reservation is held.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the gate for an operation that completes elsewhere, such as on
    /// the core thread.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Busy`] if another reservation is alive.
    pub fn reserve(&self) -> Result<Reservation, StepError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StepError::Busy)?;
        Ok(Reservation {
            gate: Arc::clone(&self.in_flight),
        })
    }

    /// Gated [`step_into`].
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Busy`] if another operation is in flight.
    pub fn step_into<C: CpuControl + ?Sized>(&self, cpu: &mut C) -> Result<StepStatus, StepError> {
        let _reservation = self.reserve()?;
        Ok(step_into(cpu))
    }

    /// Gated [`step_over`].
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Busy`] if another operation is in flight.
    pub fn step_over<C: CpuControl + ?Sized>(&self, cpu: &mut C) -> Result<StepStatus, StepError> {
        let _reservation = self.reserve()?;
        Ok(step_over(cpu))
    }

    /// Gated [`step_out`].
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Busy`] if another operation is in flight.
    pub fn step_out<C: CpuControl + ?Sized>(
        &self,
        cpu: &mut C,
    ) -> Result<StepOutResult, StepError> {
        let _reservation = self.reserve()?;
        Ok(step_out(cpu))
    }

    /// Gated [`toggle_breakpoint`].
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Busy`] if another operation is in flight.
    pub fn toggle_breakpoint<C: CpuControl + ?Sized>(
        &self,
        cpu: &mut C,
        addr: u32,
    ) -> Result<ToggleStatus, StepError> {
        let _reservation = self.reserve()?;
        Ok(toggle_breakpoint(cpu, addr))
    }
}

/// Executes exactly one instruction at PC.
///
/// Temporary breakpoints are cleared and the compiled block at PC is dropped
/// first, so a cached multi-instruction block cannot run as one step.
pub fn step_into<C: CpuControl + ?Sized>(cpu: &mut C) -> StepStatus {
    if !cpu.is_stepping() {
        return StepStatus::NotApplicable;
    }
    cpu.clear_temporary_breakpoints();
    let pc = cpu.pc();
    cpu.invalidate_icache(pc, 4, true);
    match cpu.single_step() {
        StepOutcome::Fault { cause, pc } => {
            warn!("step into faulted at {pc:08x}: {cause}");
            StepStatus::Faulted { cause, pc }
        }
        StepOutcome::PoweredDown => StepStatus::NotApplicable,
        StepOutcome::Retired { .. } => {
            let pc = cpu.pc();
            debug!("stepped into {pc:08x}");
            StepStatus::Stepped { pc }
        }
    }
}

/// Runs over a call at PC, or steps one instruction otherwise.
///
/// For a linking branch the core resumes with a temporary breakpoint on the
/// instruction after the call; the pause is reported asynchronously.
pub fn step_over<C: CpuControl + ?Sized>(cpu: &mut C) -> StepStatus {
    if !cpu.is_stepping() {
        return StepStatus::NotApplicable;
    }
    let pc = cpu.pc();
    if !cpu.read_instruction(pc).is_linking_branch() {
        return step_into(cpu);
    }
    let until = pc.wrapping_add(4);
    cpu.clear_temporary_breakpoints();
    cpu.add_breakpoint(until, true);
    cpu.enable_stepping(false);
    debug!("stepping over call at {pc:08x}, resuming until {until:08x}");
    StepStatus::Resumed { until }
}

/// Steps until the current function returns or the budget runs out.
///
/// Runs in the interpreter regardless of the selected mode and restores the
/// mode before returning. Calls met on the way are stepped through without
/// stopping in the callee.
pub fn step_out<C: CpuControl + ?Sized>(cpu: &mut C) -> StepOutResult {
    if !cpu.is_stepping() {
        return StepOutResult::NotApplicable;
    }
    cpu.clear_temporary_breakpoints();

    let budget = cpu.ticks_per_second();
    let mut cpu = ModeGuard::new(cpu, ExecutionMode::Interpreted);
    let mut steps: u64 = 0;

    let mut pc = cpu.pc();
    let mut inst = cpu.read_instruction(pc);
    while !inst.is_return() && steps < budget {
        if inst.is_linking_branch() {
            let after_call = pc.wrapping_add(4);
            while cpu.pc() != after_call && steps < budget {
                if let Some(result) = step_once(&mut *cpu, &mut steps) {
                    return result;
                }
            }
        } else if let Some(result) = step_once(&mut *cpu, &mut steps) {
            return result;
        }
        pc = cpu.pc();
        inst = cpu.read_instruction(pc);
    }

    if !inst.is_return() {
        warn!("step out timed out at {pc:08x} after {steps} steps");
        return StepOutResult::TimedOut { pc, steps };
    }

    if let Some(result) = step_once(&mut *cpu, &mut steps) {
        return result;
    }
    let pc = cpu.pc();
    debug!("stepped out to {pc:08x} in {steps} steps");
    StepOutResult::ReturnedNormally { pc, steps }
}

/// Flips the persistent breakpoint at `addr`.
pub fn toggle_breakpoint<C: CpuControl + ?Sized>(cpu: &mut C, addr: u32) -> ToggleStatus {
    if !cpu.is_stepping() {
        return ToggleStatus::NotApplicable;
    }
    if cpu.toggle_breakpoint(addr) {
        debug!("breakpoint set at {addr:08x}");
        ToggleStatus::Set { addr }
    } else {
        debug!("breakpoint cleared at {addr:08x}");
        ToggleStatus::Cleared { addr }
    }
}

fn step_once<C: CpuControl + ?Sized>(cpu: &mut C, steps: &mut u64) -> Option<StepOutResult> {
    match cpu.single_step() {
        StepOutcome::Retired { .. } => {
            *steps += 1;
            None
        }
        StepOutcome::Fault { cause, pc } => {
            warn!("step out faulted at {pc:08x}: {cause}");
            Some(StepOutResult::Faulted {
                cause,
                pc,
                steps: *steps,
            })
        }
        StepOutcome::PoweredDown => Some(StepOutResult::NotApplicable),
    }
}

#[cfg(test)]
mod tests {
    use ppc_core::{
        CoreConfig, Cpu, ExecutionMode, Instruction, StepOutcome, NOP_INSTRUCTION,
        RETURN_INSTRUCTION,
    };

    use super::{
        step_into, step_out, step_over, StepError, StepOutResult, StepStatus, SteppingController,
    };
    use crate::control::CpuControl;

    const BASE: u32 = 0x8000_0000;

    /// Delegates to a real core and records every collaborator call.
    struct TracingCpu {
        inner: Cpu,
        calls: Vec<String>,
    }

    impl TracingCpu {
        fn new(words: &[u32]) -> Self {
            let mut inner = Cpu::new(CoreConfig {
                ram_size: 0x1000,
                boot_to_pause: true,
                ticks_per_second: 64,
                ..CoreConfig::default()
            });
            inner.memory_mut().write_words(BASE, words).expect("fits");
            Self {
                inner,
                calls: Vec::new(),
            }
        }

        fn count(&self, name: &str) -> usize {
            self.calls.iter().filter(|call| call.as_str() == name).count()
        }
    }

    impl CpuControl for TracingCpu {
        fn is_stepping(&self) -> bool {
            self.inner.is_stepping()
        }
        fn enable_stepping(&mut self, stepping: bool) {
            self.calls.push(format!("enable_stepping({stepping})"));
            self.inner.enable_stepping(stepping);
        }
        fn single_step(&mut self) -> StepOutcome {
            self.calls.push("single_step".to_owned());
            self.inner.single_step()
        }
        fn pc(&self) -> u32 {
            self.inner.pc()
        }
        fn read_instruction(&self, addr: u32) -> Instruction {
            self.inner.read_instruction(addr)
        }
        fn invalidate_icache(&mut self, addr: u32, len: u32, force: bool) {
            self.calls
                .push(format!("invalidate({addr:08x},{len},{force})"));
            self.inner.invalidate_icache(addr, len, force);
        }
        fn clear_temporary_breakpoints(&mut self) {
            self.calls.push("clear_temporary".to_owned());
            self.inner.breakpoints_mut().clear_temporary();
        }
        fn add_breakpoint(&mut self, addr: u32, temporary: bool) {
            self.calls.push(format!("add_breakpoint({addr:08x},{temporary})"));
            self.inner.breakpoints_mut().add(addr, temporary);
        }
        fn toggle_breakpoint(&mut self, addr: u32) -> bool {
            self.inner.breakpoints_mut().toggle(addr)
        }
        fn mode(&self) -> ExecutionMode {
            self.inner.mode()
        }
        fn set_mode(&mut self, mode: ExecutionMode) {
            self.calls.push(format!("set_mode({})", mode.name()));
            self.inner.set_mode(mode);
        }
        fn ticks_per_second(&self) -> u64 {
            self.inner.ticks_per_second()
        }
    }

    #[test]
    fn step_into_clears_temporaries_then_invalidates_then_steps() {
        let mut cpu = TracingCpu::new(&[NOP_INSTRUCTION, NOP_INSTRUCTION]);
        assert_eq!(step_into(&mut cpu), StepStatus::Stepped { pc: BASE + 4 });
        assert_eq!(
            cpu.calls,
            vec![
                "clear_temporary".to_owned(),
                format!("invalidate({BASE:08x},4,true)"),
                "single_step".to_owned(),
            ]
        );
    }

    #[test]
    fn step_over_call_resumes_with_one_temporary_breakpoint() {
        let call = Instruction::branch(BASE, BASE + 0x100, true).hex();
        let mut cpu = TracingCpu::new(&[call]);
        assert_eq!(step_over(&mut cpu), StepStatus::Resumed { until: BASE + 4 });
        assert_eq!(
            cpu.calls,
            vec![
                "clear_temporary".to_owned(),
                format!("add_breakpoint({:08x},true)", BASE + 4),
                "enable_stepping(false)".to_owned(),
            ]
        );
        assert_eq!(cpu.inner.breakpoints().len(), 1);
        assert!(!cpu.inner.is_stepping());
    }

    #[test]
    fn step_out_switches_to_interpreter_and_back() {
        let mut cpu = TracingCpu::new(&[NOP_INSTRUCTION, RETURN_INSTRUCTION]);
        cpu.inner.set_mode(ExecutionMode::Compiled);
        cpu.inner.regs_mut().set_lr(BASE + 0x40);
        let result = step_out(&mut cpu);
        assert_eq!(
            result,
            StepOutResult::ReturnedNormally {
                pc: BASE + 0x40,
                steps: 2
            }
        );
        assert_eq!(cpu.count("set_mode(interpreter)"), 1);
        assert_eq!(cpu.count("set_mode(jit)"), 1);
        assert_eq!(cpu.inner.mode(), ExecutionMode::Compiled);
    }

    #[test]
    fn step_out_fault_ends_loop_and_restores_mode() {
        let mut cpu = TracingCpu::new(&[NOP_INSTRUCTION, 0]);
        cpu.inner.set_mode(ExecutionMode::Compiled);
        let result = step_out(&mut cpu);
        assert!(matches!(
            result,
            StepOutResult::Faulted { pc, steps: 1, .. } if pc == BASE + 4
        ));
        assert_eq!(cpu.inner.mode(), ExecutionMode::Compiled);
        assert_eq!(cpu.count("single_step"), 2);
    }

    #[test]
    fn controller_rejects_overlapping_operations() {
        let controller = SteppingController::new();
        let mut cpu = TracingCpu::new(&[NOP_INSTRUCTION]);
        let reservation = controller.reserve().expect("gate open");
        assert!(controller.is_busy());
        assert_eq!(controller.clone().step_into(&mut cpu), Err(StepError::Busy));
        assert!(cpu.calls.is_empty());
        drop(reservation);
        assert_eq!(
            controller.step_into(&mut cpu),
            Ok(StepStatus::Stepped { pc: BASE + 4 })
        );
        assert!(!controller.is_busy());
    }
}

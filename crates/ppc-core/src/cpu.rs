//! The CPU core: register file, memory, run state and execution engines.

use log::{debug, trace, warn};

use crate::api::{CoreConfig, ExecutionMode, RunOutcome, RunStop, StepOutcome};
use crate::breakpoints::BreakPoints;
use crate::decoder::Decoder;
use crate::encoding::Instruction;
use crate::execute::step_decoded;
use crate::jit::BlockCache;
use crate::memory::Memory;
use crate::state::{CpuState, RegisterFile};
use crate::FaultCode;

/// A fault recorded by the most recent failing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// Fault cause.
    pub cause: FaultCode,
    /// Address of the instruction that faulted.
    pub pc: u32,
}

enum UnitStop {
    Breakpoint(u32),
    Fault(FaultCode, u32),
}

struct Unit {
    retired: u64,
    stop: Option<UnitStop>,
}

/// Emulated Gekko core.
#[derive(Debug, Clone)]
pub struct Cpu {
    config: CoreConfig,
    regs: RegisterFile,
    memory: Memory,
    mode: ExecutionMode,
    state: CpuState,
    breakpoints: BreakPoints,
    cache: BlockCache,
    retired: u64,
    last_fault: Option<FaultRecord>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl Cpu {
    /// Powers on a core with zeroed RAM.
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        let memory = Memory::new(config.ram_base, config.ram_size);
        let mut regs = RegisterFile::default();
        regs.set_pc(config.ram_base);
        Self {
            mode: config.initial_mode,
            state: config.initial_state(),
            config,
            regs,
            memory,
            breakpoints: BreakPoints::new(),
            cache: BlockCache::new(),
            retired: 0,
            last_fault: None,
        }
    }

    /// Configuration the core was built with.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Architectural registers.
    #[must_use]
    pub const fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    /// Mutable architectural registers.
    pub const fn regs_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    /// Guest RAM.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Mutable guest RAM. Writes do not invalidate compiled blocks.
    pub const fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Installed breakpoints.
    #[must_use]
    pub const fn breakpoints(&self) -> &BreakPoints {
        &self.breakpoints
    }

    /// Mutable breakpoint store.
    pub const fn breakpoints_mut(&mut self) -> &mut BreakPoints {
        &mut self.breakpoints
    }

    /// Compiled block cache.
    #[must_use]
    pub const fn block_cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Program counter.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.regs.pc()
    }

    /// Moves the program counter.
    pub const fn set_pc(&mut self, pc: u32) {
        self.regs.set_pc(pc);
    }

    /// Current execution mode.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Switches execution mode. Cached blocks are kept.
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        if mode != self.mode {
            debug!("execution mode {} -> {}", self.mode.name(), mode.name());
            self.mode = mode;
        }
    }

    /// Current run state.
    #[must_use]
    pub const fn state(&self) -> CpuState {
        self.state
    }

    /// Returns `true` while paused for stepping.
    #[must_use]
    pub const fn is_stepping(&self) -> bool {
        self.state.is_stepping()
    }

    /// Pauses (`true`) or resumes (`false`) the core. Ignored once powered down.
    pub fn enable_stepping(&mut self, stepping: bool) {
        if self.state == CpuState::PowerDown {
            return;
        }
        let next = if stepping {
            CpuState::Stepping
        } else {
            CpuState::Running
        };
        if next != self.state {
            debug!("cpu state {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    /// Stops the core for good.
    pub fn power_down(&mut self) {
        debug!("cpu powered down at {:08x}", self.regs.pc());
        self.state = CpuState::PowerDown;
    }

    /// Clock rate used to bound long-running debugger operations.
    #[must_use]
    pub const fn ticks_per_second(&self) -> u64 {
        self.config.ticks_per_second
    }

    /// Total instructions retired since power-on.
    #[must_use]
    pub const fn retired_instructions(&self) -> u64 {
        self.retired
    }

    /// Most recent fault, if any.
    #[must_use]
    pub const fn last_fault(&self) -> Option<FaultRecord> {
        self.last_fault
    }

    /// Fetches the word at `addr`; unmapped or misaligned addresses read as `0`.
    #[must_use]
    pub fn read_instruction(&self, addr: u32) -> Instruction {
        Instruction(self.memory.read_u32(addr).unwrap_or(0))
    }

    /// Drops compiled blocks covering `[addr, addr + len)`.
    pub fn invalidate_icache(&mut self, addr: u32, len: u32, force: bool) {
        self.cache.invalidate(addr, len, force, &self.memory);
    }

    /// Drops every compiled block.
    pub fn clear_cache(&mut self) {
        debug!("clearing {} compiled block(s)", self.cache.len());
        self.cache.clear();
    }

    /// Retires one unit of work at PC regardless of run state.
    ///
    /// Interpreting, that is one instruction. Compiled, it is the whole block
    /// cached at PC; blocks built while stepping hold a single instruction.
    pub fn single_step(&mut self) -> StepOutcome {
        if self.state == CpuState::PowerDown {
            return StepOutcome::PoweredDown;
        }
        let pc = self.regs.pc();
        let unit = self.retire_unit(u64::MAX, false);
        self.retired += unit.retired;
        trace!("step {pc:08x} -> {:08x}", self.regs.pc());
        match unit.stop {
            Some(UnitStop::Fault(cause, at)) => {
                self.record_fault(cause, at);
                StepOutcome::Fault { cause, pc: at }
            }
            _ => StepOutcome::Retired {
                instructions: u32::try_from(unit.retired).unwrap_or(u32::MAX),
            },
        }
    }

    /// Runs freely for at most `max_instructions`.
    ///
    /// Stops at a breakpoint (entering the stepping state and removing it if
    /// temporary) or at a fault. The breakpoint at the resume PC does not fire
    /// for the first instruction.
    pub fn run(&mut self, max_instructions: u64) -> RunOutcome {
        if !self.state.is_running() {
            return RunOutcome {
                instructions: 0,
                stop: RunStop::NotRunning,
            };
        }

        let mut retired = 0;
        let mut first = true;
        while retired < max_instructions {
            let pc = self.regs.pc();
            if !first && self.breakpoints.is_address_breakpoint(pc) {
                return self.stop_at_breakpoint(pc, retired);
            }
            first = false;

            let unit = self.retire_unit(max_instructions - retired, true);
            retired += unit.retired;
            self.retired += unit.retired;
            match unit.stop {
                Some(UnitStop::Breakpoint(at)) => return self.stop_at_breakpoint(at, retired),
                Some(UnitStop::Fault(cause, at)) => {
                    self.record_fault(cause, at);
                    return RunOutcome {
                        instructions: retired,
                        stop: RunStop::Fault { cause, pc: at },
                    };
                }
                None => {}
            }
        }

        RunOutcome {
            instructions: retired,
            stop: RunStop::BudgetExhausted,
        }
    }

    fn retire_unit(&mut self, budget: u64, check_breakpoints: bool) -> Unit {
        let pc = self.regs.pc();
        match self.mode {
            ExecutionMode::Interpreted => {
                let outcome = self
                    .memory
                    .read_u32(pc)
                    .and_then(|word| Decoder::decode(Instruction(word)))
                    .and_then(|op| step_decoded(op, &mut self.regs, &mut self.memory));
                match outcome {
                    Ok(()) => Unit {
                        retired: 1,
                        stop: None,
                    },
                    Err(cause) => Unit {
                        retired: 0,
                        stop: Some(UnitStop::Fault(cause, pc)),
                    },
                }
            }
            ExecutionMode::Compiled => {
                let limit = if self.state.is_stepping() {
                    1
                } else {
                    self.config.max_block_len
                };
                let block = match self.cache.get_or_build(pc, limit, &self.memory) {
                    Ok(block) => block,
                    Err(cause) => {
                        return Unit {
                            retired: 0,
                            stop: Some(UnitStop::Fault(cause, pc)),
                        }
                    }
                };

                let mut retired = 0;
                for (index, &op) in block.ops().iter().enumerate() {
                    if retired == budget {
                        break;
                    }
                    let at = self.regs.pc();
                    if check_breakpoints && index > 0 && self.breakpoints.is_address_breakpoint(at)
                    {
                        return Unit {
                            retired,
                            stop: Some(UnitStop::Breakpoint(at)),
                        };
                    }
                    if let Err(cause) = step_decoded(op, &mut self.regs, &mut self.memory) {
                        return Unit {
                            retired,
                            stop: Some(UnitStop::Fault(cause, at)),
                        };
                    }
                    retired += 1;
                }
                Unit {
                    retired,
                    stop: None,
                }
            }
        }
    }

    fn stop_at_breakpoint(&mut self, pc: u32, retired: u64) -> RunOutcome {
        let temporary = self.breakpoints.is_temporary(pc);
        if temporary {
            self.breakpoints.remove(pc);
        }
        debug!("breakpoint at {pc:08x} (temporary: {temporary})");
        self.state = CpuState::Stepping;
        RunOutcome {
            instructions: retired,
            stop: RunStop::Breakpoint { pc, temporary },
        }
    }

    fn record_fault(&mut self, cause: FaultCode, pc: u32) {
        warn!("fault at {pc:08x}: {cause}");
        self.last_fault = Some(FaultRecord { cause, pc });
        if self.state != CpuState::PowerDown {
            self.state = CpuState::Stepping;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cpu;
    use crate::api::{CoreConfig, ExecutionMode, RunStop, StepOutcome};
    use crate::encoding::{Instruction, NOP_INSTRUCTION, RETURN_INSTRUCTION};
    use crate::state::CpuState;
    use crate::FaultCode;

    const BASE: u32 = 0x8000_0000;

    fn cpu_with(words: &[u32], boot_to_pause: bool) -> Cpu {
        let mut cpu = Cpu::new(CoreConfig {
            ram_size: 0x1000,
            boot_to_pause,
            ..CoreConfig::default()
        });
        cpu.memory_mut().write_words(BASE, words).expect("fits");
        cpu
    }

    #[test]
    fn single_step_interpreted_retires_one() {
        let mut cpu = cpu_with(&[NOP_INSTRUCTION, NOP_INSTRUCTION], true);
        assert_eq!(cpu.single_step(), StepOutcome::Retired { instructions: 1 });
        assert_eq!(cpu.pc(), BASE + 4);
    }

    #[test]
    fn compiled_step_retires_whole_cached_block() {
        let mut cpu = cpu_with(
            &[NOP_INSTRUCTION, NOP_INSTRUCTION, NOP_INSTRUCTION, RETURN_INSTRUCTION],
            false,
        );
        cpu.set_mode(ExecutionMode::Compiled);
        cpu.regs_mut().set_lr(BASE + 0x100);
        assert_eq!(cpu.single_step(), StepOutcome::Retired { instructions: 4 });
        assert_eq!(cpu.pc(), BASE + 0x100);
    }

    #[test]
    fn compiled_blocks_built_while_stepping_hold_one_instruction() {
        let mut cpu = cpu_with(&[NOP_INSTRUCTION, NOP_INSTRUCTION], true);
        cpu.set_mode(ExecutionMode::Compiled);
        assert_eq!(cpu.single_step(), StepOutcome::Retired { instructions: 1 });
        assert_eq!(cpu.block_cache().get(BASE).map(|b| b.len()), Some(1));
    }

    #[test]
    fn fault_leaves_pc_and_enters_stepping() {
        let mut cpu = cpu_with(&[NOP_INSTRUCTION, 0], false);
        let outcome = cpu.run(10);
        assert_eq!(outcome.instructions, 1);
        assert_eq!(
            outcome.stop,
            RunStop::Fault {
                cause: FaultCode::IllegalInstruction,
                pc: BASE + 4
            }
        );
        assert_eq!(cpu.pc(), BASE + 4);
        assert!(cpu.is_stepping());
        assert_eq!(cpu.last_fault().map(|f| f.pc), Some(BASE + 4));
    }

    #[test]
    fn run_stops_at_breakpoint_and_drops_temporary() {
        let mut cpu = cpu_with(&[NOP_INSTRUCTION; 8], false);
        cpu.breakpoints_mut().add(BASE + 8, true);
        let outcome = cpu.run(100);
        assert_eq!(outcome.instructions, 2);
        assert_eq!(
            outcome.stop,
            RunStop::Breakpoint {
                pc: BASE + 8,
                temporary: true
            }
        );
        assert!(cpu.breakpoints().is_empty());
        assert_eq!(cpu.state(), CpuState::Stepping);
    }

    #[test]
    fn resuming_on_a_breakpoint_executes_past_it() {
        let mut cpu = cpu_with(&[NOP_INSTRUCTION; 8], false);
        cpu.breakpoints_mut().add(BASE, false);
        let outcome = cpu.run(3);
        assert_eq!(outcome.stop, RunStop::BudgetExhausted);
        assert_eq!(cpu.pc(), BASE + 12);
    }

    #[test]
    fn compiled_run_honours_breakpoints_inside_blocks() {
        let mut cpu = cpu_with(&[NOP_INSTRUCTION; 8], false);
        cpu.set_mode(ExecutionMode::Compiled);
        cpu.breakpoints_mut().add(BASE + 12, false);
        let outcome = cpu.run(100);
        assert_eq!(outcome.instructions, 3);
        assert_eq!(cpu.pc(), BASE + 12);
    }

    #[test]
    fn run_is_inert_unless_running() {
        let mut cpu = cpu_with(&[NOP_INSTRUCTION], true);
        assert_eq!(cpu.run(10).stop, RunStop::NotRunning);
        cpu.power_down();
        cpu.enable_stepping(false);
        assert_eq!(cpu.state(), CpuState::PowerDown);
        assert_eq!(cpu.single_step(), StepOutcome::PoweredDown);
    }

    #[test]
    fn unmapped_instruction_reads_as_zero() {
        let cpu = Cpu::default();
        assert_eq!(cpu.read_instruction(0x10), Instruction(0));
    }
}

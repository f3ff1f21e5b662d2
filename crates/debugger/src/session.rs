//! Debugger session: command dispatch and the code view's supporting state.
//!
//! A session talks to the core thread through a [`CoreHandle`], serializes
//! step commands through a [`SteppingController`] and tracks the selected
//! address and the view centre that a front end would render.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use ppc_core::{
    disassemble_range, instruction_name, DisassemblyRow, ExecutionMode, RegisterFile, SymbolDb,
};
use thiserror::Error;

use crate::callstack::{self, Callstack};
use crate::host::{CoreEvent, CoreHandle, CoreThread, HostError};
use crate::stepping::{
    self, StepError, StepOutResult, StepStatus, SteppingController, ToggleStatus,
};

/// Default time [`DebugSession::wait_for_pause`] waits for the core to stop.
pub const DEFAULT_PAUSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Code view commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Execute one instruction.
    StepInto,
    /// Run over a call, or step one instruction.
    StepOver,
    /// Run until the current function returns.
    StepOut,
    /// Toggle a breakpoint at the selection.
    ToggleBreakpoint,
    /// Advance PC by one instruction without executing it.
    Skip,
    /// Move PC to the selection.
    SetPc,
    /// Centre the view on PC.
    GotoPc,
}

/// What a command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Result of step into / step over.
    Step(StepStatus),
    /// Result of step out.
    StepOut(StepOutResult),
    /// Result of a breakpoint toggle.
    Toggle(ToggleStatus),
    /// PC was moved without executing.
    Moved {
        /// New PC.
        pc: u32,
    },
    /// The view was centred on PC.
    Centered {
        /// Current PC.
        pc: u32,
    },
    /// The core was not paused; nothing happened.
    NotApplicable,
}

/// Session-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Address box text was not a hex address.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    /// The stepping controller rejected the command.
    #[error(transparent)]
    Step(#[from] StepError),
    /// The core thread did not answer.
    #[error(transparent)]
    Host(#[from] HostError),
    /// The core did not pause in time.
    #[error("core did not pause within {0:?}")]
    PauseTimeout(Duration),
    /// The core thread has gone away.
    #[error("core event channel closed")]
    EventsClosed,
}

/// Which commands are currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ControlStates {
    /// Step into.
    pub step_into: bool,
    /// Step over.
    pub step_over: bool,
    /// Step out.
    pub step_out: bool,
    /// Skip.
    pub skip: bool,
    /// Interpreter / compiled mode switch.
    pub cpu_mode: bool,
    /// Clear the compiled block cache.
    pub clear_code_cache: bool,
    /// Instruction search.
    pub search_instruction: bool,
    /// Symbol map load/save and call analysis.
    pub symbols: bool,
}

impl ControlStates {
    /// Derives availability from whether a core exists and is paused.
    #[must_use]
    pub const fn compute(initialized: bool, stepping: bool) -> Self {
        let paused = initialized && stepping;
        Self {
            step_into: paused,
            step_over: paused,
            step_out: paused,
            skip: paused,
            cpu_mode: paused,
            clear_code_cache: paused,
            search_instruction: initialized,
            symbols: initialized,
        }
    }
}

/// One row of the callers/calls lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallListEntry {
    /// Display text.
    pub label: String,
    /// Address to jump to.
    pub address: u32,
}

/// Parses address box text: optional `0x`, hex digits, surrounding blanks ignored.
///
/// # Errors
///
/// Returns [`SessionError::InvalidAddress`] for anything else.
pub fn parse_address(text: &str) -> Result<u32, SessionError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(SessionError::InvalidAddress(text.to_owned()));
    }
    u32::from_str_radix(digits, 16).map_err(|_| SessionError::InvalidAddress(text.to_owned()))
}

/// Interactive debugging session bound to one core thread.
pub struct DebugSession {
    handle: CoreHandle,
    events: Receiver<CoreEvent>,
    controller: SteppingController,
    symbols: Arc<SymbolDb>,
    selection: u32,
    view_center: u32,
    pause_timeout: Duration,
}

impl DebugSession {
    /// Attaches to `core`, selecting the current PC.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn attach(core: &CoreThread, symbols: SymbolDb) -> Result<Self, SessionError> {
        let handle = core.handle();
        let pc = handle.with_cpu(|cpu| cpu.pc())?;
        Ok(Self {
            handle,
            events: core.events(),
            controller: SteppingController::new(),
            symbols: Arc::new(symbols),
            selection: pc,
            view_center: pc,
            pause_timeout: DEFAULT_PAUSE_TIMEOUT,
        })
    }

    /// Overrides how long [`Self::wait_for_pause`] waits.
    #[must_use]
    pub const fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout = timeout;
        self
    }

    /// Controller shared with any other front end driving the same core.
    #[must_use]
    pub const fn controller(&self) -> &SteppingController {
        &self.controller
    }

    /// Symbol database.
    #[must_use]
    pub fn symbols(&self) -> &SymbolDb {
        &self.symbols
    }

    /// Selected address.
    #[must_use]
    pub const fn selection(&self) -> u32 {
        self.selection
    }

    /// Address the code view is centred on.
    #[must_use]
    pub const fn view_center(&self) -> u32 {
        self.view_center
    }

    /// Selects `addr` without moving the view.
    pub const fn select(&mut self, addr: u32) {
        self.selection = addr;
    }

    /// Selects `addr` and centres the view on it.
    pub fn jump_to_address(&mut self, addr: u32) {
        debug!("jump to {addr:08x}");
        self.selection = addr;
        self.view_center = addr;
    }

    /// Parses address box text and jumps there.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidAddress`] and leaves the view alone.
    pub fn jump_to_text(&mut self, text: &str) -> Result<u32, SessionError> {
        let addr = parse_address(text)?;
        self.jump_to_address(addr);
        Ok(addr)
    }

    /// Runs one code view command.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Step`] while another step is in flight and
    /// [`SessionError::Host`] if the core thread does not answer.
    pub fn execute(&mut self, command: Command) -> Result<CommandOutcome, SessionError> {
        debug!("command {command:?}");
        let outcome = match command {
            Command::StepInto => {
                let reservation = self.controller.reserve()?;
                let status = self.handle.with_cpu(move |cpu| {
                    let _reservation = reservation;
                    stepping::step_into(cpu)
                })?;
                self.follow_step(status);
                CommandOutcome::Step(status)
            }
            Command::StepOver => {
                let reservation = self.controller.reserve()?;
                self.discard_stale_events();
                let status = self.handle.with_cpu(move |cpu| {
                    let _reservation = reservation;
                    stepping::step_over(cpu)
                })?;
                self.follow_step(status);
                CommandOutcome::Step(status)
            }
            Command::StepOut => {
                let reservation = self.controller.reserve()?;
                let result = self.handle.with_cpu_to_completion(move |cpu| {
                    let _reservation = reservation;
                    stepping::step_out(cpu)
                })?;
                match result {
                    StepOutResult::ReturnedNormally { pc, .. }
                    | StepOutResult::TimedOut { pc, .. }
                    | StepOutResult::Faulted { pc, .. } => self.jump_to_address(pc),
                    StepOutResult::NotApplicable => {}
                }
                CommandOutcome::StepOut(result)
            }
            Command::ToggleBreakpoint => {
                let addr = self.selection;
                let reservation = self.controller.reserve()?;
                let status = self.handle.with_cpu(move |cpu| {
                    let _reservation = reservation;
                    stepping::toggle_breakpoint(cpu, addr)
                })?;
                CommandOutcome::Toggle(status)
            }
            Command::Skip => self.move_pc(|pc, _| pc.wrapping_add(4))?,
            Command::SetPc => self.move_pc(|_, selection| selection)?,
            Command::GotoPc => {
                let pc = self.handle.with_cpu(|cpu| cpu.pc())?;
                self.jump_to_address(pc);
                CommandOutcome::Centered { pc }
            }
        };
        Ok(outcome)
    }

    /// Blocks until the core stops (breakpoint, fault, pause or power-down).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PauseTimeout`] if nothing arrives in time.
    pub fn wait_for_pause(&mut self) -> Result<CoreEvent, SessionError> {
        self.wait_for_pause_within(self.pause_timeout)
    }

    /// [`Self::wait_for_pause`] with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PauseTimeout`] if nothing arrives in time.
    pub fn wait_for_pause_within(&mut self, timeout: Duration) -> Result<CoreEvent, SessionError> {
        loop {
            let event = self
                .events
                .recv_timeout(timeout)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => SessionError::PauseTimeout(timeout),
                    RecvTimeoutError::Disconnected => SessionError::EventsClosed,
                })?;
            match event {
                CoreEvent::Resumed => continue,
                CoreEvent::BreakpointHit { pc, .. }
                | CoreEvent::Paused { pc }
                | CoreEvent::Faulted { pc, .. } => self.jump_to_address(pc),
                CoreEvent::PoweredDown => {}
            }
            return Ok(event);
        }
    }

    /// Resumes free execution.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn resume(&self) -> Result<(), SessionError> {
        self.discard_stale_events();
        self.handle.resume()?;
        Ok(())
    }

    /// Pauses the core and centres on PC.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn pause(&mut self) -> Result<u32, SessionError> {
        let pc = self.handle.pause()?;
        self.jump_to_address(pc);
        Ok(pc)
    }

    /// Entries for the "callers" list of the function containing the selection.
    #[must_use]
    pub fn callers(&self) -> Vec<CallListEntry> {
        let Some(symbol) = self.symbols.get_symbol_from_addr(self.selection) else {
            return Vec::new();
        };
        symbol
            .callers
            .iter()
            .filter_map(|call| {
                let caller = self.symbols.get_symbol_from_addr(call.call_address)?;
                Some(CallListEntry {
                    label: format!("< {} ({:08x})", caller.name, call.call_address),
                    address: call.call_address,
                })
            })
            .collect()
    }

    /// Entries for the "calls" list of the function containing the selection.
    #[must_use]
    pub fn calls(&self) -> Vec<CallListEntry> {
        let Some(symbol) = self.symbols.get_symbol_from_addr(self.selection) else {
            return Vec::new();
        };
        symbol
            .calls
            .iter()
            .filter_map(|call| {
                let callee = self.symbols.get_symbol_from_addr(call.function)?;
                Some(CallListEntry {
                    label: format!("> {} ({:08x})", callee.name, call.function),
                    address: call.function,
                })
            })
            .collect()
    }

    /// Walks the call stack of the core.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn callstack(&self) -> Result<Option<Callstack>, SessionError> {
        let symbols = Arc::clone(&self.symbols);
        Ok(self
            .handle
            .with_cpu(move |cpu| callstack::walk(cpu.regs(), cpu.memory(), &symbols))?)
    }

    /// Which commands are available right now.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn control_states(&self) -> Result<ControlStates, SessionError> {
        let stepping = self.handle.state()?.is_stepping();
        Ok(ControlStates::compute(true, stepping))
    }

    /// Switches execution mode and drops all compiled blocks.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn set_cpu_mode(&self, mode: ExecutionMode) -> Result<(), SessionError> {
        info!("switching to {} mode", mode.name());
        self.handle.with_cpu(move |cpu| {
            cpu.set_mode(mode);
            cpu.clear_cache();
        })?;
        Ok(())
    }

    /// Current execution mode.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn cpu_mode(&self) -> Result<ExecutionMode, SessionError> {
        Ok(self.handle.with_cpu(|cpu| cpu.mode())?)
    }

    /// Drops all compiled blocks.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn clear_code_cache(&self) -> Result<(), SessionError> {
        self.handle.with_cpu(|cpu| cpu.clear_cache())?;
        Ok(())
    }

    /// Finds every aligned word in `[start, end)` whose base mnemonic is `name`.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn search_instruction(
        &self,
        name: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<u32>, SessionError> {
        let wanted = name.to_owned();
        let hits = self.handle.with_cpu(move |cpu| {
            ((start & !3)..end)
                .step_by(4)
                .filter(|&addr| {
                    cpu.memory()
                        .read_u32(addr)
                        .ok()
                        .and_then(instruction_name)
                        .is_some_and(|found| found == wanted)
                })
                .collect::<Vec<_>>()
        })?;
        for addr in &hits {
            info!("found {name} at {addr:08x}");
        }
        if hits.is_empty() {
            info!("opcode {name} not found");
        }
        Ok(hits)
    }

    /// Half-open address range of the core's RAM.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn ram_window(&self) -> Result<(u32, u32), SessionError> {
        Ok(self.handle.with_cpu(|cpu| {
            let memory = cpu.memory();
            (memory.base(), memory.base().saturating_add(memory.size()))
        })?)
    }

    /// Snapshot of the register file.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn registers(&self) -> Result<RegisterFile, SessionError> {
        Ok(self.handle.with_cpu(|cpu| cpu.regs().clone())?)
    }

    /// Disassembles `count` instructions from the view centre.
    ///
    /// # Errors
    ///
    /// Fails if the core thread does not answer.
    pub fn disassemble(&self, count: usize) -> Result<Vec<DisassemblyRow>, SessionError> {
        let start = self.view_center;
        Ok(self
            .handle
            .with_cpu(move |cpu| disassemble_range(cpu.memory(), start, count))?)
    }

    // Events queued while paused describe stops that are already over.
    fn discard_stale_events(&self) {
        let stale = self.events.try_iter().count();
        if stale > 0 {
            debug!("discarded {stale} stale core event(s)");
        }
    }

    fn follow_step(&mut self, status: StepStatus) {
        match status {
            StepStatus::Stepped { pc } | StepStatus::Faulted { pc, .. } => {
                self.jump_to_address(pc);
            }
            StepStatus::Resumed { until } => self.jump_to_address(until.wrapping_sub(4)),
            StepStatus::NotApplicable => {}
        }
    }

    fn move_pc(
        &mut self,
        next: impl FnOnce(u32, u32) -> u32 + Send + 'static,
    ) -> Result<CommandOutcome, SessionError> {
        let selection = self.selection;
        let moved = self.handle.with_cpu(move |cpu| {
            if !cpu.is_stepping() {
                return None;
            }
            let pc = next(cpu.pc(), selection);
            cpu.set_pc(pc);
            Some(pc)
        })?;
        Ok(moved.map_or(CommandOutcome::NotApplicable, |pc| CommandOutcome::Moved {
            pc,
        }))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{parse_address, ControlStates, SessionError};

    #[rstest]
    #[case("80003100", 0x8000_3100)]
    #[case("  0x80003100\t", 0x8000_3100)]
    #[case("0XFF", 0xFF)]
    #[case("deadBEEF", 0xDEAD_BEEF)]
    fn parses_hex_addresses(#[case] text: &str, #[case] expected: u32) {
        assert_eq!(parse_address(text).ok(), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("0x")]
    #[case("main")]
    #[case("1_0000")]
    #[case("100000000")]
    fn rejects_non_addresses(#[case] text: &str) {
        assert!(matches!(
            parse_address(text),
            Err(SessionError::InvalidAddress(_))
        ));
    }

    #[test]
    fn stepping_controls_need_a_paused_core() {
        let running = ControlStates::compute(true, false);
        assert!(!running.step_into && !running.step_over && !running.step_out && !running.skip);
        assert!(!running.cpu_mode && !running.clear_code_cache);
        assert!(running.search_instruction && running.symbols);

        let paused = ControlStates::compute(true, true);
        assert!(paused.step_into && paused.step_out && paused.cpu_mode);

        assert_eq!(ControlStates::compute(false, true), ControlStates::default());
    }
}

//! Line-oriented debugger scripts.
//!
//! One command per line; `#` starts a comment. Each executed command prints
//! one or more result lines, which keeps transcripts easy to diff.

use std::io::{self, Write};
use std::time::Duration;

use ppc_core::{ExecutionMode, GENERAL_REGISTER_COUNT};
use thiserror::Error;

use crate::host::CoreEvent;
use crate::session::{
    parse_address, Command, CommandOutcome, ControlStates, DebugSession, SessionError,
};
use crate::stepping::{StepOutResult, StepStatus, ToggleStatus};

/// Rows printed by `disasm` without an explicit count.
pub const DEFAULT_DISASM_ROWS: usize = 8;

/// One parsed script command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// A code view command (`step`, `over`, `out`, `skip`, `setpc`, `gotopc`).
    Exec(Command),
    /// `break [ADDR]`: toggle at `ADDR`, or at the selection.
    Break(Option<u32>),
    /// `select ADDR`.
    Select(u32),
    /// `goto TEXT`: address box input.
    Goto(String),
    /// `continue`.
    Continue,
    /// `pause`.
    Pause,
    /// `wait [MS]`: block until the core stops.
    Wait(Option<Duration>),
    /// `mode interp|jit`.
    Mode(ExecutionMode),
    /// `clearcache`.
    ClearCache,
    /// `regs`.
    Registers,
    /// `stack`.
    Stack,
    /// `callers`.
    Callers,
    /// `calls`.
    Calls,
    /// `search NAME [START END]`.
    Search {
        /// Base mnemonic.
        name: String,
        /// Half-open range; the whole RAM window when absent.
        range: Option<(u32, u32)>,
    },
    /// `disasm [N]`.
    Disasm(usize),
    /// `controls`: which commands are enabled.
    Controls,
}

/// A command with the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// 1-based line number.
    pub line: usize,
    /// Parsed command.
    pub command: ScriptCommand,
}

/// Syntax error in a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct ScriptError {
    /// 1-based line number.
    pub line: usize,
    /// What was wrong.
    pub reason: String,
}

/// Failure while running a script.
#[derive(Debug, Error)]
pub enum ScriptRunError {
    /// Writing the transcript failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The session failed in a way the script cannot continue from.
    #[error("line {line}: {source}")]
    Session {
        /// 1-based line number.
        line: usize,
        /// Underlying failure.
        source: SessionError,
    },
}

/// Parses a whole script.
///
/// # Errors
///
/// Returns the first malformed line.
pub fn parse_script(text: &str) -> Result<Vec<ScriptLine>, ScriptError> {
    let mut lines = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let command = parse_command(content).map_err(|reason| ScriptError { line, reason })?;
        lines.push(ScriptLine { line, command });
    }
    Ok(lines)
}

fn parse_command(content: &str) -> Result<ScriptCommand, String> {
    let mut words = content.split_whitespace();
    let keyword = words.next().unwrap_or("");
    let args: Vec<&str> = words.collect();

    let command = match (keyword, args.as_slice()) {
        ("step", []) => ScriptCommand::Exec(Command::StepInto),
        ("over", []) => ScriptCommand::Exec(Command::StepOver),
        ("out", []) => ScriptCommand::Exec(Command::StepOut),
        ("skip", []) => ScriptCommand::Exec(Command::Skip),
        ("setpc", []) => ScriptCommand::Exec(Command::SetPc),
        ("gotopc", []) => ScriptCommand::Exec(Command::GotoPc),
        ("break", []) => ScriptCommand::Break(None),
        ("break", [addr]) => ScriptCommand::Break(Some(address_arg(addr)?)),
        ("select", [addr]) => ScriptCommand::Select(address_arg(addr)?),
        ("goto", [text]) => ScriptCommand::Goto((*text).to_owned()),
        ("continue", []) => ScriptCommand::Continue,
        ("pause", []) => ScriptCommand::Pause,
        ("wait", []) => ScriptCommand::Wait(None),
        ("wait", [ms]) => ScriptCommand::Wait(Some(Duration::from_millis(
            ms.parse().map_err(|_| format!("invalid wait time: {ms}"))?,
        ))),
        ("mode", ["interp" | "interpreter"]) => ScriptCommand::Mode(ExecutionMode::Interpreted),
        ("mode", ["jit"]) => ScriptCommand::Mode(ExecutionMode::Compiled),
        ("mode", [other]) => return Err(format!("unknown mode: {other}")),
        ("clearcache", []) => ScriptCommand::ClearCache,
        ("regs", []) => ScriptCommand::Registers,
        ("stack", []) => ScriptCommand::Stack,
        ("callers", []) => ScriptCommand::Callers,
        ("calls", []) => ScriptCommand::Calls,
        ("search", [name]) => ScriptCommand::Search {
            name: (*name).to_owned(),
            range: None,
        },
        ("search", [name, start, end]) => ScriptCommand::Search {
            name: (*name).to_owned(),
            range: Some((address_arg(start)?, address_arg(end)?)),
        },
        ("disasm", []) => ScriptCommand::Disasm(DEFAULT_DISASM_ROWS),
        ("disasm", [count]) => ScriptCommand::Disasm(
            count
                .parse()
                .map_err(|_| format!("invalid row count: {count}"))?,
        ),
        ("controls", []) => ScriptCommand::Controls,
        (
            "step" | "over" | "out" | "skip" | "setpc" | "gotopc" | "break" | "select" | "goto"
            | "continue" | "pause" | "wait" | "mode" | "clearcache" | "regs" | "stack"
            | "callers" | "calls" | "search" | "disasm" | "controls",
            _,
        ) => return Err(format!("wrong number of arguments for {keyword}")),
        (other, _) => return Err(format!("unknown command: {other}")),
    };
    Ok(command)
}

fn address_arg(text: &str) -> Result<u32, String> {
    parse_address(text).map_err(|err| err.to_string())
}

/// Runs `script` against `session`, writing a transcript to `out`.
///
/// Rejected addresses and busy steps are reported in the transcript and the
/// script carries on; lost contact with the core ends it.
///
/// # Errors
///
/// Returns [`ScriptRunError::Session`] when the core stops answering.
pub fn run_script<W: Write>(
    session: &mut DebugSession,
    script: &[ScriptLine],
    out: &mut W,
) -> Result<(), ScriptRunError> {
    for line in script {
        match run_command(session, &line.command, out) {
            Ok(()) => {}
            Err(ScriptRunError::Session {
                source: err @ (SessionError::InvalidAddress(_) | SessionError::Step(_)),
                ..
            }) => writeln!(out, "error: {err}")?,
            Err(ScriptRunError::Session { source, .. }) => {
                return Err(ScriptRunError::Session {
                    line: line.line,
                    source,
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn run_command<W: Write>(
    session: &mut DebugSession,
    command: &ScriptCommand,
    out: &mut W,
) -> Result<(), ScriptRunError> {
    let fail = |source| ScriptRunError::Session { line: 0, source };
    match command {
        ScriptCommand::Exec(cmd) => {
            let outcome = session.execute(*cmd).map_err(fail)?;
            writeln!(out, "{}", format_outcome(outcome))?;
        }
        ScriptCommand::Break(addr) => {
            if let Some(addr) = addr {
                session.select(*addr);
            }
            let outcome = session.execute(Command::ToggleBreakpoint).map_err(fail)?;
            writeln!(out, "{}", format_outcome(outcome))?;
        }
        ScriptCommand::Select(addr) => {
            session.select(*addr);
            writeln!(out, "selected {addr:08x}")?;
        }
        ScriptCommand::Goto(text) => {
            let addr = session.jump_to_text(text).map_err(fail)?;
            writeln!(out, "view {addr:08x}")?;
        }
        ScriptCommand::Continue => {
            session.resume().map_err(fail)?;
            writeln!(out, "running")?;
        }
        ScriptCommand::Pause => {
            let pc = session.pause().map_err(fail)?;
            writeln!(out, "paused pc={pc:08x}")?;
        }
        ScriptCommand::Wait(timeout) => {
            let event = match timeout {
                Some(timeout) => session.wait_for_pause_within(*timeout),
                None => session.wait_for_pause(),
            }
            .map_err(fail)?;
            writeln!(out, "{}", format_event(event))?;
        }
        ScriptCommand::Mode(mode) => {
            session.set_cpu_mode(*mode).map_err(fail)?;
            writeln!(out, "mode {}", mode.name())?;
        }
        ScriptCommand::ClearCache => {
            session.clear_code_cache().map_err(fail)?;
            writeln!(out, "cache cleared")?;
        }
        ScriptCommand::Registers => {
            let regs = session.registers().map_err(fail)?;
            for row in 0..GENERAL_REGISTER_COUNT / 4 {
                let cells: Vec<String> = (row * 4..row * 4 + 4)
                    .map(|index| format!("r{index:<2} = {:08x}", regs.gpr(index)))
                    .collect();
                writeln!(out, "{}", cells.join("  "))?;
            }
            writeln!(
                out,
                "pc = {:08x}  lr = {:08x}  ctr = {:08x}  cr = {:08x}",
                regs.pc(),
                regs.lr(),
                regs.ctr(),
                regs.cr()
            )?;
        }
        ScriptCommand::Stack => match session.callstack().map_err(fail)? {
            Some(stack) => {
                for entry in &stack.entries {
                    writeln!(out, "{}", entry.name)?;
                }
                if !stack.valid {
                    writeln!(out, "(stack walk incomplete)")?;
                }
            }
            None => writeln!(out, "(invalid stack pointer)")?,
        },
        ScriptCommand::Callers => {
            for entry in session.callers() {
                writeln!(out, "{}", entry.label)?;
            }
        }
        ScriptCommand::Calls => {
            for entry in session.calls() {
                writeln!(out, "{}", entry.label)?;
            }
        }
        ScriptCommand::Search { name, range } => {
            let (start, end) = match range {
                Some(range) => *range,
                None => session.ram_window().map_err(fail)?,
            };
            let hits = session.search_instruction(name, start, end).map_err(fail)?;
            if hits.is_empty() {
                writeln!(out, "opcode {name} not found")?;
            }
            for addr in hits {
                writeln!(out, "found {name} at {addr:08x}")?;
            }
        }
        ScriptCommand::Disasm(count) => {
            for row in session.disassemble(*count).map_err(fail)? {
                writeln!(out, "{:08x}: {:08x}  {}", row.address, row.raw, row.text)?;
            }
        }
        ScriptCommand::Controls => {
            let states = session.control_states().map_err(fail)?;
            writeln!(out, "{}", format_controls(states))?;
        }
    }
    Ok(())
}

fn format_outcome(outcome: CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Step(StepStatus::Stepped { pc }) => format!("stepped pc={pc:08x}"),
        CommandOutcome::Step(StepStatus::Resumed { until }) => {
            format!("resumed until={until:08x}")
        }
        CommandOutcome::Step(StepStatus::Faulted { cause, pc })
        | CommandOutcome::StepOut(StepOutResult::Faulted { cause, pc, .. }) => {
            format!("fault at {pc:08x}: {cause}")
        }
        CommandOutcome::StepOut(StepOutResult::ReturnedNormally { pc, steps }) => {
            format!("returned pc={pc:08x} steps={steps}")
        }
        CommandOutcome::StepOut(StepOutResult::TimedOut { pc, steps }) => {
            format!("timed out pc={pc:08x} steps={steps}")
        }
        CommandOutcome::Toggle(ToggleStatus::Set { addr }) => format!("breakpoint set {addr:08x}"),
        CommandOutcome::Toggle(ToggleStatus::Cleared { addr }) => {
            format!("breakpoint cleared {addr:08x}")
        }
        CommandOutcome::Moved { pc } => format!("pc={pc:08x}"),
        CommandOutcome::Centered { pc } => format!("view {pc:08x}"),
        CommandOutcome::Step(StepStatus::NotApplicable)
        | CommandOutcome::StepOut(StepOutResult::NotApplicable)
        | CommandOutcome::Toggle(ToggleStatus::NotApplicable)
        | CommandOutcome::NotApplicable => "not paused".to_owned(),
    }
}

fn format_event(event: CoreEvent) -> String {
    match event {
        CoreEvent::BreakpointHit {
            pc,
            temporary: true,
        } => format!("stopped pc={pc:08x} (temporary breakpoint)"),
        CoreEvent::BreakpointHit { pc, .. } => format!("stopped pc={pc:08x} (breakpoint)"),
        CoreEvent::Paused { pc } => format!("paused pc={pc:08x}"),
        CoreEvent::Resumed => "running".to_owned(),
        CoreEvent::Faulted { cause, pc } => format!("fault at {pc:08x}: {cause}"),
        CoreEvent::PoweredDown => "powered down".to_owned(),
    }
}

fn format_controls(states: ControlStates) -> String {
    let flag = |on: bool| if on { "on" } else { "off" };
    format!(
        "step={} over={} out={} skip={} mode={} clearcache={} search={} symbols={}",
        flag(states.step_into),
        flag(states.step_over),
        flag(states.step_out),
        flag(states.skip),
        flag(states.cpu_mode),
        flag(states.clear_code_cache),
        flag(states.search_instruction),
        flag(states.symbols),
    )
}

//! Stepping controller and debugger session for the Gekko core.

/// CPU capabilities the stepping operations drive.
pub mod control;
pub use control::CpuControl;

/// Scoped execution-mode override.
pub mod mode_guard;
pub use mode_guard::ModeGuard;

/// Step into / over / out and breakpoint toggling.
pub mod stepping;
pub use stepping::{
    step_into, step_out, step_over, toggle_breakpoint, Reservation, StepError, StepOutResult,
    StepStatus, SteppingController, ToggleStatus,
};

/// Call stack reconstruction.
pub mod callstack;
pub use callstack::{Callstack, CallstackEntry, MAX_FRAMES};

/// Core thread and request/event channels.
pub mod host;
pub use host::{
    CoreEvent, CoreHandle, CoreThread, HostConfig, HostError, DEFAULT_REPLY_TIMEOUT,
    DEFAULT_RUN_SLICE,
};

/// Debugger session and code view commands.
pub mod session;
pub use session::{
    parse_address, CallListEntry, Command, CommandOutcome, ControlStates, DebugSession,
    SessionError, DEFAULT_PAUSE_TIMEOUT,
};

/// Line-oriented debugger scripts.
pub mod script;
pub use script::{
    parse_script, run_script, ScriptCommand, ScriptError, ScriptLine, ScriptRunError,
    DEFAULT_DISASM_ROWS,
};

use pretty_env_logger as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use tempfile as _;

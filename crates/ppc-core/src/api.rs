//! Public host-facing configuration and outcome types.

use crate::memory::{DEFAULT_RAM_BASE, DEFAULT_RAM_SIZE};
use crate::state::CpuState;
use crate::FaultCode;

/// Gekko core clock; one second's worth of single steps bounds a step-out.
pub const DEFAULT_TICKS_PER_SECOND: u64 = 486_000_000;

/// Default upper bound on instructions per compiled block.
pub const DEFAULT_MAX_BLOCK_LEN: usize = 32;

/// How the core retires instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExecutionMode {
    /// One instruction per step, decoded on every fetch.
    #[default]
    Interpreted,
    /// Cached blocks; one step may retire a whole block.
    Compiled,
}

impl ExecutionMode {
    /// Short lowercase name used by logs and the CLI.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interpreted => "interpreter",
            Self::Compiled => "jit",
        }
    }
}

/// Top-level configuration for a core instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoreConfig {
    /// First byte of the RAM window.
    pub ram_base: u32,
    /// RAM window length in bytes.
    pub ram_size: u32,
    /// Clock rate reported to the debugger; bounds a step-out.
    pub ticks_per_second: u64,
    /// Execution mode at power-on.
    pub initial_mode: ExecutionMode,
    /// Start paused in the stepping state instead of running.
    pub boot_to_pause: bool,
    /// Longest block the compiled cache will build.
    pub max_block_len: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ram_base: DEFAULT_RAM_BASE,
            ram_size: DEFAULT_RAM_SIZE,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            initial_mode: ExecutionMode::Interpreted,
            boot_to_pause: false,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
        }
    }
}

impl CoreConfig {
    /// Run state the core enters at power-on.
    #[must_use]
    pub const fn initial_state(&self) -> CpuState {
        if self.boot_to_pause {
            CpuState::Stepping
        } else {
            CpuState::Running
        }
    }
}

/// Result of one `single_step` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Instructions retired (always 1 when interpreting).
    Retired {
        /// Number of instructions retired by this step.
        instructions: u32,
    },
    /// The instruction at `pc` faulted and was not retired.
    Fault {
        /// Fault cause.
        cause: FaultCode,
        /// Address of the faulting instruction.
        pc: u32,
    },
    /// The core is powered down; nothing ran.
    PoweredDown,
}

impl StepOutcome {
    /// Returns the fault carried by this outcome, if any.
    #[must_use]
    pub const fn fault(self) -> Option<FaultCode> {
        match self {
            Self::Fault { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Why a `run` call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    /// A breakpoint at `pc` fired; the core is now stepping.
    Breakpoint {
        /// Breakpoint address.
        pc: u32,
        /// Whether it was a temporary breakpoint (now removed).
        temporary: bool,
    },
    /// An instruction faulted; the core is now stepping.
    Fault {
        /// Fault cause.
        cause: FaultCode,
        /// Address of the faulting instruction.
        pc: u32,
    },
    /// The instruction budget ran out while still running.
    BudgetExhausted,
    /// The core was not in the running state.
    NotRunning,
}

/// Outcome of a `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Instructions retired during the call.
    pub instructions: u64,
    /// Stop reason.
    pub stop: RunStop,
}

//! Minimal Gekko PowerPC core used by the debugger.

/// Memory model primitives for the RAM window.
pub mod memory;
pub use memory::{
    validate_window_access, validate_word_alignment, Memory, DEFAULT_RAM_BASE, DEFAULT_RAM_SIZE,
    WORD_ACCESS_BYTES,
};

/// Public host-facing configuration and outcome types.
pub mod api;
pub use api::{
    CoreConfig, ExecutionMode, RunOutcome, RunStop, StepOutcome, DEFAULT_MAX_BLOCK_LEN,
    DEFAULT_TICKS_PER_SECOND,
};

/// Architectural CPU state model primitives.
pub mod state;
pub use state::{
    CpuState, RegisterFile, CR_EQ, CR_GT, CR_LT, CR_SO, GENERAL_REGISTER_COUNT, STACK_POINTER,
};

/// Instruction word accessors, predicates and encoders.
pub mod encoding;
pub use encoding::{Instruction, BO_ALWAYS, NOP_INSTRUCTION, RETURN_INSTRUCTION, SPR_CTR, SPR_LR};

/// Instruction decoder with field extraction and validation.
pub mod decoder;
pub use decoder::{DecodedInstruction, Decoder, Spr};

/// Fault taxonomy.
pub mod fault;
pub use fault::{FaultClass, FaultCode};

/// Precise instruction interpreter.
pub mod execute;
pub use execute::{commit_execution, execute_instruction, step_decoded, ExecuteState};

/// Decoded block cache for compiled execution.
pub mod jit;
pub use jit::{Block, BlockCache};

/// Breakpoint store.
pub mod breakpoints;
pub use breakpoints::{BreakPoints, Breakpoint};

/// CPU core tying state, memory and engines together.
pub mod cpu;
pub use cpu::{Cpu, FaultRecord};

/// Function symbols and call-graph analysis.
pub mod symbols;
pub use symbols::{MapParseError, Symbol, SymbolCallRef, SymbolDb};

/// Disassembler.
pub mod disasm;
pub use disasm::{disassemble, disassemble_range, instruction_name, DisassemblyRow};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;

/// Architectural register file types and storage model.
pub mod registers;
/// CPU thread run-state machine.
pub mod run_state;

pub use registers::{
    RegisterFile, CR_EQ, CR_GT, CR_LT, CR_SO, GENERAL_REGISTER_COUNT, STACK_POINTER,
};
pub use run_state::CpuState;

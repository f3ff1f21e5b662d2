//! Scoped execution-mode override.

use std::ops::{Deref, DerefMut};

use log::debug;
use ppc_core::ExecutionMode;

use crate::control::CpuControl;

/// Forces an execution mode for its lifetime and restores the previous one on
/// drop, including during unwinding.
pub struct ModeGuard<'a, C: CpuControl + ?Sized> {
    cpu: &'a mut C,
    saved: ExecutionMode,
}

impl<'a, C: CpuControl + ?Sized> ModeGuard<'a, C> {
    /// Switches `cpu` to `mode`, remembering the current mode.
    pub fn new(cpu: &'a mut C, mode: ExecutionMode) -> Self {
        let saved = cpu.mode();
        if saved != mode {
            debug!("forcing {} mode (was {})", mode.name(), saved.name());
            cpu.set_mode(mode);
        }
        Self { cpu, saved }
    }

    /// Mode that will be restored on drop.
    #[must_use]
    pub const fn saved(&self) -> ExecutionMode {
        self.saved
    }
}

impl<C: CpuControl + ?Sized> Deref for ModeGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.cpu
    }
}

impl<C: CpuControl + ?Sized> DerefMut for ModeGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.cpu
    }
}

impl<C: CpuControl + ?Sized> Drop for ModeGuard<'_, C> {
    fn drop(&mut self) {
        if self.cpu.mode() != self.saved {
            self.cpu.set_mode(self.saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use ppc_core::{CoreConfig, Cpu, ExecutionMode};

    use super::ModeGuard;
    use crate::control::CpuControl;

    fn compiled_cpu() -> Cpu {
        Cpu::new(CoreConfig {
            ram_size: 0x100,
            initial_mode: ExecutionMode::Compiled,
            ..CoreConfig::default()
        })
    }

    #[test]
    fn restores_mode_on_drop() {
        let mut cpu = compiled_cpu();
        {
            let guard = ModeGuard::new(&mut cpu, ExecutionMode::Interpreted);
            assert_eq!(guard.mode(), ExecutionMode::Interpreted);
            assert_eq!(guard.saved(), ExecutionMode::Compiled);
        }
        assert_eq!(CpuControl::mode(&cpu), ExecutionMode::Compiled);
    }

    #[test]
    fn restores_mode_when_unwinding() {
        let mut cpu = compiled_cpu();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = ModeGuard::new(&mut cpu, ExecutionMode::Interpreted);
            panic!("step failed");
        }));
        assert!(result.is_err());
        assert_eq!(CpuControl::mode(&cpu), ExecutionMode::Compiled);
    }
}

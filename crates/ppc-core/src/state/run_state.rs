/// Host-observable execution state of the CPU thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CpuState {
    /// Executing freely until a breakpoint, fault or pause request.
    #[default]
    Running,
    /// Paused; instructions only retire through explicit single steps.
    Stepping,
    /// Powered down; no further instructions retire.
    PowerDown,
}

impl CpuState {
    /// Returns `true` while the core is paused for stepping.
    #[must_use]
    pub const fn is_stepping(self) -> bool {
        matches!(self, Self::Stepping)
    }

    /// Returns `true` while the core is free-running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

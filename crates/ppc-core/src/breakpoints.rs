//! Instruction breakpoint store.

use std::collections::BTreeMap;

/// One installed breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Breakpoint {
    /// Instruction address.
    pub address: u32,
    /// Removed automatically when it fires.
    pub temporary: bool,
}

/// Address-keyed breakpoint set, iterated in address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakPoints {
    entries: BTreeMap<u32, bool>,
}

impl BreakPoints {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a breakpoint. Re-adding an address never demotes a persistent
    /// breakpoint to a temporary one.
    pub fn add(&mut self, address: u32, temporary: bool) {
        self.entries
            .entry(address)
            .and_modify(|existing| *existing &= temporary)
            .or_insert(temporary);
    }

    /// Removes the breakpoint at `address`; returns whether one existed.
    pub fn remove(&mut self, address: u32) -> bool {
        self.entries.remove(&address).is_some()
    }

    /// Flips a persistent breakpoint at `address`; returns whether one is now set.
    pub fn toggle(&mut self, address: u32) -> bool {
        if self.remove(address) {
            false
        } else {
            self.add(address, false);
            true
        }
    }

    /// Removes every temporary breakpoint.
    pub fn clear_temporary(&mut self) {
        self.entries.retain(|_, temporary| !*temporary);
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns `true` if any breakpoint is installed at `address`.
    #[must_use]
    pub fn is_address_breakpoint(&self, address: u32) -> bool {
        self.entries.contains_key(&address)
    }

    /// Returns `true` if the breakpoint at `address` is temporary.
    #[must_use]
    pub fn is_temporary(&self, address: u32) -> bool {
        self.entries.get(&address).copied().unwrap_or(false)
    }

    /// Number of installed breakpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no breakpoint is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates breakpoints in address order.
    pub fn iter(&self) -> impl Iterator<Item = Breakpoint> + '_ {
        self.entries
            .iter()
            .map(|(&address, &temporary)| Breakpoint { address, temporary })
    }
}

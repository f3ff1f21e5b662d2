//! Call stack reconstruction from `LR` and the `r1` back-chain.

use ppc_core::{Memory, RegisterFile, SymbolDb};

/// Frames followed through the back-chain before giving up.
pub const MAX_FRAMES: usize = 20;

/// One rendered call stack line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackEntry {
    /// Display text.
    pub name: String,
    /// Address to jump to when the entry is selected (the call site).
    pub address: u32,
}

/// Rendered call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callstack {
    /// Innermost frame first.
    pub entries: Vec<CallstackEntry>,
    /// `false` when the walk hit a bad `LR` or an unmapped frame.
    pub valid: bool,
}

/// Walks the stack of the paused core.
///
/// Returns `None` when `r1` does not point into RAM.
#[must_use]
pub fn walk(regs: &RegisterFile, memory: &Memory, symbols: &SymbolDb) -> Option<Callstack> {
    let sp = regs.sp();
    if !memory.is_ram_address(sp) {
        return None;
    }

    let lr = regs.lr();
    if lr == 0 {
        return Some(Callstack {
            entries: vec![CallstackEntry {
                name: "(error: LR=0)".to_owned(),
                address: 0,
            }],
            valid: false,
        });
    }

    let mut entries = Vec::new();
    // A leaf that has not saved LR yet has no frame of its own in the chain.
    if symbols.get_description(regs.pc()) != symbols.get_description(lr) {
        entries.push(CallstackEntry {
            name: format!(" * {} [ LR = {lr:08x} ]", describe(symbols, lr)),
            address: lr.wrapping_sub(4),
        });
    }

    let mut frame = memory.read_u32(sp).unwrap_or(0);
    let mut followed = 0;
    while frame != 0 && frame != 0xFFFF_FFFF && followed < MAX_FRAMES {
        let Ok(saved_lr) = memory.read_u32(frame.wrapping_add(4)) else {
            return Some(Callstack {
                entries,
                valid: false,
            });
        };
        entries.push(CallstackEntry {
            name: format!(" * {} [ addr = {saved_lr:08x} ]", describe(symbols, saved_lr)),
            address: saved_lr.wrapping_sub(4),
        });
        frame = memory.read_u32(frame).unwrap_or(0);
        followed += 1;
    }

    Some(Callstack {
        entries,
        valid: true,
    })
}

fn describe(symbols: &SymbolDb, addr: u32) -> &str {
    symbols
        .get_symbol_from_addr(addr)
        .map_or("(unknown)", |symbol| symbol.name.as_str())
}

#[cfg(test)]
mod tests {
    use ppc_core::{Memory, RegisterFile, SymbolDb};

    use super::{walk, MAX_FRAMES};

    const BASE: u32 = 0x8000_0000;

    fn symbols() -> SymbolDb {
        let mut db = SymbolDb::new();
        db.add("main", BASE, 0x100);
        db.add("middle", BASE + 0x100, 0x100);
        db.add("leaf", BASE + 0x200, 0x100);
        db
    }

    #[test]
    fn invalid_stack_pointer_yields_none() {
        let regs = RegisterFile::default();
        assert!(walk(&regs, &Memory::new(BASE, 0x1000), &symbols()).is_none());
    }

    #[test]
    fn zero_lr_is_reported_as_error_entry() {
        let mut regs = RegisterFile::default();
        regs.set_gpr(1, BASE + 0x800);
        let stack = walk(&regs, &Memory::new(BASE, 0x1000), &symbols()).expect("sp valid");
        assert!(!stack.valid);
        assert_eq!(stack.entries.len(), 1);
        assert_eq!(stack.entries[0].address, 0);
    }

    #[test]
    fn walks_back_chain_innermost_first() {
        let mut memory = Memory::new(BASE, 0x1000);
        // leaf frame at 0x800 -> middle frame at 0x810 -> end
        memory.write_u32(BASE + 0x800, BASE + 0x810).expect("in range");
        memory.write_u32(BASE + 0x810, 0).expect("in range");
        memory.write_u32(BASE + 0x814, BASE + 0x14).expect("in range");
        let mut regs = RegisterFile::default();
        regs.set_gpr(1, BASE + 0x800);
        regs.set_pc(BASE + 0x204);
        regs.set_lr(BASE + 0x108);

        let stack = walk(&regs, &memory, &symbols()).expect("sp valid");
        assert!(stack.valid);
        let names: Vec<_> = stack.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![" * middle [ LR = 80000108 ]", " * main [ addr = 80000014 ]"]
        );
        assert_eq!(stack.entries[0].address, BASE + 0x104);
        assert_eq!(stack.entries[1].address, BASE + 0x10);
    }

    #[test]
    fn self_referencing_chain_stops_at_frame_limit() {
        let mut memory = Memory::new(BASE, 0x1000);
        memory.write_u32(BASE + 0x800, BASE + 0x800).expect("in range");
        memory.write_u32(BASE + 0x804, BASE + 0x14).expect("in range");
        let mut regs = RegisterFile::default();
        regs.set_gpr(1, BASE + 0x800);
        regs.set_pc(BASE + 0x10);
        regs.set_lr(BASE + 0x20);
        let stack = walk(&regs, &memory, &symbols()).expect("sp valid");
        assert_eq!(stack.entries.len(), MAX_FRAMES);
    }
}

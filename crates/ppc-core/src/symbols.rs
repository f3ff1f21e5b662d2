//! Function symbol database and call-graph analysis.
//!
//! Symbols come from a text map with one function per line:
//!
//! ```text
//! .text section layout
//! 80003100 00000048 80003100 4 main
//! ```
//!
//! Columns are address, size, virtual address, alignment and name, the first
//! three in hex. Lines whose first column is not hex are treated as headers.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use log::debug;
use thiserror::Error;

use crate::encoding::{Instruction, OPCD_B};
use crate::execute::displacement_target;
use crate::memory::Memory;

/// One edge of the call graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SymbolCallRef {
    /// Start address of the function on the other end of the edge.
    pub function: u32,
    /// Address of the `bl` instruction.
    pub call_address: u32,
}

/// A function symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Symbol {
    /// Function name.
    pub name: String,
    /// Start address.
    pub address: u32,
    /// Size in bytes; `0` means only the start address belongs to it.
    pub size: u32,
    /// Calls made from this function.
    pub calls: Vec<SymbolCallRef>,
    /// Call sites in other functions that target this one.
    pub callers: Vec<SymbolCallRef>,
}

impl Symbol {
    /// Creates a symbol with an empty call graph.
    #[must_use]
    pub fn new(name: impl Into<String>, address: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            address,
            size,
            calls: Vec::new(),
            callers: Vec::new(),
        }
    }

    /// Returns `true` if `addr` lies inside this function.
    #[must_use]
    pub const fn contains(&self, addr: u32) -> bool {
        addr == self.address || (addr > self.address && addr - self.address < self.size)
    }
}

/// Error raised for a malformed map line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("map line {line}: {reason}")]
pub struct MapParseError {
    /// One-based line number.
    pub line: usize,
    /// What was wrong with it.
    pub reason: String,
}

/// Address-ordered symbol table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolDb {
    symbols: BTreeMap<u32, Symbol>,
}

impl SymbolDb {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the symbol starting at `address`.
    pub fn add(&mut self, name: impl Into<String>, address: u32, size: u32) {
        self.symbols.insert(address, Symbol::new(name, address, size));
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Iterates symbols in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Finds the function containing `addr`.
    #[must_use]
    pub fn get_symbol_from_addr(&self, addr: u32) -> Option<&Symbol> {
        self.symbols
            .range(..=addr)
            .next_back()
            .map(|(_, symbol)| symbol)
            .filter(|symbol| symbol.contains(addr))
    }

    /// Looks a function up by exact name.
    #[must_use]
    pub fn get_symbol_by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols.values().find(|symbol| symbol.name == name)
    }

    /// Name of the function containing `addr`, or `" --- "`.
    #[must_use]
    pub fn get_description(&self, addr: u32) -> &str {
        self.get_symbol_from_addr(addr)
            .map_or(" --- ", |symbol| symbol.name.as_str())
    }

    /// Parses a symbol map.
    ///
    /// # Errors
    ///
    /// Returns [`MapParseError`] for a line that starts with an address but
    /// is otherwise malformed.
    pub fn parse_map(text: &str) -> Result<Self, MapParseError> {
        let mut db = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('.') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(address) = fields.next().and_then(parse_hex) else {
                continue;
            };
            let error = |reason: &str| MapParseError {
                line: index + 1,
                reason: reason.to_owned(),
            };
            let size = fields
                .next()
                .and_then(parse_hex)
                .ok_or_else(|| error("missing or invalid size"))?;
            fields
                .next()
                .and_then(parse_hex)
                .ok_or_else(|| error("missing or invalid virtual address"))?;
            fields
                .next()
                .and_then(|a| a.parse::<u32>().ok())
                .ok_or_else(|| error("missing or invalid alignment"))?;
            let name = fields.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return Err(error("missing name"));
            }
            db.add(name, address, size);
        }
        debug!("loaded {} symbol(s) from map", db.len());
        Ok(db)
    }

    /// Writes the database in the map format accepted by [`Self::parse_map`].
    #[must_use]
    pub fn to_map_string(&self) -> String {
        let mut out = String::from(".text section layout\n");
        for symbol in self.symbols.values() {
            let _ = writeln!(
                out,
                "{:08x} {:08x} {:08x} 4 {}",
                symbol.address, symbol.size, symbol.address, symbol.name
            );
        }
        out
    }

    /// Rebuilds the call graph by scanning every function body for `bl`.
    pub fn analyze_calls(&mut self, memory: &Memory) {
        let mut edges = Vec::new();
        for symbol in self.symbols.values() {
            let words = symbol.size.max(4) / 4;
            for addr in (0..words).map(|i| symbol.address.wrapping_add(i * 4)) {
                let Ok(word) = memory.read_u32(addr) else {
                    break;
                };
                let inst = Instruction(word);
                if inst.opcd() != OPCD_B || !inst.lk() {
                    continue;
                }
                let target = displacement_target(addr, inst.li(), inst.aa());
                if let Some(callee) = self.get_symbol_from_addr(target) {
                    edges.push((symbol.address, callee.address, addr));
                }
            }
        }

        for symbol in self.symbols.values_mut() {
            symbol.calls.clear();
            symbol.callers.clear();
        }
        for &(caller, callee, call_address) in &edges {
            if let Some(symbol) = self.symbols.get_mut(&caller) {
                symbol.calls.push(SymbolCallRef {
                    function: callee,
                    call_address,
                });
            }
            if let Some(symbol) = self.symbols.get_mut(&callee) {
                symbol.callers.push(SymbolCallRef {
                    function: caller,
                    call_address,
                });
            }
        }
        debug!("call analysis found {} edge(s)", edges.len());
    }
}

fn parse_hex(text: &str) -> Option<u32> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::{SymbolCallRef, SymbolDb};
    use crate::encoding::{Instruction, NOP_INSTRUCTION, RETURN_INSTRUCTION};
    use crate::memory::Memory;

    const BASE: u32 = 0x8000_0000;

    #[test]
    fn lookup_by_containing_address() {
        let mut db = SymbolDb::new();
        db.add("main", BASE, 0x20);
        db.add("helper", BASE + 0x20, 0x10);
        assert_eq!(db.get_description(BASE + 0x1C), "main");
        assert_eq!(db.get_description(BASE + 0x20), "helper");
        assert_eq!(db.get_description(BASE + 0x30), " --- ");
        assert!(db.get_symbol_from_addr(BASE - 4).is_none());
    }

    #[test]
    fn map_parses_and_skips_headers() {
        let text = ".text section layout\n\n  80000000 00000020 80000000 4 main\nStarting  Virtual\n80000020 00000010 80000020 4 do thing\n";
        let db = SymbolDb::parse_map(text).expect("parses");
        assert_eq!(db.len(), 2);
        assert_eq!(db.get_description(BASE + 0x24), "do thing");
    }

    #[test]
    fn map_rejects_truncated_line() {
        let err = SymbolDb::parse_map("80000000 00000020\n").expect_err("truncated");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn map_output_parses_back() {
        let mut db = SymbolDb::new();
        db.add("main", BASE, 0x20);
        let reparsed = SymbolDb::parse_map(&db.to_map_string()).expect("parses");
        assert_eq!(reparsed, db);
    }

    #[test]
    fn analyze_calls_links_both_directions() {
        let mut memory = Memory::new(BASE, 0x100);
        memory
            .write_words(
                BASE,
                &[
                    NOP_INSTRUCTION,
                    Instruction::branch(BASE + 4, BASE + 0x10, true).hex(),
                    RETURN_INSTRUCTION,
                    NOP_INSTRUCTION,
                    RETURN_INSTRUCTION,
                ],
            )
            .expect("fits");
        let mut db = SymbolDb::new();
        db.add("main", BASE, 0x10);
        db.add("leaf", BASE + 0x10, 0x4);
        db.analyze_calls(&memory);

        let main = db.get_symbol_by_name("main").expect("main");
        assert_eq!(
            main.calls,
            vec![SymbolCallRef {
                function: BASE + 0x10,
                call_address: BASE + 4
            }]
        );
        let leaf = db.get_symbol_by_name("leaf").expect("leaf");
        assert_eq!(
            leaf.callers,
            vec![SymbolCallRef {
                function: BASE,
                call_address: BASE + 4
            }]
        );
    }
}

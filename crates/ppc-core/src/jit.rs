//! Decoded block cache backing the compiled execution mode.
//!
//! A block is a run of pre-decoded instructions that ends after the first
//! branch or at the length limit. Blocks are keyed by start address and keep
//! the raw words they were built from so stale entries can be detected.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::trace;

use crate::decoder::{DecodedInstruction, Decoder};
use crate::encoding::Instruction;
use crate::memory::Memory;
use crate::FaultCode;

/// One cached block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    start: u32,
    words: Vec<u32>,
    ops: Vec<DecodedInstruction>,
}

impl Block {
    /// Address of the first instruction.
    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Number of instructions in the block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Blocks always hold at least one instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Decoded instructions in program order.
    #[must_use]
    pub fn ops(&self) -> &[DecodedInstruction] {
        &self.ops
    }

    #[allow(clippy::cast_possible_truncation)]
    fn end(&self) -> u32 {
        self.start.wrapping_add(self.words.len() as u32 * 4)
    }

    fn overlaps(&self, addr: u32, len: u32) -> bool {
        let range_end = addr.saturating_add(len.max(1));
        self.start < range_end && addr < self.end()
    }

    fn is_stale(&self, memory: &Memory) -> bool {
        self.words.iter().zip((0u32..).map(|i| i * 4)).any(|(&word, offset)| {
            memory.read_u32(self.start.wrapping_add(offset)) != Ok(word)
        })
    }
}

/// Address-keyed cache of decoded blocks.
#[derive(Debug, Clone, Default)]
pub struct BlockCache {
    blocks: HashMap<u32, Block>,
}

impl BlockCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached block starting at `pc`.
    #[must_use]
    pub fn get(&self, pc: u32) -> Option<&Block> {
        self.blocks.get(&pc)
    }

    /// Returns the block at `pc`, building it with at most `max_len`
    /// instructions on a miss.
    ///
    /// # Errors
    ///
    /// Returns the fetch or decode fault of the first instruction. Faults on
    /// later instructions end the block early instead.
    pub fn get_or_build(
        &mut self,
        pc: u32,
        max_len: usize,
        memory: &Memory,
    ) -> Result<&Block, FaultCode> {
        match self.blocks.entry(pc) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let block = build_block(pc, max_len.max(1), memory)?;
                trace!("compiled block at {pc:08x} ({} instructions)", block.len());
                Ok(entry.insert(block))
            }
        }
    }

    /// Drops blocks overlapping `[addr, addr + len)`.
    ///
    /// With `force` every overlapping block goes; otherwise only blocks whose
    /// cached words no longer match memory.
    pub fn invalidate(&mut self, addr: u32, len: u32, force: bool, memory: &Memory) {
        let before = self.blocks.len();
        self.blocks
            .retain(|_, block| !(block.overlaps(addr, len) && (force || block.is_stale(memory))));
        let dropped = before - self.blocks.len();
        if dropped > 0 {
            trace!("invalidated {dropped} block(s) at {addr:08x}+{len}");
        }
    }

    /// Drops every block.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn build_block(pc: u32, max_len: usize, memory: &Memory) -> Result<Block, FaultCode> {
    let mut words = Vec::new();
    let mut ops = Vec::new();
    let mut addr = pc;

    while ops.len() < max_len {
        let fetched = memory
            .read_u32(addr)
            .and_then(|word| Decoder::decode(Instruction(word)).map(|op| (word, op)));
        let (word, op) = match fetched {
            Ok(pair) => pair,
            Err(cause) if ops.is_empty() => return Err(cause),
            Err(_) => break,
        };
        words.push(word);
        ops.push(op);
        if op.ends_block() {
            break;
        }
        addr = addr.wrapping_add(4);
    }

    Ok(Block {
        start: pc,
        words,
        ops,
    })
}

#[cfg(test)]
mod tests {
    use super::BlockCache;
    use crate::encoding::{Instruction, NOP_INSTRUCTION, RETURN_INSTRUCTION};
    use crate::memory::Memory;
    use crate::FaultCode;

    const BASE: u32 = 0x8000_0000;

    fn program(words: &[u32]) -> Memory {
        let mut memory = Memory::new(BASE, 0x100);
        memory.write_words(BASE, words).expect("fits");
        memory
    }

    #[test]
    fn block_ends_after_first_branch() {
        let memory = program(&[NOP_INSTRUCTION, NOP_INSTRUCTION, RETURN_INSTRUCTION, NOP_INSTRUCTION]);
        let mut cache = BlockCache::new();
        let block = cache.get_or_build(BASE, 32, &memory).expect("builds");
        assert_eq!(block.len(), 3);
    }

    #[test]
    fn block_respects_length_limit() {
        let memory = program(&[NOP_INSTRUCTION; 8]);
        let mut cache = BlockCache::new();
        assert_eq!(cache.get_or_build(BASE, 1, &memory).expect("builds").len(), 1);
    }

    #[test]
    fn undecodable_tail_ends_block_early() {
        let memory = program(&[NOP_INSTRUCTION, 0, NOP_INSTRUCTION]);
        let mut cache = BlockCache::new();
        assert_eq!(cache.get_or_build(BASE, 32, &memory).expect("builds").len(), 1);
        assert_eq!(
            cache.get_or_build(BASE + 4, 32, &memory).map(|b| b.len()),
            Err(FaultCode::IllegalInstruction)
        );
    }

    #[test]
    fn forced_invalidation_drops_overlapping_blocks() {
        let memory = program(&[NOP_INSTRUCTION, NOP_INSTRUCTION, RETURN_INSTRUCTION]);
        let mut cache = BlockCache::new();
        cache.get_or_build(BASE, 32, &memory).expect("builds");
        cache.invalidate(BASE + 0x40, 4, true, &memory);
        assert_eq!(cache.len(), 1);
        cache.invalidate(BASE + 8, 4, true, &memory);
        assert!(cache.is_empty());
    }

    #[test]
    fn unforced_invalidation_keeps_fresh_blocks() {
        let mut memory = program(&[NOP_INSTRUCTION, RETURN_INSTRUCTION]);
        let mut cache = BlockCache::new();
        cache.get_or_build(BASE, 32, &memory).expect("builds");
        cache.invalidate(BASE, 4, false, &memory);
        assert_eq!(cache.len(), 1);

        memory
            .write_u32(BASE, Instruction::addi(3, 0, 1).hex())
            .expect("in range");
        cache.invalidate(BASE, 4, false, &memory);
        assert!(cache.is_empty());
    }
}

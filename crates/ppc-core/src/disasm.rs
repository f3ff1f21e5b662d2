//! Instruction disassembly for the supported Gekko subset.
//!
//! Output follows the usual PowerPC simplified mnemonics (`li`, `mr`, `blr`,
//! `beq`, `mflr` ...). Words outside the subset render as `.long 0xXXXXXXXX`.

use crate::decoder::{DecodedInstruction, Decoder, Spr};
use crate::encoding::{Instruction, BO_ALWAYS, NOP_INSTRUCTION};
use crate::execute::displacement_target;
use crate::memory::Memory;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single disassembled instruction row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisassemblyRow {
    /// Instruction address.
    pub address: u32,
    /// Raw instruction word.
    pub raw: u32,
    /// Rendered text, mnemonic and operands.
    pub text: String,
}

/// Disassembles `count` consecutive words starting at `start`.
///
/// Rows stop at the first address outside mapped memory.
#[must_use]
pub fn disassemble_range(memory: &Memory, start: u32, count: usize) -> Vec<DisassemblyRow> {
    (0..count)
        .map_while(|i| {
            let address = start.wrapping_add(u32::try_from(i).ok()? * 4);
            let raw = memory.read_u32(address).ok()?;
            Some(DisassemblyRow {
                address,
                raw,
                text: disassemble(address, Instruction(raw)),
            })
        })
        .collect()
}

/// Renders one instruction located at `addr`.
#[must_use]
pub fn disassemble(addr: u32, inst: Instruction) -> String {
    if inst.hex() == NOP_INSTRUCTION {
        return "nop".to_owned();
    }
    let Ok(decoded) = Decoder::decode(inst) else {
        return format!(".long 0x{:08X}", inst.hex());
    };

    match decoded {
        DecodedInstruction::Addi { rd, ra: 0, simm } => format!("li r{rd}, {simm}"),
        DecodedInstruction::Addi { rd, ra, simm } => format!("addi r{rd}, r{ra}, {simm}"),
        DecodedInstruction::Addis { rd, ra: 0, simm } => format!("lis r{rd}, {simm}"),
        DecodedInstruction::Addis { rd, ra, simm } => format!("addis r{rd}, r{ra}, {simm}"),
        DecodedInstruction::Ori { ra, rs, uimm } => format!("ori r{ra}, r{rs}, 0x{uimm:04X}"),
        DecodedInstruction::Oris { ra, rs, uimm } => format!("oris r{ra}, r{rs}, 0x{uimm:04X}"),
        DecodedInstruction::Cmpi { crf, ra, simm } => {
            format!("cmpwi {}r{ra}, {simm}", cr_prefix(crf))
        }
        DecodedInstruction::Cmpli { crf, ra, uimm } => {
            format!("cmplwi {}r{ra}, {uimm}", cr_prefix(crf))
        }
        DecodedInstruction::Cmp { crf, ra, rb } => format!("cmpw {}r{ra}, r{rb}", cr_prefix(crf)),
        DecodedInstruction::Cmpl { crf, ra, rb } => {
            format!("cmplw {}r{ra}, r{rb}", cr_prefix(crf))
        }
        DecodedInstruction::Lwz { rd, ra, d } => format!("lwz r{rd}, {d}(r{ra})"),
        DecodedInstruction::Stw { rs, ra, d } => format!("stw r{rs}, {d}(r{ra})"),
        DecodedInstruction::Stwu { rs, ra, d } => format!("stwu r{rs}, {d}(r{ra})"),
        DecodedInstruction::Add { rd, ra, rb, rc } => format!("add{} r{rd}, r{ra}, r{rb}", dot(rc)),
        DecodedInstruction::Subf { rd, ra, rb, rc } => {
            format!("subf{} r{rd}, r{ra}, r{rb}", dot(rc))
        }
        DecodedInstruction::Or { ra, rs, rb, rc } if rs == rb => {
            format!("mr{} r{ra}, r{rs}", dot(rc))
        }
        DecodedInstruction::Or { ra, rs, rb, rc } => format!("or{} r{ra}, r{rs}, r{rb}", dot(rc)),
        DecodedInstruction::Mfspr { rd, spr } => format!("mf{} r{rd}", spr_name(spr)),
        DecodedInstruction::Mtspr { rs, spr } => format!("mt{} r{rs}", spr_name(spr)),
        DecodedInstruction::B { li, aa, lk } => {
            let target = displacement_target(addr, li, aa);
            format!("b{}{} ->0x{target:08X}", link(lk), absolute(aa))
        }
        DecodedInstruction::Bc { bo, bi, bd, aa, lk } => {
            let target = displacement_target(addr, bd, aa);
            let suffix = format!("{}{}", link(lk), absolute(aa));
            match condition(bo, bi) {
                Some(cond) => format!("{cond}{suffix} {}->0x{target:08X}", cr_prefix(bi / 4)),
                None => format!("bc{suffix} {bo}, {bi}, ->0x{target:08X}"),
            }
        }
        DecodedInstruction::Bclr { bo, bi, lk } => register_branch("lr", bo, bi, lk),
        DecodedInstruction::Bcctr { bo, bi, lk } => register_branch("ctr", bo, bi, lk),
    }
}

/// Base mnemonic of `word`, ignoring simplified forms and record/link bits.
#[must_use]
pub fn instruction_name(word: u32) -> Option<&'static str> {
    let name = match Decoder::decode(Instruction(word)).ok()? {
        DecodedInstruction::Addi { .. } => "addi",
        DecodedInstruction::Addis { .. } => "addis",
        DecodedInstruction::Ori { .. } => "ori",
        DecodedInstruction::Oris { .. } => "oris",
        DecodedInstruction::Cmpi { .. } => "cmpi",
        DecodedInstruction::Cmpli { .. } => "cmpli",
        DecodedInstruction::Cmp { .. } => "cmp",
        DecodedInstruction::Cmpl { .. } => "cmpl",
        DecodedInstruction::Lwz { .. } => "lwz",
        DecodedInstruction::Stw { .. } => "stw",
        DecodedInstruction::Stwu { .. } => "stwu",
        DecodedInstruction::Add { .. } => "add",
        DecodedInstruction::Subf { .. } => "subf",
        DecodedInstruction::Or { .. } => "or",
        DecodedInstruction::Mfspr { .. } => "mfspr",
        DecodedInstruction::Mtspr { .. } => "mtspr",
        DecodedInstruction::B { .. } => "b",
        DecodedInstruction::Bc { .. } => "bc",
        DecodedInstruction::Bclr { .. } => "bclr",
        DecodedInstruction::Bcctr { .. } => "bcctr",
    };
    Some(name)
}

fn register_branch(target: &str, bo: u32, bi: u32, lk: bool) -> String {
    if bo == BO_ALWAYS {
        return format!("b{target}{}", link(lk));
    }
    match condition(bo, bi) {
        Some(cond) if bi < 4 => format!("{cond}{target}{}", link(lk)),
        Some(cond) => format!("{cond}{target}{} cr{}", link(lk), bi / 4),
        None => format!("bc{target}{} {bo}, {bi}", link(lk)),
    }
}

// Simplified mnemonic for the common BO encodings (hint bit ignored).
fn condition(bo: u32, bi: u32) -> Option<&'static str> {
    const IF_TRUE: [&str; 4] = ["blt", "bgt", "beq", "bso"];
    const IF_FALSE: [&str; 4] = ["bge", "ble", "bne", "bns"];
    let bit = (bi % 4) as usize;
    match bo & !1 {
        12 => Some(IF_TRUE[bit]),
        4 => Some(IF_FALSE[bit]),
        16 => Some("bdnz"),
        18 => Some("bdz"),
        20 => Some("b"),
        _ => None,
    }
}

fn cr_prefix(field: u32) -> String {
    if field == 0 {
        String::new()
    } else {
        format!("cr{field}, ")
    }
}

const fn spr_name(spr: Spr) -> &'static str {
    match spr {
        Spr::Lr => "lr",
        Spr::Ctr => "ctr",
    }
}

const fn dot(rc: bool) -> &'static str {
    if rc {
        "."
    } else {
        ""
    }
}

const fn link(lk: bool) -> &'static str {
    if lk {
        "l"
    } else {
        ""
    }
}

const fn absolute(aa: bool) -> &'static str {
    if aa {
        "a"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::{disassemble, disassemble_range, instruction_name};
    use crate::encoding::{Instruction, NOP_INSTRUCTION, RETURN_INSTRUCTION, SPR_CTR, SPR_LR};
    use crate::memory::Memory;

    #[test]
    fn renders_common_aliases() {
        assert_eq!(disassemble(0, Instruction(NOP_INSTRUCTION)), "nop");
        assert_eq!(disassemble(0, Instruction(RETURN_INSTRUCTION)), "blr");
        assert_eq!(disassemble(0, Instruction::addi(3, 0, -1)), "li r3, -1");
        assert_eq!(disassemble(0, Instruction::mfspr(0, SPR_LR)), "mflr r0");
        assert_eq!(disassemble(0, Instruction::mtspr(SPR_CTR, 12)), "mtctr r12");
        // bctr
        assert_eq!(disassemble(0, Instruction(0x4E80_0420)), "bctr");
        // mr r31, r3
        assert_eq!(disassemble(0, Instruction(0x7C7F_1B78)), "mr r31, r3");
    }

    #[test]
    fn renders_branch_targets() {
        let bl = Instruction::branch(0x8000_1000, 0x8000_2000, true);
        assert_eq!(disassemble(0x8000_1000, bl), "bl ->0x80002000");
        let beq = Instruction::branch_conditional(12, 2, 0x8000_0010, 0x8000_0000, false);
        assert_eq!(disassemble(0x8000_0010, beq), "beq ->0x80000000");
    }

    #[test]
    fn unknown_words_render_as_data() {
        assert_eq!(disassemble(0, Instruction(0)), ".long 0x00000000");
    }

    #[test]
    fn instruction_names_ignore_aliases() {
        assert_eq!(instruction_name(NOP_INSTRUCTION), Some("ori"));
        assert_eq!(instruction_name(RETURN_INSTRUCTION), Some("bclr"));
        assert_eq!(instruction_name(0), None);
    }

    #[test]
    fn range_stops_at_unmapped_memory() {
        let mut memory = Memory::new(0x8000_0000, 8);
        memory
            .write_words(0x8000_0000, &[NOP_INSTRUCTION, RETURN_INSTRUCTION])
            .expect("fits");
        let rows = disassemble_range(&memory, 0x8000_0000, 4);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].text, "blr");
    }
}

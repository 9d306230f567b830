//! ISA helpers.
//!
//! The allocation optimizers need to know what kind of jump terminates a
//! basic block to price the crossing of the on-chip/off-chip boundary. The
//! helpers recover the displacement type from the disassembled text of the
//! block's last instruction. Dump lines look like
//!
//! ```text
//! 800001a4:  5f82      jeq d15, #2, 800001c0
//! ```
//!
//! i.e. address, hex encoding, mnemonic, operands. The encoding width
//! distinguishes the 16-bit from the 32-bit instruction formats.

use crate::analyzer::arch::{Architecture, DisplacementType};

/// Decodes displacement types of terminating instructions for one ISA.
pub trait IsaHelper {
    /// Displacement type of the block's terminating instruction.
    /// `NoDisplacement` when the block does not end in a jump or call.
    fn displacement_type(&self, block_code: &str) -> DisplacementType;

    /// Whether the block's terminating instruction is a return.
    fn ends_with_return(&self, block_code: &str) -> bool;
}

/// Construct the helper matching the configured architecture.
pub fn isa_helper_for(architecture: Architecture) -> Box<dyn IsaHelper> {
    match architecture {
        Architecture::Carcore => Box::new(CarCoreIsa),
        Architecture::Armv6m => Box::new(Armv6mIsa),
    }
}

/// Last non-empty line of a block's code, split into (encoding, mnemonic).
fn last_instruction(block_code: &str) -> Option<(String, String)> {
    let line = block_code.lines().rev().find(|l| !l.trim().is_empty())?;
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    // the leading address token carries a trailing colon
    let encoding = if first.ends_with(':') { tokens.next()? } else { first };
    let mnemonic = tokens.next()?;
    Some((encoding.to_string(), mnemonic.to_lowercase()))
}

fn is_short_encoding(encoding: &str) -> bool {
    encoding.chars().filter(|c| c.is_ascii_hexdigit()).count() <= 4
}

/// CarCore (TriCore-derived) instruction set.
pub struct CarCoreIsa;

impl IsaHelper for CarCoreIsa {
    fn displacement_type(&self, block_code: &str) -> DisplacementType {
        let Some((encoding, mnemonic)) = last_instruction(block_code) else {
            return DisplacementType::NoDisplacement;
        };
        let short = is_short_encoding(&encoding);
        match mnemonic.as_str() {
            "ji" | "jli" | "calli" | "ret" | "rfe" => DisplacementType::Indirect,
            "call" | "calla" | "fcall" => {
                if short {
                    DisplacementType::Disp8
                } else {
                    DisplacementType::Disp24
                }
            }
            "j" | "ja" | "jl" | "jla" => {
                if short {
                    DisplacementType::Disp8
                } else {
                    DisplacementType::Disp24
                }
            }
            "loop" | "loopu" => DisplacementType::Disp15,
            m if m.starts_with('j') => {
                // conditional jumps: jeq, jne, jlt, jge, jz, jnz, ...
                if short {
                    DisplacementType::Disp4
                } else {
                    DisplacementType::Disp15
                }
            }
            _ => DisplacementType::NoDisplacement,
        }
    }

    fn ends_with_return(&self, block_code: &str) -> bool {
        matches!(
            last_instruction(block_code).map(|(_, m)| m),
            Some(m) if m == "ret" || m == "rfe"
        )
    }
}

/// ARMv6-M (Thumb) instruction set.
pub struct Armv6mIsa;

impl IsaHelper for Armv6mIsa {
    fn displacement_type(&self, block_code: &str) -> DisplacementType {
        let Some((_, mnemonic)) = last_instruction(block_code) else {
            return DisplacementType::NoDisplacement;
        };
        let base = mnemonic.trim_end_matches(".n").trim_end_matches(".w");
        match base {
            "bx" | "blx" => DisplacementType::Indirect,
            "pop" => DisplacementType::Indirect,
            "bl" => DisplacementType::Disp24,
            "b" => DisplacementType::Disp11,
            m if m.starts_with('b') && m.len() <= 4 => {
                // conditional branches: beq, bne, bcs, ...
                DisplacementType::Disp8
            }
            _ => DisplacementType::NoDisplacement,
        }
    }

    fn ends_with_return(&self, block_code: &str) -> bool {
        match last_instruction(block_code) {
            Some((_, m)) => {
                let base = m.trim_end_matches(".n");
                base == "bx" || base == "pop"
            }
            None => false,
        }
    }
}

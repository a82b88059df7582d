//! Disassembler.

use std::fmt;

use crate::opcode::{decode_word, Op, Operands};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Word(i32),
    Byte(u8),
    Pair(u8, u8),
    Triple(u8, u8, u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub at: usize,
    pub op: Op,
    pub operand: Operand,
}

impl Instruction {
    pub fn len(&self) -> usize {
        self.op.len()
    }

    /// Absolute target of a relative operand.
    pub fn target(&self) -> Option<i64> {
        match self.operand {
            Operand::Word(offset) if self.op.is_relative() => {
                Some((self.at + self.len()) as i64 + offset as i64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        match self.operand {
            Operand::None => {}
            Operand::Word(w) => write!(f, " {}", w)?,
            Operand::Byte(b) => write!(f, " {}", b)?,
            Operand::Pair(a, b) => write!(f, " {} {}", a, b)?,
            Operand::Triple(a, b, c) => write!(f, " {} {} {}", a, b, c)?,
        }
        if let Some(target) = self.target() {
            write!(f, " ; -> {:04x}", target)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Instruction(Instruction),
    Invalid { at: usize, byte: u8 },
    Truncated { at: usize, op: Op },
}

impl Decoded {
    pub fn at(&self) -> usize {
        match self {
            Decoded::Instruction(i) => i.at,
            Decoded::Invalid { at, .. } | Decoded::Truncated { at, .. } => *at,
        }
    }

    fn len(&self, code_len: usize) -> usize {
        match self {
            Decoded::Instruction(i) => i.len(),
            Decoded::Invalid { .. } => 1,
            Decoded::Truncated { at, .. } => code_len - at,
        }
    }
}

/// Decode the instruction starting at `at`. `at` must be inside `code`.
pub fn decode(code: &[u8], at: usize) -> Decoded {
    let byte = code[at];
    let op = match Op::from_byte(byte) {
        Some(op) => op,
        None => return Decoded::Invalid { at, byte },
    };
    let operands = match code.get(at + 1..at + op.len()) {
        Some(bytes) => bytes,
        None => return Decoded::Truncated { at, op },
    };
    let operand = match op.operands() {
        Operands::None => Operand::None,
        Operands::Word => Operand::Word(decode_word([
            operands[0],
            operands[1],
            operands[2],
            operands[3],
        ])),
        Operands::Byte => Operand::Byte(operands[0]),
        Operands::Pair => Operand::Pair(operands[0], operands[1]),
        Operands::Triple => Operand::Triple(operands[0], operands[1], operands[2]),
    };
    Decoded::Instruction(Instruction { at, op, operand })
}

pub fn disassemble(code: &[u8]) -> Vec<Decoded> {
    let mut out = Vec::new();
    let mut at = 0;
    while at < code.len() {
        let d = decode(code, at);
        at += d.len(code.len());
        out.push(d);
    }
    out
}

/// One listing line: address, raw bytes, then the instruction text.
pub fn format_line(code: &[u8], decoded: &Decoded) -> String {
    let at = decoded.at();
    let end = (at + decoded.len(code.len())).min(code.len());
    let bytes: Vec<String> = code[at..end].iter().map(|b| format!("{:02x}", b)).collect();
    let text = match decoded {
        Decoded::Instruction(i) => i.to_string(),
        Decoded::Invalid { byte, .. } => format!("<invalid 0x{:02x}>", byte),
        Decoded::Truncated { op, .. } => format!("{} <truncated>", op),
    };
    format!("{:04x}  {:<14} {}", at, bytes.join(" "), text)
}

pub fn listing(code: &[u8]) -> String {
    disassemble(code)
        .iter()
        .map(|d| format_line(code, d))
        .collect::<Vec<_>>()
        .join("\n")
}

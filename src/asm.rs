//! A small assembler with named labels.
//!
//! Relative operands (`cls`, `cont` and the jumps) name a label; the offset
//! is resolved in [`Assembler::finish`] against the position just after the
//! operand.

use std::collections::HashMap;

use thiserror::Error;

use crate::opcode::{encode_word, Op};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsmError {
    #[error("undefined label {0}")]
    UndefinedLabel(String),
    #[error("label {0} defined twice")]
    DuplicateLabel(String),
    #[error("offset to {0} does not fit in a 31-bit operand")]
    OffsetOutOfRange(String),
}

/// Assembled code plus the resolved label positions.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub code: Vec<u8>,
    labels: HashMap<String, usize>,
}

impl Assembly {
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }
}

struct Fixup {
    /// Position of the 4-byte operand.
    at: usize,
    label: String,
}

#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: HashMap<String, usize>,
    fixups: Vec<Fixup>,
    duplicate: Option<String>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in the code buffer.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        if self.labels.insert(name.to_string(), self.code.len()).is_some() {
            self.duplicate.get_or_insert_with(|| name.to_string());
        }
        self
    }

    /// Emit an instruction without operands.
    pub fn emit(&mut self, op: Op) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    fn with_word(&mut self, op: Op, value: i32) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(&encode_word(value));
        self
    }

    fn with_target(&mut self, op: Op, label: &str) -> &mut Self {
        self.code.push(op as u8);
        self.fixups.push(Fixup {
            at: self.code.len(),
            label: label.to_string(),
        });
        self.code.extend_from_slice(&[0; 4]);
        self
    }

    fn with_bytes(&mut self, op: Op, operands: &[u8]) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(operands);
        self
    }

    pub fn push(&mut self) -> &mut Self {
        self.emit(Op::Push)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Op::Pop)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Op::Ret)
    }

    pub fn hlt(&mut self) -> &mut Self {
        self.emit(Op::Hlt)
    }

    pub fn add(&mut self) -> &mut Self {
        self.emit(Op::Add)
    }

    pub fn sub(&mut self) -> &mut Self {
        self.emit(Op::Sub)
    }

    pub fn mul(&mut self) -> &mut Self {
        self.emit(Op::Mul)
    }

    pub fn div(&mut self) -> &mut Self {
        self.emit(Op::Div)
    }

    pub fn is(&mut self) -> &mut Self {
        self.emit(Op::Is)
    }

    pub fn nil(&mut self) -> &mut Self {
        self.emit(Op::Nil)
    }

    pub fn cons(&mut self) -> &mut Self {
        self.emit(Op::Cons)
    }

    pub fn car(&mut self) -> &mut Self {
        self.emit(Op::Car)
    }

    pub fn cdr(&mut self) -> &mut Self {
        self.emit(Op::Cdr)
    }

    pub fn ldl(&mut self, index: i32) -> &mut Self {
        self.with_word(Op::Ldl, index)
    }

    pub fn ldi(&mut self, value: i32) -> &mut Self {
        self.with_word(Op::Ldi, value)
    }

    pub fn ldg(&mut self, index: i32) -> &mut Self {
        self.with_word(Op::Ldg, index)
    }

    pub fn stg(&mut self, index: i32) -> &mut Self {
        self.with_word(Op::Stg, index)
    }

    pub fn apply(&mut self, argc: u8) -> &mut Self {
        self.with_bytes(Op::Apply, &[argc])
    }

    pub fn cls(&mut self, label: &str) -> &mut Self {
        self.with_target(Op::Cls, label)
    }

    pub fn cont(&mut self, label: &str) -> &mut Self {
        self.with_target(Op::Cont, label)
    }

    pub fn jmp(&mut self, label: &str) -> &mut Self {
        self.with_target(Op::Jmp, label)
    }

    pub fn jt(&mut self, label: &str) -> &mut Self {
        self.with_target(Op::Jt, label)
    }

    pub fn jf(&mut self, label: &str) -> &mut Self {
        self.with_target(Op::Jf, label)
    }

    pub fn jbnd(&mut self, label: &str) -> &mut Self {
        self.with_target(Op::Jbnd, label)
    }

    pub fn menv(&mut self, n: u8) -> &mut Self {
        self.with_bytes(Op::Menv, &[n])
    }

    pub fn lde0(&mut self, index: u8) -> &mut Self {
        self.with_bytes(Op::Lde0, &[index])
    }

    pub fn ste0(&mut self, index: u8) -> &mut Self {
        self.with_bytes(Op::Ste0, &[index])
    }

    pub fn lde(&mut self, depth: u8, index: u8) -> &mut Self {
        self.with_bytes(Op::Lde, &[depth, index])
    }

    pub fn ste(&mut self, depth: u8, index: u8) -> &mut Self {
        self.with_bytes(Op::Ste, &[depth, index])
    }

    pub fn env(&mut self, required: u8, extra: u8, optional: u8) -> &mut Self {
        self.with_bytes(Op::Env, &[required, extra, optional])
    }

    pub fn envr(&mut self, required: u8, extra: u8, optional: u8) -> &mut Self {
        self.with_bytes(Op::Envr, &[required, extra, optional])
    }

    /// Resolve labels and return the code.
    pub fn finish(&mut self) -> Result<Assembly, AsmError> {
        if let Some(name) = self.duplicate.take() {
            return Err(AsmError::DuplicateLabel(name));
        }
        let mut code = std::mem::take(&mut self.code);
        for fixup in self.fixups.drain(..) {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| AsmError::UndefinedLabel(fixup.label.clone()))?;
            let offset = target as i64 - (fixup.at as i64 + 4);
            if !(-(1i64 << 30)..(1i64 << 30)).contains(&offset) {
                return Err(AsmError::OffsetOutOfRange(fixup.label));
            }
            code[fixup.at..fixup.at + 4].copy_from_slice(&encode_word(offset as i32));
        }
        Ok(Assembly {
            code,
            labels: std::mem::take(&mut self.labels),
        })
    }
}

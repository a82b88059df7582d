//! The instruction set.
//!
//! Opcodes are single bytes; operands follow inline. Every byte that does not
//! decode to an [`Op`] is an invalid instruction.

use std::fmt;

/// Inline operand layout of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    /// One 4-byte little-endian signed immediate.
    Word,
    /// One unsigned byte.
    Byte,
    /// Two unsigned bytes: depth, index.
    Pair,
    /// Three unsigned bytes: required, extra, optional.
    Triple,
}

impl Operands {
    /// Number of operand bytes following the opcode.
    pub fn width(self) -> usize {
        match self {
            Operands::None => 0,
            Operands::Word => 4,
            Operands::Byte => 1,
            Operands::Pair => 2,
            Operands::Triple => 3,
        }
    }
}

macro_rules! opcodes {
    ($($name:ident = $byte:literal, $mnemonic:literal, $operands:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($name = $byte,)*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[$(Op::$name,)*];

            pub fn from_byte(byte: u8) -> Option<Op> {
                match byte {
                    $($byte => Some(Op::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Op::$name => $mnemonic,)*
                }
            }

            pub fn operands(self) -> Operands {
                match self {
                    $(Op::$name => Operands::$operands,)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", None;
    Push = 0x01, "push", None;
    Pop = 0x02, "pop", None;
    Ret = 0x0d, "ret", None;
    No = 0x11, "no", None;
    True = 0x12, "true", None;
    Nil = 0x13, "nil", None;
    Hlt = 0x14, "hlt", None;
    Add = 0x15, "add", None;
    Sub = 0x16, "sub", None;
    Mul = 0x17, "mul", None;
    Div = 0x18, "div", None;
    Cons = 0x19, "cons", None;
    Car = 0x1a, "car", None;
    Cdr = 0x1b, "cdr", None;
    Scar = 0x1c, "scar", None;
    Scdr = 0x1d, "scdr", None;
    Is = 0x1f, "is", None;
    Dup = 0x22, "dup", None;
    Consr = 0x24, "consr", None;
    Dcar = 0x26, "dcar", None;
    Dcdr = 0x27, "dcdr", None;
    Spl = 0x28, "spl", None;
    Ldl = 0x43, "ldl", Word;
    Ldi = 0x44, "ldi", Word;
    Ldg = 0x45, "ldg", Word;
    Stg = 0x46, "stg", Word;
    Apply = 0x4c, "apply", Byte;
    Cls = 0x4d, "cls", Word;
    Jmp = 0x4e, "jmp", Word;
    Jt = 0x4f, "jt", Word;
    Jf = 0x50, "jf", Word;
    Jbnd = 0x51, "jbnd", Word;
    Menv = 0x65, "menv", Byte;
    Lde0 = 0x69, "lde0", Byte;
    Ste0 = 0x6a, "ste0", Byte;
    Lde = 0x87, "lde", Pair;
    Ste = 0x88, "ste", Pair;
    Cont = 0x89, "cont", Word;
    Env = 0xca, "env", Triple;
    Envr = 0xcb, "envr", Triple;
}

impl Op {
    /// Whether the word operand is an ip-relative offset.
    pub fn is_relative(self) -> bool {
        matches!(
            self,
            Op::Cls | Op::Jmp | Op::Jt | Op::Jf | Op::Jbnd | Op::Cont
        )
    }

    /// Total encoded length including the opcode byte.
    pub fn len(self) -> usize {
        1 + self.operands().width()
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Decode a 4-byte operand: little-endian, sign-extended from bit 30.
pub fn decode_word(bytes: [u8; 4]) -> i32 {
    ((u32::from_le_bytes(bytes) << 1) as i32) >> 1
}

pub fn encode_word(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_word_vectors() {
        assert_eq!(decode_word([0x5d, 0xc3, 0x1f, 0x21]), 555729757);
        assert_eq!(decode_word([0xa3, 0x3c, 0xe0, 0xde]), -555729757);
        assert_eq!(decode_word([0xff, 0xff, 0xff, 0xff]), -1);
        assert_eq!(decode_word(encode_word(-17)), -17);
    }

    #[test]
    fn bytes_round_trip_through_the_table() {
        for op in Op::ALL {
            assert_eq!(Op::from_byte(*op as u8), Some(*op));
        }
        assert_eq!(Op::ALL.len(), 41);
    }

    #[test]
    fn unassigned_slots_do_not_decode() {
        let assigned: Vec<u8> = Op::ALL.iter().map(|op| *op as u8).collect();
        for byte in 0..=255u8 {
            if !assigned.contains(&byte) {
                assert_eq!(Op::from_byte(byte), None, "byte {:#04x}", byte);
            }
        }
    }

    #[test]
    fn operand_widths() {
        assert_eq!(Op::Env.len(), 4);
        assert_eq!(Op::Lde.len(), 3);
        assert_eq!(Op::Ldl.len(), 5);
        assert_eq!(Op::Apply.len(), 2);
        assert_eq!(Op::Ret.len(), 1);
    }
}

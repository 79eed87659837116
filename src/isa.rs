use std::fmt::{self, Display, Formatter};

use crate::WORD_SIZE;

/// A one-byte opcode. The set is closed: only the constants below are valid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Op(pub u8);

impl Op {
    pub const EXIT: Self = Self(0);
    pub const NOP: Self = Self(1);
    pub const CONST: Self = Self(2);
    pub const FETCH: Self = Self(3);
    pub const STORE: Self = Self(4);
    pub const BFETCH: Self = Self(5);
    pub const BSTORE: Self = Self(6);
    pub const ADD: Self = Self(7);
    pub const SUB: Self = Self(8);
    pub const MUL: Self = Self(9);
    pub const DIV: Self = Self(10);
    pub const MOD: Self = Self(11);
    pub const DUP: Self = Self(12);
    pub const DROP: Self = Self(13);
    pub const SWAP: Self = Self(14);
    pub const OVER: Self = Self(15);
    pub const EQ: Self = Self(16);
    pub const LT: Self = Self(17);
    pub const GT: Self = Self(18);
    pub const NOT: Self = Self(19);
    pub const AND: Self = Self(20);
    pub const OR: Self = Self(21);
    pub const CJMP: Self = Self(22);
    pub const CALL: Self = Self(23);
    pub const RETURN: Self = Self(24);
    pub const RPOP: Self = Self(25);
    pub const RPUT: Self = Self(26);
    pub const RPEEK: Self = Self(27);
    pub const KEY: Self = Self(28);
    pub const EMIT: Self = Self(29);
    pub const JMP: Self = Self(30);

    pub const COUNT: usize = 31;

    /// Looks up an opcode by mnemonic or alias.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        MNEMONICS
            .iter()
            .find_map(|(mne, op)| (*mne == name).then_some(*op))
    }

    /// The canonical mnemonic, or `None` for bytes outside the instruction set.
    pub fn mnemonic(self) -> Option<&'static str> {
        NAMES.get(self.0 as usize).copied()
    }

    /// Whether a word-sized operand follows the opcode byte.
    pub fn has_operand(self) -> bool {
        matches!(self, Op::CONST | Op::CJMP | Op::CALL | Op::JMP)
    }

    /// Encoded size of the instruction, operand included.
    pub fn size(self) -> u32 {
        if self.has_operand() {
            1 + WORD_SIZE as u32
        } else {
            1
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(mne) => f.write_str(mne),
            None => write!(f, "${:02X}", self.0),
        }
    }
}

// indexed by opcode value
const NAMES: [&str; Op::COUNT] = [
    "exit", "nop", "const", "@", "!", "b@", "b!", "+", "-", "*", "/", "%", "dup", "drop", "swap",
    "over", "=", "<", ">", "~", "and", "or", "cjmp", "call", "return", "rpop", "rput", "rpeek",
    "key", "emit", "jmp",
];

#[rustfmt::skip]
const MNEMONICS: &[(&str, Op)] = &[
    ("exit", Op::EXIT),
    ("nop", Op::NOP),
    ("const", Op::CONST),
    ("@", Op::FETCH), ("fetch", Op::FETCH),
    ("!", Op::STORE), ("store", Op::STORE),
    ("b@", Op::BFETCH),
    ("b!", Op::BSTORE),
    ("+", Op::ADD), ("add", Op::ADD),
    ("-", Op::SUB), ("subtract", Op::SUB),
    ("*", Op::MUL), ("multiply", Op::MUL),
    ("/", Op::DIV), ("divide", Op::DIV),
    ("%", Op::MOD), ("mod", Op::MOD),
    ("dup", Op::DUP),
    ("drop", Op::DROP),
    ("swap", Op::SWAP),
    ("over", Op::OVER),
    ("=", Op::EQ),
    ("<", Op::LT),
    (">", Op::GT),
    ("~", Op::NOT), ("not", Op::NOT),
    ("and", Op::AND),
    ("or", Op::OR),
    ("cjmp", Op::CJMP),
    ("call", Op::CALL),
    ("return", Op::RETURN), ("ret", Op::RETURN),
    ("rpop", Op::RPOP),
    ("rput", Op::RPUT),
    ("rpeek", Op::RPEEK),
    ("key", Op::KEY),
    ("emit", Op::EMIT),
    ("jmp", Op::JMP),
];

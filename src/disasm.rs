use std::fmt::{self, Display, Formatter};

use crate::{Op, WORD_SIZE};

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub address: u32,
    pub op: Op,
    pub operand: Option<i32>,
}

impl Instruction {
    pub fn size(&self) -> u32 {
        self.op.size()
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}  {}", self.address, self.op)?;
        if let Some(operand) = self.operand {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Decodes the instruction at `address`, or `None` if it runs off the end.
pub fn decode(memory: &[u8], address: u32) -> Option<Instruction> {
    let at = address as usize;
    let op = Op(*memory.get(at)?);
    let operand = if op.has_operand() {
        let bytes = memory.get(at + 1..at + 1 + WORD_SIZE)?;
        let mut buf = [0; WORD_SIZE];
        buf.copy_from_slice(bytes);
        Some(i32::from_be_bytes(buf))
    } else {
        None
    };
    Some(Instruction {
        address,
        op,
        operand,
    })
}

/// Linear sweep over an image. Data embedded in the code (dictionary
/// headers, variables) decodes as whatever opcodes its bytes happen to be.
pub fn disassemble(image: &[u8]) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut address = 0;
    while let Some(ins) = decode(image, address) {
        address += ins.size();
        out.push(ins);
    }
    out
}

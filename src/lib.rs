use std::{
    error,
    fmt::{self, Display, Formatter},
    io,
    str::FromStr,
};

pub mod asm;
pub mod config;
pub mod disasm;
pub mod encode;
pub mod expand;
pub mod isa;
pub mod labels;
pub mod lexer;
pub mod stream;
pub mod vm;

pub use asm::Assembler;
pub use config::VmConfig;
pub use isa::Op;
pub use vm::{State, Vm};

/// Width of a machine word in bytes.
pub const WORD_SIZE: usize = 4;

/// Longest accepted source line, excluding the newline.
pub const LINE_MAX: usize = 256;

/// Longest accepted token.
pub const TOKEN_MAX: usize = 64;

/// Longest dictionary word name. The length is stored in a single byte.
pub const WORD_NAME_MAX: usize = 31;

/// Capacity of the label table.
pub const LABELS_MAX: usize = 200;

/// The image always starts with `jmp <_start>`.
pub const PRELUDE_SIZE: u32 = 1 + WORD_SIZE as u32;

/// Default capacity of both the assembled image and VM memory.
pub const MEMORY_SIZE: u32 = 0x4000;

pub const TRUE: i32 = -1;
pub const FALSE: i32 = 0;

pub fn parse_defines<T, U>(
    s: &str,
) -> std::result::Result<(T, U), Box<dyn error::Error + Send + Sync + 'static>>
where
    T: FromStr,
    T::Err: error::Error + Send + Sync + 'static,
    U: FromStr,
    U::Err: error::Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid SYMBOL=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Which compiler pass rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lexical,
    Macro,
    Label,
    Encoding,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Lexical => "lexical",
            Phase::Macro => "macro",
            Phase::Label => "label",
            Phase::Encoding => "encoding",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackId {
    Data,
    Return,
}

impl Display for StackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StackId::Data => "data",
            StackId::Return => "return",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    UnknownOpcode,
    StackOverflow(StackId),
    StackUnderflow(StackId),
    BadAddress(i64),
    DivideByZero,
    /// `key` or `emit` failed on the host stream.
    Io(io::ErrorKind),
}

/// A runtime error. Execution cannot resume after one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub ip: u32,
    pub opcode: u8,
    pub kind: FaultKind,
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fault at ${:04X} (opcode ${:02X}", self.ip, self.opcode)?;
        if let Some(mne) = Op(self.opcode).mnemonic() {
            write!(f, " `{mne}`")?;
        }
        f.write_str("): ")?;
        match self.kind {
            FaultKind::UnknownOpcode => f.write_str("unknown opcode"),
            FaultKind::StackOverflow(stack) => write!(f, "{stack} stack overflow"),
            FaultKind::StackUnderflow(stack) => write!(f, "{stack} stack underflow"),
            FaultKind::BadAddress(addr) => write!(f, "address {addr} out of range"),
            FaultKind::DivideByZero => f.write_str("division by zero"),
            FaultKind::Io(kind) => write!(f, "i/o error: {kind}"),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Compile { phase: Phase, pos: Pos, msg: String },
    Io(io::Error),
    Config(String),
    ImageTooLarge { len: usize, capacity: u32 },
    Runtime(Fault),
}

impl Error {
    pub fn compile(phase: Phase, pos: Pos, msg: impl Into<String>) -> Self {
        Error::Compile {
            phase,
            pos,
            msg: msg.into(),
        }
    }

    /// The pass that failed, for compile errors.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Compile { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The offending source line, for compile errors.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Compile { pos, .. } => Some(pos.line),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile { phase, pos, msg } => write!(f, "{pos}: {phase} error: {msg}"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::ImageTooLarge { len, capacity } => write!(
                f,
                "image of {len} bytes does not fit in {capacity} bytes of memory"
            ),
            Error::Runtime(fault) => write!(f, "{fault}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Runtime(fault)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

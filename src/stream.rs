use std::{
    fmt::{self, Display, Formatter},
    io::BufRead,
};

use crate::{
    lexer::{Lexer, Token},
    Error, Phase, Pos, Result, WORD_SIZE,
};

/// One entry of the symbolic instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// An instruction mnemonic. Only the encoder checks that it exists.
    Name(String),
    /// An operand, or a raw data word when no opcode expects one.
    Int(i32),
    /// A raw data byte.
    Byte(u8),
    /// `:name`
    Def(String),
    /// `@name`
    Ref(String),
}

impl Item {
    /// Bytes the entry occupies in the image.
    pub fn size(&self) -> u32 {
        match self {
            Item::Name(_) | Item::Byte(_) => 1,
            Item::Int(_) | Item::Ref(_) => WORD_SIZE as u32,
            Item::Def(_) => 0,
        }
    }

    /// Classifies a plain token. Directives and macro syntax are handled by the caller.
    pub fn classify(tok: &Token) -> Result<Self> {
        let text = tok.text.as_str();
        if let Some(value) = literal(tok)? {
            return Ok(Item::Int(value));
        }
        if let Some(name) = text.strip_prefix(':') {
            if name.is_empty() {
                return Err(Error::compile(
                    Phase::Macro,
                    tok.pos,
                    "expected label name after `:`",
                ));
            }
            return Ok(Item::Def(name.to_string()));
        }
        // a lone `@` is the fetch mnemonic
        if let Some(name) = text.strip_prefix('@') {
            if !name.is_empty() {
                return Ok(Item::Ref(name.to_string()));
            }
        }
        Ok(Item::Name(text.to_string()))
    }
}

impl Display for Item {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Item::Name(name) => f.write_str(name),
            Item::Int(value) => write!(f, "{value}"),
            Item::Byte(value) => write!(f, ".byte {value}"),
            Item::Def(name) => write!(f, ":{name}"),
            Item::Ref(name) => write!(f, "@{name}"),
        }
    }
}

/// Parses `tok` as an integer literal: decimal, `$hex` or `'c'`.
///
/// Returns `None` for tokens that don't look numeric at all.
pub fn literal(tok: &Token) -> Result<Option<i32>> {
    let text = tok.text.as_str();
    let bytes = text.as_bytes();
    let malformed = || {
        Error::compile(
            Phase::Encoding,
            tok.pos,
            format!("malformed numeric literal `{text}`"),
        )
    };
    match bytes {
        [b'$', ..] => u32::from_str_radix(&text[1..], 16)
            .map(|value| Some(value as i32))
            .map_err(|_| malformed()),
        [b'\'', ..] => match bytes {
            [b'\'', c, b'\''] => Ok(Some(*c as i32)),
            _ => Err(malformed()),
        },
        [c, ..] if c.is_ascii_digit() => text.parse::<i32>().map(Some).map_err(|_| malformed()),
        [b'-', c, ..] if c.is_ascii_digit() => {
            text.parse::<i32>().map(Some).map_err(|_| malformed())
        }
        _ => Ok(None),
    }
}

fn byte_value(tok: &Token) -> Result<u8> {
    match literal(tok)? {
        Some(value) => u8::try_from(value).map_err(|_| {
            Error::compile(
                Phase::Encoding,
                tok.pos,
                format!("`.byte` value {value} is out of range"),
            )
        }),
        None => Err(Error::compile(
            Phase::Macro,
            tok.pos,
            format!("expected a value for `.byte` but got `{}`", tok.text),
        )),
    }
}

/// Reads the value following a `.byte` directive at `pos`.
pub(crate) fn byte_directive<R: BufRead>(lexer: &mut Lexer<R>, pos: Pos) -> Result<Item> {
    match lexer.next_token()? {
        Some(tok) => Ok(Item::Byte(byte_value(&tok)?)),
        None => Err(Error::compile(
            Phase::Macro,
            pos,
            "expected a value for `.byte`",
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub item: Item,
    pub pos: Pos,
}

/// An ordered symbolic instruction stream. Order defines addresses.
///
/// Renders to the one-entry-per-line exchange format written between
/// passes and parses back from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stream {
    pub entries: Vec<Entry>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item, pos: Pos) {
        self.entries.push(Entry { item, pos });
    }

    pub fn insert(&mut self, index: usize, item: Item, pos: Pos) {
        self.entries.insert(index, Entry { item, pos });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes the stream occupies, not counting the prelude.
    pub fn size(&self) -> u64 {
        self.entries.iter().map(|e| e.item.size() as u64).sum()
    }

    /// Parses a rendered stream. Positions refer to lines of the artifact.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut lexer = Lexer::new(reader);
        let mut stream = Self::new();
        while let Some(tok) = lexer.next_token()? {
            let item = if tok.text == ".byte" {
                byte_directive(&mut lexer, tok.pos)?
            } else if tok.text.starts_with('.') || (tok.text.starts_with('!') && tok.text.len() > 1) {
                return Err(Error::compile(
                    Phase::Macro,
                    tok.pos,
                    format!("unexpected `{}` in expanded stream", tok.text),
                ));
            } else {
                Item::classify(&tok)?
            };
            stream.push(item, tok.pos);
        }
        Ok(stream)
    }
}

impl Display for Stream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry.item)?;
        }
        Ok(())
    }
}

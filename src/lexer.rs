use std::io::{BufRead, ErrorKind};

use crate::{Error, Phase, Pos, Result, LINE_MAX, TOKEN_MAX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub pos: Pos,
}

/// Splits line-oriented source into whitespace separated tokens.
///
/// `#` at the start of a token discards the rest of its line. A token is
/// peeked before it is eaten so every pass can look one token ahead.
pub struct Lexer<R> {
    reader: R,
    buf: String,
    line: usize,
    cursor: usize,
    stash: Option<Token>,
}

impl<R: BufRead> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line: 0,
            cursor: 0,
            stash: None,
        }
    }

    /// Line number of the most recently read line.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn pos(&self) -> Pos {
        match &self.stash {
            Some(tok) => tok.pos,
            None => Pos::new(self.line, self.cursor + 1),
        }
    }

    fn err(&self, pos: Pos, msg: &str) -> Error {
        Error::compile(Phase::Lexical, pos, msg)
    }

    // false at end of input
    fn next_line(&mut self) -> Result<bool> {
        self.buf.clear();
        self.cursor = 0;
        let read = match self.reader.read_line(&mut self.buf) {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(self.err(
                    Pos::new(self.line + 1, 1),
                    "line is not valid UTF-8",
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if read == 0 {
            return Ok(false);
        }
        self.line += 1;
        while self.buf.ends_with(&['\n', '\r'][..]) {
            self.buf.pop();
        }
        if self.buf.len() > LINE_MAX {
            return Err(self.err(
                Pos::new(self.line, LINE_MAX + 1),
                &format!("line exceeds {LINE_MAX} bytes"),
            ));
        }
        Ok(true)
    }

    pub fn peek(&mut self) -> Result<Option<&Token>> {
        if self.stash.is_none() {
            self.stash = self.scan()?;
        }
        Ok(self.stash.as_ref())
    }

    pub fn eat(&mut self) {
        self.stash.take();
    }

    /// Peeks and eats in one step.
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        self.peek()?;
        Ok(self.stash.take())
    }

    fn scan(&mut self) -> Result<Option<Token>> {
        loop {
            let bytes = self.buf.as_bytes();
            // skip whitespace
            while self.cursor < bytes.len() && bytes[self.cursor].is_ascii_whitespace() {
                self.cursor += 1;
            }
            if self.cursor >= bytes.len() || bytes[self.cursor] == b'#' {
                if !self.next_line()? {
                    return Ok(None);
                }
                continue;
            }
            let start = self.cursor;
            while self.cursor < bytes.len() && !bytes[self.cursor].is_ascii_whitespace() {
                self.cursor += 1;
            }
            let pos = Pos::new(self.line, start + 1);
            let text = &self.buf[start..self.cursor];
            if text.len() > TOKEN_MAX {
                return Err(self.err(pos, &format!("token exceeds {TOKEN_MAX} bytes")));
            }
            return Ok(Some(Token {
                text: text.to_string(),
                pos,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn tokens(src: &str) -> Result<Vec<(String, usize)>> {
        let mut lexer = Lexer::new(Cursor::new(src));
        let mut out = Vec::new();
        while let Some(tok) = lexer.next_token()? {
            out.push((tok.text, tok.pos.line));
        }
        Ok(out)
    }

    #[test]
    fn splits_on_whitespace_and_tracks_lines() {
        let toks = tokens("const 10\n\n\tconst  5 +\r\nexit").unwrap();
        let expected = [
            ("const", 1),
            ("10", 1),
            ("const", 3),
            ("5", 3),
            ("+", 3),
            ("exit", 4),
        ];
        assert_eq!(toks.len(), expected.len());
        for ((text, line), (etext, eline)) in toks.iter().zip(expected) {
            assert_eq!(text, etext);
            assert_eq!(*line, eline);
        }
    }

    #[test]
    fn hash_comments_run_to_end_of_line() {
        let toks = tokens("# header\ndup #drop drop\nswap").unwrap();
        let texts: Vec<_> = toks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, ["dup", "swap"]);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut lexer = Lexer::new(Cursor::new("a b"));
        assert_eq!(lexer.peek().unwrap().unwrap().text, "a");
        assert_eq!(lexer.peek().unwrap().unwrap().text, "a");
        lexer.eat();
        assert_eq!(lexer.next_token().unwrap().unwrap().text, "b");
        assert!(lexer.next_token().unwrap().is_none());
        assert!(lexer.next_token().unwrap().is_none());
    }

    #[test]
    fn columns_are_one_based() {
        let mut lexer = Lexer::new(Cursor::new("  dup  swap"));
        assert_eq!(lexer.next_token().unwrap().unwrap().pos, Pos::new(1, 3));
        assert_eq!(lexer.next_token().unwrap().unwrap().pos, Pos::new(1, 8));
    }

    #[test]
    fn invalid_utf8_is_lexical() {
        let mut lexer = Lexer::new(Cursor::new(b"dup\n\xFF drop\n".to_vec()));
        assert_eq!(lexer.next_token().unwrap().unwrap().text, "dup");
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Lexical));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn long_line_is_rejected_with_its_line() {
        let src = format!("dup\n{}\n", "x ".repeat(LINE_MAX));
        let err = tokens(&src).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Lexical));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn long_token_is_rejected() {
        let src = format!("dup {}", "y".repeat(TOKEN_MAX + 1));
        let err = tokens(&src).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Lexical));
        assert_eq!(err.line(), Some(1));
    }
}

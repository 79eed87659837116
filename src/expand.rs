use std::io::BufRead;

use indexmap::IndexMap;

use crate::{
    lexer::{Lexer, Token},
    stream::{self, Item, Stream},
    Error, Phase, Pos, Result, WORD_NAME_MAX,
};

/// Label of a word's code field, the target of `!name`.
pub fn code_label(name: &str) -> String {
    format!("_dict{name}")
}

/// Label of the cell backing a `.var` word.
pub fn var_label(name: &str) -> String {
    format!("_var{name}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordRef {
    Word(String),
    Literal(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordBody {
    /// Raw instructions, ending with the implicit `return`.
    Primitive(Vec<Item>),
    /// Calls to other words, compiled to `call`s.
    Composed(Vec<WordRef>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub name: String,
    /// The previously defined word, `None` for the first one.
    pub link: Option<String>,
    pub body: WordBody,
    pub pos: Pos,
}

/// Every word defined during one compilation, in definition order.
#[derive(Debug, Default)]
pub struct Dictionary {
    words: IndexMap<String, Word>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently defined word.
    pub fn latest(&self) -> Option<&Word> {
        self.words.last().map(|(_, word)| word)
    }

    pub fn get(&self, name: &str) -> Option<&Word> {
        self.words.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.words.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Word> {
        self.words.values()
    }

    fn insert(&mut self, word: Word) {
        self.words.insert(word.name.clone(), word);
    }
}

/// First compiler pass: strips comments and rewrites the dictionary forms
/// into plain symbolic instructions.
pub struct Expander<'d, R> {
    lexer: Lexer<R>,
    dict: &'d mut Dictionary,
    out: Stream,
    // index of the first top-level entry
    entry: Option<usize>,
    // index of the most recent dictionary header
    latest: Option<usize>,
}

impl<'d, R: BufRead> Expander<'d, R> {
    pub fn new(reader: R, dict: &'d mut Dictionary) -> Self {
        Self {
            lexer: Lexer::new(reader),
            dict,
            out: Stream::new(),
            entry: None,
            latest: None,
        }
    }

    pub fn run(mut self) -> Result<Stream> {
        while let Some(tok) = self.lexer.next_token()? {
            match tok.text.as_str() {
                "(" => self.comment(tok.pos)?,
                ".codeword" => self.codeword(tok)?,
                ".colonword" => self.colonword(tok)?,
                ".const" => self.constant(tok)?,
                ".var" => self.variable(tok)?,
                ".byte" => {
                    let item = stream::byte_directive(&mut self.lexer, tok.pos)?;
                    self.mark_entry();
                    self.out.push(item, tok.pos);
                }
                ".end" => return Err(self.err(tok.pos, "`.end` without an open definition")),
                ")" => return Err(self.err(tok.pos, "unmatched `)`")),
                text if text.starts_with('.') => {
                    return Err(self.err(tok.pos, &format!("unknown macro `{text}`")))
                }
                _ => {
                    self.mark_entry();
                    if self.call(&tok).is_none() {
                        let item = Item::classify(&tok)?;
                        self.out.push(item, tok.pos);
                    }
                }
            }
        }
        self.bind_markers();
        tracing::debug!(
            "expanded to {} entries, {} dictionary words",
            self.out.len(),
            self.dict.len()
        );
        Ok(self.out)
    }

    fn mark_entry(&mut self) {
        if self.entry.is_none() {
            self.entry = Some(self.out.len());
        }
    }

    /// Binds `_latest` to the last header and, when definitions precede the
    /// top-level code and no `_start` is given, `_start` to that code. Both
    /// are plain label definitions so they survive the text artifact.
    fn bind_markers(&mut self) {
        let has_start = self
            .out
            .iter()
            .any(|e| matches!(&e.item, Item::Def(name) if name == "_start"));
        let mut marks = Vec::new();
        if let Some(at) = self.entry.filter(|&at| at > 0 && !has_start) {
            tracing::warn!(
                "no `_start` label, execution begins at line {}",
                self.out.entries[at].pos.line
            );
            marks.push((at, "_start"));
        }
        if let Some(at) = self.latest {
            marks.push((at, "_latest"));
        }
        // back to front so earlier indices stay valid
        marks.sort_by(|a, b| b.0.cmp(&a.0));
        for (at, name) in marks {
            let pos = self.out.entries[at].pos;
            self.out.insert(at, Item::Def(name.to_string()), pos);
        }
    }

    fn err(&self, pos: Pos, msg: &str) -> Error {
        Error::compile(Phase::Macro, pos, msg)
    }

    // the opening paren is already eaten
    fn comment(&mut self, open: Pos) -> Result<()> {
        while let Some(tok) = self.lexer.next_token()? {
            if tok.text == ")" {
                return Ok(());
            }
        }
        Err(self.err(open, "unterminated comment, expected `)`"))
    }

    // `!name` expands to a call of the word's code field
    fn call(&mut self, tok: &Token) -> Option<String> {
        let name = tok.text.strip_prefix('!').filter(|name| !name.is_empty())?;
        self.out.push(Item::Name("call".to_string()), tok.pos);
        self.out.push(Item::Ref(code_label(name)), tok.pos);
        Some(name.to_string())
    }

    fn word_name(&mut self, form: &Token) -> Result<Token> {
        let Some(tok) = self.lexer.next_token()? else {
            return Err(self.err(
                form.pos,
                &format!("expected word name after `{}`", form.text),
            ));
        };
        let text = tok.text.as_str();
        if text.starts_with(&['.', ':', '@', '!', '#'][..])
            || text == "("
            || text == ")"
            || !matches!(stream::literal(&tok), Ok(None))
        {
            return Err(self.err(tok.pos, &format!("`{text}` is not a valid word name")));
        }
        if text.len() > WORD_NAME_MAX {
            return Err(Error::compile(
                Phase::Lexical,
                tok.pos,
                format!("word name `{text}` exceeds {WORD_NAME_MAX} bytes"),
            ));
        }
        if self.dict.contains(text) {
            return Err(self.err(tok.pos, &format!("word `{text}` is already defined")));
        }
        Ok(tok)
    }

    fn word_value(&mut self, form: &Token, name: &Token) -> Result<Item> {
        let missing = || {
            Error::compile(
                Phase::Macro,
                form.pos,
                format!("expected value for `{} {}`", form.text, name.text),
            )
        };
        let tok = self.lexer.next_token()?.ok_or_else(missing)?;
        match Item::classify(&tok)? {
            item @ (Item::Int(_) | Item::Ref(_)) => Ok(item),
            _ => Err(missing()),
        }
    }

    /// Emits the dictionary header and returns the link to the previous word.
    fn header(&mut self, name: &Token) -> Option<String> {
        let pos = name.pos;
        let link = self.dict.latest().map(|word| word.name.clone());
        self.latest = Some(self.out.len());
        self.out.push(Item::Def(name.text.clone()), pos);
        match &link {
            Some(prev) => self.out.push(Item::Ref(prev.clone()), pos),
            None => self.out.push(Item::Int(0), pos),
        }
        self.out.push(Item::Byte(name.text.len() as u8), pos);
        for c in name.text.bytes() {
            self.out.push(Item::Byte(c), pos);
        }
        self.out.push(Item::Def(code_label(&name.text)), pos);
        link
    }

    fn define(&mut self, name: Token, link: Option<String>, body: WordBody) {
        tracing::trace!("defined word `{}`", name.text);
        self.dict.insert(Word {
            name: name.text,
            link,
            body,
            pos: name.pos,
        });
    }

    fn unterminated(&self, form: &Token, name: &Token) -> Error {
        self.err(
            form.pos,
            &format!("missing `.end` for `{} {}`", form.text, name.text),
        )
    }

    fn codeword(&mut self, form: Token) -> Result<()> {
        let name = self.word_name(&form)?;
        let link = self.header(&name);
        let mut body = Vec::new();
        loop {
            let Some(tok) = self.lexer.next_token()? else {
                return Err(self.unterminated(&form, &name));
            };
            match tok.text.as_str() {
                ".end" => break,
                "(" => self.comment(tok.pos)?,
                ")" => return Err(self.err(tok.pos, "unmatched `)`")),
                ".byte" => {
                    let item = stream::byte_directive(&mut self.lexer, tok.pos)?;
                    body.push(item.clone());
                    self.out.push(item, tok.pos);
                }
                text if text.starts_with('.') => {
                    return Err(self.err(
                        tok.pos,
                        &format!("`{text}` is not allowed inside `.codeword {}`", name.text),
                    ))
                }
                _ => {
                    if let Some(callee) = self.call(&tok) {
                        body.push(Item::Name("call".to_string()));
                        body.push(Item::Ref(code_label(&callee)));
                    } else {
                        let item = Item::classify(&tok)?;
                        body.push(item.clone());
                        self.out.push(item, tok.pos);
                    }
                }
            }
        }
        let ret = Item::Name("return".to_string());
        body.push(ret.clone());
        self.out.push(ret, self.lexer.pos());
        self.define(name, link, WordBody::Primitive(body));
        Ok(())
    }

    fn colonword(&mut self, form: Token) -> Result<()> {
        let name = self.word_name(&form)?;
        let link = self.header(&name);
        let mut refs = Vec::new();
        loop {
            let Some(tok) = self.lexer.next_token()? else {
                return Err(self.unterminated(&form, &name));
            };
            match tok.text.as_str() {
                ".end" => break,
                "(" => self.comment(tok.pos)?,
                text if text.starts_with(&['.', ':', '@'][..]) || text == ")" => {
                    return Err(self.err(
                        tok.pos,
                        &format!("`{text}` is not allowed inside `.colonword {}`", name.text),
                    ))
                }
                _ => {
                    if let Some(value) = stream::literal(&tok)? {
                        self.out.push(Item::Name("const".to_string()), tok.pos);
                        self.out.push(Item::Int(value), tok.pos);
                        refs.push(WordRef::Literal(value));
                    } else if let Some(callee) = self.call(&tok) {
                        refs.push(WordRef::Word(callee));
                    } else {
                        self.out.push(Item::Name("call".to_string()), tok.pos);
                        self.out.push(Item::Ref(code_label(&tok.text)), tok.pos);
                        refs.push(WordRef::Word(tok.text));
                    }
                }
            }
        }
        self.out
            .push(Item::Name("return".to_string()), self.lexer.pos());
        self.define(name, link, WordBody::Composed(refs));
        Ok(())
    }

    fn constant(&mut self, form: Token) -> Result<()> {
        let name = self.word_name(&form)?;
        let value = self.word_value(&form, &name)?;
        let link = self.header(&name);
        let body = vec![
            Item::Name("const".to_string()),
            value,
            Item::Name("return".to_string()),
        ];
        for item in &body {
            self.out.push(item.clone(), name.pos);
        }
        self.define(name, link, WordBody::Primitive(body));
        Ok(())
    }

    fn variable(&mut self, form: Token) -> Result<()> {
        let name = self.word_name(&form)?;
        let value = self.word_value(&form, &name)?;
        let link = self.header(&name);
        let cell = var_label(&name.text);
        let body = vec![
            Item::Name("const".to_string()),
            Item::Ref(cell.clone()),
            Item::Name("return".to_string()),
            Item::Def(cell),
            value,
        ];
        for item in &body {
            self.out.push(item.clone(), name.pos);
        }
        self.define(name, link, WordBody::Primitive(body));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn expand(src: &str) -> Result<(String, Dictionary)> {
        let mut dict = Dictionary::new();
        let stream = Expander::new(Cursor::new(src), &mut dict).run()?;
        Ok((stream.to_string(), dict))
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn plain_tokens_pass_through() {
        let (out, dict) = expand("const 10 const 5 + exit").unwrap();
        assert_eq!(lines(&out), ["const", "10", "const", "5", "+", "exit"]);
        assert!(dict.is_empty());
    }

    #[test]
    fn comments_are_discarded() {
        let (out, _) = expand("dup ( a comment\n spanning lines ) drop # trailing\nswap").unwrap();
        assert_eq!(lines(&out), ["dup", "drop", "swap"]);
    }

    #[test]
    fn unterminated_comment() {
        let err = expand("dup\n( never closed\ndrop").unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Macro));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn bang_calls_code_field() {
        let (out, _) = expand("const 7 !double exit").unwrap();
        assert_eq!(
            lines(&out),
            ["const", "7", "call", "@_dictdouble", "exit"]
        );
    }

    #[test]
    fn codeword_header_and_body() {
        let (out, dict) = expand(".codeword double dup + return .end").unwrap();
        assert_eq!(
            lines(&out),
            [
                ":_latest",
                ":double",
                "0",
                ".byte 6",
                ".byte 100",
                ".byte 111",
                ".byte 117",
                ".byte 98",
                ".byte 108",
                ".byte 101",
                ":_dictdouble",
                "dup",
                "+",
                "return",
                "return",
            ]
        );
        let word = dict.get("double").unwrap();
        assert_eq!(word.link, None);
        assert!(matches!(&word.body, WordBody::Primitive(items) if items.len() == 4));
    }

    #[test]
    fn words_link_to_their_predecessor() {
        let src = ".codeword a dup .end\n.codeword b drop .end\n.const c 3";
        let (out, dict) = expand(src).unwrap();
        let out = lines(&out);
        let b = out.iter().position(|l| *l == ":b").unwrap();
        assert_eq!(out[b + 1], "@a");
        let c = out.iter().position(|l| *l == ":c").unwrap();
        assert_eq!(out[c + 1], "@b");
        assert_eq!(dict.latest().unwrap().name, "c");
        assert_eq!(dict.get("b").unwrap().link.as_deref(), Some("a"));
        let names: Vec<_> = dict.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn colonword_compiles_to_calls() {
        let (out, dict) = expand(".colonword quad double !double 1 + .end").unwrap();
        let out = lines(&out);
        let code = out.iter().position(|l| *l == ":_dictquad").unwrap();
        assert_eq!(
            &out[code + 1..],
            [
                "call",
                "@_dictdouble",
                "call",
                "@_dictdouble",
                "const",
                "1",
                "call",
                "@_dict+",
                "return"
            ]
        );
        let WordBody::Composed(refs) = &dict.get("quad").unwrap().body else {
            panic!("quad should be composed");
        };
        assert_eq!(refs[2], WordRef::Literal(1));
        assert_eq!(refs[3], WordRef::Word("+".into()));
    }

    #[test]
    fn var_and_const_bodies() {
        let (out, _) = expand(".var counter 5\n.const ten 10").unwrap();
        let out = lines(&out);
        let var = out.iter().position(|l| *l == ":_dictcounter").unwrap();
        assert_eq!(
            &out[var + 1..var + 6],
            ["const", "@_varcounter", "return", ":_varcounter", "5"]
        );
        let ten = out.iter().position(|l| *l == ":_dictten").unwrap();
        assert_eq!(&out[ten + 1..], ["const", "10", "return"]);
    }

    #[test]
    fn malformed_forms() {
        let cases = [
            (".codeword", 1),
            (".codeword double dup +\n\n", 1),
            ("dup\n.const ten", 2),
            ("\n\n.var", 3),
            (".end", 1),
            (".frobnicate", 1),
            (".codeword a .codeword b .end .end", 1),
            (".codeword a dup .end .codeword a drop .end", 1),
            (")", 1),
            (".codeword a dup ) .end", 1),
            (".codeword 12ab dup .end", 1),
            (".const $zz 1", 1),
        ];
        for (src, line) in cases {
            let err = expand(src).unwrap_err();
            assert_eq!(err.phase(), Some(Phase::Macro), "{src}");
            assert_eq!(err.line(), Some(line), "{src}");
        }
    }

    #[test]
    fn start_marks_code_after_definitions() {
        let (out, _) = expand(".codeword double dup + .end\nconst 7 !double exit").unwrap();
        let out = lines(&out);
        let start = out.iter().position(|l| *l == ":_start").unwrap();
        assert_eq!(out[start - 1], "return");
        assert_eq!(&out[start + 1..start + 3], ["const", "7"]);
        assert_eq!(out.iter().filter(|l| **l == ":_start").count(), 1);

        let (out, _) = expand(".codeword double dup + .end\n:_start const 7 exit").unwrap();
        assert_eq!(lines(&out).iter().filter(|l| **l == ":_start").count(), 1);

        let (out, _) = expand("const 7 exit .const ten 10").unwrap();
        assert!(!out.contains(":_start"));
    }

    #[test]
    fn latest_precedes_last_header() {
        let (out, _) = expand(".const a 1\n.const b 2\nexit").unwrap();
        let out = lines(&out);
        let latest = out.iter().position(|l| *l == ":_latest").unwrap();
        assert_eq!(out[latest + 1], ":b");
    }

    #[test]
    fn long_word_name() {
        let src = format!(".codeword {} dup .end", "w".repeat(WORD_NAME_MAX + 1));
        let err = expand(&src).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Lexical));
    }
}

use crate::{
    stream::{Entry, Item, Stream},
    Error, Op, Phase, Result,
};

fn unresolved(entry: &Entry, name: &str) -> Error {
    Error::compile(
        Phase::Label,
        entry.pos,
        format!("unresolved label reference `@{name}`"),
    )
}

/// Final pass: turns a resolved stream into the binary image.
///
/// The image opens with `jmp start`. Mnemonics become one opcode byte,
/// integers become big-endian words, `.byte` entries become single bytes.
pub fn encode(stream: &Stream, start: u32) -> Result<Vec<u8>> {
    let mut image = Vec::with_capacity(stream.size() as usize + 5);
    image.push(Op::JMP.0);
    image.extend_from_slice(&start.to_be_bytes());

    let mut entries = stream.iter();
    while let Some(entry) = entries.next() {
        match &entry.item {
            Item::Def(_) => {}
            Item::Int(value) => image.extend_from_slice(&value.to_be_bytes()),
            Item::Byte(value) => image.push(*value),
            Item::Ref(name) => return Err(unresolved(entry, name)),
            Item::Name(name) => {
                let op = Op::from_mnemonic(name).ok_or_else(|| {
                    Error::compile(
                        Phase::Encoding,
                        entry.pos,
                        format!("`{name}` is not a valid instruction"),
                    )
                })?;
                image.push(op.0);
                if !op.has_operand() {
                    continue;
                }
                match entries.next().map(|operand| (operand, &operand.item)) {
                    Some((_, Item::Int(value))) => image.extend_from_slice(&value.to_be_bytes()),
                    Some((operand, Item::Ref(name))) => return Err(unresolved(operand, name)),
                    Some((operand, _)) => {
                        return Err(Error::compile(
                            Phase::Encoding,
                            operand.pos,
                            format!("missing operand for `{op}`"),
                        ))
                    }
                    None => {
                        return Err(Error::compile(
                            Phase::Encoding,
                            entry.pos,
                            format!("missing operand for `{op}`"),
                        ))
                    }
                }
            }
        }
    }
    tracing::debug!("encoded {} bytes", image.len());
    Ok(image)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn encode_src(src: &str, start: u32) -> Result<Vec<u8>> {
        encode(&Stream::parse(Cursor::new(src))?, start)
    }

    #[test]
    fn prelude_then_big_endian_operands() {
        let image = encode_src("const 10 const -2 + exit", 5).unwrap();
        assert_eq!(
            image,
            [
                30, 0, 0, 0, 5, //
                2, 0, 0, 0, 10, //
                2, 0xFF, 0xFF, 0xFF, 0xFE, //
                7, 0,
            ]
        );
    }

    #[test]
    fn data_words_and_bytes() {
        let image = encode_src(":x 258 .byte 7 nop", 5).unwrap();
        assert_eq!(&image[5..], [0, 0, 1, 2, 7, 1]);
    }

    #[test]
    fn unknown_instruction() {
        let err = encode_src("dup\nfrob\n", 5).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Encoding));
        assert_eq!(err.line(), Some(2));
        assert!(err.to_string().contains("`frob`"));
    }

    #[test]
    fn operand_is_required() {
        let err = encode_src("const\ndup\n", 5).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Encoding));
        assert_eq!(err.line(), Some(2));
        let err = encode_src("dup\ncall", 5).unwrap_err();
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn references_must_be_resolved() {
        let err = encode_src("call @x", 5).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Label));
    }
}

use indexmap::IndexMap;

use crate::{
    stream::{Item, Stream},
    Error, Phase, Pos, Result, LABELS_MAX,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub address: u32,
    pub pos: Pos,
}

/// Append-only table of label addresses, in definition order.
#[derive(Debug)]
pub struct LabelTable {
    labels: IndexMap<String, Label>,
    capacity: usize,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::with_capacity(LABELS_MAX)
    }
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            labels: IndexMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn define(&mut self, name: &str, address: u32, pos: Pos) -> Result<()> {
        if let Some(label) = self.labels.get(name) {
            return Err(Error::compile(
                Phase::Label,
                pos,
                format!(
                    "label `{name}` already defined on line {}",
                    label.pos.line
                ),
            ));
        }
        if self.labels.len() >= self.capacity {
            return Err(Error::compile(
                Phase::Label,
                pos,
                format!("too many labels, at most {} allowed", self.capacity),
            ));
        }
        self.labels.insert(
            name.to_string(),
            Label {
                name: name.to_string(),
                address,
                pos,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Label> {
        self.labels.get(name)
    }

    pub fn address(&self, name: &str) -> Option<u32> {
        self.get(name).map(|label| label.address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Binds every `:name` in `stream` to the address it will be encoded at.
///
/// Addresses start at `base` and advance by each entry's size. Returns the
/// address one past the last entry, which never exceeds `limit`.
pub fn collect(stream: &Stream, labels: &mut LabelTable, base: u32, limit: u32) -> Result<u32> {
    let mut address = base;
    for entry in stream.iter() {
        if let Item::Def(name) = &entry.item {
            labels.define(name, address, entry.pos)?;
            continue;
        }
        address = address
            .checked_add(entry.item.size())
            .filter(|end| *end <= limit)
            .ok_or_else(|| {
                Error::compile(
                    Phase::Encoding,
                    entry.pos,
                    format!("program exceeds the {limit} byte image"),
                )
            })?;
    }
    tracing::debug!("collected {} labels, image ends at ${address:04X}", labels.len());
    Ok(address)
}

/// Rewrites every `@name` into the address bound to `name`.
pub fn resolve(stream: &Stream, labels: &LabelTable) -> Result<Stream> {
    let mut out = Stream::new();
    for entry in stream.iter() {
        let item = match &entry.item {
            Item::Ref(name) => match labels.address(name) {
                Some(address) => Item::Int(address as i32),
                None => {
                    return Err(Error::compile(
                        Phase::Label,
                        entry.pos,
                        format!("undefined label `{name}`"),
                    ))
                }
            },
            item => item.clone(),
        };
        out.push(item, entry.pos);
    }
    Ok(out)
}

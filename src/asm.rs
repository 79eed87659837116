use std::io::BufRead;

use crate::{
    encode::encode,
    expand::{Dictionary, Expander},
    labels::{self, LabelTable},
    stream::Stream,
    Pos, Result, LABELS_MAX, MEMORY_SIZE, PRELUDE_SIZE,
};

/// Results of one compilation: the image plus both intermediate streams.
#[derive(Debug)]
pub struct Output {
    pub image: Vec<u8>,
    pub expanded: Stream,
    pub resolved: Stream,
}

/// Compiler context. Owns the label table and the dictionary for the
/// duration of one compilation; both start empty on every run.
pub struct Assembler {
    labels: LabelTable,
    dict: Dictionary,
    defines: Vec<(String, i32)>,
    max_size: u32,
    max_labels: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            labels: LabelTable::new(),
            dict: Dictionary::new(),
            defines: Vec::new(),
            max_size: MEMORY_SIZE,
            max_labels: LABELS_MAX,
        }
    }

    /// Largest image, prelude included, the assembler will produce.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_labels(mut self, max_labels: usize) -> Self {
        self.max_labels = max_labels;
        self
    }

    /// Pre-defines a symbol, as if `:name` were bound to `value`.
    pub fn define(&mut self, name: &str, value: i32) {
        self.defines.push((name.to_string(), value));
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn assemble<R: BufRead>(&mut self, source: R) -> Result<Output> {
        self.dict = Dictionary::new();
        tracing::trace!("starting macro expansion");
        let expanded = Expander::new(source, &mut self.dict).run()?;
        self.link(expanded)
    }

    /// Assembles an already expanded stream, such as a parsed `.dexp` artifact.
    pub fn assemble_expanded(&mut self, expanded: Stream) -> Result<Output> {
        self.dict = Dictionary::new();
        self.link(expanded)
    }

    fn link(&mut self, expanded: Stream) -> Result<Output> {
        self.labels = LabelTable::with_capacity(self.max_labels);
        for (name, value) in &self.defines {
            self.labels.define(name, *value as u32, Pos::default())?;
        }

        tracing::trace!("starting label collection");
        labels::collect(&expanded, &mut self.labels, PRELUDE_SIZE, self.max_size)?;

        tracing::trace!("starting label resolution");
        let resolved = labels::resolve(&expanded, &self.labels)?;

        let start = match self.labels.address("_start") {
            Some(address) => address,
            None => {
                tracing::warn!("no `_start` label, execution begins at the first instruction");
                PRELUDE_SIZE
            }
        };

        tracing::trace!("starting encoding");
        let image = encode(&resolved, start)?;
        Ok(Output {
            image,
            expanded,
            resolved,
        })
    }
}

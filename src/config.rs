use std::{fs, path::Path};

use serde::{de, Deserialize, Deserializer};
use serde_derive::Deserialize;

use crate::{Error, Result, MEMORY_SIZE, PRELUDE_SIZE};

/// Capacities of the virtual machine, loaded from a TOML file:
///
/// ```toml
/// memory = "$4000"
/// data_stack = 64
/// return_stack = 64
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Bytes of memory. Holds the image; the rest is zero filled.
    #[serde(deserialize_with = "deserialize_bases_u32")]
    pub memory: u32,

    /// Cells in the data stack.
    #[serde(deserialize_with = "deserialize_bases_usize")]
    pub data_stack: usize,

    /// Cells in the return stack.
    #[serde(deserialize_with = "deserialize_bases_usize")]
    pub return_stack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory: MEMORY_SIZE,
            data_stack: 64,
            return_stack: 64,
        }
    }
}

impl VmConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cant open {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.memory < PRELUDE_SIZE {
            return Err(Error::Config(format!(
                "memory must be at least {PRELUDE_SIZE} bytes"
            )));
        }
        if self.data_stack == 0 || self.return_stack == 0 {
            return Err(Error::Config("stacks must hold at least one cell".to_string()));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Str(String),
}

fn parse_bases(buf: &str) -> std::result::Result<u64, String> {
    if let Some(digits) = buf.strip_prefix('$') {
        u64::from_str_radix(digits, 16)
            .map_err(|e| format!("{buf} is not a valid base 16 value: {e}"))
    } else if let Some(digits) = buf.strip_prefix('%') {
        u64::from_str_radix(digits, 2)
            .map_err(|e| format!("{buf} is not a valid base 2 value: {e}"))
    } else {
        buf.parse::<u64>()
            .map_err(|e| format!("{buf} is not a valid base 10 value: {e}"))
    }
}

fn deserialize_bases<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Number::deserialize(deserializer)? {
        Number::Int(value) => u64::try_from(value)
            .map_err(|_| de::Error::custom(format!("{value} must not be negative"))),
        Number::Str(buf) => parse_bases(&buf).map_err(de::Error::custom),
    }
}

fn deserialize_bases_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserialize_bases(deserializer)?;
    u32::try_from(value).map_err(|_| de::Error::custom(format!("{value} does not fit in 32 bits")))
}

fn deserialize_bases_usize<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserialize_bases(deserializer)?;
    usize::try_from(value).map_err(|_| de::Error::custom(format!("{value} is too large")))
}

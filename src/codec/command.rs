//! Command model and serialization to one wire line.
//!
//! A command is a name, a parameter block and a list of flag words:
//!
//! ```text
//! clientlist -uid -away
//! sendtextmessage targetmode=2 target=1 msg=hello\sworld
//! clientkick reasonid=5 reasonmsg=bye clid=1|clid=2
//! ```
//!
//! # Example
//!
//! ```
//! use serverquery_client::codec::Command;
//!
//! let line = Command::new("sendtextmessage")
//!     .arg("targetmode", 2)
//!     .arg("msg", "hello world")
//!     .encode()
//!     .unwrap();
//! assert_eq!(line, r"sendtextmessage targetmode=2 msg=hello\sworld");
//! ```

use super::escape::escape;
use super::value::{ParamMap, Value};
use crate::error::{QueryError, Result};

/// Parameter block of a command, chosen explicitly by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Params {
    /// No parameters.
    #[default]
    None,
    /// A single `key=value` block.
    Map(ParamMap),
    /// Several blocks joined with `|` (one per entity).
    Batch(Vec<ParamMap>),
}

/// A command ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    params: Params,
    flags: Vec<String>,
}

impl Command {
    /// Create a command without parameters or flags.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Params::None,
            flags: Vec::new(),
        }
    }

    /// Add a parameter.
    ///
    /// On a batch command the parameter goes into the first block, which the
    /// server treats as shared by every block.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match &mut self.params {
            Params::None => {
                let mut map = ParamMap::new();
                map.insert(key, value);
                self.params = Params::Map(map);
            }
            Params::Map(map) => {
                map.insert(key, value);
            }
            Params::Batch(maps) => match maps.first_mut() {
                Some(first) => {
                    first.insert(key, value);
                }
                None => {
                    let mut map = ParamMap::new();
                    map.insert(key, value);
                    maps.push(map);
                }
            },
        }
        self
    }

    /// Add an optional parameter; `None` is skipped.
    pub fn arg_opt(self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.arg(key, v),
            None => self,
        }
    }

    /// Replace the parameter block.
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Use a batch of parameter blocks.
    pub fn batch(self, maps: Vec<ParamMap>) -> Self {
        self.params(Params::Batch(maps))
    }

    /// Append a flag word (written as `-flag`).
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Command name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter block.
    #[inline]
    pub fn parameters(&self) -> &Params {
        &self.params
    }

    /// Flag words in submission order.
    #[inline]
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Serialize into one wire line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Serialization`] for an invalid name, key or
    /// flag, or a list value where none is allowed.
    pub fn encode(&self) -> Result<String> {
        self.render(false)
    }

    /// Canonical form with parameter keys sorted inside each block.
    ///
    /// Two commands that differ only by parameter order share this form.
    pub fn canonical(&self) -> Result<String> {
        self.render(true)
    }

    fn render(&self, sorted: bool) -> Result<String> {
        validate_name(&self.name)?;

        let mut line = self.name.clone();

        let block = match &self.params {
            Params::None => String::new(),
            Params::Map(map) => encode_map(map, sorted, true)?,
            Params::Batch(maps) => {
                let blocks = maps
                    .iter()
                    .map(|m| encode_map(m, sorted, false))
                    .collect::<Result<Vec<_>>>()?;
                blocks.join("|")
            }
        };
        if !block.is_empty() {
            line.push(' ');
            line.push_str(&block);
        }

        for flag in &self.flags {
            validate_flag(flag)?;
            line.push_str(" -");
            line.push_str(flag);
        }

        Ok(line)
    }
}

fn encode_map(map: &ParamMap, sorted: bool, allow_lists: bool) -> Result<String> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    if sorted {
        entries.sort_by(|a, b| a.0.cmp(b.0));
    }

    let mut tokens = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        validate_key(key)?;
        match value {
            Value::List(items) => {
                if !allow_lists {
                    return Err(QueryError::Serialization(format!(
                        "list value for '{key}' is not allowed inside a batch"
                    )));
                }
                let parts = items
                    .iter()
                    .map(|item| encode_pair(key, item))
                    .collect::<Result<Vec<_>>>()?;
                if !parts.is_empty() {
                    tokens.push(parts.join("|"));
                }
            }
            scalar => tokens.push(encode_pair(key, scalar)?),
        }
    }
    Ok(tokens.join(" "))
}

fn encode_pair(key: &str, value: &Value) -> Result<String> {
    let text = match value {
        Value::Str(s) => escape(s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Value::List(_) => {
            return Err(QueryError::Serialization(format!(
                "nested list value for '{key}'"
            )))
        }
    };
    Ok(format!("{key}={text}"))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '|') {
        return Err(QueryError::Serialization(format!(
            "invalid command name '{name}'"
        )));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c == '=' || c == '|') {
        return Err(QueryError::Serialization(format!(
            "invalid parameter key '{key}'"
        )));
    }
    Ok(())
}

fn validate_flag(flag: &str) -> Result<()> {
    if flag.is_empty() || flag.chars().any(|c| c.is_whitespace() || c == '|') {
        return Err(QueryError::Serialization(format!("invalid flag '{flag}'")));
    }
    Ok(())
}

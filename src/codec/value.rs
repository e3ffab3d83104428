//! Tagged parameter and record values.

use std::fmt;

use indexmap::IndexMap;

/// A single value on the wire.
///
/// Commands carry values chosen at the call site; responses carry values
/// coerced by [`Value::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Free-form text (escaped on the wire).
    Str(String),
    /// Signed integer, sent in decimal.
    Int(i64),
    /// Boolean, sent as `0` or `1`.
    Bool(bool),
    /// Several values for one key, sent as `key=a|key=b`.
    List(Vec<Value>),
}

/// Ordered parameter mapping for one command block.
pub type ParamMap = IndexMap<String, Value>;

impl Value {
    /// Coerce a received (already unescaped) value.
    ///
    /// Values made only of an optional leading `-` and ASCII digits become
    /// [`Value::Int`] when they fit in `i64`; everything else stays text.
    pub fn parse(raw: &str) -> Self {
        let digits = raw.strip_prefix('-').unwrap_or(raw);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<i64>() {
                return Value::Int(n);
            }
        }
        Value::Str(raw.to_string())
    }

    /// Integer view, coercing numeric text and booleans.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Str(s) => s.trim().parse().ok(),
            Value::List(_) => None,
        }
    }
}

/// Unescaped text form (`Bool` as `0`/`1`, lists comma-separated).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Int(i64::from(n))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

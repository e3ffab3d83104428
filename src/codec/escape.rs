//! Value escaping for the query wire format.
//!
//! Spaces, pipes, slashes, backslashes and control characters cannot appear
//! raw inside a parameter value. Each one maps to a two-character escape
//! sequence starting with a backslash.
//!
//! # Example
//!
//! ```
//! use serverquery_client::codec::{escape, unescape};
//!
//! let escaped = escape("a b|c");
//! assert_eq!(escaped, r"a\sb\pc");
//! assert_eq!(unescape(&escaped), "a b|c");
//! ```

/// Escape table: raw character and the letter that follows the backslash.
const ESCAPES: [(char, char); 11] = [
    ('\\', '\\'),
    ('/', '/'),
    (' ', 's'),
    ('|', 'p'),
    ('\x07', 'a'),
    ('\x08', 'b'),
    ('\x0C', 'f'),
    ('\n', 'n'),
    ('\r', 'r'),
    ('\t', 't'),
    ('\x0B', 'v'),
];

#[inline]
fn escape_char(c: char) -> Option<char> {
    ESCAPES.iter().find(|(raw, _)| *raw == c).map(|(_, e)| *e)
}

#[inline]
fn unescape_char(c: char) -> Option<char> {
    ESCAPES.iter().find(|(_, e)| *e == c).map(|(raw, _)| *raw)
}

/// Escape a value for transmission.
///
/// Total over every input string; never fails.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match escape_char(c) {
            Some(e) => {
                out.push('\\');
                out.push(e);
            }
            None => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`].
///
/// An unknown sequence such as `\x` yields the character after the
/// backslash. A trailing lone backslash is kept.
pub fn unescape(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) => out.push(unescape_char(next).unwrap_or(next)),
            None => out.push('\\'),
        }
    }
    out
}

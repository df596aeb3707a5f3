//! Search filters
//!
//! A filter is an immutable boolean expression tree compiled from the
//! textual grammar:
//!
//! ```text
//! filter     = "(" filtercomp ")"
//! filtercomp = "&" filter+ | "|" filter+ | "!" filter | item
//! item       = attr "=*"                  ; present
//!            | attr "=" value             ; equality
//!            | attr "=" [initial] "*" *(any "*") [final]
//!            | attr (">=" | "<=" | "~=") value
//! ```
//!
//! Values use `\XX` hex escapes for `*`, `(`, `)`, `\` and NUL. A single
//! item without surrounding parentheses (`objectclass=*`) is accepted too.

use std::fmt;
use std::str::FromStr;

use crate::error::{LdapError, Result};

/// Deepest nesting of `&`, `|` and `!` accepted when parsing or decoding
pub const MAX_FILTER_DEPTH: usize = 256;

/// Boolean expression over entry attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality {
        attr: String,
        value: Vec<u8>,
    },
    Substring {
        attr: String,
        initial: Option<Vec<u8>>,
        any: Vec<Vec<u8>>,
        final_value: Option<Vec<u8>>,
    },
    GreaterOrEqual {
        attr: String,
        value: Vec<u8>,
    },
    LessOrEqual {
        attr: String,
        value: Vec<u8>,
    },
    Approx {
        attr: String,
        value: Vec<u8>,
    },
    Present(String),
}

impl Filter {
    pub fn parse(text: &str) -> Result<Self> {
        text.parse()
    }

    pub fn equality(attr: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Filter::Equality {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn present(attr: impl Into<String>) -> Self {
        Filter::Present(attr.into())
    }

    /// The `(objectClass=*)` filter matching every entry
    pub fn match_all() -> Self {
        Filter::Present("objectClass".to_string())
    }
}

impl FromStr for Filter {
    type Err = LdapError;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LdapError::InvalidFilter("empty filter".to_string()));
        }

        let mut parser = Parser {
            input: text.as_bytes(),
            pos: 0,
            depth: 0,
        };
        let filter = if text.starts_with('(') {
            parser.filter()?
        } else {
            parser.item()?
        };
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    /// Parenthesized filters currently open
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> LdapError {
        LdapError::InvalidFilter(format!("{} at offset {}", reason, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')')?;
        self.depth -= 1;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.filter()?);
        }
        if filters.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'~' | b'>' | b'<' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("attribute is not valid UTF-8"))?
            .trim()
            .to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute description"));
        }
        if !attr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ';'))
        {
            return Err(self.error("illegal character in attribute description"));
        }

        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                b'='
            }
            Some(op @ (b'~' | b'>' | b'<')) => {
                self.pos += 1;
                self.expect(b'=')?;
                op
            }
            _ => return Err(self.error("expected filter operator")),
        };

        let segments = self.value_segments()?;
        match op {
            b'=' => build_equality(attr, segments).ok_or_else(|| self.error("invalid substring pattern")),
            _ => {
                if segments.len() != 1 {
                    return Err(self.error("unescaped '*' in ordering or approx value"));
                }
                let value = segments.into_iter().next().unwrap_or_default();
                Ok(match op {
                    b'>' => Filter::GreaterOrEqual { attr, value },
                    b'<' => Filter::LessOrEqual { attr, value },
                    _ => Filter::Approx { attr, value },
                })
            }
        }
    }

    /// Raw value up to the closing ')' split on unescaped '*'
    fn value_segments(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut segments = vec![Vec::new()];
        while let Some(b) = self.peek() {
            match b {
                b')' => break,
                b'(' => return Err(self.error("unescaped '(' in value")),
                b'*' => {
                    self.pos += 1;
                    segments.push(Vec::new());
                }
                b'\\' => {
                    self.pos += 1;
                    let byte = self.escape()?;
                    if let Some(last) = segments.last_mut() {
                        last.push(byte);
                    }
                }
                _ => {
                    self.pos += 1;
                    if let Some(last) = segments.last_mut() {
                        last.push(b);
                    }
                }
            }
        }
        Ok(segments)
    }

    fn escape(&mut self) -> Result<u8> {
        match self.peek() {
            Some(b'*' | b'(' | b')' | b'\\') => {
                let byte = self.input[self.pos];
                self.pos += 1;
                Ok(byte)
            }
            Some(_) => {
                let hex = self
                    .input
                    .get(self.pos..self.pos + 2)
                    .and_then(|pair| std::str::from_utf8(pair).ok())
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| self.error("invalid escape sequence"))?;
                self.pos += 2;
                Ok(hex)
            }
            None => Err(self.error("dangling escape")),
        }
    }
}

fn build_equality(attr: String, mut segments: Vec<Vec<u8>>) -> Option<Filter> {
    if segments.len() == 1 {
        let value = segments.pop().unwrap_or_default();
        return Some(Filter::Equality { attr, value });
    }
    if segments.len() == 2 && segments.iter().all(Vec::is_empty) {
        return Some(Filter::Present(attr));
    }

    let final_part = segments.pop().filter(|s| !s.is_empty());
    let mut rest = segments.into_iter();
    let initial = rest.next().filter(|s| !s.is_empty());
    let any: Vec<Vec<u8>> = rest.filter(|s| !s.is_empty()).collect();
    if initial.is_none() && any.is_empty() && final_part.is_none() {
        return None;
    }
    Some(Filter::Substring {
        attr,
        initial,
        any,
        final_value: final_part,
    })
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &[u8]) -> fmt::Result {
    for &b in value {
        if matches!(b, b'*' | b'(' | b')' | b'\\') || b < 0x20 || b >= 0x7f {
            write!(f, "\\{:02x}", b)?;
        } else {
            write!(f, "{}", b as char)?;
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                f.write_str(if matches!(self, Filter::And(_)) { "&" } else { "|" })?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
            }
            Filter::Not(inner) => write!(f, "!{}", inner)?,
            Filter::Equality { attr, value } => {
                write!(f, "{}=", attr)?;
                write_value(f, value)?;
            }
            Filter::Substring {
                attr,
                initial,
                any,
                final_value,
            } => {
                write!(f, "{}=", attr)?;
                if let Some(initial) = initial {
                    write_value(f, initial)?;
                }
                f.write_str("*")?;
                for part in any {
                    write_value(f, part)?;
                    f.write_str("*")?;
                }
                if let Some(final_value) = final_value {
                    write_value(f, final_value)?;
                }
            }
            Filter::GreaterOrEqual { attr, value } => {
                write!(f, "{}>=", attr)?;
                write_value(f, value)?;
            }
            Filter::LessOrEqual { attr, value } => {
                write!(f, "{}<=", attr)?;
                write_value(f, value)?;
            }
            Filter::Approx { attr, value } => {
                write!(f, "{}~=", attr)?;
                write_value(f, value)?;
            }
            Filter::Present(attr) => write!(f, "{}=*", attr)?,
        }
        f.write_str(")")
    }
}

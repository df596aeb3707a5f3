//! Distinguished names
//!
//! A DN is an ordered sequence of relative names, most specific first:
//! `cn=John Jones,o=My Company,c=US`. Each RDN holds one or more
//! `type=value` assertions joined by `+`.

use std::fmt;
use std::str::FromStr;

use crate::error::{LdapError, Result};

/// Characters that must be escaped inside an attribute value
const SPECIAL: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '='];

/// A single `type=value` assertion inside an RDN
#[derive(Debug, Clone, Eq)]
pub struct Ava {
    attr: String,
    value: String,
}

impl Ava {
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.attr.eq_ignore_ascii_case(&other.attr) && self.value == other.value
    }
}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.attr)?;
        let count = self.value.chars().count();
        for (i, c) in self.value.chars().enumerate() {
            let edge_space = c == ' ' && (i == 0 || i + 1 == count);
            if SPECIAL.contains(&c) || edge_space || (i == 0 && c == '#') {
                write!(f, "\\{}", c)?;
            } else if (c as u32) < 0x20 {
                write!(f, "\\{:02X}", c as u32)?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Relative distinguished name: one level of the DN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn(Vec<Ava>);

impl Rdn {
    pub fn new(avas: Vec<Ava>) -> Self {
        Self(avas)
    }

    pub fn single(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![Ava::new(attr, value)])
    }

    pub fn avas(&self) -> &[Ava] {
        &self.0
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ava) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{}", ava)?;
        }
        Ok(())
    }
}

/// Parsed, immutable distinguished name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The root DN (zero components)
    pub fn root() -> Self {
        Self { rdns: Vec::new() }
    }

    pub fn parse(text: &str) -> Result<Self> {
        text.parse()
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Most specific component, `None` for the root DN
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// The DN one level up, `None` for the root DN
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        Some(Dn {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// New DN with `rdn` prepended below this one
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// True when `self` sits strictly below `ancestor`
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        self.rdns.len() > ancestor.rdns.len() && self.rdns.ends_with(&ancestor.rdns)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = LdapError;

    fn from_str(text: &str) -> Result<Self> {
        // Trailing spaces may be escaped, so only the value scanner may drop them
        let text = text.trim_start();
        if text.trim_end().is_empty() {
            return Ok(Dn::root());
        }

        let invalid = |reason: &str| LdapError::InvalidDn(format!("{}: {:?}", reason, text));

        let mut rdns = Vec::new();
        let mut avas = Vec::new();
        let mut chars = text.chars().peekable();

        loop {
            // Attribute type up to '='
            let mut attr = String::new();
            loop {
                match chars.next() {
                    Some('=') => break,
                    Some(',') | Some('+') | None => return Err(invalid("missing '=' in component")),
                    Some(c) => attr.push(c),
                }
            }
            let attr = attr.trim();
            if attr.is_empty() {
                return Err(invalid("empty attribute type"));
            }
            if !attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return Err(invalid("illegal character in attribute type"));
            }

            // Value up to an unescaped ',' or '+'
            let mut value: Vec<u8> = Vec::new();
            let mut protected = 0usize;
            let mut terminator = None;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        let escaped = chars.next().ok_or_else(|| invalid("dangling escape"))?;
                        if escaped.is_ascii_hexdigit() {
                            let low = chars
                                .next()
                                .filter(|c| c.is_ascii_hexdigit())
                                .ok_or_else(|| invalid("truncated hex escape"))?;
                            let pair: String = [escaped, low].iter().collect();
                            let byte = u8::from_str_radix(&pair, 16)
                                .map_err(|_| invalid("bad hex escape"))?;
                            value.push(byte);
                        } else if SPECIAL.contains(&escaped) || escaped == ' ' || escaped == '#' {
                            let mut buf = [0u8; 4];
                            value.extend_from_slice(escaped.encode_utf8(&mut buf).as_bytes());
                        } else {
                            return Err(invalid("unknown escape"));
                        }
                        protected = value.len();
                    }
                    ',' | '+' => {
                        terminator = Some(c);
                        break;
                    }
                    ' ' if value.is_empty() => {}
                    _ => {
                        let mut buf = [0u8; 4];
                        value.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
            while value.len() > protected && value.last() == Some(&b' ') {
                value.pop();
            }
            let value =
                String::from_utf8(value).map_err(|_| invalid("value is not valid UTF-8"))?;
            avas.push(Ava::new(attr, value));

            match terminator {
                Some('+') => continue,
                Some(_) => rdns.push(Rdn(std::mem::take(&mut avas))),
                None => {
                    rdns.push(Rdn(avas));
                    break;
                }
            }
        }

        Ok(Dn { rdns })
    }
}

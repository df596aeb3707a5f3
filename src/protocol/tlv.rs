//! Tag-length-value element layer
//!
//! ## Element Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Tag (1)  │ Len (4)  │         Value               │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! Lengths are u32 big-endian. Integers and enumerations are always four
//! bytes big-endian, booleans one byte, so equal values always encode to
//! equal bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{LdapError, Result};

/// Header size: 1 byte tag + 4 bytes length
pub const HEADER_SIZE: usize = 5;

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0A;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

// =============================================================================
// Writer
// =============================================================================

/// Builds nested elements into one buffer
pub struct TlvWriter {
    buf: BytesMut,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Element with raw value bytes
    pub fn put_primitive(&mut self, tag: u8, value: &[u8]) {
        self.buf.put_u8(tag);
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    pub fn put_octets(&mut self, value: &[u8]) {
        self.put_primitive(TAG_OCTET_STRING, value);
    }

    pub fn put_string(&mut self, value: &str) {
        self.put_primitive(TAG_OCTET_STRING, value.as_bytes());
    }

    /// Four-byte big-endian number under `tag`
    pub fn put_u32(&mut self, tag: u8, value: u32) {
        self.buf.put_u8(tag);
        self.buf.put_u32(4);
        self.buf.put_u32(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(TAG_BOOLEAN);
        self.buf.put_u32(1);
        self.buf.put_u8(if value { 0xFF } else { 0x00 });
    }

    /// Element whose value is written by `body`; length is patched after
    pub fn put_constructed(&mut self, tag: u8, body: impl FnOnce(&mut Self)) {
        self.buf.put_u8(tag);
        let length_pos = self.buf.len();
        self.buf.put_u32(0);
        body(self);
        let length = (self.buf.len() - length_pos - 4) as u32;
        self.buf[length_pos..length_pos + 4].copy_from_slice(&length.to_be_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for TlvWriter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Sequential reader over the elements inside one value
pub struct TlvReader<'a> {
    buf: &'a [u8],
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Next element of any tag
    pub fn read_any(&mut self) -> Result<(u8, &'a [u8])> {
        if self.buf.len() < HEADER_SIZE {
            return Err(LdapError::TruncatedMessage(format!(
                "Incomplete element header: expected {} bytes, got {}",
                HEADER_SIZE,
                self.buf.len()
            )));
        }

        let mut header = &self.buf[..HEADER_SIZE];
        let tag = header.get_u8();
        let length = header.get_u32() as usize;

        let available = self.buf.len() - HEADER_SIZE;
        if length > available {
            return Err(LdapError::TruncatedMessage(format!(
                "Element 0x{:02x} declares {} bytes, {} remaining",
                tag, length, available
            )));
        }

        let value = &self.buf[HEADER_SIZE..HEADER_SIZE + length];
        self.buf = &self.buf[HEADER_SIZE + length..];
        Ok((tag, value))
    }

    /// Next element, which must carry `tag`
    pub fn read_element(&mut self, tag: u8) -> Result<&'a [u8]> {
        match self.peek_tag() {
            Some(found) if found == tag => Ok(self.read_any()?.1),
            Some(found) => Err(LdapError::MalformedMessage(format!(
                "Unexpected tag 0x{:02x}, expected 0x{:02x}",
                found, tag
            ))),
            None => Err(LdapError::TruncatedMessage(format!(
                "Missing element 0x{:02x}",
                tag
            ))),
        }
    }

    /// Next element if it carries `tag`
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<&'a [u8]>> {
        if self.peek_tag() == Some(tag) {
            Ok(Some(self.read_any()?.1))
        } else {
            Ok(None)
        }
    }

    pub fn read_constructed(&mut self, tag: u8) -> Result<TlvReader<'a>> {
        self.read_element(tag).map(TlvReader::new)
    }

    pub fn read_u32(&mut self, tag: u8) -> Result<u32> {
        fixed_u32(tag, self.read_element(tag)?)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_element(TAG_BOOLEAN)? {
            [byte] => Ok(*byte != 0),
            other => Err(LdapError::MalformedMessage(format!(
                "Boolean value must be 1 byte, got {}",
                other.len()
            ))),
        }
    }

    pub fn read_octets(&mut self, tag: u8) -> Result<Vec<u8>> {
        Ok(self.read_element(tag)?.to_vec())
    }

    pub fn read_string(&mut self, tag: u8) -> Result<String> {
        utf8(self.read_element(tag)?)
    }

    /// Require that every byte was consumed
    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(LdapError::MalformedMessage(format!(
                "{} trailing bytes after last element",
                self.buf.len()
            )))
        }
    }
}

/// Decode a four-byte big-endian value
pub fn fixed_u32(tag: u8, mut value: &[u8]) -> Result<u32> {
    if value.len() != 4 {
        return Err(LdapError::MalformedMessage(format!(
            "Element 0x{:02x} must be 4 bytes, got {}",
            tag,
            value.len()
        )));
    }
    Ok(value.get_u32())
}

pub fn utf8(value: &[u8]) -> Result<String> {
    String::from_utf8(value.to_vec())
        .map_err(|_| LdapError::MalformedMessage("Invalid UTF-8 string".to_string()))
}

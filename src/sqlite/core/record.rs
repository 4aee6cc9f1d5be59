//! SQLite Record Format Implementation
//!
//! This module handles parsing SQLite records (rows) according to the file format specification.
//!
//! ## Record Format
//!
//! A record payload consists of:
//!
//! - A header containing:
//!   - Header size (varint, counting itself)
//!   - Serial type codes (sequence of varints)
//! - The actual field data
//!
//! The payload length and rowid that precede a record inside a b-tree cell
//! belong to the cell, not the record, and are handled by the walker.
//!
//! The serial type codes in the header describe the data type and size of each field:
//!
//! - 0: NULL
//! - 1: 8-bit signed int
//! - 2: 16-bit signed int
//! - 3: 24-bit signed int
//! - 4: 32-bit signed int
//! - 5: 48-bit signed int
//! - 6: 64-bit signed int
//! - 7: IEEE 754 64-bit float
//! - 8: 0 (schema format 4)
//! - 9: 1 (schema format 4)
//! - 10,11: Internal use
//! - N >= 12 and even: BLOB of (N-12)/2 bytes
//! - N >= 13 and odd: Text of (N-13)/2 bytes

use super::header::TextEncoding;
use super::varint::read_varint;
use crate::sqlite::error::RecordError;

/// Storage class and on-disk size of a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Null,
    /// Big-endian two's complement integer of the given byte width
    Integer(usize),
    Float,
    Zero,
    One,
    Blob(usize),
    Text(usize),
}

impl ColumnKind {
    /// Number of body bytes the column occupies
    pub fn size(&self) -> usize {
        match *self {
            ColumnKind::Null | ColumnKind::Zero | ColumnKind::One => 0,
            ColumnKind::Integer(width) => width,
            ColumnKind::Float => 8,
            ColumnKind::Blob(len) | ColumnKind::Text(len) => len,
        }
    }
}

pub fn decode_serial_type(code: u64) -> Result<ColumnKind, RecordError> {
    let kind = match code {
        0 => ColumnKind::Null,
        1 => ColumnKind::Integer(1),
        2 => ColumnKind::Integer(2),
        3 => ColumnKind::Integer(3),
        4 => ColumnKind::Integer(4),
        5 => ColumnKind::Integer(6),
        6 => ColumnKind::Integer(8),
        7 => ColumnKind::Float,
        8 => ColumnKind::Zero,
        9 => ColumnKind::One,
        10 | 11 => return Err(RecordError::InvalidSerialType(code)),
        n if n % 2 == 0 => ColumnKind::Blob(((n - 12) / 2) as usize),
        n => ColumnKind::Text(((n - 13) / 2) as usize),
    };
    Ok(kind)
}

/// A decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Parser for SQLite records (table/index rows)
pub struct Record<'a> {
    data: &'a [u8],
    position: usize,
    encoding: TextEncoding,
}

impl<'a> Record<'a> {
    /// A record whose text columns use `encoding`, the database's text encoding
    pub fn new(data: &'a [u8], encoding: TextEncoding) -> Self {
        Self {
            data,
            position: 0,
            encoding,
        }
    }

    /// Decodes every column of a complete record payload
    pub fn parse(data: &'a [u8], encoding: TextEncoding) -> Result<Vec<Value>, RecordError> {
        let mut record = Self::new(data, encoding);
        let kinds = record.read_header()?;
        kinds.iter().map(|kind| record.read_value(*kind)).collect()
    }

    /// Reads the record header and leaves the cursor at the start of the body
    pub fn read_header(&mut self) -> Result<Vec<ColumnKind>, RecordError> {
        let (header_size, consumed) = read_varint(self.data, self.position)?;
        let header_end = usize::try_from(header_size)
            .ok()
            .filter(|&size| size >= consumed)
            .and_then(|size| self.position.checked_add(size))
            .filter(|&end| end <= self.data.len())
            .ok_or(RecordError::Truncated {
                needed: header_size.max(0) as usize,
                available: self.data.len(),
            })?;
        self.position += consumed;

        let mut kinds = Vec::new();
        while self.position < header_end {
            let (code, consumed) = read_varint(self.data, self.position)?;
            self.position += consumed;
            kinds.push(decode_serial_type(code as u64)?);
        }
        self.position = header_end;

        Ok(kinds)
    }

    pub fn read_value(&mut self, kind: ColumnKind) -> Result<Value, RecordError> {
        let bytes = self.take(kind.size())?;
        let value = match kind {
            ColumnKind::Null => Value::Null,
            ColumnKind::Zero => Value::Integer(0),
            ColumnKind::One => Value::Integer(1),
            ColumnKind::Integer(_) => Value::Integer(read_be_signed(bytes)),
            ColumnKind::Float => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Value::Float(f64::from_be_bytes(raw))
            }
            ColumnKind::Text(_) => Value::Text(decode_text(bytes, self.encoding)),
            ColumnKind::Blob(_) => Value::Blob(bytes.to_vec()),
        };
        Ok(value)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RecordError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(RecordError::Truncated {
                needed: self.position.saturating_add(len),
                available: self.data.len(),
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

/// Decodes a text column, replacing invalid sequences with U+FFFD
fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    let utf16 = |to_u16: fn([u8; 2]) -> u16| {
        let units = bytes.chunks_exact(2).map(|pair| to_u16([pair[0], pair[1]]));
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect::<String>()
    };
    match encoding {
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Utf16le => utf16(u16::from_le_bytes),
        TextEncoding::Utf16be => utf16(u16::from_be_bytes),
    }
}

/// Sign-extends a big-endian integer of 1 to 8 bytes
fn read_be_signed(bytes: &[u8]) -> i64 {
    let fill = if bytes.first().map_or(false, |b| b & 0x80 != 0) {
        0xff
    } else {
        0x00
    };
    let mut raw = [fill; 8];
    raw[8 - bytes.len()..].copy_from_slice(bytes);
    i64::from_be_bytes(raw)
}

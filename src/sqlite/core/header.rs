//! SQLite Database Header Implementation
//!
//! Handles parsing of the SQLite database header (first 100 bytes of the file)
//! according to the file format specification.
//!
//! ## Database Header Format (First 100 bytes)
//!
//! - Bytes 0-15: Header string "SQLite format 3\0"
//! - Bytes 16-17: Page size in bytes (big-endian, 1 means 65536)
//! - Byte 18: File format write version
//! - Byte 19: File format read version
//! - Byte 20: Reserved space at end of each page
//! - Bytes 21-23: Maximum embedded, minimum embedded and leaf payload
//!   fractions
//! - Bytes 24-27: File change counter
//! - Bytes 28-31: Size of database file in pages
//! - Bytes 32-35: First freelist trunk page
//! - Bytes 36-39: Total number of freelist pages
//! - Bytes 40-43: Schema cookie
//! - Bytes 44-47: Schema format number
//! - Bytes 48-51: Default page cache size
//! - Bytes 52-55: Largest root b-tree page number
//! - Bytes 56-59: Database text encoding (1:UTF-8, 2:UTF-16le, 3:UTF-16be)
//! - Bytes 60-63: User version
//! - Bytes 64-67: Incremental vacuum mode
//! - Bytes 68-71: Application ID
//! - Bytes 72-91: Reserved for expansion
//! - Bytes 92-95: Version-valid-for number
//! - Bytes 96-99: SQLite version number

use crate::sqlite::error::HeaderError;
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;
use std::fmt;
use tracing::debug;

/// Text encoding used for all strings in the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16le,
    Utf16be,
}

impl TextEncoding {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(TextEncoding::Utf8),
            2 => Some(TextEncoding::Utf16le),
            3 => Some(TextEncoding::Utf16be),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16le => "UTF-16le",
            TextEncoding::Utf16be => "UTF-16be",
        }
    }
}

/// Represents the SQLite database header (first 100 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Header string (bytes 0-15)
    pub magic: [u8; 16],
    /// Page size field as stored (bytes 16-17)
    pub stored_page_size: u16,
    /// Page size in bytes, with the stored value 1 resolved to 65536
    pub page_size: u32,
    /// File format write version (byte 18)
    pub write_version: u8,
    /// File format read version (byte 19)
    pub read_version: u8,
    /// Reserved space at end of each page (byte 20)
    pub reserved_space: u8,
    /// Maximum embedded payload fraction (byte 21)
    pub max_payload_fraction: u8,
    /// Minimum embedded payload fraction (byte 22)
    pub min_payload_fraction: u8,
    /// Leaf payload fraction (byte 23)
    pub leaf_payload_fraction: u8,
    /// File change counter (bytes 24-27)
    pub file_change_counter: u32,
    /// Size of database file in pages (bytes 28-31)
    pub database_size: u32,
    /// First freelist trunk page (bytes 32-35)
    pub first_freelist_trunk: u32,
    /// Total number of freelist pages (bytes 36-39)
    pub total_freelist_pages: u32,
    /// Schema cookie (bytes 40-43)
    pub schema_cookie: u32,
    /// Schema format number (bytes 44-47)
    pub schema_format: u32,
    /// Default page cache size (bytes 48-51)
    pub page_cache_size: u32,
    /// Largest root b-tree page number, non-zero in auto-vacuum mode (bytes 52-55)
    pub largest_root_page: u32,
    /// Database text encoding (bytes 56-59), `None` for unknown codes
    pub text_encoding: Option<TextEncoding>,
    /// User version (bytes 60-63)
    pub user_version: u32,
    /// Incremental vacuum mode (bytes 64-67)
    pub incremental_vacuum: bool,
    /// Application ID (bytes 68-71)
    pub application_id: u32,
    /// Reserved for expansion, must be zero (bytes 72-91)
    pub reserved: [u8; 20],
    /// Version valid for number (bytes 92-95)
    pub version_valid_for: u32,
    /// SQLite version number (bytes 96-99)
    pub sqlite_version_number: u32,
}

impl FileHeader {
    /// Size of the SQLite database header in bytes
    pub const HEADER_SIZE: usize = 100;

    /// Magic string that should appear at the start of every SQLite file
    pub const MAGIC_STRING: &'static [u8; 16] = b"SQLite format 3\0";

    /// Parses a database header, rejecting files without the SQLite signature
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        let header = Self::inspect(bytes)?;
        if !header.magic_matches() {
            return Err(HeaderError::InvalidMagic);
        }
        Ok(header)
    }

    /// Parses a database header without checking the signature
    ///
    /// Only a short buffer is an error; every other inconsistency is
    /// reported through [`FileHeader::is_valid`].
    pub fn inspect(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(HeaderError::TruncatedInput { len: bytes.len() });
        }

        let (_, header) = parse_header(&bytes[..Self::HEADER_SIZE])
            .map_err(|_| HeaderError::TruncatedInput { len: bytes.len() })?;
        debug!("Parsed database header: {:?}", header);
        Ok(header)
    }

    pub fn magic_matches(&self) -> bool {
        &self.magic == Self::MAGIC_STRING
    }

    pub fn page_size_is_valid(&self) -> bool {
        self.page_size.is_power_of_two() && (512..=65536).contains(&self.page_size)
    }

    /// Magic, reserved region and page size are all consistent
    pub fn is_valid(&self) -> bool {
        self.magic_matches() && self.reserved.iter().all(|&b| b == 0) && self.page_size_is_valid()
    }

    /// Usable bytes per page once the reserved tail is excluded
    pub fn usable_size(&self) -> u32 {
        self.page_size.saturating_sub(self.reserved_space as u32)
    }

    /// The stored page count is only trusted when it is non-zero and the
    /// version-valid-for number matches the change counter.
    pub fn page_count_is_trusted(&self) -> bool {
        self.database_size != 0 && self.version_valid_for == self.file_change_counter
    }

    pub fn is_auto_vacuum(&self) -> bool {
        self.largest_root_page != 0
    }

    /// The header string without its trailing NUL
    pub fn header_string(&self) -> String {
        String::from_utf8_lossy(&self.magic[..15]).into_owned()
    }

    /// Encoding of every text value in the file. An unknown code falls
    /// back to UTF-8.
    pub fn encoding(&self) -> TextEncoding {
        self.text_encoding.unwrap_or(TextEncoding::Utf8)
    }
}

fn parse_header(input: &[u8]) -> IResult<&[u8], FileHeader> {
    let (input, magic) = take(16usize)(input)?;
    let (input, stored_page_size) = be_u16(input)?;
    let (input, write_version) = be_u8(input)?;
    let (input, read_version) = be_u8(input)?;
    let (input, reserved_space) = be_u8(input)?;
    let (input, max_payload_fraction) = be_u8(input)?;
    let (input, min_payload_fraction) = be_u8(input)?;
    let (input, leaf_payload_fraction) = be_u8(input)?;
    let (input, file_change_counter) = be_u32(input)?;
    let (input, database_size) = be_u32(input)?;
    let (input, first_freelist_trunk) = be_u32(input)?;
    let (input, total_freelist_pages) = be_u32(input)?;
    let (input, schema_cookie) = be_u32(input)?;
    let (input, schema_format) = be_u32(input)?;
    let (input, page_cache_size) = be_u32(input)?;
    let (input, largest_root_page) = be_u32(input)?;
    let (input, text_encoding) = be_u32(input)?;
    let (input, user_version) = be_u32(input)?;
    let (input, incremental_vacuum) = be_u32(input)?;
    let (input, application_id) = be_u32(input)?;
    let (input, reserved) = take(20usize)(input)?;
    let (input, version_valid_for) = be_u32(input)?;
    let (input, sqlite_version_number) = be_u32(input)?;

    let mut magic_bytes = [0u8; 16];
    magic_bytes.copy_from_slice(magic);
    let mut reserved_bytes = [0u8; 20];
    reserved_bytes.copy_from_slice(reserved);

    let page_size = match stored_page_size {
        1 => 65536,
        n => n as u32,
    };

    Ok((
        input,
        FileHeader {
            magic: magic_bytes,
            stored_page_size,
            page_size,
            write_version,
            read_version,
            reserved_space,
            max_payload_fraction,
            min_payload_fraction,
            leaf_payload_fraction,
            file_change_counter,
            database_size,
            first_freelist_trunk,
            total_freelist_pages,
            schema_cookie,
            schema_format,
            page_cache_size,
            largest_root_page,
            text_encoding: TextEncoding::from_code(text_encoding),
            user_version,
            incremental_vacuum: incremental_vacuum != 0,
            application_id,
            reserved: reserved_bytes,
            version_valid_for,
            sqlite_version_number,
        },
    ))
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoding = self.text_encoding.map_or("None", |e| e.name());

        writeln!(f, "Header seems valid? {}", self.is_valid())?;
        writeln!(f, "Header string: {}", self.header_string())?;
        writeln!(f, "Page size: {}", self.page_size)?;
        writeln!(f, "Format read version: {}", self.read_version)?;
        writeln!(f, "Format write version: {}", self.write_version)?;
        writeln!(f, "Reserved space: {}", self.reserved_space)?;
        writeln!(f, "Max. embeded payload: {}", self.max_payload_fraction)?;
        writeln!(f, "Min. embeded payload: {}", self.min_payload_fraction)?;
        writeln!(f, "Leaf payload: {}", self.leaf_payload_fraction)?;
        writeln!(f, "Change counter: {}", self.file_change_counter)?;
        writeln!(f, "Page count: {}", self.database_size)?;
        writeln!(f, "Freelist start page: {}", self.first_freelist_trunk)?;
        writeln!(f, "Freelist size: {}", self.total_freelist_pages)?;
        writeln!(f, "Schema cookie: {}", self.schema_cookie)?;
        writeln!(f, "Schema format: {}", self.schema_format)?;
        writeln!(f, "Page cache size: {}", self.page_cache_size)?;
        writeln!(f, "Largest b-tree-root page #: {}", self.largest_root_page)?;
        writeln!(f, "Text encoding: {}", encoding)?;
        writeln!(f, "User version: {}", self.user_version)?;
        writeln!(f, "Incremental vacuum mode: {}", self.incremental_vacuum)?;
        writeln!(f, "Application id.: {}", self.application_id)?;
        writeln!(f, "Version valid for: {}", self.version_valid_for)?;
        write!(f, "SQLite version number: {}", self.sqlite_version_number)
    }
}

//! Builds small SQLite database images page by page.

#![allow(dead_code)]

use sqlite_analyzer::sqlite::btree::PageType;
use sqlite_analyzer::sqlite::core::header::TextEncoding;
use sqlite_analyzer::sqlite::error::InputError;
use sqlite_analyzer::ByteSource;
use sqlite_analyzer::sqlite::walker::{local_payload_size, max_local, min_local};

pub const MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Encodes an SQLite varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value >> 56 != 0 {
        let mut out = vec![0u8; 9];
        out[8] = value as u8;
        let mut rest = value >> 8;
        for byte in out[..8].iter_mut().rev() {
            *byte = (rest & 0x7f) as u8 | 0x80;
            rest >>= 7;
        }
        return out;
    }

    let mut groups = Vec::new();
    let mut rest = value;
    loop {
        groups.push((rest & 0x7f) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    groups.reverse();
    let last = groups.len() - 1;
    for group in &mut groups[..last] {
        *group |= 0x80;
    }
    groups
}

pub enum Col {
    Null,
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
}

pub fn text(s: &str) -> Col {
    Col::Text(s.to_string())
}

fn encode_text(s: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => s.as_bytes().to_vec(),
        TextEncoding::Utf16le => s.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        TextEncoding::Utf16be => s.encode_utf16().flat_map(u16::to_be_bytes).collect(),
    }
}

/// Serializes columns into a UTF-8 record payload
pub fn record(cols: &[Col]) -> Vec<u8> {
    record_in(cols, TextEncoding::Utf8)
}

/// Serializes columns into a record payload with text in `encoding`
pub fn record_in(cols: &[Col], encoding: TextEncoding) -> Vec<u8> {
    let mut types = Vec::new();
    let mut body = Vec::new();
    for col in cols {
        match col {
            Col::Null => types.extend(encode_varint(0)),
            Col::Int(n) => {
                if let Ok(v) = i8::try_from(*n) {
                    types.extend(encode_varint(1));
                    body.extend(v.to_be_bytes());
                } else if let Ok(v) = i16::try_from(*n) {
                    types.extend(encode_varint(2));
                    body.extend(v.to_be_bytes());
                } else if let Ok(v) = i32::try_from(*n) {
                    types.extend(encode_varint(4));
                    body.extend(v.to_be_bytes());
                } else {
                    types.extend(encode_varint(6));
                    body.extend(n.to_be_bytes());
                }
            }
            Col::Text(s) => {
                let bytes = encode_text(s, encoding);
                types.extend(encode_varint(13 + 2 * bytes.len() as u64));
                body.extend(bytes);
            }
            Col::Blob(b) => {
                types.extend(encode_varint(12 + 2 * b.len() as u64));
                body.extend(b);
            }
        }
    }

    let mut header_size = types.len() + 1;
    if encode_varint(header_size as u64).len() > 1 {
        header_size += 1;
    }
    let mut out = encode_varint(header_size as u64);
    out.extend(types);
    out.extend(body);
    out
}

/// A row of the schema table
pub fn schema_row(
    kind: &str,
    name: &str,
    table: &str,
    root: Option<u32>,
    sql: Option<&str>,
) -> Vec<u8> {
    schema_row_in(TextEncoding::Utf8, kind, name, table, root, sql)
}

pub fn schema_row_in(
    encoding: TextEncoding,
    kind: &str,
    name: &str,
    table: &str,
    root: Option<u32>,
    sql: Option<&str>,
) -> Vec<u8> {
    record_in(
        &[
            text(kind),
            text(name),
            text(table),
            root.map_or(Col::Int(0), |r| Col::Int(r as i64)),
            sql.map_or(Col::Null, text),
        ],
        encoding,
    )
}

pub fn table_leaf_cell(
    rowid: i64,
    payload: &[u8],
    local: usize,
    overflow: Option<u32>,
) -> Vec<u8> {
    let mut cell = encode_varint(payload.len() as u64);
    cell.extend(encode_varint(rowid as u64));
    cell.extend(&payload[..local]);
    if let Some(page) = overflow {
        cell.extend(page.to_be_bytes());
    }
    cell
}

pub fn index_leaf_cell(payload: &[u8], local: usize, overflow: Option<u32>) -> Vec<u8> {
    let mut cell = encode_varint(payload.len() as u64);
    cell.extend(&payload[..local]);
    if let Some(page) = overflow {
        cell.extend(page.to_be_bytes());
    }
    cell
}

pub fn index_interior_cell(
    child: u32,
    payload: &[u8],
    local: usize,
    overflow: Option<u32>,
) -> Vec<u8> {
    let mut cell = child.to_be_bytes().to_vec();
    cell.extend(index_leaf_cell(payload, local, overflow));
    cell
}

pub fn table_interior_cell(child: u32, key: i64) -> Vec<u8> {
    let mut cell = child.to_be_bytes().to_vec();
    cell.extend(encode_varint(key as u64));
    cell
}

/// In-memory database image with a hand-assembled page layout
pub struct DbBuilder {
    pub page_size: usize,
    pages: Vec<Vec<u8>>,
    pub change_counter: u32,
    pub version_valid_for: Option<u32>,
    pub stored_page_count: Option<u32>,
    pub freelist_trunk: u32,
    pub freelist_count: u32,
    pub largest_root_page: u32,
    pub text_encoding: TextEncoding,
}

impl DbBuilder {
    /// Starts a database whose page 1 is an empty schema table
    pub fn new(page_size: usize) -> Self {
        let mut builder = Self {
            page_size,
            pages: vec![vec![0u8; page_size]],
            change_counter: 3,
            version_valid_for: None,
            stored_page_count: None,
            freelist_trunk: 0,
            freelist_count: 0,
            largest_root_page: 0,
            text_encoding: TextEncoding::Utf8,
        };
        builder.table_leaf(1, &[]);
        builder
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Appends a zeroed page and returns its number
    pub fn alloc(&mut self) -> u32 {
        self.pages.push(vec![0u8; self.page_size]);
        self.page_count()
    }

    pub fn page_mut(&mut self, page: u32) -> &mut Vec<u8> {
        &mut self.pages[page as usize - 1]
    }

    pub fn table_leaf(&mut self, page: u32, cells: &[Vec<u8>]) {
        self.write_btree(page, 13, cells, None);
    }

    pub fn index_leaf(&mut self, page: u32, cells: &[Vec<u8>]) {
        self.write_btree(page, 10, cells, None);
    }

    pub fn table_interior(&mut self, page: u32, children: &[(u32, i64)], right: u32) {
        let cells: Vec<Vec<u8>> = children
            .iter()
            .map(|&(child, key)| table_interior_cell(child, key))
            .collect();
        self.write_btree(page, 5, &cells, Some(right));
    }

    pub fn index_interior(&mut self, page: u32, cells: &[Vec<u8>], right: u32) {
        self.write_btree(page, 2, cells, Some(right));
    }

    fn write_btree(&mut self, page: u32, page_type: u8, cells: &[Vec<u8>], right: Option<u32>) {
        let page_size = self.page_size;
        let base = if page == 1 { 100 } else { 0 };
        let header_size = if right.is_some() { 12 } else { 8 };
        let data = self.page_mut(page);

        data[base..].iter_mut().for_each(|b| *b = 0);
        data[base] = page_type;
        data[base + 3..base + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
        if let Some(right) = right {
            data[base + 8..base + 12].copy_from_slice(&right.to_be_bytes());
        }

        let mut content = page_size;
        for (i, cell) in cells.iter().enumerate() {
            content -= cell.len();
            data[content..content + cell.len()].copy_from_slice(cell);
            let ptr = base + header_size + i * 2;
            data[ptr..ptr + 2].copy_from_slice(&(content as u16).to_be_bytes());
        }
        assert!(
            content >= base + header_size + cells.len() * 2,
            "cells do not fit on page {}",
            page
        );
        data[base + 5..base + 7].copy_from_slice(&((content % 65536) as u16).to_be_bytes());
    }

    /// Writes `data` across freshly allocated overflow pages, returning the first
    pub fn overflow_chain(&mut self, data: &[u8]) -> u32 {
        let capacity = self.page_size - 4;
        let pages: Vec<u32> = data.chunks(capacity).map(|_| self.alloc()).collect();
        for (i, chunk) in data.chunks(capacity).enumerate() {
            let next = pages.get(i + 1).copied().unwrap_or(0);
            let page = self.page_mut(pages[i]);
            page[0..4].copy_from_slice(&next.to_be_bytes());
            page[4..4 + chunk.len()].copy_from_slice(chunk);
        }
        pages[0]
    }

    /// Local payload size SQLite would use for a cell on a page of this type
    pub fn local_size(&self, page_type: PageType, payload_len: usize) -> usize {
        let usable = self.page_size;
        local_payload_size(
            payload_len as u64,
            max_local(page_type, usable),
            min_local(usable),
            usable,
        )
    }

    /// Builds a table leaf cell, spilling the payload tail onto overflow pages
    pub fn table_cell(&mut self, rowid: i64, payload: &[u8]) -> Vec<u8> {
        let local = self.local_size(PageType::LeafTable, payload.len());
        let overflow = (local < payload.len()).then(|| self.overflow_chain(&payload[local..]));
        table_leaf_cell(rowid, payload, local, overflow)
    }

    /// Builds an index leaf cell, spilling the payload tail onto overflow pages
    pub fn index_cell(&mut self, payload: &[u8]) -> Vec<u8> {
        let local = self.local_size(PageType::LeafIndex, payload.len());
        let overflow = (local < payload.len()).then(|| self.overflow_chain(&payload[local..]));
        index_leaf_cell(payload, local, overflow)
    }

    pub fn write_freelist_trunk(&mut self, page: u32, next: u32, leaves: &[u32]) {
        let data = self.page_mut(page);
        data.iter_mut().for_each(|b| *b = 0);
        data[0..4].copy_from_slice(&next.to_be_bytes());
        data[4..8].copy_from_slice(&(leaves.len() as u32).to_be_bytes());
        for (i, leaf) in leaves.iter().enumerate() {
            data[8 + i * 4..12 + i * 4].copy_from_slice(&leaf.to_be_bytes());
        }
    }

    /// Serializes the image, filling in the database header
    pub fn build(&self) -> Vec<u8> {
        let mut pages = self.pages.clone();
        let h = &mut pages[0];
        let stored_page_size: u16 = if self.page_size == 65536 {
            1
        } else {
            self.page_size as u16
        };

        h[..16].copy_from_slice(MAGIC);
        h[16..18].copy_from_slice(&stored_page_size.to_be_bytes());
        h[18] = 1;
        h[19] = 1;
        h[20] = 0;
        h[21] = 64;
        h[22] = 32;
        h[23] = 32;
        h[24..28].copy_from_slice(&self.change_counter.to_be_bytes());
        let stored = self.stored_page_count.unwrap_or(self.page_count());
        h[28..32].copy_from_slice(&stored.to_be_bytes());
        h[32..36].copy_from_slice(&self.freelist_trunk.to_be_bytes());
        h[36..40].copy_from_slice(&self.freelist_count.to_be_bytes());
        h[40..44].copy_from_slice(&1u32.to_be_bytes());
        h[44..48].copy_from_slice(&4u32.to_be_bytes());
        h[52..56].copy_from_slice(&self.largest_root_page.to_be_bytes());
        let encoding: u32 = match self.text_encoding {
            TextEncoding::Utf8 => 1,
            TextEncoding::Utf16le => 2,
            TextEncoding::Utf16be => 3,
        };
        h[56..60].copy_from_slice(&encoding.to_be_bytes());
        let valid_for = self.version_valid_for.unwrap_or(self.change_counter);
        h[92..96].copy_from_slice(&valid_for.to_be_bytes());
        h[96..100].copy_from_slice(&3_045_001u32.to_be_bytes());

        pages.concat()
    }
}

/// A database image whose pages past the stored prefix read as zeros, for
/// files too large to hold in memory
pub struct ZeroTailSource {
    prefix: Vec<u8>,
    size: u64,
}

impl ZeroTailSource {
    pub fn new(prefix: Vec<u8>, size: u64) -> Self {
        Self { prefix, size }
    }
}

impl ByteSource for ZeroTailSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, InputError> {
        self.check_bounds(offset, len)?;
        let mut buf = vec![0u8; len];
        let start = offset.min(self.prefix.len() as u64) as usize;
        let end = (offset + len as u64).min(self.prefix.len() as u64) as usize;
        buf[..end - start].copy_from_slice(&self.prefix[start..end]);
        Ok(buf)
    }
}

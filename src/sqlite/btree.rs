use crate::sqlite::core::header::FileHeader;
use crate::sqlite::error::PageError;
use crate::sqlite::source::ByteSource;
use tracing::trace;

/// Layout of a b-tree: table b-trees are keyed by rowid, index b-trees by
/// their payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtreeKind {
    Table,
    Index,
}

/// B-tree page type, stored in the first byte of the page header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    InteriorIndex,
    InteriorTable,
    LeafIndex,
    LeafTable,
}

impl PageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            2 => Some(PageType::InteriorIndex),
            5 => Some(PageType::InteriorTable),
            10 => Some(PageType::LeafIndex),
            13 => Some(PageType::LeafTable),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageType::LeafIndex | PageType::LeafTable)
    }

    pub fn btree_kind(&self) -> BtreeKind {
        match self {
            PageType::InteriorTable | PageType::LeafTable => BtreeKind::Table,
            PageType::InteriorIndex | PageType::LeafIndex => BtreeKind::Index,
        }
    }

    /// Size of the page header: interior pages carry a right-most pointer
    pub fn header_size(&self) -> usize {
        if self.is_leaf() {
            8
        } else {
            12
        }
    }
}

/// Represents a B-tree page header
///
/// ## B-tree Page Header Format
///
/// - Byte 0: Page type
/// - Bytes 1-2: First freeblock offset
/// - Bytes 3-4: Number of cells
/// - Bytes 5-6: Cell content offset (0 means 65536)
/// - Byte 7: Number of fragmented free bytes
/// - Bytes 8-11: Right-most child pointer (interior pages only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreePageHeader {
    pub page_type: PageType,
    pub first_freeblock: u16,
    pub num_cells: u16,
    pub content_offset: u32,
    pub fragmented_free_bytes: u8,
    pub right_most_pointer: Option<u32>,
}

/// Raw bytes of one database page
#[derive(Debug, Clone)]
pub struct Page {
    number: u32,
    data: Vec<u8>,
}

impl Page {
    pub fn new(number: u32, data: Vec<u8>) -> Self {
        Self { number, data }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Offset of the b-tree page header: page 1 starts with the database header
    pub fn header_offset(&self) -> usize {
        if self.number == 1 {
            FileHeader::HEADER_SIZE
        } else {
            0
        }
    }

    /// Classifies the page-type byte, or `None` if it is not a b-tree page
    pub fn page_type(&self) -> Option<PageType> {
        self.data.get(self.header_offset()).copied().and_then(PageType::from_byte)
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16, PageError> {
        let bytes = self.slice(offset, 2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, PageError> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Bounds-checked view into the page
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], PageError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                self.corrupt(format!("{} bytes at offset {} run past the page", len, offset))
            })
    }

    /// Parses the b-tree page header, failing if the page is not a b-tree page
    pub fn btree_header(&self) -> Result<BTreePageHeader, PageError> {
        let offset = self.header_offset();
        let type_byte = self.slice(offset, 1)?[0];
        let page_type = PageType::from_byte(type_byte)
            .ok_or_else(|| self.corrupt(format!("invalid b-tree page type {}", type_byte)))?;

        let right_most_pointer = if page_type.is_leaf() {
            None
        } else {
            Some(self.read_u32(offset + 8)?)
        };

        let content_offset = match self.read_u16(offset + 5)? {
            0 => 65536,
            n => n as u32,
        };

        Ok(BTreePageHeader {
            page_type,
            first_freeblock: self.read_u16(offset + 1)?,
            num_cells: self.read_u16(offset + 3)?,
            content_offset,
            fragmented_free_bytes: self.slice(offset + 7, 1)?[0],
            right_most_pointer,
        })
    }

    /// Reads the cell pointer array that follows the page header
    pub fn cell_pointers(&self, header: &BTreePageHeader) -> Result<Vec<usize>, PageError> {
        let array_start = self.header_offset() + header.page_type.header_size();

        (0..header.num_cells as usize)
            .map(|i| {
                let ptr = self.read_u16(array_start + i * 2)? as usize;
                if ptr < array_start || ptr >= self.data.len() {
                    return Err(self.corrupt(format!("cell pointer {} outside the cell area", ptr)));
                }
                Ok(ptr)
            })
            .collect()
    }

    /// Offset of the first byte past the cell pointer array
    pub fn cell_array_end(&self, header: &BTreePageHeader) -> usize {
        self.header_offset() + header.page_type.header_size() + header.num_cells as usize * 2
    }

    pub fn corrupt(&self, reason: String) -> PageError {
        PageError::CorruptPage {
            page: self.number,
            reason,
        }
    }
}

/// Reads whole pages out of a byte source
pub struct PageReader<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    page_size: u32,
    page_count: u32,
}

impl<'a, S: ByteSource + ?Sized> PageReader<'a, S> {
    pub fn new(source: &'a S, page_size: u32, page_count: u32) -> Self {
        Self {
            source,
            page_size,
            page_count,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Reads the 1-based page `page_num`
    pub fn read(&self, page_num: u32) -> Result<Page, PageError> {
        if page_num < 1 || page_num > self.page_count {
            return Err(PageError::OutOfRange {
                page: page_num,
                page_count: self.page_count,
            });
        }

        let offset = (page_num - 1) as u64 * self.page_size as u64;
        trace!("Reading page {} at offset {}", page_num, offset);
        let data = self.source.read_at(offset, self.page_size as usize)?;
        Ok(Page::new(page_num, data))
    }
}

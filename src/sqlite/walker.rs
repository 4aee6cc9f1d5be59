//! B-tree traversal and page accounting.
//!
//! A walk visits every page reachable from one root: interior pages, leaf
//! pages and the overflow chains hanging off oversized cells. Pages are
//! visited top-down (a page before its children, overflow chains before
//! child trees) using an explicit stack, and each page is counted exactly
//! once. A page reached twice within one walk is reported as corruption
//! rather than double-counted.

use crate::sqlite::btree::{BTreePageHeader, BtreeKind, Page, PageReader, PageType};
use crate::sqlite::core::varint::read_varint;
use crate::sqlite::error::{PageError, TraversalError};
use crate::sqlite::source::ByteSource;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Smallest usable page size SQLite accepts
pub const MIN_USABLE_SIZE: u32 = 480;

/// Pages and bytes consumed by one b-tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUsage {
    pub kind: BtreeKind,
    pub leaf_pages: u32,
    pub interior_pages: u32,
    pub overflow_pages: u32,
    /// Cells on leaf pages
    pub leaf_entries: u64,
    /// Cells on interior pages
    pub interior_entries: u64,
    /// Payload bytes of every cell, including the parts stored on overflow pages
    pub payload: u64,
    /// Payload bytes stored on overflow pages
    pub overflow_payload: u64,
    /// Cells whose payload spills onto overflow pages
    pub overflow_cells: u64,
    /// Largest single cell payload
    pub max_payload: u64,
    pub leaf_unused: u64,
    pub interior_unused: u64,
    pub overflow_unused: u64,
    /// Leaf pages that do not directly follow the page visited before them
    pub gap_count: u32,
    /// Number of levels from the root to the leaves
    pub depth: u32,
}

impl PageUsage {
    pub fn new(kind: BtreeKind) -> Self {
        Self {
            kind,
            leaf_pages: 0,
            interior_pages: 0,
            overflow_pages: 0,
            leaf_entries: 0,
            interior_entries: 0,
            payload: 0,
            overflow_payload: 0,
            overflow_cells: 0,
            max_payload: 0,
            leaf_unused: 0,
            interior_unused: 0,
            overflow_unused: 0,
            gap_count: 0,
            depth: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.leaf_pages + self.interior_pages + self.overflow_pages
    }

    /// Number of entries stored in the b-tree. Interior cells of a table
    /// b-tree only hold routing keys, so only leaf cells count there.
    pub fn entries(&self) -> u64 {
        match self.kind {
            BtreeKind::Table => self.leaf_entries,
            BtreeKind::Index => self.leaf_entries + self.interior_entries,
        }
    }

    pub fn total_unused(&self) -> u64 {
        self.leaf_unused + self.interior_unused + self.overflow_unused
    }
}

/// A leaf cell handed to a [`BtreeWalker::walk_cells`] visitor, with any
/// overflow content already re-assembled
#[derive(Debug)]
pub struct Cell<'p> {
    /// Rowid of table b-tree cells; `None` for index cells
    pub rowid: Option<i64>,
    pub payload: &'p [u8],
}

/// Largest payload stored entirely on the b-tree page
pub fn max_local(page_type: PageType, usable_size: usize) -> usize {
    match page_type {
        PageType::LeafTable => usable_size - 35,
        _ => (usable_size - 12) * 64 / 255 - 23,
    }
}

/// Minimum payload kept on the b-tree page once a cell overflows
pub fn min_local(usable_size: usize) -> usize {
    (usable_size - 12) * 32 / 255 - 23
}

/// Number of payload bytes stored on the b-tree page itself
pub fn local_payload_size(
    payload: u64,
    max_local: usize,
    min_local: usize,
    usable_size: usize,
) -> usize {
    if payload <= max_local as u64 {
        return payload as usize;
    }
    let surplus = min_local as u64 + (payload - min_local as u64) % (usable_size as u64 - 4);
    if surplus <= max_local as u64 {
        surplus as usize
    } else {
        min_local
    }
}

/// Decoded layout of one b-tree cell
#[derive(Debug)]
struct CellInfo {
    left_child: Option<u32>,
    rowid: Option<i64>,
    payload_size: Option<u64>,
    payload_offset: usize,
    local_size: usize,
    first_overflow: Option<u32>,
}

/// Mutable state of a single walk
struct Traversal {
    usage: PageUsage,
    visited: HashSet<u32>,
    previous: Option<u32>,
}

impl Traversal {
    fn new(kind: BtreeKind) -> Self {
        Self {
            usage: PageUsage::new(kind),
            visited: HashSet::new(),
            previous: None,
        }
    }

    /// Marks a page as visited, failing if this walk has already seen it
    fn claim(&mut self, page: u32) -> Result<(), TraversalError> {
        if !self.visited.insert(page) {
            return Err(TraversalError::DuplicatePageVisit { page });
        }
        Ok(())
    }

    fn record_order(&mut self, page: u32, is_leaf: bool) {
        if is_leaf && matches!(self.previous, Some(prev) if page != prev + 1) {
            self.usage.gap_count += 1;
        }
        self.previous = Some(page);
    }
}

/// Walks b-trees page by page, counting what each one occupies
pub struct BtreeWalker<'r, 'a, S: ByteSource + ?Sized> {
    reader: &'r PageReader<'a, S>,
    usable_size: usize,
}

impl<'r, 'a, S: ByteSource + ?Sized> BtreeWalker<'r, 'a, S> {
    /// `usable_size` is the page size minus the reserved space, and must be
    /// at least [`MIN_USABLE_SIZE`]
    pub fn new(reader: &'r PageReader<'a, S>, usable_size: u32) -> Self {
        Self {
            reader,
            usable_size: usable_size.max(MIN_USABLE_SIZE) as usize,
        }
    }

    /// Counts every page of the b-tree rooted at `root`
    pub fn walk(&self, root: u32, kind: BtreeKind) -> Result<PageUsage, TraversalError> {
        self.walk_inner(root, kind, false, |_| Ok(()))
    }

    /// Like [`BtreeWalker::walk`], additionally handing every leaf cell's
    /// complete payload to `visitor`
    pub fn walk_cells<F>(
        &self,
        root: u32,
        kind: BtreeKind,
        visitor: F,
    ) -> Result<PageUsage, TraversalError>
    where
        F: FnMut(&Cell) -> Result<(), TraversalError>,
    {
        self.walk_inner(root, kind, true, visitor)
    }

    fn walk_inner<F>(
        &self,
        root: u32,
        kind: BtreeKind,
        collect: bool,
        mut visitor: F,
    ) -> Result<PageUsage, TraversalError>
    where
        F: FnMut(&Cell) -> Result<(), TraversalError>,
    {
        debug!("Walking {:?} b-tree rooted at page {}", kind, root);
        let mut state = Traversal::new(kind);
        let mut stack = vec![(root, 1u32)];

        while let Some((page_num, depth)) = stack.pop() {
            state.claim(page_num)?;
            let page = self.reader.read(page_num)?;
            let header = page.btree_header()?;
            if header.page_type.btree_kind() != kind {
                return Err(page
                    .corrupt(format!("{:?} page inside a {:?} b-tree", header.page_type, kind))
                    .into());
            }

            let is_leaf = header.page_type.is_leaf();
            state.record_order(page_num, is_leaf);
            trace!("Page {}: {:?}, {} cells", page_num, header.page_type, header.num_cells);

            let unused = self.unused_bytes(&page, &header)?;
            let mut children = Vec::with_capacity(header.num_cells as usize + 1);

            for ptr in page.cell_pointers(&header)? {
                let cell = self.parse_cell(&page, header.page_type, ptr)?;
                children.extend(cell.left_child);

                let payload_size = match cell.payload_size {
                    Some(size) => size,
                    None => continue,
                };
                state.usage.payload += payload_size;
                state.usage.max_payload = state.usage.max_payload.max(payload_size);

                let mut assembled = if collect && is_leaf {
                    let mut buf = Vec::with_capacity(cell.local_size);
                    buf.extend_from_slice(page.slice(cell.payload_offset, cell.local_size)?);
                    Some(buf)
                } else {
                    None
                };

                if let Some(first) = cell.first_overflow {
                    let overflow_len = payload_size - cell.local_size as u64;
                    state.usage.overflow_cells += 1;
                    state.usage.overflow_payload += overflow_len;
                    self.follow_overflow(
                        &mut state,
                        page_num,
                        first,
                        overflow_len,
                        assembled.as_mut(),
                    )?;
                }

                if let Some(payload) = assembled.as_deref() {
                    visitor(&Cell {
                        rowid: cell.rowid,
                        payload,
                    })?;
                }
            }

            if is_leaf {
                state.usage.leaf_pages += 1;
                state.usage.leaf_entries += header.num_cells as u64;
                state.usage.leaf_unused += unused;
                state.usage.depth = state.usage.depth.max(depth);
            } else {
                state.usage.interior_pages += 1;
                state.usage.interior_entries += header.num_cells as u64;
                state.usage.interior_unused += unused;
                children.extend(header.right_most_pointer);
            }

            // Reversed so the left-most child is visited first.
            for child in children.into_iter().rev() {
                self.check_pointer(page_num, child)?;
                stack.push((child, depth + 1));
            }
        }

        debug!(
            "B-tree at page {}: {} interior, {} leaf, {} overflow pages",
            root, state.usage.interior_pages, state.usage.leaf_pages, state.usage.overflow_pages
        );
        Ok(state.usage)
    }

    fn check_pointer(&self, from: u32, to: u32) -> Result<(), TraversalError> {
        if to == 0 || to > self.reader.page_count() {
            return Err(TraversalError::DanglingPointer { from, to });
        }
        Ok(())
    }

    fn parse_cell(
        &self,
        page: &Page,
        page_type: PageType,
        offset: usize,
    ) -> Result<CellInfo, TraversalError> {
        let data = page.data();
        let mut pos = offset;

        let left_child = match page_type {
            PageType::InteriorTable | PageType::InteriorIndex => {
                let child = page.read_u32(pos)?;
                pos += 4;
                Some(child)
            }
            PageType::LeafTable | PageType::LeafIndex => None,
        };

        if page_type == PageType::InteriorTable {
            let (key, _) = read_varint(data, pos)?;
            return Ok(CellInfo {
                left_child,
                rowid: Some(key),
                payload_size: None,
                payload_offset: pos,
                local_size: 0,
                first_overflow: None,
            });
        }

        let (payload_size, consumed) = read_varint(data, pos)?;
        pos += consumed;
        let payload_size = u64::try_from(payload_size)
            .map_err(|_| page.corrupt(format!("negative payload size at offset {}", offset)))?;

        let rowid = if page_type == PageType::LeafTable {
            let (rowid, consumed) = read_varint(data, pos)?;
            pos += consumed;
            Some(rowid)
        } else {
            None
        };

        let local_size = local_payload_size(
            payload_size,
            max_local(page_type, self.usable_size),
            min_local(self.usable_size),
            self.usable_size,
        );

        let local_end = pos + local_size;
        let first_overflow = if (local_size as u64) < payload_size {
            Some(page.read_u32(local_end)?)
        } else {
            None
        };
        let cell_end = local_end + if first_overflow.is_some() { 4 } else { 0 };
        if cell_end > self.usable_size.min(data.len()) {
            return Err(page
                .corrupt(format!("cell at offset {} extends past the usable area", offset))
                .into());
        }

        Ok(CellInfo {
            left_child,
            rowid,
            payload_size: Some(payload_size),
            payload_offset: pos,
            local_size,
            first_overflow,
        })
    }

    /// Follows an overflow chain to its end, counting each page once
    fn follow_overflow(
        &self,
        state: &mut Traversal,
        from: u32,
        first: u32,
        overflow_len: u64,
        mut sink: Option<&mut Vec<u8>>,
    ) -> Result<(), TraversalError> {
        let capacity = (self.usable_size - 4) as u64;
        let expected = (overflow_len + capacity - 1) / capacity;

        let mut chain = HashSet::new();
        let mut remaining = overflow_len;
        let mut prev = from;
        let mut next = first;

        for i in 0..expected {
            if next == 0 {
                return Err(TraversalError::CorruptOverflowChain {
                    page: prev,
                    reason: format!("chain ends after {} of {} pages", i, expected),
                });
            }
            if !chain.insert(next) {
                return Err(TraversalError::CorruptOverflowChain {
                    page: next,
                    reason: format!("page {} links back into its own chain", prev),
                });
            }
            self.check_pointer(prev, next)?;
            state.claim(next)?;

            let page = self.reader.read(next)?;
            let on_page = remaining.min(capacity);
            if let Some(buf) = sink.as_deref_mut() {
                buf.extend_from_slice(page.slice(4, on_page as usize)?);
            }

            state.record_order(next, false);
            state.usage.overflow_pages += 1;
            state.usage.overflow_unused += capacity - on_page;
            remaining -= on_page;

            prev = next;
            next = page.read_u32(0)?;
        }

        if next != 0 {
            return Err(TraversalError::CorruptOverflowChain {
                page: prev,
                reason: format!("chain continues to page {} past the end of the payload", next),
            });
        }
        Ok(())
    }

    /// Bytes on a b-tree page holding neither headers nor cells: the gap
    /// between the cell pointer array and the content area, freeblocks and
    /// fragmented bytes
    fn unused_bytes(&self, page: &Page, header: &BTreePageHeader) -> Result<u64, PageError> {
        let array_end = page.cell_array_end(header);
        let content_start = (header.content_offset as usize).min(self.usable_size);
        if content_start < array_end {
            return Err(page.corrupt(format!(
                "cell content offset {} overlaps the cell pointer array",
                header.content_offset
            )));
        }

        let mut unused = (content_start - array_end) as u64 + header.fragmented_free_bytes as u64;

        let mut offset = header.first_freeblock as usize;
        while offset != 0 {
            if offset < array_end || offset + 4 > self.usable_size {
                return Err(
                    page.corrupt(format!("freeblock at offset {} is out of bounds", offset))
                );
            }
            let next = page.read_u16(offset)? as usize;
            let size = page.read_u16(offset + 2)? as usize;
            if next != 0 && next <= offset + size {
                return Err(page.corrupt(format!(
                    "freeblock list is not ascending at offset {}",
                    offset
                )));
            }
            unused += size as u64;
            offset = next;
        }

        Ok(unused)
    }
}

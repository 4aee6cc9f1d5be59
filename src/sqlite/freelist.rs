//! Freelist enumeration.
//!
//! The freelist is a chain of trunk pages starting at the page named in the
//! database header. Each trunk page holds:
//!
//! - Bytes 0-3: Next trunk page (0 ends the chain)
//! - Bytes 4-7: Number of leaf page numbers on this trunk
//! - Bytes 8..: Leaf page numbers, 4 bytes each
//!
//! Leaf pages carry no information and are counted without being read.

use crate::sqlite::btree::PageReader;
use crate::sqlite::error::{PageError, TraversalError};
use crate::sqlite::source::ByteSource;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreelistUsage {
    pub trunk_pages: u32,
    pub leaf_pages: u32,
}

impl FreelistUsage {
    pub fn total(&self) -> u32 {
        self.trunk_pages + self.leaf_pages
    }
}

/// Counts trunk and leaf pages of the freelist starting at `first_trunk`
pub fn walk_freelist<S: ByteSource + ?Sized>(
    reader: &PageReader<'_, S>,
    first_trunk: u32,
    usable_size: u32,
) -> Result<FreelistUsage, TraversalError> {
    let page_count = reader.page_count();
    let max_leaves = (usable_size / 4).saturating_sub(2);
    let mut usage = FreelistUsage::default();
    let mut visited = HashSet::new();

    let mut claim = |from: u32, page: u32| -> Result<(), TraversalError> {
        if page == 0 || page > page_count {
            return Err(TraversalError::DanglingPointer { from, to: page });
        }
        if !visited.insert(page) {
            return Err(TraversalError::DuplicatePageVisit { page });
        }
        Ok(())
    };

    let mut from = 0;
    let mut trunk = first_trunk;
    while trunk != 0 {
        claim(from, trunk)?;
        let page = reader.read(trunk)?;
        usage.trunk_pages += 1;

        let leaf_count = page.read_u32(4)?;
        if leaf_count > max_leaves {
            return Err(PageError::CorruptPage {
                page: trunk,
                reason: format!(
                    "freelist trunk lists {} leaves, at most {} fit",
                    leaf_count, max_leaves
                ),
            }
            .into());
        }

        for i in 0..leaf_count as usize {
            let leaf = page.read_u32(8 + i * 4)?;
            claim(trunk, leaf)?;
            usage.leaf_pages += 1;
        }

        from = trunk;
        trunk = page.read_u32(0)?;
    }

    debug!(
        "Freelist: {} trunk pages, {} leaf pages",
        usage.trunk_pages, usage.leaf_pages
    );
    Ok(usage)
}

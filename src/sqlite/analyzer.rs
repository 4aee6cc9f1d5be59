//! Storage analysis of a whole database file.
//!
//! The analysis reads the header, walks the schema table to learn which
//! b-trees exist, walks each of them and finally enumerates the freelist.
//! Errors in the header, the schema table or the freelist abort the
//! analysis. Errors inside an individual table or index are recorded on
//! that object and the remaining objects are still analyzed.

use crate::sqlite::btree::{BtreeKind, PageReader};
use crate::sqlite::core::header::{FileHeader, TextEncoding};
use crate::sqlite::core::record::Record;
use crate::sqlite::core::schema::{CatalogEntry, ObjectKind, SCHEMA_ROOT_PAGE, SCHEMA_TABLE_NAME};
use crate::sqlite::error::{AnalysisError, TraversalError};
use crate::sqlite::freelist::walk_freelist;
use crate::sqlite::report::{ObjectReport, Report};
use crate::sqlite::source::ByteSource;
use crate::sqlite::walker::{BtreeWalker, PageUsage, MIN_USABLE_SIZE};
use std::thread;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Number of threads walking table and index b-trees
    pub jobs: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

/// A b-tree scheduled for walking
struct WalkTarget<'c> {
    entry: &'c CatalogEntry,
    root: u32,
    kind: BtreeKind,
}

type WalkResult = Result<PageUsage, TraversalError>;

pub struct StorageAnalyzer<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    options: AnalyzerOptions,
}

impl<'a, S: ByteSource + ?Sized> StorageAnalyzer<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self::with_options(source, AnalyzerOptions::default())
    }

    pub fn with_options(source: &'a S, options: AnalyzerOptions) -> Self {
        Self { source, options }
    }

    /// Decodes the database header, rejecting files that are not SQLite databases
    pub fn read_header(&self) -> Result<FileHeader, AnalysisError> {
        let bytes = self.source.read_at(0, FileHeader::HEADER_SIZE)?;
        Ok(FileHeader::decode(&bytes)?)
    }

    /// Reads only the schema table
    pub fn catalog(&self) -> Result<Vec<CatalogEntry>, AnalysisError> {
        let header = self.read_header()?;
        let page_count = self.checked_page_count(&header)?;
        let reader = PageReader::new(self.source, header.page_size, page_count);
        let walker = BtreeWalker::new(&reader, header.usable_size());
        let (_, catalog) = read_catalog(&walker, header.encoding())?;
        Ok(catalog)
    }

    pub fn analyze(&self) -> Result<Report, AnalysisError> {
        let header = self.read_header()?;
        let page_count = self.checked_page_count(&header)?;
        info!(
            "Analyzing database: page size {}, {} pages",
            header.page_size, page_count
        );

        let reader = PageReader::new(self.source, header.page_size, page_count);
        let walker = BtreeWalker::new(&reader, header.usable_size());

        let (schema_usage, catalog) = read_catalog(&walker, header.encoding())?;
        info!("Schema table lists {} objects", catalog.len());

        let targets: Vec<WalkTarget> = catalog
            .iter()
            .filter_map(|entry| {
                Some(WalkTarget {
                    entry,
                    root: entry.root_page?,
                    kind: entry.btree_kind()?,
                })
            })
            .collect();
        let results = self.walk_targets(&walker, &targets);

        let mut objects = Vec::with_capacity(targets.len() + 1);
        objects.push(ObjectReport {
            name: SCHEMA_TABLE_NAME.to_string(),
            table_name: SCHEMA_TABLE_NAME.to_string(),
            kind: ObjectKind::Table,
            btree_kind: BtreeKind::Table,
            root_page: SCHEMA_ROOT_PAGE,
            usage: Ok(schema_usage),
        });
        for (target, usage) in targets.iter().zip(results) {
            if let Err(err) = &usage {
                warn!("Failed to analyze {} '{}': {}", target.entry.kind, target.entry.name, err);
            }
            objects.push(ObjectReport {
                name: target.entry.name.clone(),
                table_name: target.entry.table_name.clone(),
                kind: target.entry.kind,
                btree_kind: target.kind,
                root_page: target.root,
                usage,
            });
        }

        let freelist = walk_freelist(&reader, header.first_freelist_trunk, header.usable_size())
            .map_err(AnalysisError::Freelist)?;
        if freelist.total() != header.total_freelist_pages {
            warn!(
                "Header claims {} freelist pages, found {}",
                header.total_freelist_pages,
                freelist.total()
            );
        }

        let pointer_map_page_count = pointer_map_pages(&header, page_count);
        let lock_byte_page_count = lock_byte_pages(header.page_size, page_count);

        let mut report = Report {
            header,
            page_count,
            catalog,
            objects,
            freelist_page_count: freelist.total(),
            pointer_map_page_count,
            lock_byte_page_count,
            unaccounted_page_count: 0,
        };
        report.unaccounted_page_count = page_count as i64
            - report.analyzed_page_count() as i64
            - report.freelist_page_count as i64
            - report.pointer_map_page_count as i64
            - report.lock_byte_page_count as i64;

        if report.unaccounted_page_count != 0 {
            warn!("{} pages are unaccounted for", report.unaccounted_page_count);
        }
        Ok(report)
    }

    fn checked_page_count(&self, header: &FileHeader) -> Result<u32, AnalysisError> {
        if !header.page_size_is_valid() || header.usable_size() < MIN_USABLE_SIZE {
            return Err(AnalysisError::UnsupportedPageSize {
                page_size: header.page_size,
                usable_size: header.usable_size(),
            });
        }
        Ok(resolve_page_count(header, self.source.size()))
    }

    fn walk_targets(
        &self,
        walker: &BtreeWalker<'_, '_, S>,
        targets: &[WalkTarget<'_>],
    ) -> Vec<WalkResult> {
        let walk = |target: &WalkTarget<'_>| walker.walk(target.root, target.kind);

        let jobs = self.options.jobs.max(1);
        if jobs == 1 || targets.len() < 2 {
            return targets.iter().map(walk).collect();
        }

        let chunk_size = (targets.len() + jobs - 1) / jobs;
        debug!(
            "Walking {} b-trees on {} threads",
            targets.len(),
            (targets.len() + chunk_size - 1) / chunk_size
        );

        thread::scope(|scope| {
            let handles: Vec<_> = targets
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || chunk.iter().map(walk).collect::<Vec<_>>()))
                .collect();

            // Chunks are joined in order, so results line up with `targets`.
            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(results) => results,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// Walks the schema table, decoding every leaf cell into a catalog entry
fn read_catalog<S: ByteSource + ?Sized>(
    walker: &BtreeWalker<'_, '_, S>,
    encoding: TextEncoding,
) -> Result<(PageUsage, Vec<CatalogEntry>), AnalysisError> {
    debug!("Reading schema table as {}", encoding.name());
    let mut catalog = Vec::new();
    let usage = walker
        .walk_cells(SCHEMA_ROOT_PAGE, BtreeKind::Table, |cell| {
            let values = Record::parse(cell.payload, encoding)?;
            catalog.push(CatalogEntry::from_record(&values)?);
            Ok(())
        })
        .map_err(AnalysisError::Schema)?;
    Ok((usage, catalog))
}

/// The stored page count is used only while the header vouches for it;
/// otherwise the count is derived from the file size.
pub fn resolve_page_count(header: &FileHeader, file_size: u64) -> u32 {
    if header.page_count_is_trusted() {
        return header.database_size;
    }
    let computed = file_size / header.page_size as u64;
    debug!(
        "Stored page count {} not trusted, using {} from file size",
        header.database_size, computed
    );
    u32::try_from(computed).unwrap_or(u32::MAX)
}

/// Offset of the byte range SQLite uses for file locks. The page holding
/// it is never allocated.
pub const PENDING_BYTE: u64 = 0x4000_0000;

/// Page number of the lock-byte page
pub fn lock_byte_page(page_size: u32) -> u32 {
    (PENDING_BYTE / page_size as u64) as u32 + 1
}

/// 1 when the file is large enough to contain the lock-byte page
pub fn lock_byte_pages(page_size: u32, page_count: u32) -> u32 {
    u32::from(page_count >= lock_byte_page(page_size))
}

/// Number of auto-vacuum pointer-map pages. The first one is page 2, and
/// each is followed by the `usable_size / 5` pages it describes. A map page
/// that would land on the lock-byte page moves to the page after it.
pub fn pointer_map_pages(header: &FileHeader, page_count: u32) -> u32 {
    if !header.is_auto_vacuum() {
        return 0;
    }
    pointer_map_page_count(header.usable_size(), header.page_size, page_count)
}

fn pointer_map_page_count(usable_size: u32, page_size: u32, page_count: u32) -> u32 {
    if page_count < 2 {
        return 0;
    }
    let interval = usable_size / 5 + 1;
    let count = (page_count - 2) / interval + 1;

    let lock_page = lock_byte_page(page_size);
    let last = 2 + (count - 1) * interval;
    if last == lock_page && last == page_count {
        count - 1
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_byte_page_number() {
        assert_eq!(lock_byte_page(512), 2_097_153);
        assert_eq!(lock_byte_page(4096), 262_145);
        assert_eq!(lock_byte_page(65536), 16_385);
    }

    #[test]
    fn lock_byte_page_counts_once_reached() {
        assert_eq!(lock_byte_pages(65536, 16_384), 0);
        assert_eq!(lock_byte_pages(65536, 16_385), 1);
        assert_eq!(lock_byte_pages(65536, 16_870), 1);
        assert_eq!(lock_byte_pages(4096, 1_000), 0);
    }

    #[test]
    fn pointer_map_pages_repeat_every_interval() {
        // 512-byte pages: one map page per 103 pages, starting at page 2
        assert_eq!(pointer_map_page_count(512, 512, 1), 0);
        assert_eq!(pointer_map_page_count(512, 512, 2), 1);
        assert_eq!(pointer_map_page_count(512, 512, 104), 1);
        assert_eq!(pointer_map_page_count(512, 512, 105), 2);
    }

    #[test]
    fn pointer_map_page_skips_lock_byte_page() {
        // usable size 10 gives a map page every 3 pages: 2, 5, 8, ...
        // With 4096-byte pages the lock-byte page 262_145 is one of them,
        // so that map page moves to 262_146.
        let lock_page = lock_byte_page(4096);
        assert_eq!((lock_page - 2) % 3, 0);
        assert_eq!(pointer_map_page_count(10, 4096, lock_page - 1), 87_381);
        assert_eq!(pointer_map_page_count(10, 4096, lock_page), 87_381);
        assert_eq!(pointer_map_page_count(10, 4096, lock_page + 1), 87_382);
    }
}

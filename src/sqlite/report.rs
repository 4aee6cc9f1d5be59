//! Analysis results and the storage metrics derived from them.

use crate::sqlite::btree::BtreeKind;
use crate::sqlite::core::header::FileHeader;
use crate::sqlite::core::schema::{CatalogEntry, ObjectKind, SCHEMA_TABLE_NAME};
use crate::sqlite::error::TraversalError;
use crate::sqlite::walker::PageUsage;
use itertools::Itertools;
use std::fmt;

/// Name prefix SQLite gives to indices backing constraints
pub const AUTO_INDEX_PREFIX: &str = "sqlite_autoindex_";

/// Outcome of walking one table or index
#[derive(Debug)]
pub struct ObjectReport {
    pub name: String,
    /// Table the object belongs to; equal to `name` for tables
    pub table_name: String,
    pub kind: ObjectKind,
    pub btree_kind: BtreeKind,
    pub root_page: u32,
    pub usage: Result<PageUsage, TraversalError>,
}

impl ObjectReport {
    pub fn is_index(&self) -> bool {
        self.kind == ObjectKind::Index
    }

    /// Index created implicitly for a UNIQUE or PRIMARY KEY constraint
    pub fn is_auto_index(&self) -> bool {
        self.is_index() && self.name.starts_with(AUTO_INDEX_PREFIX)
    }

    pub fn page_usage(&self) -> Option<&PageUsage> {
        self.usage.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TraversalError> {
        self.usage.as_ref().err()
    }
}

/// Page accounting for a whole database file
#[derive(Debug)]
pub struct Report {
    pub header: FileHeader,
    /// Page count actually used for the analysis
    pub page_count: u32,
    /// Every schema row, views and triggers included
    pub catalog: Vec<CatalogEntry>,
    /// One entry per b-tree in catalog order, `sqlite_schema` first
    pub objects: Vec<ObjectReport>,
    pub freelist_page_count: u32,
    pub pointer_map_page_count: u32,
    /// 1 when the file reaches the never-allocated lock-byte page
    pub lock_byte_page_count: u32,
    /// Pages owned by nothing the analysis found; negative if pages were
    /// claimed by more than one object
    pub unaccounted_page_count: i64,
}

impl Report {
    pub fn object(&self, name: &str) -> Option<&ObjectReport> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn usage(&self, name: &str) -> Option<&PageUsage> {
        self.object(name).and_then(ObjectReport::page_usage)
    }

    /// Tables listed in the schema, not counting `sqlite_schema` itself
    pub fn table_count(&self) -> usize {
        self.objects
            .iter()
            .filter(|o| !o.is_index() && o.name != SCHEMA_TABLE_NAME)
            .count()
    }

    /// Automatic and explicitly created indices
    pub fn index_counts(&self) -> (usize, usize) {
        let (auto, manual): (Vec<_>, Vec<_>) = self
            .objects
            .iter()
            .filter(|o| o.is_index())
            .partition(|o| o.is_auto_index());
        (auto.len(), manual.len())
    }

    pub fn failed_objects(&self) -> impl Iterator<Item = &ObjectReport> {
        self.objects.iter().filter(|o| o.usage.is_err())
    }

    /// Pages attributed to b-trees, the schema table counted once
    pub fn analyzed_page_count(&self) -> u64 {
        self.objects
            .iter()
            .filter_map(ObjectReport::page_usage)
            .map(|u| u.total() as u64)
            .sum()
    }

    /// Pages used by a table together with all of its indices
    pub fn table_page_count(&self, table: &str) -> u32 {
        self.objects
            .iter()
            .filter(|o| o.table_name == table)
            .filter_map(ObjectReport::page_usage)
            .map(PageUsage::total)
            .sum()
    }

    /// Metrics for a single table or index
    pub fn object_metrics(&self, name: &str) -> Option<StorageMetrics> {
        self.usage(name).map(|u| self.metrics_for(std::iter::once(u)))
    }

    /// Metrics for a table, optionally folding in its indices
    pub fn table_metrics(&self, table: &str, exclude_indices: bool) -> StorageMetrics {
        self.metrics_for(
            self.objects
                .iter()
                .filter(|o| {
                    if exclude_indices {
                        o.name == table
                    } else {
                        o.table_name == table
                    }
                })
                .filter_map(ObjectReport::page_usage),
        )
    }

    /// Metrics across the whole file, optionally leaving out indices
    pub fn global_metrics(&self, exclude_indices: bool) -> StorageMetrics {
        self.metrics_for(
            self.objects
                .iter()
                .filter(|o| !(exclude_indices && o.is_index()))
                .filter_map(ObjectReport::page_usage),
        )
    }

    fn metrics_for<'u>(&self, usages: impl Iterator<Item = &'u PageUsage>) -> StorageMetrics {
        StorageMetrics::from_usages(usages, self.header.page_size, self.page_count)
    }
}

/// Aggregated storage figures for one or more b-trees
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageMetrics {
    pub object_count: u32,
    pub entries: u64,
    pub payload: u64,
    pub overflow_payload: u64,
    pub max_payload: u64,
    pub overflow_cells: u64,
    pub leaf_pages: u32,
    pub interior_pages: u32,
    pub overflow_pages: u32,
    pub leaf_unused: u64,
    pub interior_unused: u64,
    pub overflow_unused: u64,
    pub gap_count: u32,
    pub depth: u32,
    pub page_size: u32,
    pub file_page_count: u32,
}

impl StorageMetrics {
    pub fn from_usages<'u>(
        usages: impl Iterator<Item = &'u PageUsage>,
        page_size: u32,
        file_page_count: u32,
    ) -> Self {
        usages.fold(
            StorageMetrics {
                page_size,
                file_page_count,
                ..Default::default()
            },
            |mut m, u| {
                m.object_count += 1;
                m.entries += u.entries();
                m.payload += u.payload;
                m.overflow_payload += u.overflow_payload;
                m.max_payload = m.max_payload.max(u.max_payload);
                m.overflow_cells += u.overflow_cells;
                m.leaf_pages += u.leaf_pages;
                m.interior_pages += u.interior_pages;
                m.overflow_pages += u.overflow_pages;
                m.leaf_unused += u.leaf_unused;
                m.interior_unused += u.interior_unused;
                m.overflow_unused += u.overflow_unused;
                m.gap_count += u.gap_count;
                m.depth = m.depth.max(u.depth);
                m
            },
        )
    }

    pub fn total_pages(&self) -> u32 {
        self.leaf_pages + self.interior_pages + self.overflow_pages
    }

    pub fn total_pages_percent(&self) -> f64 {
        percentage(self.total_pages() as f64, self.file_page_count as f64)
    }

    /// Bytes consumed on disk
    pub fn storage(&self) -> u64 {
        self.total_pages() as u64 * self.page_size as u64
    }

    pub fn payload_percent(&self) -> f64 {
        percentage(self.payload as f64, self.storage() as f64)
    }

    pub fn total_unused(&self) -> u64 {
        self.leaf_unused + self.interior_unused + self.overflow_unused
    }

    pub fn total_unused_percent(&self) -> f64 {
        percentage(self.total_unused() as f64, self.storage() as f64)
    }

    /// Bytes spent on page headers, cell pointers and cell framing
    pub fn total_metadata(&self) -> i64 {
        self.storage() as i64 - self.payload as i64 - self.total_unused() as i64
            + 4 * (self.overflow_pages as i64 - self.overflow_cells as i64)
    }

    pub fn metadata_percent(&self) -> f64 {
        percentage(self.total_metadata() as f64, self.storage() as f64)
    }

    pub fn average_payload(&self) -> f64 {
        average(self.payload as f64, self.entries)
    }

    pub fn average_unused(&self) -> f64 {
        average(self.total_unused() as f64, self.entries)
    }

    pub fn average_metadata(&self) -> f64 {
        average(self.total_metadata() as f64, self.entries)
    }

    /// Share of entries that spill onto overflow pages
    pub fn overflow_percent(&self) -> f64 {
        percentage(self.overflow_cells as f64, self.entries as f64)
    }

    /// Share of leaf pages not stored right after their predecessor
    pub fn fragmentation(&self) -> f64 {
        percentage(self.gap_count as f64, self.total_pages().saturating_sub(1) as f64)
    }

    pub fn leaf_unused_percent(&self) -> f64 {
        percentage(self.leaf_unused as f64, self.leaf_pages as f64 * self.page_size as f64)
    }

    pub fn interior_unused_percent(&self) -> f64 {
        percentage(self.interior_unused as f64, self.interior_pages as f64 * self.page_size as f64)
    }

    pub fn overflow_unused_percent(&self) -> f64 {
        percentage(self.overflow_unused as f64, self.overflow_pages as f64 * self.page_size as f64)
    }
}

fn percentage(value: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        100.0 * value / total
    }
}

fn average(value: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        value / count as f64
    }
}

impl fmt::Display for StorageMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  Pages used: {} ({:.1}% of file)",
            self.total_pages(),
            self.total_pages_percent()
        )?;
        writeln!(
            f,
            "  Interior / leaf / overflow pages: {} / {} / {}",
            self.interior_pages, self.leaf_pages, self.overflow_pages
        )?;
        writeln!(f, "  Entries: {}", self.entries)?;
        writeln!(f, "  Bytes of storage: {}", self.storage())?;
        writeln!(
            f,
            "  Bytes of payload: {} ({:.1}%)",
            self.payload,
            self.payload_percent()
        )?;
        writeln!(
            f,
            "  Bytes of metadata: {} ({:.1}%)",
            self.total_metadata(),
            self.metadata_percent()
        )?;
        writeln!(
            f,
            "  Unused bytes: {} ({:.1}%)",
            self.total_unused(),
            self.total_unused_percent()
        )?;
        writeln!(f, "  Average payload per entry: {:.2}", self.average_payload())?;
        writeln!(f, "  Maximum payload per entry: {}", self.max_payload)?;
        writeln!(
            f,
            "  Entries using overflow: {} ({:.1}%)",
            self.overflow_cells,
            self.overflow_percent()
        )?;
        writeln!(f, "  B-tree depth: {}", self.depth)?;
        write!(f, "  Fragmentation: {:.1}%", self.fragmentation())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Page size: {}", self.header.page_size)?;
        writeln!(f, "Pages in file: {}", self.page_count)?;
        writeln!(f, "Pages analyzed: {}", self.analyzed_page_count())?;
        writeln!(f, "Freelist pages: {}", self.freelist_page_count)?;
        writeln!(f, "Pointer-map pages: {}", self.pointer_map_page_count)?;
        writeln!(f, "Lock-byte pages: {}", self.lock_byte_page_count)?;
        writeln!(f, "Unaccounted pages: {}", self.unaccounted_page_count)?;

        let (auto_indices, manual_indices) = self.index_counts();
        writeln!(
            f,
            "Tables: {}, indices: {} ({} automatic, {} manual)",
            self.table_count(),
            auto_indices + manual_indices,
            auto_indices,
            manual_indices
        )?;

        let failed = self.failed_objects().map(|o| o.name.as_str()).join(", ");
        if !failed.is_empty() {
            writeln!(f, "Objects that could not be analyzed: {}", failed)?;
        }

        writeln!(f)?;
        writeln!(f, "*** All tables and indices")?;
        writeln!(f, "{}", self.global_metrics(false))?;

        for object in &self.objects {
            writeln!(f)?;
            let label = if object.is_index() {
                format!("*** Index {} of table {}", object.name, object.table_name)
            } else {
                format!("*** Table {}", object.name)
            };
            writeln!(f, "{} (root page {})", label, object.root_page)?;
            match &object.usage {
                Ok(usage) => writeln!(f, "{}", self.metrics_for(std::iter::once(usage)))?,
                Err(err) => writeln!(f, "  Error ({}): {}", err.kind(), err)?,
            }
        }
        Ok(())
    }
}

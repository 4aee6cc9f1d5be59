//! Storage analysis for SQLite database files.
//!
//! Reads the database header and walks every table and index b-tree
//! directly from the file, reporting how many pages each object occupies.

pub mod sqlite;

pub use sqlite::analyzer::{AnalyzerOptions, StorageAnalyzer};
pub use sqlite::core::header::FileHeader;
pub use sqlite::report::Report;
pub use sqlite::source::{ByteSource, FileSource, MemorySource};

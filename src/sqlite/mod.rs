//! SQLite File Format Implementation
//!
//! This module reads SQLite database files according to the SQLite file
//! format specification, without going through the SQLite library, and
//! reports how the pages of a file are used.
//!
//! # SQLite File Structure
//!
//! A SQLite database file consists of one or more pages of equal size. The
//! first page contains:
//!
//! - Database header (100 bytes), see [`core::header`]
//! - Root page of the `sqlite_schema` table
//!
//! Every other page is one of:
//!
//! - A b-tree page (interior or leaf) of a table or index
//! - An overflow page holding the tail of an oversized cell payload
//! - A freelist trunk or leaf page
//! - A pointer-map page, in auto-vacuum databases
//!
//! ## B-tree Page Structure
//!
//! Each b-tree page contains:
//!
//! - Page header (8 bytes on leaves, 12 on interior pages)
//! - Cell pointer array
//! - Unallocated space
//! - Cell content area
//! - Reserved region
//!
//! ### Cell Formats
//!
//! - Table leaf: payload length (varint), rowid (varint), payload, first overflow page
//! - Table interior: left child page (4 bytes), rowid (varint)
//! - Index leaf: payload length (varint), payload, first overflow page
//! - Index interior: left child page (4 bytes), payload length (varint),
//!   payload, first overflow page
//!
//! The first overflow page number is only present when the payload does not
//! fit on the page.

pub mod analyzer;
pub mod btree;
pub mod core;
pub mod error;
pub mod freelist;
pub mod report;
pub mod source;
pub mod walker;

//! Decoders for the fixed-format structures of a database file.

pub mod header;
pub mod record;
pub mod schema;
pub mod varint;

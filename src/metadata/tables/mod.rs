//! Metadata tables (ECMA-335 II.22 and II.24.2.6).
//!
//! The tables stream is decoded into [`MetadataTables`], a row-per-`Vec<u32>` model that
//! can be edited freely. [`columns`] describes the layout of every table, [`TableInfo`]
//! derives the on-disk width of every column from row counts and heap sizes.

mod codedindex;
mod schema;
mod tableid;
mod tableinfo;
mod tablesheader;

pub use codedindex::{CodedIndexType, CODED_INDEX_COUNT};
pub use schema::{col, columns, sort_key, ColumnKind};
pub use tableid::{TableId, TABLE_COUNT};
pub use tableinfo::{
    TableInfo, HEAP_EXTRA_DATA, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS,
};
pub use tablesheader::{MetadataTables, Row};

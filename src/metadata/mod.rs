//! ECMA-335 metadata structures.
//!
//! Everything needed to read, edit and write back the metadata of a .NET module: the CLI
//! header, the metadata root, the heaps, the tables stream, signature blobs, method body
//! headers and custom attribute values.
//!
//! # Key Components
//!
//! - [`cor20header`] - The CLI header that locates the metadata
//! - [`root`] - The metadata root and its stream directory
//! - [`streams`] - The `#Strings` and `#Blob` heaps
//! - [`tables`] - The tables stream, decoded into editable rows
//! - [`signatures`] - Signature parsing, encoding and token rewriting
//! - [`method`] - Method body headers, exception clauses and attribute flags
//! - [`token`] - Metadata table row references

/// Implementation of the Header of CIL
pub mod cor20header;
/// Decoding of custom attribute value blobs
pub mod customattributes;
/// Method bodies and attribute flags
pub mod method;
/// The metadata root
pub mod root;
/// Signature blobs
pub mod signatures;
/// The metadata heaps
pub mod streams;
/// The metadata tables
pub mod tables;
/// Metadata tokens
pub mod token;

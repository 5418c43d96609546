//! Metadata streams: the heaps and the stream directory entries.

mod blob;
mod streamheader;
mod strings;

pub use blob::Blob;
pub use streamheader::StreamHeader;
pub use strings::Strings;

//! Custom attribute value blobs (ECMA-335 II.23.3).
//!
//! Only the shape the export marker uses is decoded: the prolog followed by a single fixed
//! `int32` argument (an enum value). Named arguments, if any, are ignored.

use crate::{file::parser::Parser, Result};

/// The leading `u16` of every custom attribute value blob
pub const CUSTOM_ATTRIBUTE_PROLOG: u16 = 0x0001;

/// Decode a custom attribute value whose constructor takes exactly one `int32` (or an enum
/// backed by `int32`).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a wrong prolog and [`crate::Error::OutOfBounds`]
/// for a blob too short to hold the argument.
///
/// # Examples
///
/// ```rust
/// use rvexport::metadata::customattributes::parse_int32_argument;
///
/// assert_eq!(parse_int32_argument(&[0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00])?, 2);
/// # Ok::<(), rvexport::Error>(())
/// ```
pub fn parse_int32_argument(blob: &[u8]) -> Result<i32> {
    let mut parser = Parser::new(blob);

    let prolog = parser.read_le::<u16>()?;
    if prolog != CUSTOM_ATTRIBUTE_PROLOG {
        return Err(malformed_error!(
            "Invalid custom attribute prolog - expected 0x0001, got 0x{:04X}",
            prolog
        ));
    }

    parser.read_le::<i32>()
}

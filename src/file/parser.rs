//! Cursor-based reader for metadata blobs, signatures and method bodies.
//!
//! Signatures and custom attribute values use the ECMA-335 compressed integer encoding
//! (II.23.2). [`Parser`] wraps a byte slice with a position and offers the primitives needed
//! to walk those structures without copying.

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::{tables::TableId, token::Token},
    Error::OutOfBounds,
    Result,
};

/// A forward-only reader over a byte slice.
///
/// # Examples
///
/// ```rust,ignore
/// let mut parser = Parser::new(&[0x82, 0x10, 0x05]);
/// assert_eq!(parser.read_compressed_uint()?, 0x0210);
/// assert_eq!(parser.read_le::<u8>()?, 5);
/// ```
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the cursor to an absolute position (the end of the data is a valid position).
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(OutOfBounds),
        }
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data.get(self.position).copied().ok_or(OutOfBounds)
    }

    /// Read a little-endian value.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read `len` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..self.position])
    }

    /// Read a compressed unsigned integer (ECMA-335 II.23.2).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid leading byte and
    /// [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a `TypeDefOrRefOrSpecEncoded` token (ECMA-335 II.23.2.8).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid table tag.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table = match compressed_token & 0x3 {
            0x0 => TableId::TypeDef,
            0x1 => TableId::TypeRef,
            0x2 => TableId::TypeSpec,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::from_parts(table, compressed_token >> 2))
    }
}

/// Encode an unsigned integer in the ECMA-335 compressed form.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` exceeds `0x1FFF_FFFF`.
pub fn encode_compressed_uint(value: u32, out: &mut Vec<u8>) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => out.extend_from_slice(&(0x8000 | value as u16).to_be_bytes()),
        0x4000..=0x1FFF_FFFF => out.extend_from_slice(&(0xC000_0000 | value).to_be_bytes()),
        _ => {
            return Err(malformed_error!(
                "Value too large for compressed encoding - {}",
                value
            ))
        }
    }

    Ok(())
}

/// Encode a `TypeDef`, `TypeRef` or `TypeSpec` token as `TypeDefOrRefOrSpecEncoded`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for tokens of any other table.
pub fn encode_compressed_token(token: Token, out: &mut Vec<u8>) -> Result<()> {
    let tag = match token.table_id() {
        Some(TableId::TypeDef) => 0,
        Some(TableId::TypeRef) => 1,
        Some(TableId::TypeSpec) => 2,
        _ => {
            return Err(malformed_error!(
                "Token {} can not be encoded as TypeDefOrRef",
                token
            ))
        }
    };

    encode_compressed_uint((token.row() << 2) | tag, out)
}

//! Metadata tokens (ECMA-335 II.22).
//!
//! A token packs a table identifier into the high byte and a 1-based row index into the
//! low 24 bits. IL instructions reference members and types through tokens, and this
//! crate uses them as stable handles while the tables are being edited.

use std::fmt;

use crate::metadata::tables::TableId;

/// A 32-bit metadata token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Wrap a raw token value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Build a token from a table and a 1-based row.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// The raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table, if the table byte names a metadata table.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_u8(self.table())
    }

    /// The 1-based row.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// `true` for the null token or a token with row 0.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row() == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

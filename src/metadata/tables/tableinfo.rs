use strum::IntoEnumIterator;

use crate::metadata::tables::{
    columns, CodedIndexType, ColumnKind, TableId, CODED_INDEX_COUNT, TABLE_COUNT,
};

/// Heap size flag: `#Strings` offsets are 4 bytes wide
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap size flag: `#GUID` indices are 4 bytes wide
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// Heap size flag: `#Blob` offsets are 4 bytes wide
pub const HEAP_LARGE_BLOB: u8 = 0x04;
/// Heap size flag: an extra 4 byte value follows the row counts
pub const HEAP_EXTRA_DATA: u8 = 0x40;

/// Index widths of a tables stream, derived from the row counts and heap size flags.
#[derive(Debug, Clone)]
pub struct TableInfo {
    rows: Vec<u32>,
    coded_indexes: Vec<u8>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

impl TableInfo {
    /// Compute index widths for the given row counts (indexed by table number) and heap
    /// size flags.
    #[must_use]
    pub fn new(row_counts: &[u32], heap_sizes: u8) -> Self {
        let mut rows = vec![0_u32; TABLE_COUNT];
        for (slot, count) in rows.iter_mut().zip(row_counts) {
            *slot = *count;
        }

        let mut table_info = TableInfo {
            rows,
            coded_indexes: vec![0; CODED_INDEX_COUNT],
            is_large_index_str: heap_sizes & HEAP_LARGE_STRINGS != 0,
            is_large_index_guid: heap_sizes & HEAP_LARGE_GUID != 0,
            is_large_index_blob: heap_sizes & HEAP_LARGE_BLOB != 0,
        };
        table_info.calculate_coded_index_bits();
        table_info
    }

    /// Bits needed to store the largest row number of `table`.
    #[must_use]
    pub fn table_index_bits(&self, table: TableId) -> u8 {
        let rows = self.rows[table as usize];
        if rows == 0 {
            1
        } else {
            (u32::BITS - rows.leading_zeros()) as u8
        }
    }

    /// `true` if simple indices into `table` are 4 bytes wide.
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows[table as usize] > u32::from(u16::MAX)
    }

    /// `true` if coded indices of the given kind are 4 bytes wide.
    #[must_use]
    pub fn is_large_coded(&self, coded_index_type: CodedIndexType) -> bool {
        self.coded_indexes[coded_index_type as usize] > 16
    }

    /// Width of a column of the given kind, in bytes.
    #[must_use]
    pub fn column_size(&self, kind: ColumnKind) -> usize {
        if self.is_large_column(kind) {
            4
        } else {
            2
        }
    }

    /// `true` if a column of the given kind is stored in 4 bytes.
    #[must_use]
    pub fn is_large_column(&self, kind: ColumnKind) -> bool {
        match kind {
            ColumnKind::U16 => false,
            ColumnKind::U32 => true,
            ColumnKind::Str => self.is_large_index_str,
            ColumnKind::Guid => self.is_large_index_guid,
            ColumnKind::Blob => self.is_large_index_blob,
            ColumnKind::Index(table) | ColumnKind::List(table) => self.is_large(table),
            ColumnKind::Coded(coded) => self.is_large_coded(coded),
        }
    }

    /// Size of one row of `table`, in bytes.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        columns(table)
            .iter()
            .map(|kind| self.column_size(*kind))
            .sum()
    }

    fn calculate_coded_index_bits(&mut self) {
        for coded_index in CodedIndexType::iter() {
            let max_bits = coded_index
                .tables()
                .iter()
                .map(|table| self.table_index_bits(*table))
                .max()
                .unwrap_or(1);
            self.coded_indexes[coded_index as usize] = max_bits + coded_index.tag_bits();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(TableId, u32)]) -> Vec<u32> {
        let mut rows = vec![0; TABLE_COUNT];
        for (table, count) in entries {
            rows[*table as usize] = *count;
        }
        rows
    }

    #[test]
    fn small() {
        let info = TableInfo::new(&counts(&[(TableId::TypeDef, 10)]), 0);
        assert_eq!(info.row_size(TableId::TypeRef), 6);
        assert_eq!(info.row_size(TableId::TypeDef), 14);
        assert_eq!(info.row_size(TableId::MethodDef), 14);
        assert_eq!(info.row_size(TableId::Assembly), 22);
        assert_eq!(info.row_size(TableId::AssemblyRef), 20);
    }

    #[test]
    fn large_heaps() {
        let info = TableInfo::new(&counts(&[]), HEAP_LARGE_STRINGS | HEAP_LARGE_BLOB);
        assert_eq!(info.row_size(TableId::MemberRef), 2 + 4 + 4);
        assert_eq!(info.row_size(TableId::Module), 2 + 4 + 2 * 3);
    }

    #[test]
    fn coded_threshold() {
        // HasCustomAttribute uses 5 tag bits, so 2^11 rows no longer fit into 16 bits
        let info = TableInfo::new(&counts(&[(TableId::MethodDef, 0x7FF)]), 0);
        assert!(!info.is_large_coded(CodedIndexType::HasCustomAttribute));

        let info = TableInfo::new(&counts(&[(TableId::MethodDef, 0x800)]), 0);
        assert!(info.is_large_coded(CodedIndexType::HasCustomAttribute));
        assert!(!info.is_large_coded(CodedIndexType::TypeDefOrRef));
        assert!(!info.is_large(TableId::MethodDef));

        let info = TableInfo::new(&counts(&[(TableId::Param, 0x1_0000)]), 0);
        assert!(info.is_large(TableId::Param));
        assert_eq!(info.column_size(ColumnKind::List(TableId::Param)), 4);
    }
}

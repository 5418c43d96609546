//! The compressed `#~` tables stream (ECMA-335 II.24.2.6).
//!
//! [`MetadataTables`] decodes every row of every table into plain `u32` columns so that rows
//! can be inserted, removed and renumbered freely, and encodes them again with index widths
//! recomputed from the final row counts and heap sizes.

use strum::IntoEnumIterator;

use crate::{
    file::{
        io::{push_le_dyn, read_le_at_dyn},
        parser::Parser,
    },
    metadata::tables::{columns, TableId, TableInfo, HEAP_EXTRA_DATA, TABLE_COUNT},
    Error::NotSupported,
    Result,
};

/// One decoded table row, one value per column.
pub type Row = Vec<u32>;

/// All rows of all tables of a tables stream.
#[derive(Debug, Clone)]
pub struct MetadataTables {
    /// Major version of the table schema, 2
    pub major_version: u8,
    /// Minor version of the table schema, 0
    pub minor_version: u8,
    /// Bit vector of sorted tables, as declared by the producer
    pub sorted: u64,
    tables: Vec<Vec<Row>>,
}

impl Default for MetadataTables {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataTables {
    /// An empty schema 2.0 tables stream.
    #[must_use]
    pub fn new() -> MetadataTables {
        MetadataTables {
            major_version: 2,
            minor_version: 0,
            sorted: 0x0000_1600_3301_FA00,
            tables: vec![Vec::new(); TABLE_COUNT],
        }
    }

    /// Decode a tables stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for pointer tables or tables outside the
    /// ECMA-335 partition II set, and [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read(data: &[u8]) -> Result<MetadataTables> {
        let mut parser = Parser::new(data);

        let _reserved = parser.read_le::<u32>()?;
        let major_version = parser.read_le::<u8>()?;
        let minor_version = parser.read_le::<u8>()?;
        let heap_sizes = parser.read_le::<u8>()?;
        let _reserved = parser.read_le::<u8>()?;
        let valid = parser.read_le::<u64>()?;
        let sorted = parser.read_le::<u64>()?;

        let known = TableId::iter().fold(0_u64, |mask, table| mask | table.bit());
        if valid & !known != 0 {
            log::warn!(
                "Tables stream contains unknown tables (valid mask 0x{:016X})",
                valid
            );
            return Err(NotSupported);
        }

        let mut row_counts = vec![0_u32; TABLE_COUNT];
        for table in TableId::iter() {
            if valid & table.bit() == 0 {
                continue;
            }

            if table.is_ptr_table() {
                log::warn!("Pointer table {:?} present, unoptimized metadata", table);
                return Err(NotSupported);
            }

            row_counts[table as usize] = parser.read_le::<u32>()?;
        }

        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            parser.advance_by(4)?;
        }

        let info = TableInfo::new(&row_counts, heap_sizes);
        let mut offset = parser.pos();

        let mut tables = vec![Vec::new(); TABLE_COUNT];
        for table in TableId::iter() {
            let count = row_counts[table as usize] as usize;
            if count == 0 {
                continue;
            }

            let schema = columns(table);
            if count.saturating_mul(info.row_size(table)) > data.len().saturating_sub(offset) {
                return Err(crate::Error::OutOfBounds);
            }

            let rows = &mut tables[table as usize];
            rows.reserve(count);
            for _ in 0..count {
                let mut row = Vec::with_capacity(schema.len());
                for kind in schema {
                    row.push(read_le_at_dyn(data, &mut offset, info.is_large_column(*kind))?);
                }
                rows.push(row);
            }
        }

        Ok(MetadataTables {
            major_version,
            minor_version,
            sorted,
            tables,
        })
    }

    /// Encode the tables stream, padded to a 4 byte boundary.
    ///
    /// `heap_sizes` carries the large-heap flags matching the heaps written alongside.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value does not fit into its column.
    pub fn write(&self, heap_sizes: u8) -> Result<Vec<u8>> {
        let heap_sizes = heap_sizes & !HEAP_EXTRA_DATA;
        let row_counts: Vec<u32> = self.tables.iter().map(|rows| rows.len() as u32).collect();
        let info = TableInfo::new(&row_counts, heap_sizes);
        let valid = self.valid();

        let mut out = Vec::new();
        out.extend_from_slice(&0_u32.to_le_bytes());
        out.push(self.major_version);
        out.push(self.minor_version);
        out.push(heap_sizes);
        out.push(1);
        out.extend_from_slice(&valid.to_le_bytes());
        out.extend_from_slice(&self.sorted.to_le_bytes());

        for table in TableId::iter() {
            if valid & table.bit() != 0 {
                out.extend_from_slice(&row_counts[table as usize].to_le_bytes());
            }
        }

        for table in TableId::iter() {
            let schema = columns(table);
            for row in &self.tables[table as usize] {
                for (kind, value) in schema.iter().zip(row) {
                    push_le_dyn(&mut out, *value, info.is_large_column(*kind))?;
                }
            }
        }

        while out.len() % 4 != 0 {
            out.push(0);
        }

        Ok(out)
    }

    /// Bit vector of tables holding at least one row.
    #[must_use]
    pub fn valid(&self) -> u64 {
        TableId::iter()
            .filter(|table| !self.tables[*table as usize].is_empty())
            .fold(0, |mask, table| mask | table.bit())
    }

    /// Row counts indexed by table number.
    #[must_use]
    pub fn row_counts(&self) -> Vec<u32> {
        self.tables.iter().map(|rows| rows.len() as u32).collect()
    }

    /// All rows of `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> &[Row] {
        &self.tables[table as usize]
    }

    /// All rows of `table`, mutable.
    pub fn rows_mut(&mut self, table: TableId) -> &mut Vec<Row> {
        &mut self.tables[table as usize]
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.tables[table as usize].len() as u32
    }

    /// The row `rid` (1-based) of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist.
    pub fn row(&self, table: TableId, rid: u32) -> Result<&Row> {
        rid.checked_sub(1)
            .and_then(|index| self.tables[table as usize].get(index as usize))
            .ok_or_else(|| malformed_error!("Row {} of {:?} does not exist", rid, table))
    }

    /// A single column of row `rid` (1-based) of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row or column does not exist.
    pub fn value(&self, table: TableId, rid: u32, column: usize) -> Result<u32> {
        self.row(table, rid)?
            .get(column)
            .copied()
            .ok_or_else(|| malformed_error!("Column {} of {:?} does not exist", column, table))
    }

    /// Overwrite a single column of row `rid` (1-based) of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row or column does not exist.
    pub fn set_value(&mut self, table: TableId, rid: u32, column: usize, value: u32) -> Result<()> {
        let slot = rid
            .checked_sub(1)
            .and_then(|index| self.tables[table as usize].get_mut(index as usize))
            .and_then(|row| row.get_mut(column))
            .ok_or_else(|| malformed_error!("Row {} of {:?} does not exist", rid, table))?;
        *slot = value;
        Ok(())
    }

    /// Half-open row range `[start, end)` of a list column owned by row `rid` of `table`.
    ///
    /// The end is the list start of the next row, or one past the last row of the target
    /// table for the last owner.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the owner row does not exist.
    pub fn list_range(
        &self,
        table: TableId,
        rid: u32,
        column: usize,
        target: TableId,
    ) -> Result<(u32, u32)> {
        let target_end = self.row_count(target) + 1;
        let start = self.value(table, rid, column)?.min(target_end);
        let end = if rid < self.row_count(table) {
            self.value(table, rid + 1, column)?.min(target_end)
        } else {
            target_end
        };

        Ok((start, end.max(start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::col;

    #[rustfmt::skip]
    fn crafted_stream() -> Vec<u8> {
        let mut data = vec![
            0x00, 0x00, 0x00, 0x00,
            0x02, 0x00,
            0x00,
            0x01,
        ];
        // Module, TypeDef, MethodDef
        let valid: u64 = 0x01 | 0x04 | 0x40;
        data.extend_from_slice(&valid.to_le_bytes());
        data.extend_from_slice(&0_u64.to_le_bytes());
        data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        // Module
        data.extend_from_slice(&[0x00, 0x00, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        // TypeDef x2
        data.extend_from_slice(&[
            0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00,
            0x01, 0x00, 0x10, 0x00, 0x20, 0x00, 0x00, 0x00, 0x05, 0x00, 0x01, 0x00, 0x01, 0x00,
        ]);
        // MethodDef
        data.extend_from_slice(&[
            0x50, 0x20, 0x00, 0x00, 0x00, 0x00, 0x96, 0x00, 0x30, 0x00, 0x01, 0x00, 0x01, 0x00,
        ]);
        data
    }

    #[test]
    fn crafted() {
        let tables = MetadataTables::read(&crafted_stream()).unwrap();

        assert_eq!(tables.major_version, 2);
        assert_eq!(tables.row_count(TableId::Module), 1);
        assert_eq!(tables.row_count(TableId::TypeDef), 2);
        assert_eq!(tables.row_count(TableId::MethodDef), 1);
        assert_eq!(tables.rows(TableId::Module)[0], vec![0, 0x0A, 1, 0, 0]);
        assert_eq!(
            tables.value(TableId::TypeDef, 2, col::typedef::NAME).unwrap(),
            0x20
        );
        assert_eq!(
            tables.value(TableId::MethodDef, 1, col::methoddef::RVA).unwrap(),
            0x2050
        );
        assert_eq!(
            tables.value(TableId::MethodDef, 1, col::methoddef::FLAGS).unwrap(),
            0x96
        );
        assert!(tables.row(TableId::MethodDef, 2).is_err());
        assert!(tables.row(TableId::MethodDef, 0).is_err());

        // <Module> owns no methods, the second type owns the only one
        assert_eq!(
            tables
                .list_range(TableId::TypeDef, 1, col::typedef::METHOD_LIST, TableId::MethodDef)
                .unwrap(),
            (1, 1)
        );
        assert_eq!(
            tables
                .list_range(TableId::TypeDef, 2, col::typedef::METHOD_LIST, TableId::MethodDef)
                .unwrap(),
            (1, 2)
        );
    }

    #[test]
    fn write_is_stable() {
        let data = crafted_stream();
        let tables = MetadataTables::read(&data).unwrap();
        let written = tables.write(0).unwrap();

        let mut expected = data.clone();
        while expected.len() % 4 != 0 {
            expected.push(0);
        }
        assert_eq!(written, expected);
    }

    #[test]
    fn ptr_table_rejected() {
        let mut data = crafted_stream();
        // set the MethodPtr bit
        data[8] |= 0x20;
        assert!(matches!(
            MetadataTables::read(&data),
            Err(crate::Error::NotSupported)
        ));
    }

    #[test]
    fn truncated() {
        let data = crafted_stream();
        assert!(MetadataTables::read(&data[..data.len() - 4]).is_err());
    }
}

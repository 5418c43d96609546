//! Row renumbering and its propagation through the whole image.
//!
//! Removing, inserting or reordering rows of one table changes the row numbers of other
//! rows of that table. A [`RowRemap`] records the old-to-new mapping for a single edit, and
//! [`CilAssembly::apply_remap`] rewrites the table and every reference to it:
//!
//! - simple index and coded index columns
//! - list columns, using the ownership rule described on [`RowRemap::map_list`]
//! - `TypeDefOrRef` tokens inside signature blobs (rewritten blobs are appended to `#Blob`)
//! - token operands of IL bodies, exception clause class tokens and local signature tokens
//! - the entry point token
//! - bodies of methods added in this session, which are also re-keyed
//!
//! A surviving reference to a removed row is an [`crate::Error::InvariantViolation`]: rows
//! must only be removed once nothing live points at them.

use std::collections::{BTreeSet, HashMap};

use strum::IntoEnumIterator;

use crate::{
    cilassembly::{references::SIGNATURE_COLUMNS, CilAssembly},
    disassembler::patch_tokens,
    file::io::{read_le, write_le_at},
    metadata::{
        method::MethodBody,
        signatures::rewrite_tokens,
        tables::{columns, sort_key, ColumnKind, Row, TableId},
        token::Token,
    },
    Error::InvariantViolation,
    Result,
};

/// Tables whose rows can be referenced by IL token operands.
const IL_TOKEN_TABLES: [TableId; 8] = [
    TableId::TypeDef,
    TableId::TypeRef,
    TableId::TypeSpec,
    TableId::Field,
    TableId::MethodDef,
    TableId::MemberRef,
    TableId::MethodSpec,
    TableId::StandAloneSig,
];

/// Tables whose rows can be referenced from within signature blobs.
const SIGNATURE_TOKEN_TABLES: [TableId; 3] = [TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec];

#[derive(Debug, Clone)]
enum RemapKind {
    Removal {
        // survivors[v - 1]: number of surviving rows with an old rid below v
        survivors: Vec<u32>,
    },
    Insertion {
        position: u32,
        count: u32,
        owner: Option<(TableId, u32)>,
    },
    Permutation,
}

/// Old-to-new row mapping of one table.
#[derive(Debug, Clone)]
pub struct RowRemap {
    table: TableId,
    // map[old - 1] = new row, 0 for removed rows
    map: Vec<u32>,
    new_count: u32,
    kind: RemapKind,
}

impl RowRemap {
    /// Remove `removed` rows from a table of `old_count` rows, keeping the order of the
    /// remaining ones.
    #[must_use]
    pub fn removal(table: TableId, old_count: u32, removed: &BTreeSet<u32>) -> RowRemap {
        let mut map = Vec::with_capacity(old_count as usize);
        let mut survivors = Vec::with_capacity(old_count as usize + 1);
        let mut next = 0;
        for rid in 1..=old_count {
            survivors.push(next);
            if removed.contains(&rid) {
                map.push(0);
            } else {
                next += 1;
                map.push(next);
            }
        }
        survivors.push(next);

        RowRemap {
            table,
            map,
            new_count: next,
            kind: RemapKind::Removal { survivors },
        }
    }

    /// Insert `count` rows at `position` into a table of `old_count` rows.
    ///
    /// The new rows occupy `position..position + count`, rows at or after `position` move
    /// up by `count`. `owner` names the row whose list range receives the new rows.
    #[must_use]
    pub fn insertion(
        table: TableId,
        old_count: u32,
        position: u32,
        count: u32,
        owner: Option<(TableId, u32)>,
    ) -> RowRemap {
        let map = (1..=old_count)
            .map(|rid| if rid < position { rid } else { rid + count })
            .collect();

        RowRemap {
            table,
            map,
            new_count: old_count + count,
            kind: RemapKind::Insertion {
                position,
                count,
                owner,
            },
        }
    }

    /// Reorder a table: `order[i]` is the old row that becomes row `i + 1`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if `order` is not a permutation of
    /// `1..=order.len()`.
    pub fn permutation(table: TableId, order: &[u32]) -> Result<RowRemap> {
        let mut map = vec![0; order.len()];
        for (index, old) in order.iter().enumerate() {
            match old.checked_sub(1).and_then(|slot| map.get_mut(slot as usize)) {
                Some(slot) if *slot == 0 => *slot = index as u32 + 1,
                _ => {
                    return Err(InvariantViolation(format!(
                        "invalid row order for {table:?}"
                    )))
                }
            }
        }

        Ok(RowRemap {
            table,
            map,
            new_count: order.len() as u32,
            kind: RemapKind::Permutation,
        })
    }

    /// The renumbered table.
    #[must_use]
    pub fn table(&self) -> TableId {
        self.table
    }

    /// Row count before the edit.
    #[must_use]
    pub fn old_count(&self) -> u32 {
        self.map.len() as u32
    }

    /// Row count after the edit.
    #[must_use]
    pub fn new_count(&self) -> u32 {
        self.new_count
    }

    /// `true` if no row changes its number.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.new_count == self.old_count()
            && self
                .map
                .iter()
                .enumerate()
                .all(|(index, new)| *new == index as u32 + 1)
    }

    /// New number of row `rid`, `None` if the row was removed.
    ///
    /// Row 0 (a null reference) maps to itself. Rows past the end of the table are
    /// invalid references; they are shifted like the last row so that they stay invalid.
    #[must_use]
    pub fn map_row(&self, rid: u32) -> Option<u32> {
        if rid == 0 {
            return Some(0);
        }

        match self.map.get(rid as usize - 1) {
            Some(0) => None,
            Some(new) => Some(*new),
            None => Some(rid - self.old_count() + self.new_count),
        }
    }

    /// New value of a list column pointing into the renumbered table.
    ///
    /// A list column holds the first row of a contiguous run; the run ends where the next
    /// owner's run starts. Under removal the new start is the first surviving row at or
    /// after the old start. Under insertion at `p` starts below `p` stay, starts above `p`
    /// shift, and owners starting exactly at `p` stay at `p` up to and including the
    /// inserting owner, so the new rows end up in that owner's run.
    #[must_use]
    pub fn map_list(&self, owner_table: TableId, owner_rid: u32, value: u32) -> u32 {
        match &self.kind {
            RemapKind::Removal { survivors } => {
                let index = value.saturating_sub(1) as usize;
                match survivors.get(index) {
                    Some(before) => before + 1,
                    None => value - self.old_count() + self.new_count,
                }
            }
            RemapKind::Insertion {
                position,
                count,
                owner,
            } => {
                if value < *position {
                    value
                } else if value > *position {
                    value + count
                } else {
                    match owner {
                        Some((table, rid)) if *table == owner_table && owner_rid <= *rid => value,
                        _ => value + count,
                    }
                }
            }
            RemapKind::Permutation => value,
        }
    }

    /// Map a token, leaving tokens of other tables untouched.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if the token references a removed row.
    pub fn map_token(&self, token: Token) -> Result<Token> {
        if token.table_id() != Some(self.table) {
            return Ok(token);
        }

        match self.map_row(token.row()) {
            Some(row) => Ok(Token::from_parts(self.table, row)),
            None => Err(InvariantViolation(format!(
                "{token} still referenced after its removal"
            ))),
        }
    }

    fn map_reference(&self, rid: u32, source: TableId) -> Result<u32> {
        self.map_row(rid).ok_or_else(|| {
            InvariantViolation(format!(
                "{source:?} still references removed {:?} row {rid}",
                self.table
            ))
        })
    }
}

impl CilAssembly {
    /// Apply a renumbering of one table to the table itself and every reference to it.
    ///
    /// For an insertion `inserted` holds the new rows, already expressed in final row
    /// numbers; they are placed at the insertion position and left untouched. For removals
    /// and permutations `inserted` must be empty.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if a remaining reference points at a
    /// removed row or `inserted` does not match the remap, and [`crate::Error::Malformed`]
    /// for invalid coded indices, signatures or IL bodies.
    pub fn apply_remap(&mut self, remap: &RowRemap, inserted: Vec<Row>) -> Result<()> {
        let table = remap.table;
        let skip = self.rebuild_table(remap, inserted)?;

        for source in TableId::iter() {
            let schema = columns(source);
            let affected = schema.iter().any(|kind| match kind {
                ColumnKind::Index(target) | ColumnKind::List(target) => *target == table,
                ColumnKind::Coded(coded) => coded.contains(table),
                _ => false,
            });
            if !affected {
                continue;
            }

            for (index, row) in self.tables_mut().rows_mut(source).iter_mut().enumerate() {
                let rid = index as u32 + 1;
                if source == table && skip.contains(&rid) {
                    continue;
                }

                for (kind, value) in schema.iter().zip(row.iter_mut()) {
                    match kind {
                        ColumnKind::Index(target) if *target == table => {
                            *value = remap.map_reference(*value, source)?;
                        }
                        ColumnKind::List(target) if *target == table => {
                            *value = remap.map_list(source, rid, *value);
                        }
                        ColumnKind::Coded(coded) if coded.contains(table) => {
                            let (target, row) = coded.decode(*value)?;
                            if target == table && row != 0 {
                                *value = coded.encode(table, remap.map_reference(row, source)?)?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let entry_point = self.entry_point();
        if !entry_point.is_null() {
            let mapped = remap.map_token(entry_point)?;
            self.set_entry_point(mapped);
        }

        if table == TableId::MethodDef {
            let bodies = std::mem::take(self.added_bodies_mut());
            for (method, body) in bodies {
                let method = remap.map_reference(method, TableId::MethodDef)?;
                self.added_bodies_mut().insert(method, body);
            }
        }

        if IL_TOKEN_TABLES.contains(&table) {
            self.remap_il(remap)?;
        }

        if SIGNATURE_TOKEN_TABLES.contains(&table) {
            self.remap_signatures(remap)?;
        }

        Ok(())
    }

    /// Stably sort every table with a sort key, `CustomAttribute` last since sorting other
    /// tables can reorder its parents.
    ///
    /// # Errors
    /// Returns an error if propagating a reordering fails, see [`CilAssembly::apply_remap`].
    pub fn sort_tables(&mut self) -> Result<()> {
        let order = TableId::iter()
            .filter(|table| *table != TableId::CustomAttribute)
            .chain(std::iter::once(TableId::CustomAttribute));

        for table in order {
            let Some(key) = sort_key(table) else {
                continue;
            };

            let rows = self.tables().rows(table);
            let mut order: Vec<u32> = (1..=rows.len() as u32).collect();
            order.sort_by_key(|rid| {
                let row = &rows[*rid as usize - 1];
                key.iter().map(|column| row[*column]).collect::<Vec<u32>>()
            });

            let remap = RowRemap::permutation(table, &order)?;
            if !remap.is_identity() {
                log::debug!("Re-sorting {:?}", table);
                self.apply_remap(&remap, Vec::new())?;
            }
            self.tables_mut().sorted |= table.bit();
        }

        Ok(())
    }

    /// Move the rows of the remapped table to their new positions and splice in inserted
    /// rows. Returns the row numbers of the inserted rows.
    fn rebuild_table(&mut self, remap: &RowRemap, inserted: Vec<Row>) -> Result<BTreeSet<u32>> {
        let table = remap.table;
        if self.tables().row_count(table) != remap.old_count() {
            return Err(InvariantViolation(format!(
                "row remap for {table:?} built for {} rows, table has {}",
                remap.old_count(),
                self.tables().row_count(table)
            )));
        }

        let mut slots: Vec<Option<Row>> = vec![None; remap.new_count as usize];
        let old_rows = std::mem::take(self.tables_mut().rows_mut(table));
        for (index, row) in old_rows.into_iter().enumerate() {
            if let Some(new) = remap.map_row(index as u32 + 1) {
                slots[new as usize - 1] = Some(row);
            }
        }

        let mut skip = BTreeSet::new();
        match remap.kind {
            RemapKind::Insertion {
                position, count, ..
            } if inserted.len() == count as usize => {
                for (offset, row) in inserted.into_iter().enumerate() {
                    let rid = position + offset as u32;
                    slots[rid as usize - 1] = Some(row);
                    skip.insert(rid);
                }
            }
            RemapKind::Removal { .. } | RemapKind::Permutation if inserted.is_empty() => {}
            _ => {
                return Err(InvariantViolation(format!(
                    "{} rows supplied for {table:?} do not match the row remap",
                    inserted.len()
                )))
            }
        }

        let rows = slots
            .into_iter()
            .collect::<Option<Vec<Row>>>()
            .ok_or_else(|| InvariantViolation(format!("gap in renumbered {table:?} table")))?;
        *self.tables_mut().rows_mut(table) = rows;

        Ok(skip)
    }

    /// Patch token operands of all original IL bodies in place, then of all added bodies.
    fn remap_il(&mut self, remap: &RowRemap) -> Result<()> {
        for offset in self.il_body_offsets()? {
            let body = self.body_at(offset)?;
            let data = self.file_mut().data_mut();

            let range = body.code_range();
            patch_tokens(&mut data[offset + range.start..offset + range.end], |token| {
                remap.map_token(token)
            })?;

            for handler in body
                .exception_handlers
                .iter()
                .filter(|handler| handler.has_class_token())
            {
                let mut position = offset + handler.class_token_position;
                let token = Token::new(read_le::<u32>(&data[position..])?);
                if !token.is_null() {
                    write_le_at(data, &mut position, remap.map_token(token)?.value())?;
                }
            }

            if body.is_fat && body.local_var_sig_token != 0 {
                let mut position = offset + 8;
                let token = remap.map_token(Token::new(body.local_var_sig_token))?;
                write_le_at(data, &mut position, token.value())?;
            }
        }

        for body in self.added_bodies_mut().values_mut() {
            let header = MethodBody::from(body)?;
            let range = header.code_range();
            patch_tokens(&mut body[range], |token| remap.map_token(token))?;
        }

        Ok(())
    }

    /// Rewrite signature blobs embedding tokens of the remapped table. Changed blobs are
    /// appended as new heap entries, shared blobs are rewritten once.
    fn remap_signatures(&mut self, remap: &RowRemap) -> Result<()> {
        let mut rewritten: HashMap<u32, u32> = HashMap::new();

        for (table, column, shape) in SIGNATURE_COLUMNS {
            for rid in 1..=self.tables().row_count(table) {
                let index = self.tables().value(table, rid, column)?;
                if index == 0 {
                    continue;
                }

                let new_index = match rewritten.get(&index) {
                    Some(new_index) => *new_index,
                    None => {
                        let blob = self.blobs().get(index)?;
                        let updated = rewrite_tokens(blob, shape, |token| remap.map_token(token))?;
                        let new_index = if updated == blob {
                            index
                        } else {
                            self.blobs_mut().append(&updated)?
                        };
                        rewritten.insert(index, new_index);
                        new_index
                    }
                };

                if new_index != index {
                    self.tables_mut().set_value(table, rid, column, new_index)?;
                }
            }
        }

        Ok(())
    }
}

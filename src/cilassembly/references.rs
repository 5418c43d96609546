//! Reference collection and reachability over metadata rows.
//!
//! Rows can be referenced from four places:
//!
//! - index, coded index and list columns of other rows
//! - `TypeDefOrRef` tokens embedded in signature blobs ([`SIGNATURE_COLUMNS`])
//! - token operands of IL bodies, exception clause class tokens and local signatures
//! - the entry point token of the CLI header
//!
//! [`ReferenceTracker`] answers two questions on top of that: which rows of a candidate set
//! are still reachable from the rest of the image ([`ReferenceTracker::live_candidates`]),
//! and how often a single row is referenced from table columns
//! ([`ReferenceTracker::column_references_to`]).
//!
//! # Reachability
//!
//! Rows outside the candidate set are treated as roots, with two exceptions: rows the
//! caller is about to delete, and custom attributes attached to a candidate. An attribute
//! on a candidate only keeps its targets alive if the candidate itself is alive. Starting
//! from the roots a worklist marks every candidate that is reached, scanning each newly
//! live candidate (and the attributes attached to it) in turn until nothing changes.

use std::collections::{BTreeSet, HashMap};

use strum::IntoEnumIterator;

use crate::{
    cilassembly::CilAssembly,
    disassembler::{decode_stream, Operand},
    metadata::{
        method::MethodBody,
        signatures::{collect_tokens, BlobShape},
        tables::{col, columns, CodedIndexType, ColumnKind, TableId},
        token::Token,
    },
    Result,
};

/// Blob columns holding signatures, with the shape of their content.
pub const SIGNATURE_COLUMNS: [(TableId, usize, BlobShape); 7] = [
    (TableId::Field, 2, BlobShape::Signature),
    (TableId::MethodDef, col::methoddef::SIGNATURE, BlobShape::Signature),
    (TableId::MemberRef, col::memberref::SIGNATURE, BlobShape::Signature),
    (TableId::StandAloneSig, 0, BlobShape::Signature),
    (TableId::Property, 2, BlobShape::Signature),
    (TableId::TypeSpec, 0, BlobShape::Type),
    (TableId::MethodSpec, 1, BlobShape::Signature),
];

/// Walks the references of an assembly.
pub struct ReferenceTracker<'a> {
    assembly: &'a CilAssembly,
}

impl<'a> ReferenceTracker<'a> {
    /// Create a tracker over `assembly`.
    #[must_use]
    pub fn new(assembly: &'a CilAssembly) -> Self {
        ReferenceTracker { assembly }
    }

    /// Every row referenced by a row: its index, coded index and list column targets and
    /// the tokens embedded in its signature blob.
    ///
    /// List columns contribute the first row of the owned run only.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid coded indices or signature blobs.
    pub fn row_references(&self, table: TableId, rid: u32) -> Result<Vec<Token>> {
        let tables = self.assembly.tables();
        let row = tables.row(table, rid)?;

        let mut found = Vec::new();
        for (kind, value) in columns(table).iter().zip(row) {
            match kind {
                ColumnKind::Index(target) | ColumnKind::List(target) if *value != 0 => {
                    found.push(Token::from_parts(*target, *value));
                }
                ColumnKind::Coded(coded) => {
                    let (target, row) = coded.decode(*value)?;
                    if row != 0 {
                        found.push(Token::from_parts(target, row));
                    }
                }
                _ => {}
            }
        }

        for (signature_table, column, shape) in SIGNATURE_COLUMNS {
            if signature_table == table && row[column] != 0 {
                let blob = self.assembly.blobs().get(row[column])?;
                found.extend(collect_tokens(blob, shape)?);
            }
        }

        Ok(found)
    }

    /// All tokens referenced from method bodies: IL operands, exception clause class tokens
    /// and local signatures, of original and added bodies alike.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for undecodable bodies.
    pub fn body_references(&self) -> Result<Vec<Token>> {
        let mut found = Vec::new();

        for offset in self.assembly.il_body_offsets()? {
            let body = self.assembly.body_at(offset)?;
            let data = &self.assembly.file().data()[offset..];
            collect_body_tokens(&body, data, &mut found)?;
        }

        for data in self.assembly.added_bodies().values() {
            let body = MethodBody::from(data)?;
            collect_body_tokens(&body, data, &mut found)?;
        }

        Ok(found)
    }

    /// Candidate rows still reachable from outside the candidate set.
    ///
    /// `deleted` names rows that are about to be removed; they neither count as roots nor
    /// are their references followed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid coded indices, signatures or bodies.
    pub fn live_candidates(
        &self,
        candidates: &BTreeSet<Token>,
        deleted: &BTreeSet<Token>,
    ) -> Result<BTreeSet<Token>> {
        let tables = self.assembly.tables();
        let mut worklist = Vec::new();
        let mut attached: HashMap<Token, Vec<u32>> = HashMap::new();

        for table in TableId::iter() {
            for rid in 1..=tables.row_count(table) {
                let token = Token::from_parts(table, rid);
                if candidates.contains(&token) || deleted.contains(&token) {
                    continue;
                }

                if table == TableId::CustomAttribute {
                    let parent = tables.value(table, rid, col::customattribute::PARENT)?;
                    let (parent_table, parent_rid) =
                        CodedIndexType::HasCustomAttribute.decode(parent)?;
                    let parent = Token::from_parts(parent_table, parent_rid);
                    if candidates.contains(&parent) {
                        attached.entry(parent).or_default().push(rid);
                        continue;
                    }
                }

                worklist.extend(self.row_references(table, rid)?);
            }
        }

        worklist.extend(self.body_references()?);
        worklist.push(self.assembly.entry_point());

        let mut live = BTreeSet::new();
        while let Some(token) = worklist.pop() {
            if !candidates.contains(&token) || !live.insert(token) {
                continue;
            }

            let Some(table) = token.table_id() else {
                continue;
            };
            worklist.extend(self.row_references(table, token.row())?);

            for rid in attached.remove(&token).unwrap_or_default() {
                let attribute = Token::from_parts(TableId::CustomAttribute, rid);
                if !deleted.contains(&attribute) {
                    worklist.extend(self.row_references(TableId::CustomAttribute, rid)?);
                }
            }
        }

        Ok(live)
    }

    /// Custom attribute rows whose parent is one of `parents`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid parent indices.
    pub fn attributes_on(&self, parents: &BTreeSet<Token>) -> Result<BTreeSet<u32>> {
        let tables = self.assembly.tables();
        let mut found = BTreeSet::new();
        for rid in 1..=tables.row_count(TableId::CustomAttribute) {
            let parent = tables.value(TableId::CustomAttribute, rid, col::customattribute::PARENT)?;
            let (table, row) = CodedIndexType::HasCustomAttribute.decode(parent)?;
            if parents.contains(&Token::from_parts(table, row)) {
                found.insert(rid);
            }
        }

        Ok(found)
    }

    /// Number of index and coded index columns, over all tables, that reference `target`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid coded indices.
    pub fn column_references_to(&self, target: Token) -> Result<usize> {
        let Some(target_table) = target.table_id() else {
            return Ok(0);
        };

        let tables = self.assembly.tables();
        let mut count = 0;
        for table in TableId::iter() {
            let schema = columns(table);
            for row in tables.rows(table) {
                for (kind, value) in schema.iter().zip(row) {
                    let hit = match kind {
                        ColumnKind::Index(table) => {
                            *table == target_table && *value == target.row()
                        }
                        ColumnKind::Coded(coded) if coded.contains(target_table) => {
                            coded.decode(*value)? == (target_table, target.row())
                        }
                        _ => false,
                    };
                    if hit {
                        count += 1;
                    }
                }
            }
        }

        Ok(count)
    }
}

fn collect_body_tokens(body: &MethodBody, data: &[u8], found: &mut Vec<Token>) -> Result<()> {
    let Some(code) = data.get(body.code_range()) else {
        return Err(crate::Error::OutOfBounds);
    };

    for instruction in decode_stream(code)? {
        if let Operand::Token(token) = instruction.operand {
            found.push(token);
        }
    }

    for handler in &body.exception_handlers {
        if handler.has_class_token() && handler.class_token_or_filter != 0 {
            found.push(Token::new(handler.class_token_or_filter));
        }
    }

    if body.is_fat && body.local_var_sig_token != 0 {
        found.push(Token::new(body.local_var_sig_token));
    }

    Ok(())
}

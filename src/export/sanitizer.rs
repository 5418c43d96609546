//! Removal of the export marker from the metadata.
//!
//! The marker attributes are deleted first. Everything else that belongs to the marker
//! library (its `TypeRef` rows, the `MemberRef` rows declared on them, and finally the
//! `AssemblyRef` itself) is only removed once nothing outside that set reaches it any
//! more, see [`crate::cilassembly::references::ReferenceTracker::live_candidates`]. A
//! library that still uses a type from the marker assembly keeps those rows and the
//! reference; they are reported as warnings.
//!
//! Rows are removed table by table in dependency order, each removal renumbering the
//! remaining rows and every reference to them:
//!
//! `CustomAttribute` -> `MemberRef` -> `TypeRef` -> `AssemblyRef`

use std::collections::BTreeSet;

use crate::{
    cilassembly::{references::ReferenceTracker, CilAssembly, RowRemap},
    export::discovery::marker_attributes,
    metadata::{
        tables::{col, CodedIndexType, TableId},
        token::Token,
    },
    module::TargetModule,
    Result,
};

/// Simple name of the assembly defining the marker attribute
pub const MARKER_ASSEMBLY_NAME: &str = "Arma3.DllExport";

/// What [`sanitize`] removed and kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Removed `CustomAttribute` rows, markers and attributes on removed references
    pub removed_attributes: usize,
    /// Removed `MemberRef` rows
    pub removed_member_refs: usize,
    /// Removed `TypeRef` rows
    pub removed_type_refs: usize,
    /// `true` if the marker library reference was removed
    pub removed_assembly_ref: bool,
    /// Marker library rows that are still referenced, as tokens before removal
    pub kept: Vec<Token>,
}

/// Strip the marker attributes and whatever of the marker library becomes unreferenced.
///
/// # Errors
/// Returns [`crate::Error::InvariantViolation`] if a removed row is still referenced after
/// all, and [`crate::Error::Malformed`] for invalid metadata.
pub fn sanitize(module: &mut TargetModule) -> Result<SanitizeReport> {
    let assembly = module.assembly_mut();
    let mut report = SanitizeReport::default();

    let markers = marker_attributes(assembly)?;
    let marker_rows: BTreeSet<u32> = markers.iter().map(|m| m.rid).collect();
    let deleted: BTreeSet<Token> = marker_rows
        .iter()
        .map(|rid| Token::from_parts(TableId::CustomAttribute, *rid))
        .collect();

    let marker_library = match markers.first() {
        Some(marker) if marker.marker_type.table_id() == Some(TableId::TypeRef) => {
            match assembly.outermost_scope(marker.marker_type.row())? {
                Some((TableId::AssemblyRef, rid)) => Some(rid),
                _ => None,
            }
        }
        _ => None,
    }
    .or_else(|| assembly.find_assembly_ref(MARKER_ASSEMBLY_NAME));

    let Some(marker_library) = marker_library else {
        log::debug!("No reference to {} found", MARKER_ASSEMBLY_NAME);
        report.removed_attributes = remove_rows(assembly, TableId::CustomAttribute, &marker_rows)?;
        return Ok(report);
    };

    let candidates = library_rows(assembly, marker_library)?;
    let (dead, attributes) = {
        let tracker = ReferenceTracker::new(assembly);
        let live = tracker.live_candidates(&candidates, &deleted)?;
        for token in &live {
            log::warn!(
                "Keeping {} of {}, it is still referenced",
                describe(assembly, *token),
                MARKER_ASSEMBLY_NAME
            );
            report.kept.push(*token);
        }

        let dead: BTreeSet<Token> = candidates.difference(&live).copied().collect();
        let mut attributes = tracker.attributes_on(&dead)?;
        attributes.extend(&marker_rows);
        (dead, attributes)
    };

    let rows_of = |table: TableId| -> BTreeSet<u32> {
        dead.iter()
            .filter(|token| token.table_id() == Some(table))
            .map(Token::row)
            .collect()
    };

    report.removed_attributes = remove_rows(assembly, TableId::CustomAttribute, &attributes)?;
    report.removed_member_refs = remove_rows(assembly, TableId::MemberRef, &rows_of(TableId::MemberRef))?;
    report.removed_type_refs = remove_rows(assembly, TableId::TypeRef, &rows_of(TableId::TypeRef))?;

    let library = Token::from_parts(TableId::AssemblyRef, marker_library);
    if ReferenceTracker::new(assembly).column_references_to(library)? == 0 {
        remove_rows(assembly, TableId::AssemblyRef, &BTreeSet::from([marker_library]))?;
        report.removed_assembly_ref = true;
    } else {
        log::warn!(
            "Keeping the reference to {}, it is still in use",
            MARKER_ASSEMBLY_NAME
        );
    }

    log::debug!(
        "Removed {} attribute(s), {} member reference(s), {} type reference(s)",
        report.removed_attributes,
        report.removed_member_refs,
        report.removed_type_refs
    );
    Ok(report)
}

/// `TypeRef` rows scoped to `library` and the `MemberRef` rows declared on them.
fn library_rows(assembly: &CilAssembly, library: u32) -> Result<BTreeSet<Token>> {
    let tables = assembly.tables();
    let mut rows = BTreeSet::new();

    let mut type_refs = BTreeSet::new();
    for rid in 1..=tables.row_count(TableId::TypeRef) {
        if assembly.outermost_scope(rid)? == Some((TableId::AssemblyRef, library)) {
            type_refs.insert(rid);
            rows.insert(Token::from_parts(TableId::TypeRef, rid));
        }
    }

    for rid in 1..=tables.row_count(TableId::MemberRef) {
        let class = tables.value(TableId::MemberRef, rid, col::memberref::CLASS)?;
        if let (TableId::TypeRef, type_ref) = CodedIndexType::MemberRefParent.decode(class)? {
            if type_refs.contains(&type_ref) {
                rows.insert(Token::from_parts(TableId::MemberRef, rid));
            }
        }
    }

    Ok(rows)
}

fn remove_rows(assembly: &mut CilAssembly, table: TableId, rows: &BTreeSet<u32>) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let remap = RowRemap::removal(table, assembly.tables().row_count(table), rows);
    assembly.apply_remap(&remap, Vec::new())?;
    Ok(rows.len())
}

fn describe(assembly: &CilAssembly, token: Token) -> String {
    let name = match token.table_id() {
        Some(TableId::TypeRef) => assembly
            .type_ref_name(token.row())
            .map(|(namespace, name)| format!("type {namespace}.{name}")),
        Some(TableId::MemberRef) => assembly
            .string_at(TableId::MemberRef, token.row(), col::memberref::NAME)
            .map(|name| format!("member {name}")),
        _ => return token.to_string(),
    };
    name.unwrap_or_else(|_| token.to_string())
}

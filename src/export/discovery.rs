//! Finding and validating the methods marked for export.
//!
//! A marker is any custom attribute whose constructor belongs to a type named
//! [`MARKER_ATTRIBUTE_NAME`], whatever its namespace or defining assembly. Constructors are
//! resolved through `MemberRef -> TypeRef` for the usual case of a referenced marker
//! library and through `MethodDef -> TypeDef` for a marker type compiled into the module.
//!
//! The value blob is decoded as a single `int32` argument, the `ArmaExport` enum value.
//! Validation runs per method in discovery order and stops at the first problem:
//!
//! 1. the value must name a known kind ([`crate::Error::UnknownExportKind`])
//! 2. no other method may claim the same kind ([`crate::Error::DuplicateExportDeclaration`])
//! 3. the method must be public and static ([`crate::Error::InvalidExportSignature`])
//!
//! Only the first marker on a method counts. A return or parameter type that does not
//! match what the wrapper forwards is reported as a warning, the wrapper is generated
//! regardless.

use std::collections::BTreeMap;

use crate::{
    cilassembly::CilAssembly,
    export::{ExportCandidate, ExportKind, ExportSet},
    metadata::{
        customattributes::parse_int32_argument,
        method::{MethodAccessFlags, MethodModifiers},
        signatures::{parse_method_signature, TypeSignature},
        tables::{col, CodedIndexType, TableId},
        token::Token,
    },
    module::{MethodInfo, TargetModule},
    Error::{DuplicateExportDeclaration, InvalidExportSignature},
    Result,
};

/// Simple name of the export marker attribute type
pub const MARKER_ATTRIBUTE_NAME: &str = "ArmaDllExportAttribute";

/// A marker attribute row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MarkerAttribute {
    /// `CustomAttribute` row
    pub rid: u32,
    /// The attributed row
    pub parent: Token,
    /// `TypeRef` or `TypeDef` of the marker type
    pub marker_type: Token,
}

/// Find every method marked for export and validate the set.
///
/// An empty set is not an error.
///
/// # Errors
/// Returns [`crate::Error::UnknownExportKind`], [`crate::Error::DuplicateExportDeclaration`]
/// or [`crate::Error::InvalidExportSignature`] as described in the module documentation,
/// and [`crate::Error::Malformed`] for undecodable marker values or metadata rows.
pub fn discover(module: &TargetModule) -> Result<ExportSet> {
    let assembly = module.assembly();

    let mut markers: BTreeMap<Token, MarkerAttribute> = BTreeMap::new();
    for marker in marker_attributes(assembly)? {
        markers.entry(marker.parent).or_insert(marker);
    }

    let mut exports = ExportSet::new();
    for owner in module.types()? {
        for method in module.methods(&owner)? {
            let Some(marker) = markers.get(&method.token) else {
                continue;
            };

            let value = parse_int32_argument(assembly.blob_at(
                TableId::CustomAttribute,
                marker.rid,
                col::customattribute::VALUE,
            )?)?;
            let kind = ExportKind::from_value(value)?;

            if exports.get(kind).is_some() {
                return Err(DuplicateExportDeclaration(kind));
            }

            let candidate = ExportCandidate {
                kind,
                method: method.token,
                method_name: method.name.clone(),
                type_namespace: owner.namespace.clone(),
                type_name: owner.name.clone(),
                is_public: MethodAccessFlags::from_method_flags(method.flags)
                    == MethodAccessFlags::PUBLIC,
                is_static: MethodModifiers::from_method_flags(method.flags)
                    .contains(MethodModifiers::STATIC),
            };
            if !candidate.is_public || !candidate.is_static {
                return Err(InvalidExportSignature {
                    method: candidate.full_name(),
                    kind,
                });
            }

            check_signature(assembly, &candidate, &method);
            log::debug!("Found {} on {}", kind, candidate.full_name());
            exports.push(candidate);
        }
    }

    Ok(exports)
}

/// Every custom attribute row constructed by the marker type, in table order.
pub(crate) fn marker_attributes(assembly: &CilAssembly) -> Result<Vec<MarkerAttribute>> {
    let tables = assembly.tables();
    let mut found = Vec::new();

    for rid in 1..=tables.row_count(TableId::CustomAttribute) {
        let constructor = tables.value(TableId::CustomAttribute, rid, col::customattribute::TYPE)?;
        let Some(marker_type) = constructor_type(assembly, constructor)? else {
            continue;
        };
        if type_name(assembly, marker_type)? != Some(MARKER_ATTRIBUTE_NAME) {
            continue;
        }

        let parent = tables.value(TableId::CustomAttribute, rid, col::customattribute::PARENT)?;
        let (table, row) = CodedIndexType::HasCustomAttribute.decode(parent)?;
        found.push(MarkerAttribute {
            rid,
            parent: Token::from_parts(table, row),
            marker_type,
        });
    }

    Ok(found)
}

/// The type declaring an attribute constructor, given as a `CustomAttributeType` value.
fn constructor_type(assembly: &CilAssembly, constructor: u32) -> Result<Option<Token>> {
    match CodedIndexType::CustomAttributeType.decode(constructor)? {
        (TableId::MethodDef, rid) if rid != 0 => Ok(Some(Token::from_parts(
            TableId::TypeDef,
            assembly.declaring_type(rid)?,
        ))),
        (TableId::MemberRef, rid) if rid != 0 => {
            let class = assembly
                .tables()
                .value(TableId::MemberRef, rid, col::memberref::CLASS)?;
            match CodedIndexType::MemberRefParent.decode(class)? {
                (table @ (TableId::TypeRef | TableId::TypeDef), row) if row != 0 => {
                    Ok(Some(Token::from_parts(table, row)))
                }
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

/// Simple name of a `TypeRef` or `TypeDef`.
fn type_name(assembly: &CilAssembly, token: Token) -> Result<Option<&str>> {
    match token.table_id() {
        Some(TableId::TypeRef) => Ok(Some(assembly.type_ref_name(token.row())?.1)),
        Some(TableId::TypeDef) => Ok(Some(assembly.type_def_name(token.row())?.1)),
        _ => Ok(None),
    }
}

fn is_string_builder(assembly: &CilAssembly, signature: &TypeSignature) -> bool {
    let TypeSignature::Class(token) = signature else {
        return false;
    };
    let name = match token.table_id() {
        Some(TableId::TypeRef) => assembly.type_ref_name(token.row()),
        Some(TableId::TypeDef) => assembly.type_def_name(token.row()),
        _ => return false,
    };
    matches!(name, Ok(("System.Text", "StringBuilder")))
}

/// Warn if the marked method cannot take what its wrapper passes on.
fn check_signature(assembly: &CilAssembly, candidate: &ExportCandidate, method: &MethodInfo) {
    let signature = match parse_method_signature(&method.signature) {
        Ok(signature) => signature,
        Err(error) => {
            log::warn!(
                "Could not decode the signature of '{}' - {}",
                candidate.full_name(),
                error
            );
            return;
        }
    };

    let (matches, expected) = match candidate.kind {
        ExportKind::SimpleCall => (
            signature.return_type == TypeSignature::String
                && signature.params == [TypeSignature::String],
            "string (string)",
        ),
        ExportKind::VersionQuery => (
            signature.return_type == TypeSignature::String && signature.params.is_empty(),
            "string ()",
        ),
        ExportKind::ArgsCall => (
            signature.return_type == TypeSignature::I4
                && signature.params.len() == 4
                && is_string_builder(assembly, &signature.params[0])
                && signature.params[1] == TypeSignature::String
                && matches!(
                    &signature.params[2],
                    TypeSignature::Ptr(inner) | TypeSignature::SzArray(inner)
                        if **inner == TypeSignature::String
                )
                && signature.params[3] == TypeSignature::I4,
            "int (StringBuilder, string, string*, int)",
        ),
        ExportKind::RegisterCallback | ExportKind::ContextQuery => return,
    };

    if !matches {
        log::warn!(
            "'{}' is exported as {} but does not have the signature {}",
            candidate.full_name(),
            candidate.kind,
            expected
        );
    }
}

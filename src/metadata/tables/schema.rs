//! Column layout of every metadata table (ECMA-335 II.22).
//!
//! Rows are kept as plain `u32` columns. Heap columns hold heap offsets, simple index columns
//! hold 1-based rows and coded index columns hold the encoded value exactly as stored.

use crate::metadata::tables::{CodedIndexType, TableId};

/// The type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// A 2 byte constant
    U16,
    /// A 4 byte constant
    U32,
    /// Offset into `#Strings`
    Str,
    /// Index into `#GUID`
    Guid,
    /// Offset into `#Blob`
    Blob,
    /// Row of another table
    Index(TableId),
    /// Start of a contiguous run of rows in another table
    List(TableId),
    /// Coded index
    Coded(CodedIndexType),
}

use self::ColumnKind::{Blob, Coded, Guid, Index, List, Str, U16, U32};
use crate::metadata::tables::CodedIndexType as C;

/// Columns of `table`, in storage order.
#[must_use]
pub fn columns(table: TableId) -> &'static [ColumnKind] {
    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            List(TableId::Field),
            List(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Index(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Index(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, List(TableId::Param)],
        TableId::ParamPtr => &[Index(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[Index(TableId::TypeDef), Coded(C::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        TableId::Constant => &[U16, Coded(C::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Index(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Index(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Index(TableId::TypeDef), List(TableId::Event)],
        TableId::EventPtr => &[Index(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        TableId::PropertyMap => &[Index(TableId::TypeDef), List(TableId::Property)],
        TableId::PropertyPtr => &[Index(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[
            U16,
            Index(TableId::MethodDef),
            Coded(C::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Index(TableId::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[
            U16,
            Coded(C::MemberForwarded),
            Str,
            Index(TableId::ModuleRef),
        ],
        TableId::FieldRVA => &[U32, Index(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Index(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Index(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        TableId::NestedClass => &[Index(TableId::TypeDef), Index(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => &[
            Index(TableId::GenericParam),
            Coded(C::TypeDefOrRef),
        ],
    }
}

/// Sort keys of the tables that must be kept ordered (ECMA-335 II.22), as column indices
/// compared in sequence.
#[must_use]
pub fn sort_key(table: TableId) -> Option<&'static [usize]> {
    match table {
        TableId::InterfaceImpl => Some(&[0, 1]),
        TableId::Constant => Some(&[1]),
        TableId::CustomAttribute => Some(&[0]),
        TableId::FieldMarshal => Some(&[0]),
        TableId::DeclSecurity => Some(&[1]),
        TableId::ClassLayout => Some(&[2]),
        TableId::FieldLayout => Some(&[1]),
        TableId::MethodSemantics => Some(&[2]),
        TableId::MethodImpl => Some(&[0]),
        TableId::ImplMap => Some(&[1]),
        TableId::FieldRVA => Some(&[1]),
        TableId::NestedClass => Some(&[0]),
        TableId::GenericParam => Some(&[2, 0]),
        TableId::GenericParamConstraint => Some(&[0]),
        _ => None,
    }
}

/// Column indices of the tables the export pipeline reads and edits.
pub mod col {
    /// `TypeRef` columns
    pub mod typeref {
        /// `ResolutionScope`
        pub const SCOPE: usize = 0;
        /// `TypeName`
        pub const NAME: usize = 1;
        /// `TypeNamespace`
        pub const NAMESPACE: usize = 2;
    }

    /// `TypeDef` columns
    pub mod typedef {
        /// `Flags`
        pub const FLAGS: usize = 0;
        /// `TypeName`
        pub const NAME: usize = 1;
        /// `TypeNamespace`
        pub const NAMESPACE: usize = 2;
        /// `Extends`
        pub const EXTENDS: usize = 3;
        /// `FieldList`
        pub const FIELD_LIST: usize = 4;
        /// `MethodList`
        pub const METHOD_LIST: usize = 5;
    }

    /// `MethodDef` columns
    pub mod methoddef {
        /// `RVA`
        pub const RVA: usize = 0;
        /// `ImplFlags`
        pub const IMPL_FLAGS: usize = 1;
        /// `Flags`
        pub const FLAGS: usize = 2;
        /// `Name`
        pub const NAME: usize = 3;
        /// `Signature`
        pub const SIGNATURE: usize = 4;
        /// `ParamList`
        pub const PARAM_LIST: usize = 5;
    }

    /// `Param` columns
    pub mod param {
        /// `Flags`
        pub const FLAGS: usize = 0;
        /// `Sequence`
        pub const SEQUENCE: usize = 1;
        /// `Name`
        pub const NAME: usize = 2;
    }

    /// `MemberRef` columns
    pub mod memberref {
        /// `Class`
        pub const CLASS: usize = 0;
        /// `Name`
        pub const NAME: usize = 1;
        /// `Signature`
        pub const SIGNATURE: usize = 2;
    }

    /// `CustomAttribute` columns
    pub mod customattribute {
        /// `Parent`
        pub const PARENT: usize = 0;
        /// `Type`
        pub const TYPE: usize = 1;
        /// `Value`
        pub const VALUE: usize = 2;
    }

    /// `FieldMarshal` columns
    pub mod fieldmarshal {
        /// `Parent`
        pub const PARENT: usize = 0;
        /// `NativeType`
        pub const NATIVE_TYPE: usize = 1;
    }

    /// `AssemblyRef` columns
    pub mod assemblyref {
        /// `Name`
        pub const NAME: usize = 6;
    }
}

use strum::{EnumCount, EnumIter};

use crate::{metadata::tables::TableId, Result};

/// The coded index kinds of ECMA-335 II.24.2.6.
///
/// A coded index stores a row together with a small tag selecting one of several tables.
/// The tag occupies the low `ceil(log2(n))` bits, where `n` is the number of tables the
/// kind can point to.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef` or `TypeSpec`
    TypeDefOrRef,
    /// `Field`, `Param` or `Property`
    HasConstant,
    /// Any table that can carry a custom attribute
    HasCustomAttribute,
    /// `Field` or `Param`
    HasFieldMarshal,
    /// `TypeDef`, `MethodDef` or `Assembly`
    HasDeclSecurity,
    /// Parent of a `MemberRef`
    MemberRefParent,
    /// `Event` or `Property`
    HasSemantics,
    /// `MethodDef` or `MemberRef`
    MethodDefOrRef,
    /// `Field` or `MethodDef`
    MemberForwarded,
    /// `File`, `AssemblyRef` or `ExportedType`
    Implementation,
    /// Constructor of a custom attribute, `MethodDef` or `MemberRef`
    CustomAttributeType,
    /// `Module`, `ModuleRef`, `AssemblyRef` or `TypeRef`
    ResolutionScope,
    /// `TypeDef` or `MethodDef`
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// The tables this kind can point to, in tag order.
    #[must_use]
    pub fn tables(&self) -> &'static [TableId] {
        match self {
            CodedIndexType::TypeDefOrRef => {
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec]
            }
            CodedIndexType::HasConstant => &[TableId::Field, TableId::Param, TableId::Property],
            CodedIndexType::HasCustomAttribute => &[
                TableId::MethodDef,
                TableId::Field,
                TableId::TypeRef,
                TableId::TypeDef,
                TableId::Param,
                TableId::InterfaceImpl,
                TableId::MemberRef,
                TableId::Module,
                TableId::DeclSecurity,
                TableId::Property,
                TableId::Event,
                TableId::StandAloneSig,
                TableId::ModuleRef,
                TableId::TypeSpec,
                TableId::Assembly,
                TableId::AssemblyRef,
                TableId::File,
                TableId::ExportedType,
                TableId::ManifestResource,
                TableId::GenericParam,
                TableId::GenericParamConstraint,
                TableId::MethodSpec,
            ],
            CodedIndexType::HasFieldMarshal => &[TableId::Field, TableId::Param],
            CodedIndexType::HasDeclSecurity => {
                &[TableId::TypeDef, TableId::MethodDef, TableId::Assembly]
            }
            CodedIndexType::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndexType::HasSemantics => &[TableId::Event, TableId::Property],
            CodedIndexType::MethodDefOrRef => &[TableId::MethodDef, TableId::MemberRef],
            CodedIndexType::MemberForwarded => &[TableId::Field, TableId::MethodDef],
            CodedIndexType::Implementation => {
                &[TableId::File, TableId::AssemblyRef, TableId::ExportedType]
            }
            // Tags 0, 1 and 4 are unused, only 2 (MethodDef) and 3 (MemberRef) are valid
            CodedIndexType::CustomAttributeType => &[
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MemberRef,
                TableId::MemberRef,
            ],
            CodedIndexType::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
            CodedIndexType::TypeOrMethodDef => &[TableId::TypeDef, TableId::MethodDef],
        }
    }

    /// Number of tag bits.
    #[must_use]
    pub fn tag_bits(&self) -> u8 {
        let count = self.tables().len() as u32;
        (u32::BITS - (count - 1).leading_zeros()) as u8
    }

    fn tag_of(&self, table: TableId) -> Option<u32> {
        match (self, table) {
            (CodedIndexType::CustomAttributeType, TableId::MethodDef) => Some(2),
            (CodedIndexType::CustomAttributeType, TableId::MemberRef) => Some(3),
            (CodedIndexType::CustomAttributeType, _) => None,
            _ => self
                .tables()
                .iter()
                .position(|candidate| *candidate == table)
                .map(|tag| tag as u32),
        }
    }

    fn table_of(&self, tag: u32) -> Option<TableId> {
        match (self, tag) {
            (CodedIndexType::CustomAttributeType, 2) => Some(TableId::MethodDef),
            (CodedIndexType::CustomAttributeType, 3) => Some(TableId::MemberRef),
            (CodedIndexType::CustomAttributeType, _) => None,
            _ => self.tables().get(tag as usize).copied(),
        }
    }

    /// Split a stored coded index into table and row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a tag that selects no table.
    pub fn decode(&self, value: u32) -> Result<(TableId, u32)> {
        let bits = self.tag_bits();
        let tag = value & ((1 << bits) - 1);
        match self.table_of(tag) {
            Some(table) => Ok((table, value >> bits)),
            None => Err(malformed_error!(
                "Invalid tag {} for coded index {:?}",
                tag,
                self
            )),
        }
    }

    /// Combine table and row into the stored coded index value.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if this kind cannot point to `table`.
    pub fn encode(&self, table: TableId, row: u32) -> Result<u32> {
        match self.tag_of(table) {
            Some(tag) => Ok((row << self.tag_bits()) | tag),
            None => Err(malformed_error!(
                "Coded index {:?} can not reference {:?}",
                self,
                table
            )),
        }
    }

    /// `true` if this kind can point to `table`.
    #[must_use]
    pub fn contains(&self, table: TableId) -> bool {
        self.tag_of(table).is_some()
    }
}

/// Number of coded index kinds.
pub const CODED_INDEX_COUNT: usize = CodedIndexType::COUNT;

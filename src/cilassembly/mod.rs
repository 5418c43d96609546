//! Mutable metadata image for editing and re-emitting a .NET module.
//!
//! This module provides [`crate::cilassembly::CilAssembly`], the editing layer the export
//! pipeline works on. It owns a private copy of the PE image together with fully decoded
//! metadata: every table row, the `#Strings` and `#Blob` heaps, and the `#GUID` and `#US`
//! heaps as raw bytes.
//!
//! # Design
//!
//! ## **Plain Rows**
//! Every table is kept as a list of `u32` columns ([`crate::metadata::tables::Row`]).
//! Rows can be appended, inserted in the middle of a list-owned range, or removed; any
//! renumbering is expressed as a [`crate::cilassembly::RowRemap`] and applied to every
//! place a row can be referenced from:
//! - simple and coded index columns of all tables
//! - list columns (`FieldList`, `MethodList`, `ParamList`, ...)
//! - `TypeDefOrRef` tokens embedded in signature blobs
//! - IL token operands, exception clause class tokens and local signature tokens
//! - the entry point token of the CLI header
//! - the bodies of methods added during this session
//!
//! ## **Heaps**
//! Heaps only ever grow. New strings are interned, new blobs appended; nothing is
//! compacted, so existing heap offsets stay valid throughout an edit session.
//!
//! ## **Writing**
//! [`crate::cilassembly::CilAssembly::write_to_file`] appends a `.meta` section holding the
//! new method bodies and the rebuilt metadata, and re-points the CLI header to it. See
//! [`crate::cilassembly::write`] for the individual phases.
//!
//! # Module Organization
//!
//! - [`crate::cilassembly::CilAssembly`] - The mutable image (this file)
//! - [`crate::cilassembly::builder`] - Row builders for types, methods, params and references
//! - [`crate::cilassembly::remapping`] - Row renumbering and its propagation
//! - [`crate::cilassembly::references`] - Reference collection and reachability
//! - [`crate::cilassembly::write`] - Binary generation
//!
//! # Examples
//!
//! ```rust,ignore
//! use crate::{cilassembly::CilAssembly, file::File};
//!
//! let file = File::from_file(Path::new("Extension.dll"))?;
//! let mut assembly = CilAssembly::from_file(file)?;
//!
//! let object = assembly.find_type_ref("System", "Object");
//! let container = assembly.add_type_def(0x101, "Arma3.DllExport", "DllExportWrapper", extends)?;
//! assembly.write_to_file("Extension.dll")?;
//! ```

pub mod builder;
pub mod references;
pub mod remapping;
pub mod write;

use std::{collections::BTreeMap, ops::Range, path::Path};

use crate::{
    file::File,
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        method::{MethodBody, MethodImplCodeType},
        root::Root,
        streams::{Blob, Strings},
        tables::{col, CodedIndexType, MetadataTables, TableId},
        token::Token,
    },
    Error::NotSupported,
    Result,
};

pub use builder::{NewMethod, NewParam};
pub use remapping::RowRemap;

/// A decoded, editable .NET module.
pub struct CilAssembly {
    file: File,
    cor20: Cor20Header,
    version: String,
    root_flags: u16,
    tables: MetadataTables,
    strings: Strings,
    blob: Blob,
    guid: Vec<u8>,
    user_strings: Vec<u8>,
    added_bodies: BTreeMap<u32, Vec<u8>>,
}

impl CilAssembly {
    /// Decode the metadata of a loaded PE image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the CLI header, metadata root or tables stream
    /// are invalid, and [`crate::Error::NotSupported`] for uncompressed (`#-`) metadata or
    /// pointer tables.
    pub fn from_file(file: File) -> Result<CilAssembly> {
        let (clr_rva, _) = file.clr();
        let cor20 = Cor20Header::read(file.slice_at_rva(clr_rva, COR20_HEADER_SIZE)?)?;
        let metadata = file.slice_at_rva(cor20.meta_data_rva, cor20.meta_data_size as usize)?;
        let root = Root::read(metadata)?;

        let mut tables = None;
        let mut strings = Strings::from(&[])?;
        let mut blob = Blob::from(&[])?;
        let mut guid = Vec::new();
        let mut user_strings = Vec::new();

        for header in &root.stream_headers {
            let start = header.offset as usize;
            let data = &metadata[start..start + header.size as usize];
            match header.name.as_str() {
                "#~" => tables = Some(MetadataTables::read(data)?),
                "#Strings" => strings = Strings::from(data)?,
                "#Blob" => blob = Blob::from(data)?,
                "#GUID" => guid = data.to_vec(),
                "#US" => user_strings = data.to_vec(),
                "#-" => {
                    log::warn!("Uncompressed metadata tables ('#-') are not supported");
                    return Err(NotSupported);
                }
                name => log::warn!("Dropping unknown metadata stream '{}'", name),
            }
        }

        let Some(tables) = tables else {
            return Err(malformed_error!("Metadata has no '#~' tables stream"));
        };

        Ok(CilAssembly {
            file,
            cor20,
            version: root.version,
            root_flags: root.flags,
            tables,
            strings,
            blob,
            guid,
            user_strings,
            added_bodies: BTreeMap::new(),
        })
    }

    /// The underlying PE image.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The CLI header, with the entry point token kept current across renumbering.
    #[must_use]
    pub fn cor20header(&self) -> &Cor20Header {
        &self.cor20
    }

    /// Runtime version string of the metadata root.
    #[must_use]
    pub fn runtime_version(&self) -> &str {
        &self.version
    }

    /// All metadata tables.
    #[must_use]
    pub fn tables(&self) -> &MetadataTables {
        &self.tables
    }

    /// All metadata tables, mutable.
    ///
    /// Direct edits bypass reference maintenance; row insertion and removal go through
    /// [`CilAssembly::apply_remap`].
    pub fn tables_mut(&mut self) -> &mut MetadataTables {
        &mut self.tables
    }

    /// The `#Strings` heap.
    #[must_use]
    pub fn strings(&self) -> &Strings {
        &self.strings
    }

    /// The `#Blob` heap.
    #[must_use]
    pub fn blobs(&self) -> &Blob {
        &self.blob
    }

    /// The raw `#GUID` heap.
    #[must_use]
    pub fn guids(&self) -> &[u8] {
        &self.guid
    }

    /// The raw `#US` heap.
    #[must_use]
    pub fn user_strings(&self) -> &[u8] {
        &self.user_strings
    }

    /// Bodies of methods added in this session, keyed by `MethodDef` row.
    #[must_use]
    pub fn added_bodies(&self) -> &BTreeMap<u32, Vec<u8>> {
        &self.added_bodies
    }

    /// Intern a string in `#Strings`.
    pub fn add_string(&mut self, value: &str) -> u32 {
        self.strings.intern(value)
    }

    /// Append a blob to `#Blob`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob is too large to be encoded.
    pub fn add_blob(&mut self, value: &[u8]) -> Result<u32> {
        self.blob.append(value)
    }

    /// The string stored in a `#Strings` column of a row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist or the heap entry is
    /// invalid.
    pub fn string_at(&self, table: TableId, rid: u32, column: usize) -> Result<&str> {
        self.strings.get(self.tables.value(table, rid, column)?)
    }

    /// The blob stored in a `#Blob` column of a row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist and
    /// [`crate::Error::OutOfBounds`] if the heap entry is invalid.
    pub fn blob_at(&self, table: TableId, rid: u32, column: usize) -> Result<&[u8]> {
        self.blob.get(self.tables.value(table, rid, column)?)
    }

    /// Namespace and name of a `TypeDef` row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist.
    pub fn type_def_name(&self, rid: u32) -> Result<(&str, &str)> {
        Ok((
            self.string_at(TableId::TypeDef, rid, col::typedef::NAMESPACE)?,
            self.string_at(TableId::TypeDef, rid, col::typedef::NAME)?,
        ))
    }

    /// Namespace and name of a `TypeRef` row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist.
    pub fn type_ref_name(&self, rid: u32) -> Result<(&str, &str)> {
        Ok((
            self.string_at(TableId::TypeRef, rid, col::typeref::NAMESPACE)?,
            self.string_at(TableId::TypeRef, rid, col::typeref::NAME)?,
        ))
    }

    /// First `TypeDef` with the given namespace and name.
    #[must_use]
    pub fn find_type_def(&self, namespace: &str, name: &str) -> Option<u32> {
        (1..=self.tables.row_count(TableId::TypeDef))
            .find(|rid| matches!(self.type_def_name(*rid), Ok(found) if found == (namespace, name)))
    }

    /// First `TypeRef` with the given namespace and name, regardless of its scope.
    #[must_use]
    pub fn find_type_ref(&self, namespace: &str, name: &str) -> Option<u32> {
        (1..=self.tables.row_count(TableId::TypeRef))
            .find(|rid| matches!(self.type_ref_name(*rid), Ok(found) if found == (namespace, name)))
    }

    /// First `AssemblyRef` with the given simple name.
    #[must_use]
    pub fn find_assembly_ref(&self, name: &str) -> Option<u32> {
        (1..=self.tables.row_count(TableId::AssemblyRef)).find(|rid| {
            matches!(
                self.string_at(TableId::AssemblyRef, *rid, col::assemblyref::NAME),
                Ok(found) if found == name
            )
        })
    }

    /// Follow the resolution scope of a `TypeRef` through enclosing type references to the
    /// scope that is not itself a `TypeRef`.
    ///
    /// Returns `None` for a null scope or a cyclic chain.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for missing rows or invalid coded indices.
    pub fn outermost_scope(&self, type_ref: u32) -> Result<Option<(TableId, u32)>> {
        let mut current = type_ref;
        for _ in 0..=self.tables.row_count(TableId::TypeRef) {
            let scope = self.tables.value(TableId::TypeRef, current, col::typeref::SCOPE)?;
            match CodedIndexType::ResolutionScope.decode(scope)? {
                (_, 0) => return Ok(None),
                (TableId::TypeRef, rid) => current = rid,
                found => return Ok(Some(found)),
            }
        }

        Ok(None)
    }

    /// `MethodDef` rows owned by a `TypeDef`, as a half-open range.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the type does not exist.
    pub fn method_range(&self, type_def: u32) -> Result<Range<u32>> {
        let (start, end) = self.tables.list_range(
            TableId::TypeDef,
            type_def,
            col::typedef::METHOD_LIST,
            TableId::MethodDef,
        )?;
        Ok(start..end)
    }

    /// `Param` rows owned by a `MethodDef`, as a half-open range.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the method does not exist.
    pub fn param_range(&self, method: u32) -> Result<Range<u32>> {
        let (start, end) = self.tables.list_range(
            TableId::MethodDef,
            method,
            col::methoddef::PARAM_LIST,
            TableId::Param,
        )?;
        Ok(start..end)
    }

    /// The `TypeDef` owning a `MethodDef`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no type owns the method.
    pub fn declaring_type(&self, method: u32) -> Result<u32> {
        for type_def in 1..=self.tables.row_count(TableId::TypeDef) {
            if self.method_range(type_def)?.contains(&method) {
                return Ok(type_def);
            }
        }

        Err(malformed_error!("MethodDef {} is not owned by any type", method))
    }

    /// File offsets of all distinct IL method bodies of the original image.
    ///
    /// Bodies shared by several methods are listed once. Methods added in this session are
    /// not included, see [`CilAssembly::added_bodies`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a body RVA cannot be mapped.
    pub fn il_body_offsets(&self) -> Result<Vec<usize>> {
        let mut rvas: Vec<u32> = self
            .tables
            .rows(TableId::MethodDef)
            .iter()
            .filter(|row| {
                row[col::methoddef::RVA] != 0
                    && MethodImplCodeType::is_il(row[col::methoddef::IMPL_FLAGS])
            })
            .map(|row| row[col::methoddef::RVA])
            .collect();
        rvas.sort_unstable();
        rvas.dedup();

        rvas.into_iter()
            .map(|rva| self.file.rva_to_offset(rva))
            .collect()
    }

    /// Parse the body header of the original IL body at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid body.
    pub fn body_at(&self, offset: usize) -> Result<MethodBody> {
        match self.file.data().get(offset..) {
            Some(data) => MethodBody::from(data),
            None => Err(crate::Error::OutOfBounds),
        }
    }

    /// Register the body of a method added in this session.
    pub fn set_added_body(&mut self, method: u32, body: Vec<u8>) {
        self.added_bodies.insert(method, body);
    }

    /// The entry point token of the CLI header.
    #[must_use]
    pub fn entry_point(&self) -> Token {
        Token::new(self.cor20.entry_point_token)
    }

    /// Write the image to `path`, see [`crate::cilassembly::write`].
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteLayout`] if the new section cannot be placed and
    /// [`crate::Error::FileError`] for I/O failures.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write::write_assembly_to_file(self, path)
    }

    pub(crate) fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub(crate) fn set_entry_point(&mut self, token: Token) {
        self.cor20.entry_point_token = token.value();
    }

    pub(crate) fn blobs_mut(&mut self) -> &mut Blob {
        &mut self.blob
    }

    pub(crate) fn added_bodies_mut(&mut self) -> &mut BTreeMap<u32, Vec<u8>> {
        &mut self.added_bodies
    }

    pub(crate) fn root_flags(&self) -> u16 {
        self.root_flags
    }
}

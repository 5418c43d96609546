//! Row builders for the definitions and references the export pipeline adds.
//!
//! References (`TypeRef`, `MemberRef`) and new types are appended, which never renumbers
//! existing rows. Methods and parameters must stay inside their owner's list range and are
//! inserted at the end of it, which goes through [`CilAssembly::apply_remap`].

use crate::{
    cilassembly::{CilAssembly, RowRemap},
    metadata::{
        method::ParamAttributes,
        tables::{col, CodedIndexType, TableId},
    },
    Result,
};

/// A parameter of a method under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParam {
    /// Parameter name
    pub name: String,
    /// Native marshalling descriptor, emitted as a `FieldMarshal` row
    pub marshal: Option<Vec<u8>>,
}

impl NewParam {
    /// A parameter without marshalling information.
    #[must_use]
    pub fn new(name: &str) -> Self {
        NewParam {
            name: name.to_string(),
            marshal: None,
        }
    }

    /// A parameter marshalled with the given native type descriptor.
    #[must_use]
    pub fn marshalled(name: &str, native_type: &[u8]) -> Self {
        NewParam {
            name: name.to_string(),
            marshal: Some(native_type.to_vec()),
        }
    }
}

/// A method under construction.
#[derive(Debug, Clone)]
pub struct NewMethod {
    /// `MethodAttributes`
    pub flags: u32,
    /// `MethodImplAttributes`
    pub impl_flags: u32,
    /// Method name
    pub name: String,
    /// Encoded `MethodDefSig`
    pub signature: Vec<u8>,
    /// Parameters, in sequence order
    pub params: Vec<NewParam>,
    /// Complete method body, header included
    pub body: Vec<u8>,
}

impl CilAssembly {
    /// Append a `TypeRef` row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `scope` is not a valid resolution scope.
    pub fn add_type_ref(&mut self, scope: (TableId, u32), namespace: &str, name: &str) -> Result<u32> {
        let scope = CodedIndexType::ResolutionScope.encode(scope.0, scope.1)?;
        let name = self.add_string(name);
        let namespace = self.add_string(namespace);

        let rows = self.tables_mut().rows_mut(TableId::TypeRef);
        rows.push(vec![scope, name, namespace]);
        Ok(rows.len() as u32)
    }

    /// Find a `TypeRef` by scope, namespace and name, or append it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `scope` is not a valid resolution scope.
    pub fn get_or_add_type_ref(
        &mut self,
        scope: (TableId, u32),
        namespace: &str,
        name: &str,
    ) -> Result<u32> {
        let encoded = CodedIndexType::ResolutionScope.encode(scope.0, scope.1)?;
        for rid in 1..=self.tables().row_count(TableId::TypeRef) {
            if self.tables().value(TableId::TypeRef, rid, col::typeref::SCOPE)? == encoded
                && self.type_ref_name(rid)? == (namespace, name)
            {
                return Ok(rid);
            }
        }

        self.add_type_ref(scope, namespace, name)
    }

    /// Find a `MemberRef` by parent, name and signature bytes, or append it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `class` is not a valid member parent.
    pub fn get_or_add_member_ref(
        &mut self,
        class: (TableId, u32),
        name: &str,
        signature: &[u8],
    ) -> Result<u32> {
        let encoded = CodedIndexType::MemberRefParent.encode(class.0, class.1)?;
        for rid in 1..=self.tables().row_count(TableId::MemberRef) {
            if self.tables().value(TableId::MemberRef, rid, col::memberref::CLASS)? == encoded
                && self.string_at(TableId::MemberRef, rid, col::memberref::NAME)? == name
                && self.blob_at(TableId::MemberRef, rid, col::memberref::SIGNATURE)? == signature
            {
                return Ok(rid);
            }
        }

        let name = self.add_string(name);
        let signature = self.add_blob(signature)?;
        let rows = self.tables_mut().rows_mut(TableId::MemberRef);
        rows.push(vec![encoded, name, signature]);
        Ok(rows.len() as u32)
    }

    /// Append a top-level `TypeDef` row owning no fields and no methods.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `extends` is not a `TypeDefOrRef` target.
    pub fn add_type_def(
        &mut self,
        flags: u32,
        namespace: &str,
        name: &str,
        extends: (TableId, u32),
    ) -> Result<u32> {
        let extends = CodedIndexType::TypeDefOrRef.encode(extends.0, extends.1)?;
        let name = self.add_string(name);
        let namespace = self.add_string(namespace);
        let field_list = self.tables().row_count(TableId::Field) + 1;
        let method_list = self.tables().row_count(TableId::MethodDef) + 1;

        let rows = self.tables_mut().rows_mut(TableId::TypeDef);
        rows.push(vec![flags, name, namespace, extends, field_list, method_list]);
        Ok(rows.len() as u32)
    }

    /// Add a method with its parameters and body to the end of a type's method list.
    ///
    /// Parameters carrying a marshalling descriptor get `HasFieldMarshal` and a
    /// `FieldMarshal` row; `FieldMarshal` is left unsorted until
    /// [`CilAssembly::sort_tables`]. The body is stored with the added bodies and laid out
    /// by the writer, the `RVA` column stays 0 until then.
    ///
    /// Returns the `MethodDef` row of the new method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the type does not exist, and any error of
    /// [`CilAssembly::apply_remap`].
    pub fn add_method(&mut self, type_def: u32, method: NewMethod) -> Result<u32> {
        let position = self.method_range(type_def)?.end;
        let method_count = self.tables().row_count(TableId::MethodDef);
        let param_list = if position <= method_count {
            self.tables()
                .value(TableId::MethodDef, position, col::methoddef::PARAM_LIST)?
        } else {
            self.tables().row_count(TableId::Param) + 1
        };

        let name = self.add_string(&method.name);
        let signature = self.add_blob(&method.signature)?;
        let row = vec![0, method.impl_flags, method.flags, name, signature, param_list];

        let remap = RowRemap::insertion(
            TableId::MethodDef,
            method_count,
            position,
            1,
            Some((TableId::TypeDef, type_def)),
        );
        self.apply_remap(&remap, vec![row])?;
        self.set_added_body(position, method.body);

        if !method.params.is_empty() {
            self.add_params(position, &method.params)?;
        }

        Ok(position)
    }

    fn add_params(&mut self, method: u32, params: &[NewParam]) -> Result<()> {
        let position = self.param_range(method)?.end;
        let param_count = self.tables().row_count(TableId::Param);

        let mut rows = Vec::with_capacity(params.len());
        for (sequence, param) in params.iter().enumerate() {
            let flags = if param.marshal.is_some() {
                ParamAttributes::HAS_FIELD_MARSHAL.bits()
            } else {
                0
            };
            let name = self.add_string(&param.name);
            rows.push(vec![u32::from(flags), sequence as u32 + 1, name]);
        }

        let remap = RowRemap::insertion(
            TableId::Param,
            param_count,
            position,
            params.len() as u32,
            Some((TableId::MethodDef, method)),
        );
        self.apply_remap(&remap, rows)?;

        for (offset, param) in params.iter().enumerate() {
            if let Some(native_type) = &param.marshal {
                let parent = CodedIndexType::HasFieldMarshal
                    .encode(TableId::Param, position + offset as u32)?;
                let native_type = self.add_blob(native_type)?;
                self.tables_mut()
                    .rows_mut(TableId::FieldMarshal)
                    .push(vec![parent, native_type]);
            }
        }

        Ok(())
    }
}

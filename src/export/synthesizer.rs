//! Generation of the native entry point wrappers.
//!
//! Every exported kind gets one method in `Arma3.DllExport.DllExportWrapper`, a public
//! sealed class created on first use. The wrappers are `public static` with an unmanaged
//! `stdcall` signature and marshal their `string` parameters as `LPStr`:
//!
//! ```text
//! void  RVExtension(StringBuilder output, int32 outputSize, string function)
//! void  RVExtensionVersion(StringBuilder output, int32 outputSize)
//! int32 RVExtensionArgs(StringBuilder output, int32 outputSize, string function, string* argv, int32 argc)
//! ```
//!
//! The bodies forward to the marked method. For `RVExtension` and `RVExtensionVersion` the
//! returned string is appended to `output`; `RVExtensionArgs` passes `output` on and returns
//! the user's result unchanged.
//!
//! ```text
//! RVExtension:         ldarg.0  ldarg.2  call user  callvirt Append  pop  ret
//! RVExtensionVersion:  ldarg.0  call user  callvirt Append  pop  ret
//! RVExtensionArgs:     ldarg.0  ldarg.2  ldarg.3  ldarg.s 4  call user  ret
//! ```
//!
//! `RegisterCallback` and `ContextQuery` exports are accepted but produce no wrapper.

use crate::{
    cilassembly::{CilAssembly, NewMethod, NewParam},
    export::{ExportKind, ExportSet, WrapperEntry},
    metadata::{
        method::{MethodBody, TypeAttributes, NATIVE_TYPE_LPSTR},
        signatures::{encode_method_signature, SignatureMethod, TypeSignature, SIGNATURE_HEADER},
        tables::{col, TableId},
        token::Token,
    },
    module::TargetModule,
    Error::InvariantViolation,
    Result,
};

/// Namespace of the wrapper container
pub const WRAPPER_NAMESPACE: &str = "Arma3.DllExport";
/// Name of the wrapper container
pub const WRAPPER_TYPE_NAME: &str = "DllExportWrapper";
/// `public static hidebysig`
pub const WRAPPER_METHOD_FLAGS: u32 = 0x0096;
/// Assemblies that can define `System.Object`, in order of preference
pub const CORE_LIBRARY_NAMES: [&str; 4] = [
    "mscorlib",
    "System.Runtime",
    "netstandard",
    "System.Private.CoreLib",
];

const LDARG_0: u8 = 0x02;
const LDARG_2: u8 = 0x04;
const LDARG_3: u8 = 0x05;
const LDARG_S: u8 = 0x0E;
const CALL: u8 = 0x28;
const CALLVIRT: u8 = 0x6F;
const POP: u8 = 0x26;
const RET: u8 = 0x2A;

/// A parameter of a native entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeParam {
    /// `char *output`, as `StringBuilder`
    Output,
    /// `int outputSize`
    OutputSize,
    /// `const char *function`, as `[LPStr] string`
    Function,
    /// `const char **argv`, as `[LPStr] string*`
    Argv,
    /// `int argc`
    Argc,
}

const SIMPLE_CALL_PARAMS: [NativeParam; 3] = [
    NativeParam::Output,
    NativeParam::OutputSize,
    NativeParam::Function,
];
const VERSION_QUERY_PARAMS: [NativeParam; 2] = [NativeParam::Output, NativeParam::OutputSize];
const ARGS_CALL_PARAMS: [NativeParam; 5] = [
    NativeParam::Output,
    NativeParam::OutputSize,
    NativeParam::Function,
    NativeParam::Argv,
    NativeParam::Argc,
];

impl NativeParam {
    /// Parameters of the wrapper for `kind`, empty for kinds without a wrapper.
    #[must_use]
    pub fn for_kind(kind: ExportKind) -> &'static [NativeParam] {
        match kind {
            ExportKind::SimpleCall => &SIMPLE_CALL_PARAMS,
            ExportKind::VersionQuery => &VERSION_QUERY_PARAMS,
            ExportKind::ArgsCall => &ARGS_CALL_PARAMS,
            ExportKind::RegisterCallback | ExportKind::ContextQuery => &[],
        }
    }

    /// Parameter name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            NativeParam::Output => "output",
            NativeParam::OutputSize => "outputSize",
            NativeParam::Function => "function",
            NativeParam::Argv => "argv",
            NativeParam::Argc => "argc",
        }
    }

    /// Managed type, `string_builder` being the `System.Text.StringBuilder` reference.
    #[must_use]
    pub fn type_signature(self, string_builder: Token) -> TypeSignature {
        match self {
            NativeParam::Output => TypeSignature::Class(string_builder),
            NativeParam::OutputSize | NativeParam::Argc => TypeSignature::I4,
            NativeParam::Function => TypeSignature::String,
            NativeParam::Argv => TypeSignature::Ptr(Box::new(TypeSignature::String)),
        }
    }

    /// `true` for parameters marshalled as `LPStr`.
    #[must_use]
    pub fn is_lpstr(self) -> bool {
        matches!(self, NativeParam::Function | NativeParam::Argv)
    }

    fn new_param(self) -> NewParam {
        if self.is_lpstr() {
            NewParam::marshalled(self.name(), &[NATIVE_TYPE_LPSTR])
        } else {
            NewParam::new(self.name())
        }
    }
}

/// Add a wrapper for every candidate with a wrapped kind, in candidate order.
///
/// Adding a method to an existing container that is not the last type renumbers the
/// methods behind it; the candidate tokens in `exports` are kept current.
///
/// Returns the wrappers in candidate order, empty if no candidate has a wrapped kind, in
/// which case the module is left untouched.
///
/// # Errors
/// Returns [`crate::Error::InvariantViolation`] if the container already has a method with
/// a wrapper's name, and [`crate::Error::Malformed`] if the module references no core
/// library or its metadata is invalid.
pub fn synthesize(module: &mut TargetModule, exports: &mut ExportSet) -> Result<Vec<WrapperEntry>> {
    for candidate in exports.iter().filter(|c| !c.kind.has_wrapper()) {
        log::warn!(
            "{} on '{}' is not supported yet, no export is generated for it",
            candidate.kind,
            candidate.full_name()
        );
    }
    if !exports.iter().any(|c| c.kind.has_wrapper()) {
        return Ok(Vec::new());
    }

    let assembly = module.assembly_mut();
    let scope = core_library_scope(assembly)?;

    let object = match assembly.find_type_ref("System", "Object") {
        Some(rid) => rid,
        None => assembly.add_type_ref(scope, "System", "Object")?,
    };
    let container = match assembly.find_type_def(WRAPPER_NAMESPACE, WRAPPER_TYPE_NAME) {
        Some(rid) => {
            log::debug!("Reusing existing {}.{}", WRAPPER_NAMESPACE, WRAPPER_TYPE_NAME);
            rid
        }
        None => assembly.add_type_def(
            (TypeAttributes::PUBLIC | TypeAttributes::SEALED).bits(),
            WRAPPER_NAMESPACE,
            WRAPPER_TYPE_NAME,
            (TableId::TypeRef, object),
        )?,
    };

    let string_builder = Token::from_parts(
        TableId::TypeRef,
        assembly.get_or_add_type_ref(scope, "System.Text", "StringBuilder")?,
    );
    let append = if exports.iter().any(|c| {
        matches!(c.kind, ExportKind::SimpleCall | ExportKind::VersionQuery)
    }) {
        Some(append_reference(assembly, string_builder)?)
    } else {
        None
    };

    let mut wrappers: Vec<WrapperEntry> = Vec::new();
    let work: Vec<(usize, ExportKind)> = exports
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind.has_wrapper())
        .map(|(index, c)| (index, c.kind))
        .collect();

    for (index, kind) in work {
        let name = kind.wrapper_name();
        let methods = assembly.method_range(container)?;
        for rid in methods.clone() {
            if assembly.string_at(TableId::MethodDef, rid, col::methoddef::NAME)? == name {
                return Err(InvariantViolation(format!(
                    "{}.{} already contains a method named '{}'",
                    WRAPPER_NAMESPACE, WRAPPER_TYPE_NAME, name
                )));
            }
        }

        // the new row goes to the end of the container and pushes everything behind it
        let position = methods.end;
        let mut target = exports
            .iter()
            .nth(index)
            .map(|c| c.method)
            .ok_or_else(|| InvariantViolation(format!("candidate {index} vanished")))?;
        if target.row() >= position {
            target = Token::from_parts(TableId::MethodDef, target.row() + 1);
        }

        let params = NativeParam::for_kind(kind);
        let return_type = if kind == ExportKind::ArgsCall {
            TypeSignature::I4
        } else {
            TypeSignature::Void
        };
        let signature = encode_method_signature(&SignatureMethod::new_static(
            SIGNATURE_HEADER::STDCALL,
            return_type,
            params.iter().map(|p| p.type_signature(string_builder)).collect(),
        ))?;

        let rid = assembly.add_method(
            container,
            NewMethod {
                flags: WRAPPER_METHOD_FLAGS,
                impl_flags: 0,
                name: name.to_string(),
                signature,
                params: params.iter().map(|p| p.new_param()).collect(),
                body: MethodBody::encode_tiny(&wrapper_code(kind, target, append)?)?,
            },
        )?;

        for candidate in exports.iter_mut() {
            candidate.method = shifted(candidate.method, rid);
        }
        for wrapper in &mut wrappers {
            wrapper.method = shifted(wrapper.method, rid);
        }

        log::debug!("Added {} forwarding to {}", name, target);
        wrappers.push(WrapperEntry {
            kind,
            name,
            method: Token::from_parts(TableId::MethodDef, rid),
            calling_convention: SIGNATURE_HEADER::STDCALL,
            params,
        });
    }

    Ok(wrappers)
}

/// The resolution scope `System.Object` comes from.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if neither an `Object` reference nor a known core
/// library reference exists.
pub fn core_library_scope(assembly: &CilAssembly) -> Result<(TableId, u32)> {
    if let Some(object) = assembly.find_type_ref("System", "Object") {
        if let Some(scope) = assembly.outermost_scope(object)? {
            return Ok(scope);
        }
    }

    CORE_LIBRARY_NAMES
        .iter()
        .find_map(|name| assembly.find_assembly_ref(name))
        .map(|rid| (TableId::AssemblyRef, rid))
        .ok_or_else(|| malformed_error!("Module does not reference a core library"))
}

/// `StringBuilder StringBuilder::Append(string)`
fn append_reference(assembly: &mut CilAssembly, string_builder: Token) -> Result<Token> {
    let signature = encode_method_signature(&SignatureMethod {
        has_this: true,
        ..SignatureMethod::new_static(
            SIGNATURE_HEADER::DEFAULT,
            TypeSignature::Class(string_builder),
            vec![TypeSignature::String],
        )
    })?;
    let rid = assembly.get_or_add_member_ref(
        (TableId::TypeRef, string_builder.row()),
        "Append",
        &signature,
    )?;
    Ok(Token::from_parts(TableId::MemberRef, rid))
}

fn wrapper_code(kind: ExportKind, target: Token, append: Option<Token>) -> Result<Vec<u8>> {
    fn emit_token(code: &mut Vec<u8>, opcode: u8, token: Token) {
        code.push(opcode);
        code.extend_from_slice(&token.value().to_le_bytes());
    }

    let mut code = Vec::with_capacity(16);

    match kind {
        ExportKind::SimpleCall | ExportKind::VersionQuery => {
            let Some(append) = append else {
                return Err(InvariantViolation(
                    "StringBuilder::Append reference missing".to_string(),
                ));
            };
            code.push(LDARG_0);
            if kind == ExportKind::SimpleCall {
                code.push(LDARG_2);
            }
            emit_token(&mut code, CALL, target);
            emit_token(&mut code, CALLVIRT, append);
            code.extend_from_slice(&[POP, RET]);
        }
        ExportKind::ArgsCall => {
            code.extend_from_slice(&[LDARG_0, LDARG_2, LDARG_3, LDARG_S, 4]);
            emit_token(&mut code, CALL, target);
            code.push(RET);
        }
        ExportKind::RegisterCallback | ExportKind::ContextQuery => {
            return Err(InvariantViolation(format!("{kind} has no wrapper")));
        }
    }

    Ok(code)
}

fn shifted(token: Token, inserted: u32) -> Token {
    if token.table_id() == Some(TableId::MethodDef) && token.row() >= inserted {
        Token::from_parts(TableId::MethodDef, token.row() + 1)
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        export::discover,
        metadata::tables::CodedIndexType,
        test::FixtureBuilder,
        Error,
    };
    use tempfile::tempdir;

    fn open(builder: FixtureBuilder) -> (TargetModule, ExportSet) {
        let dir = tempdir().unwrap();
        let path = builder.write_to(dir.path(), "Extension.dll");
        let module = TargetModule::open(&path).unwrap();
        let exports = discover(&module).unwrap();
        (module, exports)
    }

    #[test]
    fn simple_and_version_wrappers() {
        let (mut module, mut exports) =
            open(FixtureBuilder::x64().export("Invoke", 0).export("Version", 1));
        let wrappers = synthesize(&mut module, &mut exports).unwrap();

        let names: Vec<&str> = wrappers.iter().map(|w| w.name).collect();
        assert_eq!(names, ["RVExtension", "RVExtensionVersion"]);
        assert_eq!(wrappers[0].method, Token::new(0x0600_0004));
        assert_eq!(wrappers[1].method, Token::new(0x0600_0005));
        assert_eq!(wrappers[0].calling_convention, SIGNATURE_HEADER::STDCALL);
        assert_eq!(wrappers[1].params, &VERSION_QUERY_PARAMS);

        let assembly = module.assembly();
        let container = assembly
            .find_type_def(WRAPPER_NAMESPACE, WRAPPER_TYPE_NAME)
            .unwrap();
        assert_eq!(container, 3);
        assert_eq!(
            assembly.tables().value(TableId::TypeDef, container, col::typedef::FLAGS).unwrap(),
            0x101
        );
        assert_eq!(assembly.method_range(container).unwrap(), 4..6);

        // StringBuilder is TypeRef 4, Append is MemberRef 3
        assert_eq!(assembly.type_ref_name(4).unwrap(), ("System.Text", "StringBuilder"));
        assert_eq!(
            assembly.blob_at(TableId::MemberRef, 3, col::memberref::SIGNATURE).unwrap(),
            &[0x20, 0x01, 0x12, 0x11, 0x0E]
        );

        #[rustfmt::skip]
        let simple: [u8; 15] = [
            0x3A,
            0x02, 0x04,
            0x28, 0x02, 0x00, 0x00, 0x06,
            0x6F, 0x03, 0x00, 0x00, 0x0A,
            0x26, 0x2A,
        ];
        assert_eq!(assembly.added_bodies().get(&4).unwrap(), &simple);

        #[rustfmt::skip]
        let version: [u8; 14] = [
            0x36,
            0x02,
            0x28, 0x03, 0x00, 0x00, 0x06,
            0x6F, 0x03, 0x00, 0x00, 0x0A,
            0x26, 0x2A,
        ];
        assert_eq!(assembly.added_bodies().get(&5).unwrap(), &version);

        assert_eq!(
            assembly.blob_at(TableId::MethodDef, 4, col::methoddef::SIGNATURE).unwrap(),
            &[0x02, 0x03, 0x01, 0x12, 0x11, 0x08, 0x0E]
        );
        assert_eq!(
            assembly.blob_at(TableId::MethodDef, 5, col::methoddef::SIGNATURE).unwrap(),
            &[0x02, 0x02, 0x01, 0x12, 0x11, 0x08]
        );
        assert_eq!(
            assembly.tables().value(TableId::MethodDef, 4, col::methoddef::FLAGS).unwrap(),
            WRAPPER_METHOD_FLAGS
        );
    }

    #[test]
    fn args_wrapper_reuses_string_builder() {
        let (mut module, mut exports) = open(FixtureBuilder::x86().export("Args", 2));
        let type_refs = module.assembly().tables().row_count(TableId::TypeRef);
        let member_refs = module.assembly().tables().row_count(TableId::MemberRef);

        let wrappers = synthesize(&mut module, &mut exports).unwrap();
        assert_eq!(wrappers.len(), 1);
        assert_eq!(wrappers[0].kind, ExportKind::ArgsCall);

        let assembly = module.assembly();
        assert_eq!(assembly.tables().row_count(TableId::TypeRef), type_refs);
        assert_eq!(assembly.tables().row_count(TableId::MemberRef), member_refs);

        let rid = wrappers[0].method.row();
        #[rustfmt::skip]
        let body: [u8; 12] = [
            0x2E,
            0x02, 0x04, 0x05, 0x0E, 0x04,
            0x28, 0x02, 0x00, 0x00, 0x06,
            0x2A,
        ];
        assert_eq!(assembly.added_bodies().get(&rid).unwrap(), &body);
        assert_eq!(
            assembly.blob_at(TableId::MethodDef, rid, col::methoddef::SIGNATURE).unwrap(),
            &[0x02, 0x05, 0x08, 0x12, 0x11, 0x08, 0x0E, 0x0F, 0x0E, 0x08]
        );

        let params = assembly.param_range(rid).unwrap();
        let names: Vec<&str> = params
            .clone()
            .map(|p| assembly.string_at(TableId::Param, p, col::param::NAME).unwrap())
            .collect();
        assert_eq!(names, ["output", "outputSize", "function", "argv", "argc"]);

        let marshalled: Vec<u32> = assembly
            .tables()
            .rows(TableId::FieldMarshal)
            .iter()
            .map(|row| CodedIndexType::HasFieldMarshal.decode(row[0]).unwrap().1)
            .collect();
        assert_eq!(marshalled, [params.start + 2, params.start + 3]);
    }

    #[test]
    fn unwrapped_kinds_leave_module_untouched() {
        let (mut module, mut exports) =
            open(FixtureBuilder::x64().export("Callback", 3).export("Context", 4));
        let type_defs = module.assembly().tables().row_count(TableId::TypeDef);

        let wrappers = synthesize(&mut module, &mut exports).unwrap();
        assert!(wrappers.is_empty());
        assert_eq!(module.assembly().tables().row_count(TableId::TypeDef), type_defs);
        assert!(module.assembly().added_bodies().is_empty());
    }

    #[test]
    fn existing_wrapper_is_an_invariant_violation() {
        let (mut module, mut exports) = open(FixtureBuilder::x64().export("Invoke", 0));
        synthesize(&mut module, &mut exports).unwrap();

        assert!(matches!(
            synthesize(&mut module, &mut exports),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn existing_container_is_reused() {
        let (mut module, mut exports) = open(FixtureBuilder::x64().export("Version", 1));
        let container = module
            .assembly_mut()
            .add_type_def(0x101, WRAPPER_NAMESPACE, WRAPPER_TYPE_NAME, (TableId::TypeRef, 1))
            .unwrap();

        synthesize(&mut module, &mut exports).unwrap();
        assert_eq!(module.assembly().tables().row_count(TableId::TypeDef), container);
        assert_eq!(module.assembly().method_range(container).unwrap().len(), 1);
    }

    #[test]
    fn core_library_fallback_by_name() {
        let (mut module, _) = open(FixtureBuilder::x64());
        assert_eq!(
            core_library_scope(module.assembly()).unwrap(),
            (TableId::AssemblyRef, 1)
        );

        // rename System.Object, leaving only the assembly name to go by
        let name = module.assembly_mut().add_string("Nothing");
        module
            .assembly_mut()
            .tables_mut()
            .set_value(TableId::TypeRef, 1, col::typeref::NAME, name)
            .unwrap();
        assert_eq!(
            core_library_scope(module.assembly()).unwrap(),
            (TableId::AssemblyRef, 1)
        );
    }

    #[test]
    fn shifting() {
        let token = Token::from_parts(TableId::MethodDef, 5);
        assert_eq!(shifted(token, 5).row(), 6);
        assert_eq!(shifted(token, 6).row(), 5);
        let type_ref = Token::from_parts(TableId::TypeRef, 5);
        assert_eq!(shifted(type_ref, 1), type_ref);
    }
}

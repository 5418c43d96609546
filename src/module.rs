//! The library under mutation.
//!
//! [`TargetModule`] couples the editable metadata image with what the pipeline needs to know
//! about the binary before touching it: the architecture the native exports are decorated
//! for, whether line numbers are worth carrying through the disassembly, and whether the
//! module is a library at all.
//!
//! # Architecture detection
//!
//! | COFF machine | `32BITREQUIRED` | Result                          |
//! |--------------|-----------------|---------------------------------|
//! | `AMD64`      | any             | [`Architecture::X64`]           |
//! | `I386`       | set             | [`Architecture::X86`]           |
//! | `I386`       | clear           | [`Architecture::Ambiguous`]     |
//! | other        | any             | [`Architecture::Ambiguous`]     |
//!
//! An `I386` image without `32BITREQUIRED` is what a platform-neutral ("AnyCPU") build
//! produces; such a module runs as 64-bit in a 64-bit host, so neither decoration would be
//! correct for it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use rvexport::TargetModule;
//! use std::path::Path;
//!
//! let module = TargetModule::open(Path::new("MyExtension.dll"))?;
//! for info in module.types()? {
//!     println!("{}.{}: {} methods", info.namespace, info.name, info.methods.len());
//! }
//! # Ok::<(), rvexport::Error>(())
//! ```

use std::{
    fmt,
    ops::Range,
    path::{Path, PathBuf},
};

use crate::{
    cilassembly::CilAssembly,
    file::{File, MACHINE_AMD64, MACHINE_I386},
    metadata::{
        cor20header::CorFlags,
        tables::{col, TableId},
        token::Token,
    },
    Error::{AmbiguousArchitecture, UnsupportedModuleKind},
    Result,
};

/// The native architecture a module is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 32-bit, exports are decorated `_Name@StackSize`
    X86,
    /// 64-bit, exports keep their plain name
    X64,
    /// Platform-neutral or unknown
    Ambiguous,
}

impl Architecture {
    /// Classify a COFF machine value and the CLI header flags.
    #[must_use]
    pub fn detect(machine: u16, cor_flags: u32) -> Architecture {
        match machine {
            MACHINE_AMD64 => Architecture::X64,
            MACHINE_I386
                if CorFlags::from_bits_truncate(cor_flags).contains(CorFlags::REQUIRED_32BIT) =>
            {
                Architecture::X86
            }
            _ => Architecture::Ambiguous,
        }
    }

    /// Target switch of the IL assembler, `None` for [`Architecture::Ambiguous`].
    #[must_use]
    pub fn ilasm_switch(self) -> Option<&'static str> {
        match self {
            Architecture::X86 => Some("/X86"),
            Architecture::X64 => Some("/X64"),
            Architecture::Ambiguous => None,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X64 => write!(f, "x64"),
            Architecture::Ambiguous => write!(f, "AnyCPU"),
        }
    }
}

/// Whether the module is a library or an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// `IMAGE_FILE_DLL` is set
    Library,
    /// Anything else
    Executable,
}

/// A `TypeDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// `TypeDef` token
    pub token: Token,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// `TypeAttributes`
    pub flags: u32,
    /// Owned `MethodDef` rows, half-open
    pub methods: Range<u32>,
}

/// A `MethodDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// `MethodDef` token
    pub token: Token,
    /// Simple name
    pub name: String,
    /// `MethodAttributes`
    pub flags: u32,
    /// Raw `MethodDefSig` blob
    pub signature: Vec<u8>,
}

/// A compiled .NET library opened for export injection.
pub struct TargetModule {
    path: PathBuf,
    architecture: Architecture,
    kind: ModuleKind,
    has_debug_info: bool,
    debug_companion: Option<PathBuf>,
    assembly: CilAssembly,
    injected: bool,
}

impl TargetModule {
    /// Open the library at `path`.
    ///
    /// The image is read into memory; the file on disk is not kept open and may be
    /// overwritten later.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedModuleKind`] if the image is not a DLL,
    /// [`crate::Error::AmbiguousArchitecture`] if it is not pinned to x86 or x64, and any
    /// error of [`File::from_file`] and [`CilAssembly::from_file`] for unreadable or
    /// malformed input.
    pub fn open(path: &Path) -> Result<TargetModule> {
        let file = File::from_file(path)?;
        let kind = if file.is_dll() {
            ModuleKind::Library
        } else {
            ModuleKind::Executable
        };
        if kind != ModuleKind::Library {
            return Err(UnsupportedModuleKind);
        }

        let machine = file.machine();
        let has_debug_info = file.debug_directory().is_some();
        let assembly = CilAssembly::from_file(file)?;

        let cor_flags = assembly.cor20header().flags;
        let architecture = Architecture::detect(machine, cor_flags);
        if architecture == Architecture::Ambiguous {
            return Err(AmbiguousArchitecture { machine, cor_flags });
        }

        let debug_companion = Some(path.with_extension("pdb")).filter(|pdb| pdb.is_file());
        if let Some(pdb) = &debug_companion {
            log::info!("Using debug symbols from {}", pdb.display());
        }

        log::debug!(
            "Opened {} ({}, debug info: {})",
            path.display(),
            architecture,
            has_debug_info
        );

        Ok(TargetModule {
            path: path.to_path_buf(),
            architecture,
            kind,
            has_debug_info,
            debug_companion,
            assembly,
            injected: false,
        })
    }

    /// Path the module was opened from, and is written back to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The pinned architecture, never [`Architecture::Ambiguous`].
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Always [`ModuleKind::Library`] for an opened module.
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// `true` if the image has a debug directory.
    #[must_use]
    pub fn has_debug_info(&self) -> bool {
        self.has_debug_info
    }

    /// The `.pdb` next to the module, if there is one.
    #[must_use]
    pub fn debug_companion(&self) -> Option<&Path> {
        self.debug_companion.as_deref()
    }

    /// The metadata image.
    #[must_use]
    pub fn assembly(&self) -> &CilAssembly {
        &self.assembly
    }

    /// The metadata image, mutable.
    pub fn assembly_mut(&mut self) -> &mut CilAssembly {
        &mut self.assembly
    }

    /// Every type, in `TypeDef` order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for rows with invalid heap or list references.
    pub fn types(&self) -> Result<Vec<TypeInfo>> {
        let assembly = &self.assembly;
        (1..=assembly.tables().row_count(TableId::TypeDef))
            .map(|rid| {
                let (namespace, name) = assembly.type_def_name(rid)?;
                Ok(TypeInfo {
                    token: Token::from_parts(TableId::TypeDef, rid),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    flags: assembly.tables().value(TableId::TypeDef, rid, col::typedef::FLAGS)?,
                    methods: assembly.method_range(rid)?,
                })
            })
            .collect()
    }

    /// The methods of a type, in `MethodDef` order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for rows with invalid heap references and
    /// [`crate::Error::OutOfBounds`] for invalid signature blobs.
    pub fn methods(&self, owner: &TypeInfo) -> Result<Vec<MethodInfo>> {
        let assembly = &self.assembly;
        owner
            .methods
            .clone()
            .map(|rid| {
                Ok(MethodInfo {
                    token: Token::from_parts(TableId::MethodDef, rid),
                    name: assembly
                        .string_at(TableId::MethodDef, rid, col::methoddef::NAME)?
                        .to_string(),
                    flags: assembly.tables().value(TableId::MethodDef, rid, col::methoddef::FLAGS)?,
                    signature: assembly
                        .blob_at(TableId::MethodDef, rid, col::methoddef::SIGNATURE)?
                        .to_vec(),
                })
            })
            .collect()
    }

    /// `Namespace.Type::Method` of a `MethodDef` row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the method or its owner does not exist.
    pub fn method_full_name(&self, method: u32) -> Result<String> {
        let assembly = &self.assembly;
        let (namespace, type_name) = assembly.type_def_name(assembly.declaring_type(method)?)?;
        let name = assembly.string_at(TableId::MethodDef, method, col::methoddef::NAME)?;
        if namespace.is_empty() {
            Ok(format!("{type_name}::{name}"))
        } else {
            Ok(format!("{namespace}.{type_name}::{name}"))
        }
    }

    /// `true` once an export run has started on this instance.
    #[must_use]
    pub fn is_injected(&self) -> bool {
        self.injected
    }

    pub(crate) fn mark_injected(&mut self) {
        self.injected = true;
    }
}

//! Native export injection for Arma 3 extensions.
//!
//! Methods marked with `[ArmaDllExport(ArmaExport.X)]` are turned into native entry points
//! in four steps, each in its own module:
//!
//! - [`discovery`] finds and validates the marked methods
//! - [`synthesizer`] adds a `stdcall` wrapper per export to `Arma3.DllExport.DllExportWrapper`
//! - [`sanitizer`] strips the marker attributes and, where possible, the marker library reference
//! - [`patcher`] inserts the `.vtentry`/`.export` directives into the disassembled wrapper class
//!
//! The first three operate on the metadata of a [`crate::TargetModule`], the last one on the
//! text produced by the IL disassembler. [`crate::DllExporter`] runs them in order.

pub mod discovery;
pub mod kind;
pub mod patcher;
pub mod sanitizer;
pub mod synthesizer;

use std::fmt;

use crate::{metadata::token::Token, module::Architecture};

pub use discovery::{discover, MARKER_ATTRIBUTE_NAME};
pub use kind::{ExportKind, OUTPUT_BUFFER_MIN_CAPACITY};
pub use patcher::{patch_file, patch_lines};
pub use sanitizer::{sanitize, SanitizeReport};
pub use synthesizer::{synthesize, NativeParam, WRAPPER_NAMESPACE, WRAPPER_TYPE_NAME};

/// A method marked for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportCandidate {
    /// The requested entry point
    pub kind: ExportKind,
    /// `MethodDef` token of the marked method
    pub method: Token,
    /// Simple name of the marked method
    pub method_name: String,
    /// Namespace of the declaring type
    pub type_namespace: String,
    /// Simple name of the declaring type
    pub type_name: String,
    /// Accessibility is `public`
    pub is_public: bool,
    /// The method is `static`
    pub is_static: bool,
}

impl ExportCandidate {
    /// `Namespace.Type::Method`
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.type_namespace.is_empty() {
            format!("{}::{}", self.type_name, self.method_name)
        } else {
            format!(
                "{}.{}::{}",
                self.type_namespace, self.type_name, self.method_name
            )
        }
    }
}

/// The validated export candidates of a module, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSet {
    candidates: Vec<ExportCandidate>,
}

impl ExportSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        ExportSet::default()
    }

    /// Append a candidate. Uniqueness per kind is checked by [`discover`].
    pub fn push(&mut self, candidate: ExportCandidate) {
        self.candidates.push(candidate);
    }

    /// `true` if no method is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// The candidate for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: ExportKind) -> Option<&ExportCandidate> {
        self.candidates.iter().find(|c| c.kind == kind)
    }

    /// Candidates in discovery order.
    pub fn iter(&self) -> std::slice::Iter<'_, ExportCandidate> {
        self.candidates.iter()
    }

    /// The export directives the candidates produce on `architecture`, see
    /// [`directives_for`].
    #[must_use]
    pub fn planned_directives(&self, architecture: Architecture) -> Vec<ExportDirective> {
        directives_for(
            self.iter()
                .map(|candidate| candidate.kind)
                .filter(|kind| kind.has_wrapper()),
            architecture,
        )
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, ExportCandidate> {
        self.candidates.iter_mut()
    }
}

impl<'a> IntoIterator for &'a ExportSet {
    type Item = &'a ExportCandidate;
    type IntoIter = std::slice::Iter<'a, ExportCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

/// A synthesized wrapper method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperEntry {
    /// The entry point it implements
    pub kind: ExportKind,
    /// Method name, [`ExportKind::wrapper_name`]
    pub name: &'static str,
    /// `MethodDef` token of the wrapper
    pub method: Token,
    /// `MethodDefSig` calling convention, always unmanaged `stdcall`
    pub calling_convention: u8,
    /// Native parameters, in order
    pub params: &'static [NativeParam],
}

/// An `(ordinal, symbol)` entry of the native export table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportDirective {
    /// 1-based ordinal, also the `.vtentry` slot
    pub ordinal: u32,
    /// Decorated symbol name
    pub name: String,
}

impl fmt::Display for ExportDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} {}", self.ordinal, self.name)
    }
}

/// Number `kinds` from 1 in the given order and decorate their names for `architecture`.
///
/// ```rust
/// use rvexport::{directives_for, Architecture, ExportKind};
///
/// let directives = directives_for([ExportKind::VersionQuery, ExportKind::SimpleCall], Architecture::X86);
/// assert_eq!(directives[0].ordinal, 1);
/// assert_eq!(directives[0].name, "_RVExtensionVersion@8");
/// assert_eq!(directives[1].name, "_RVExtension@12");
/// ```
pub fn directives_for<I>(kinds: I, architecture: Architecture) -> Vec<ExportDirective>
where
    I: IntoIterator<Item = ExportKind>,
{
    kinds
        .into_iter()
        .zip(1..)
        .map(|(kind, ordinal)| ExportDirective {
            ordinal,
            name: kind.decorated_name(architecture),
        })
        .collect()
}

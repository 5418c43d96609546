//! The entry points an extension can export and how they are named natively.
//!
//! The enum values match the `ArmaExport` enum of the marker library in declaration order.

use std::fmt;

use strum::EnumIter;

use crate::{module::Architecture, Error::UnknownExportKind, Result};

/// Smallest output buffer the host hands to an extension, in bytes.
///
/// The wrappers append to the buffer through a `StringBuilder`; this is the capacity the
/// native side guarantees for a single call.
pub const OUTPUT_BUFFER_MIN_CAPACITY: usize = 10240;

/// The native entry point a method is exported as.
///
/// Discriminants are the values of the marker library's `ArmaExport` enum, which is what
/// the marker attribute stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum ExportKind {
    /// `void RVExtension(char *output, int outputSize, const char *function)`
    SimpleCall = 0,
    /// `void RVExtensionVersion(char *output, int outputSize)`
    VersionQuery = 1,
    /// `int RVExtensionArgs(char *output, int outputSize, const char *function, const char **argv, int argc)`
    ArgsCall = 2,
    /// `void RVExtensionRegisterCallback(callback)`
    RegisterCallback = 3,
    /// `void RVExtensionContext(const char **args, int argsCnt)`
    ContextQuery = 4,
}

impl ExportKind {
    /// Map a marker value to its kind.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownExportKind`] for values outside `0..=4`.
    pub fn from_value(value: i32) -> Result<ExportKind> {
        match value {
            0 => Ok(ExportKind::SimpleCall),
            1 => Ok(ExportKind::VersionQuery),
            2 => Ok(ExportKind::ArgsCall),
            3 => Ok(ExportKind::RegisterCallback),
            4 => Ok(ExportKind::ContextQuery),
            _ => Err(UnknownExportKind(value)),
        }
    }

    /// The marker value of this kind.
    #[must_use]
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Name of the generated wrapper and of the undecorated export.
    #[must_use]
    pub fn wrapper_name(self) -> &'static str {
        match self {
            ExportKind::SimpleCall => "RVExtension",
            ExportKind::VersionQuery => "RVExtensionVersion",
            ExportKind::ArgsCall => "RVExtensionArgs",
            ExportKind::RegisterCallback => "RVExtensionRegisterCallback",
            ExportKind::ContextQuery => "RVExtensionContext",
        }
    }

    /// Bytes of arguments the native caller pushes under 32-bit stdcall.
    #[must_use]
    pub fn stack_size(self) -> u32 {
        match self {
            ExportKind::SimpleCall => 12,
            ExportKind::VersionQuery => 8,
            ExportKind::ArgsCall => 20,
            ExportKind::RegisterCallback => 4,
            ExportKind::ContextQuery => 8,
        }
    }

    /// `true` for the kinds a wrapper is generated for.
    ///
    /// `RegisterCallback` and `ContextQuery` are recognized and validated, but not
    /// exported yet.
    #[must_use]
    pub fn has_wrapper(self) -> bool {
        matches!(
            self,
            ExportKind::SimpleCall | ExportKind::VersionQuery | ExportKind::ArgsCall
        )
    }

    /// Symbol name of the export on `architecture`.
    ///
    /// x86 uses the stdcall decoration `_Name@StackSize`, everything else the plain name.
    ///
    /// ```rust
    /// use rvexport::{Architecture, ExportKind};
    ///
    /// assert_eq!(ExportKind::SimpleCall.decorated_name(Architecture::X86), "_RVExtension@12");
    /// assert_eq!(ExportKind::SimpleCall.decorated_name(Architecture::X64), "RVExtension");
    /// ```
    #[must_use]
    pub fn decorated_name(self, architecture: Architecture) -> String {
        match architecture {
            Architecture::X86 => format!("_{}@{}", self.wrapper_name(), self.stack_size()),
            Architecture::X64 | Architecture::Ambiguous => self.wrapper_name().to_string(),
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wrapper_name())
    }
}

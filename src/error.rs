use thiserror::Error;

use crate::{export::ExportKind, exporter::ToolRole};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every stage of the export pipeline reports through this type. Errors are never recovered
/// internally: the first failure aborts the run and is handed to the caller unchanged.
///
/// # Error Categories
///
/// ## Configuration Errors (raised before any mutation)
/// - [`Error::AmbiguousArchitecture`] - The module is neither pinned to x86 nor to x64
/// - [`Error::UnsupportedModuleKind`] - The module is not a library
/// - [`Error::MissingToolPath`] - A required external tool is not configured or does not exist
///
/// ## Discovery Errors (raised before any mutation)
/// - [`Error::DuplicateExportDeclaration`] - Two methods claim the same export kind
/// - [`Error::InvalidExportSignature`] - A marked method is not public and static
/// - [`Error::UnknownExportKind`] - The marker carries a value outside the known kinds
///
/// ## Pipeline Errors
/// - [`Error::InvariantViolation`] - The pipeline's own output does not look as expected
/// - [`Error::ExternalToolFailure`] - The disassembler or reassembler exited unsuccessfully
/// - [`Error::ToolSpawn`] - The disassembler or reassembler could not be started
/// - [`Error::AlreadyInjected`] - The module has already been processed once
///
/// ## File Parsing and Writing Errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a buffer
/// - [`Error::NotSupported`] - Unsupported file format or metadata feature
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::WriteLayout`] - The rewritten image could not be laid out
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
///
/// # Examples
///
/// ```rust,no_run
/// use rvexport::{Error, TargetModule};
/// use std::path::Path;
///
/// match TargetModule::open(Path::new("MyExtension.dll")) {
///     Ok(module) => println!("{} module", module.architecture()),
///     Err(Error::AmbiguousArchitecture { .. }) => eprintln!("Build for x86 or x64"),
///     Err(e) => eprintln!("{e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    /// The module's architecture cannot be pinned to x86 or x64.
    ///
    /// Raised for platform-neutral builds (machine `I386` without the `32BITREQUIRED`
    /// CLI flag) and for any machine type other than `I386` or `AMD64`.
    #[error("Ambiguous architecture (machine 0x{machine:04X}, CLI flags 0x{cor_flags:08X}) - build the library for x86 or x64")]
    AmbiguousArchitecture {
        /// The COFF machine field of the module
        machine: u16,
        /// The flags of the CLI header
        cor_flags: u32,
    },

    /// The module is not a library (DLL).
    #[error("Only libraries are supported")]
    UnsupportedModuleKind,

    /// A required external tool path is missing, empty, or does not exist.
    #[error("No usable path configured for {0}")]
    MissingToolPath(ToolRole),

    // Discovery errors
    /// More than one method is marked for the same export kind.
    #[error("Multiple methods are marked for export as {0}; only one is allowed per kind")]
    DuplicateExportDeclaration(ExportKind),

    /// A marked method does not have the required accessibility.
    ///
    /// Export methods must be both public and static.
    #[error("The export method '{method}' for {kind} must be public and static")]
    InvalidExportSignature {
        /// Fully qualified name of the offending method
        method: String,
        /// The export kind it was marked with
        kind: ExportKind,
    },

    /// The export marker carries a value that maps to no known export kind.
    #[error("Unknown export kind value - {0}")]
    UnknownExportKind(i32),

    // Pipeline errors
    /// An internal consistency check failed.
    ///
    /// Indicates a bug in the pipeline or an unexpected external tool output,
    /// e.g. the injected wrapper container could not be located in the disassembly.
    #[error("Invariant violated - {0}")]
    InvariantViolation(String),

    /// An external tool exited unsuccessfully.
    ///
    /// Both captured output streams are preserved for diagnostics.
    #[error("Process '{tool}' exited with code {code}.\nOutput:\n{stdout}\nError:\n{stderr}")]
    ExternalToolFailure {
        /// File name of the tool
        tool: String,
        /// Exit code, `-1` if the process was terminated by a signal
        code: i32,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// An external tool could not be started.
    #[error("Failed to start '{tool}' - {source}")]
    ToolSpawn {
        /// File name of the tool
        tool: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The module has already been injected once.
    #[error("You can only inject into a library once")]
    AlreadyInjected,

    // File parsing errors
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type or metadata feature is not supported.
    ///
    /// Raised for uncompressed (`#-`) metadata, pointer indirection tables and tables
    /// beyond the ECMA-335 partition II set.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The rewritten image could not be laid out.
    #[error("Failed to lay out the output image - {0}")]
    WriteLayout(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}

//! # rvexport Prelude
//!
//! This module provides a convenient prelude for the most commonly used types of the
//! rvexport library. Import this module to get quick access to everything needed to run
//! or inspect an export.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all rvexport operations
pub use crate::Error;

/// The result type used throughout rvexport
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The complete export run and its settings
pub use crate::exporter::{DllExporter, ExportOutcome, ExporterConfig, ToolRole};

/// The library being processed
pub use crate::module::{Architecture, ModuleKind, TargetModule};

// ================================================================================================
// Export Model
// ================================================================================================

/// Discovered exports and the native symbols they turn into
pub use crate::export::{
    directives_for, discover, ExportCandidate, ExportDirective, ExportKind, ExportSet,
    WrapperEntry,
};

// ================================================================================================
// Metadata Access
// ================================================================================================

/// The mutable metadata image
pub use crate::cilassembly::CilAssembly;

/// Metadata tokens and table identifiers
pub use crate::metadata::{tables::TableId, token::Token};

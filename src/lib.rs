// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'cilassembly/write/output.rs' uses mmap to map the output file into memory

//! # rvexport
//!
//! Native export injection for Arma 3 extensions written in .NET.
//!
//! The Arma 3 engine loads extensions with `LoadLibrary` and resolves plain C entry points
//! such as `RVExtension` and `RVExtensionVersion`. A compiled .NET library has no such
//! symbols. `rvexport` takes the library after compilation, finds the static methods marked
//! with `[ArmaDllExport(ArmaExport.X)]`, generates an unmanaged `stdcall` wrapper for each of
//! them and has the IL toolchain (`ildasm`/`ilasm`) rebuild the library with those wrappers
//! in its native export table.
//!
//! ## Features
//!
//! - **🔍 Export discovery** - Marker attributes decoded straight from the metadata tables
//! - **🧩 Wrapper synthesis** - `RVExtension`, `RVExtensionVersion` and `RVExtensionArgs` entry points
//! - **🧹 Marker removal** - The marker attribute and its library reference are stripped
//! - **⚙️ x86 and x64** - Symbol decoration per architecture (`_RVExtension@12` on x86)
//! - **🔧 Cross-platform core** - Metadata rewriting works without Windows or the .NET runtime
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rvexport::prelude::*;
//!
//! let config = ExporterConfig::new("bin/Release/MyExtension_x64.dll")
//!     .ilasm(r"C:\Windows\Microsoft.NET\Framework64\v4.0.30319\ilasm.exe")
//!     .ildasm(r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.8 Tools\x64\ildasm.exe");
//!
//! let mut exporter = DllExporter::new(config)?;
//! for directive in exporter.planned_directives() {
//!     println!("will export {directive}");
//! }
//! exporter.export()?;
//! # Ok::<(), rvexport::Error>(())
//! ```
//!
//! ### Inspecting without changes
//!
//! ```rust,no_run
//! use rvexport::{discover, TargetModule};
//! use std::path::Path;
//!
//! let module = TargetModule::open(Path::new("MyExtension_x86.dll"))?;
//! let exports = discover(&module)?;
//! for candidate in &exports {
//!     println!("{} -> {}", candidate.full_name(), candidate.kind.decorated_name(module.architecture()));
//! }
//! # Ok::<(), rvexport::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`module`] - Opening a library, architecture and module kind checks
//! - [`export`] - Discovery, wrapper synthesis, marker removal and the IL text patcher
//! - [`exporter`] - The complete run including the external tools
//! - [`cilassembly`] - The mutable metadata image and the binary writer
//! - [`metadata`] - ECMA-335 metadata root, streams, tables and signatures
//! - [`disassembler`] - CIL instruction decoding, used to follow tokens inside method bodies
//! - [`file`] - PE file access
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use rvexport::{DllExporter, Error, ExporterConfig};
//!
//! let config = ExporterConfig::new("MyExtension.dll").ilasm("ilasm.exe").ildasm("ildasm.exe");
//! match DllExporter::new(config) {
//!     Ok(_) => println!("ready"),
//!     Err(Error::AmbiguousArchitecture { .. }) => println!("build for x86 or x64, not AnyCPU"),
//!     Err(Error::DuplicateExportDeclaration(kind)) => println!("{kind} is exported twice"),
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```
//!
//! ## Standards Compliance
//!
//! Metadata handling follows the **ECMA-335 specification** (6th edition).
//!
//! - [ECMA-335 Standard](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf) - Official CLI specification
//! - [Arma 3 Extensions](https://community.bistudio.com/wiki/Extensions) - The host side of the entry points

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use rvexport::prelude::*;
///
/// let module = TargetModule::open("MyExtension_x64.dll".as_ref())?;
/// println!("{} library", module.architecture());
/// # Ok::<(), rvexport::Error>(())
/// ```
pub mod prelude;

/// PE file access
///
/// Reading the image into memory, section and data directory lookups and RVA translation.
/// Everything above works on [`file::File`].
pub mod file;

/// CIL instruction decoding
///
/// The decoder walks method bodies to find and rewrite metadata tokens when rows move.
///
/// # Examples
///
/// ```rust
/// use rvexport::disassembler::decode_stream;
///
/// // ldarg.0, call 0x0A000002, ret
/// let code = [0x02, 0x28, 0x02, 0x00, 0x00, 0x0A, 0x2A];
/// let instructions = decode_stream(&code)?;
/// assert_eq!(instructions.len(), 3);
/// # Ok::<(), rvexport::Error>(())
/// ```
pub mod disassembler;

/// ECMA-335 metadata: root, streams, tables, signatures and method bodies
pub mod metadata;

/// The mutable metadata image of a module and the writer producing the rewritten file
pub mod cilassembly;

/// Opening and classifying the library to process
pub mod module;

/// Export discovery, wrapper synthesis, marker removal and directive patching
pub mod export;

/// The export run driving the external IL tools
pub mod exporter;

/// `rvexport` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `rvexport` Error type
///
/// See [`error::Error`](Error) for the individual variants.
pub use error::Error;

pub use export::{
    directives_for, discover, patch_file, patch_lines, ExportCandidate, ExportDirective,
    ExportKind, ExportSet, WrapperEntry,
};
pub use exporter::{DllExporter, ExportOutcome, ExporterConfig, ToolRole};
pub use file::{parser::Parser, File};
pub use module::{Architecture, ModuleKind, TargetModule};

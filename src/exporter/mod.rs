//! The complete export run, from the compiled library to the library with native exports.
//!
//! [`DllExporter::new`] validates the configuration, loads the library and discovers its
//! exports without touching the file. [`DllExporter::export`] then runs the mutating part:
//!
//! 1. add the `stdcall` wrappers to the metadata ([`crate::export::synthesize`])
//! 2. strip the marker attribute and its library ([`crate::export::sanitize`])
//! 3. write the rewritten library over the original
//! 4. disassemble it to `<dll>.il` (and `<dll>.res`)
//! 5. insert the `.vtentry`/`.export` directives ([`crate::export::patch_file`])
//! 6. reassemble the listing over the library
//! 7. delete the intermediate files unless asked to keep them
//!
//! The first failing step aborts the run. Nothing is rolled back: a run that fails after
//! step 3 leaves the library rewritten but without native exports. A [`DllExporter`] injects
//! at most once, even if that single attempt failed.
//!
//! # Examples
//!
//! ```rust,no_run
//! use rvexport::{DllExporter, ExportOutcome, ExporterConfig};
//!
//! let config = ExporterConfig::new("bin/Release/MyExtension_x64.dll")
//!     .ilasm("ilasm.exe")
//!     .ildasm("ildasm.exe");
//!
//! let mut exporter = DllExporter::new(config)?;
//! match exporter.export()? {
//!     ExportOutcome::NothingToDo => println!("nothing marked for export"),
//!     ExportOutcome::Exported { directives, .. } => {
//!         for directive in directives {
//!             println!("{directive}");
//!         }
//!     }
//! }
//! # Ok::<(), rvexport::Error>(())
//! ```

mod config;
pub mod toolchain;

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    export::{
        directives_for, discover, patch_file, sanitize, synthesize, ExportDirective, ExportSet,
    },
    module::TargetModule,
    Error::AlreadyInjected,
    Result,
};

pub use config::{ExporterConfig, ToolRole};
pub use toolchain::{AssembleOptions, Toolchain};

/// Result of a successful [`DllExporter::export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// No method is marked for export; the library was left untouched.
    NothingToDo,
    /// The library now exports the listed symbols.
    Exported {
        /// The native exports, in ordinal order
        directives: Vec<ExportDirective>,
        /// The retained IL listing, if intermediate files are kept
        intermediate: Option<PathBuf>,
    },
}

/// Injects native exports into one library.
pub struct DllExporter {
    config: ExporterConfig,
    toolchain: Toolchain,
    module: TargetModule,
    exports: ExportSet,
}

impl DllExporter {
    /// Validate `config`, load the target library and discover its exports.
    ///
    /// Every configuration and discovery error is raised here, before anything is written.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingToolPath`], the errors of [`TargetModule::open`] and
    /// those of [`crate::export::discover`].
    pub fn new(config: ExporterConfig) -> Result<Self> {
        config.validate()?;
        let module = TargetModule::open(config.target())?;
        let exports = discover(&module)?;

        Ok(DllExporter {
            toolchain: Toolchain::new(&config),
            config,
            module,
            exports,
        })
    }

    /// The loaded library
    #[must_use]
    pub fn module(&self) -> &TargetModule {
        &self.module
    }

    /// The discovered exports
    #[must_use]
    pub fn exports(&self) -> &ExportSet {
        &self.exports
    }

    /// The configuration of this exporter
    #[must_use]
    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// The directives [`DllExporter::export`] will produce.
    #[must_use]
    pub fn planned_directives(&self) -> Vec<ExportDirective> {
        self.exports.planned_directives(self.module.architecture())
    }

    /// Run the export pipeline, see the module documentation.
    ///
    /// # Errors
    /// Returns [`crate::Error::AlreadyInjected`] on a second run, and otherwise the first
    /// error of any pipeline step: [`crate::Error::InvariantViolation`],
    /// [`crate::Error::WriteLayout`], [`crate::Error::ToolSpawn`],
    /// [`crate::Error::ExternalToolFailure`] or [`crate::Error::FileError`].
    pub fn export(&mut self) -> Result<ExportOutcome> {
        if self.exports.is_empty() {
            log::info!("No export methods found. Did you forget the [ArmaDllExport] attribute?");
            return Ok(ExportOutcome::NothingToDo);
        }
        if self.module.is_injected() {
            return Err(AlreadyInjected);
        }
        self.module.mark_injected();

        log::info!("Found {} export(s). Injecting wrappers...", self.exports.len());
        let wrappers = synthesize(&mut self.module, &mut self.exports)?;

        log::info!("Removing ArmaDllExport attribute and reference");
        sanitize(&mut self.module)?;
        self.module.assembly_mut().sort_tables()?;

        let dll = self.module.path().to_path_buf();
        let il = intermediate_path(&dll, ".il");
        let res = intermediate_path(&dll, ".res");

        log::info!("Writing injected DLL");
        self.module.assembly().write_to_file(&dll)?;

        log::info!("Disassembling DLL");
        let debug = self.module.has_debug_info();
        self.toolchain.disassemble(&dll, &il, debug)?;

        log::info!("Adding exports");
        let directives = directives_for(
            wrappers.iter().map(|wrapper| wrapper.kind),
            self.module.architecture(),
        );
        patch_file(&il, &directives)?;

        log::info!("Assembling DLL");
        let resources = res.is_file().then_some(res.as_path());
        self.toolchain.assemble(
            &il,
            &dll,
            AssembleOptions {
                architecture: self.module.architecture(),
                debug,
                resources,
            },
        )?;

        let intermediate = if self.config.keeps_intermediate() {
            Some(il)
        } else {
            log::info!("Cleaning up temporary files");
            remove_intermediate(&il);
            remove_intermediate(&res);
            None
        };

        for directive in &directives {
            log::debug!("Exported {}", directive);
        }
        Ok(ExportOutcome::Exported {
            directives,
            intermediate,
        })
    }
}

/// `<dll>.il` for `<dll>`, keeping the library's own extension.
fn intermediate_path(dll: &Path, extension: &str) -> PathBuf {
    let mut path = dll.as_os_str().to_os_string();
    path.push(extension);
    PathBuf::from(path)
}

fn remove_intermediate(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(error) = fs::remove_file(path) {
        log::warn!("Could not delete {} - {}", path.display(), error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::FixtureBuilder, Error, ExportKind};
    use tempfile::tempdir;

    #[test]
    fn intermediate_names_keep_library_extension() {
        assert_eq!(
            intermediate_path(Path::new("bin/Extension.dll"), ".il"),
            PathBuf::from("bin/Extension.dll.il")
        );
        assert_eq!(
            intermediate_path(Path::new("Extension_x86.dll"), ".res"),
            PathBuf::from("Extension_x86.dll.res")
        );
    }

    #[test]
    fn tools_checked_before_loading() {
        let dir = tempdir().unwrap();
        let config = ExporterConfig::new(dir.path().join("missing.dll"));
        assert!(matches!(
            DllExporter::new(config),
            Err(Error::MissingToolPath(ToolRole::Disassembler))
        ));
    }

    #[cfg(unix)]
    mod pipeline {
        use super::*;
        use crate::test::{failing_tool, fake_toolchain, FakeToolchain};

        fn exporter(dir: &Path, fixture: FixtureBuilder, tools: &FakeToolchain) -> ExporterConfig {
            let dll = fixture.write_to(dir, "Extension.dll");
            ExporterConfig::new(dll)
                .ilasm(&tools.ilasm)
                .ildasm(&tools.ildasm)
        }

        #[test]
        fn nothing_marked_is_a_no_op() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &[]);
            let config = exporter(dir.path(), FixtureBuilder::x64(), &tools);
            let before = fs::read(config.target()).unwrap();

            let mut exporter = DllExporter::new(config.clone()).unwrap();
            assert_eq!(exporter.export().unwrap(), ExportOutcome::NothingToDo);
            assert_eq!(exporter.export().unwrap(), ExportOutcome::NothingToDo);

            assert_eq!(fs::read(config.target()).unwrap(), before);
            assert!(!tools.ildasm_ran());
            assert!(!exporter.module().is_injected());
        }

        #[test]
        fn simple_and_version_on_x64() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &["RVExtension", "RVExtensionVersion"]);
            let config = exporter(
                dir.path(),
                FixtureBuilder::x64().export("Invoke", 0).export("Version", 1),
                &tools,
            );
            let dll = config.target().to_path_buf();

            let mut exporter = DllExporter::new(config).unwrap();
            let planned = exporter.planned_directives();
            let outcome = exporter.export().unwrap();

            let expected = vec![
                ExportDirective {
                    ordinal: 1,
                    name: "RVExtension".to_string(),
                },
                ExportDirective {
                    ordinal: 2,
                    name: "RVExtensionVersion".to_string(),
                },
            ];
            assert_eq!(planned, expected);
            assert_eq!(
                outcome,
                ExportOutcome::Exported {
                    directives: expected,
                    intermediate: None,
                }
            );

            assert_eq!(
                tools.ildasm_args(),
                [
                    "/quoteallnames".to_string(),
                    "/unicode".to_string(),
                    "/nobar".to_string(),
                    format!("/out:{}", dir.path().join("Extension.dll.il").display()),
                    dll.display().to_string(),
                ]
            );
            assert_eq!(
                tools.ilasm_args(),
                [
                    "/nologo".to_string(),
                    format!("/out:{}", dll.display()),
                    "/DLL".to_string(),
                    format!("/res:{}", dir.path().join("Extension.dll.res").display()),
                    "/optimize".to_string(),
                    "/X64".to_string(),
                    dir.path().join("Extension.dll.il").display().to_string(),
                ]
            );

            // the fake assembler copies the patched listing over the library
            let listing = fs::read_to_string(&dll).unwrap();
            assert!(listing.contains(
                "{\r\n    .vtentry 1 : 1\r\n    .export [1] as RVExtension\r\n    .vtentry 2 : 1\r\n    .export [2] as RVExtensionVersion\r\n  .method"
            ));

            assert!(!dir.path().join("Extension.dll.il").exists());
            assert!(!dir.path().join("Extension.dll.res").exists());
            assert!(exporter.module().is_injected());

            // the metadata handed to the disassembler no longer carries the marker
            let assembly = exporter.module().assembly();
            assert_eq!(assembly.find_assembly_ref("Arma3.DllExport"), None);
            assert!(assembly
                .find_type_def("Arma3.DllExport", "DllExportWrapper")
                .is_some());
        }

        #[test]
        fn unrelated_listing_next_to_library_survives() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &["RVExtension"]);
            let config = exporter(dir.path(), FixtureBuilder::x64().export("Invoke", 0), &tools);
            let own = dir.path().join("Extension.il");
            fs::write(&own, "hand written").unwrap();

            DllExporter::new(config).unwrap().export().unwrap();
            assert_eq!(fs::read_to_string(&own).unwrap(), "hand written");
        }

        #[test]
        fn x86_with_full_header_area() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &["RVExtension"]);
            let config = exporter(
                dir.path(),
                FixtureBuilder::x86()
                    .sections_to_fill_headers()
                    .export("Invoke", 0),
                &tools,
            )
            .keep_intermediate(true);

            let mut exporter = DllExporter::new(config).unwrap();
            match exporter.export().unwrap() {
                ExportOutcome::Exported { directives, .. } => {
                    assert_eq!(directives.len(), 1);
                    assert_eq!(directives[0].name, "_RVExtension@12");
                }
                ExportOutcome::NothingToDo => panic!("exports were expected"),
            }

            let listing = fs::read_to_string(dir.path().join("Extension.dll.il")).unwrap();
            assert!(listing.contains("    .export [1] as _RVExtension@12\r\n"));

            // the library handed to the disassembler reloads with the wrapper and no marker
            let rewritten = dir.path().join("rewritten.dll");
            exporter.module().assembly().write_to_file(&rewritten).unwrap();
            let reloaded = TargetModule::open(&rewritten).unwrap();
            let assembly = reloaded.assembly();
            assert_eq!(assembly.file().sections().len(), 4);
            assert_eq!(assembly.find_assembly_ref("Arma3.DllExport"), None);
            assert!(assembly
                .find_type_def("Arma3.DllExport", "DllExportWrapper")
                .is_some());
        }

        #[test]
        fn second_export_refused() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &["RVExtension"]);
            let config = exporter(dir.path(), FixtureBuilder::x64().export("Invoke", 0), &tools);

            let mut exporter = DllExporter::new(config).unwrap();
            exporter.export().unwrap();
            assert!(matches!(exporter.export(), Err(Error::AlreadyInjected)));
        }

        #[test]
        fn x86_with_debug_info_kept_listing() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &["RVExtensionArgs", "RVExtensionVersion"]);
            let config = exporter(
                dir.path(),
                FixtureBuilder::x86()
                    .debug_directory()
                    .export("Args", 2)
                    .export("Version", 1)
                    .export("Context", 4),
                &tools,
            )
            .keep_intermediate(true);

            let mut exporter = DllExporter::new(config).unwrap();
            let il = dir.path().join("Extension.dll.il");
            match exporter.export().unwrap() {
                ExportOutcome::Exported {
                    directives,
                    intermediate,
                } => {
                    let names: Vec<&str> = directives.iter().map(|d| d.name.as_str()).collect();
                    assert_eq!(names, ["_RVExtensionArgs@20", "_RVExtensionVersion@8"]);
                    assert_eq!(intermediate.as_deref(), Some(il.as_path()));
                }
                ExportOutcome::NothingToDo => panic!("exports were expected"),
            }

            assert!(tools.ildasm_args().contains(&"/linenum".to_string()));
            let ilasm = tools.ilasm_args();
            assert!(ilasm.contains(&"/debug".to_string()));
            assert!(ilasm.contains(&"/X86".to_string()));
            assert!(!ilasm.contains(&"/optimize".to_string()));

            let listing = fs::read_to_string(&il).unwrap();
            assert!(listing.contains("    .export [1] as _RVExtensionArgs@20\r\n"));
            assert!(listing.contains("    .export [2] as _RVExtensionVersion@8\r\n"));
            assert!(dir.path().join("Extension.dll.res").exists());
        }

        #[test]
        fn disassembler_failure_aborts_and_latches() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &["RVExtension"]);
            let broken = failing_tool(dir.path(), "broken-ildasm", 2);
            let config = exporter(dir.path(), FixtureBuilder::x64().export("Invoke", 0), &tools)
                .ildasm(&broken);

            let mut exporter = DllExporter::new(config).unwrap();
            match exporter.export() {
                Err(Error::ExternalToolFailure { tool, code, .. }) => {
                    assert_eq!(tool, "broken-ildasm");
                    assert_eq!(code, 2);
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert!(tools.ilasm_args().is_empty());
            assert!(matches!(exporter.export(), Err(Error::AlreadyInjected)));
        }

        #[test]
        fn missing_wrapper_in_listing() {
            let dir = tempdir().unwrap();
            // a listing without any method in the container
            let tools = fake_toolchain(dir.path(), &[]);
            let config = exporter(dir.path(), FixtureBuilder::x64().export("Invoke", 0), &tools);

            let mut exporter = DllExporter::new(config).unwrap();
            assert!(matches!(
                exporter.export(),
                Err(Error::InvariantViolation(_))
            ));
            assert!(tools.ilasm_args().is_empty());
        }

        #[test]
        fn discovery_errors_before_mutation() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &[]);
            let config = exporter(
                dir.path(),
                FixtureBuilder::x64().export("First", 1).export("Second", 1),
                &tools,
            );
            let before = fs::read(config.target()).unwrap();

            assert!(matches!(
                DllExporter::new(config.clone()),
                Err(Error::DuplicateExportDeclaration(ExportKind::VersionQuery))
            ));
            assert_eq!(fs::read(config.target()).unwrap(), before);
        }

        #[test]
        fn any_cpu_rejected() {
            let dir = tempdir().unwrap();
            let tools = fake_toolchain(dir.path(), &[]);
            let config = exporter(
                dir.path(),
                FixtureBuilder::any_cpu().export("Invoke", 0),
                &tools,
            );
            assert!(matches!(
                DllExporter::new(config),
                Err(Error::AmbiguousArchitecture { .. })
            ));
        }
    }
}

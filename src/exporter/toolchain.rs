//! Invocation of the IL disassembler and assembler.
//!
//! Both tools run to completion with their output captured. A tool that exits unsuccessfully
//! is reported with both streams, there is no timeout and no retry.

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Command,
};

use crate::{
    exporter::{ExporterConfig, ToolRole},
    module::Architecture,
    Error::{ExternalToolFailure, ToolSpawn},
    Result,
};

/// The pair of external tools used by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    ilasm: PathBuf,
    ildasm: PathBuf,
}

/// What to pass to the assembler besides input and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembleOptions<'a> {
    /// Target architecture, see [`Architecture::ilasm_switch`]
    pub architecture: Architecture,
    /// Build with debug information (`/debug`) instead of `/optimize`
    pub debug: bool,
    /// Win32 resource file to embed
    pub resources: Option<&'a Path>,
}

impl Toolchain {
    /// Take the tool paths from `config`; validation happens in [`ExporterConfig::validate`].
    #[must_use]
    pub fn new(config: &ExporterConfig) -> Self {
        Toolchain {
            ilasm: config.tool(ToolRole::Assembler).to_path_buf(),
            ildasm: config.tool(ToolRole::Disassembler).to_path_buf(),
        }
    }

    /// The path used for `role`
    #[must_use]
    pub fn path(&self, role: ToolRole) -> &Path {
        match role {
            ToolRole::Assembler => &self.ilasm,
            ToolRole::Disassembler => &self.ildasm,
        }
    }

    /// Disassemble `dll` into `il`, with line information if `line_numbers` is set.
    ///
    /// # Errors
    /// Returns [`crate::Error::ToolSpawn`] or [`crate::Error::ExternalToolFailure`].
    pub fn disassemble(&self, dll: &Path, il: &Path, line_numbers: bool) -> Result<()> {
        let mut args: Vec<OsString> = vec![
            "/quoteallnames".into(),
            "/unicode".into(),
            "/nobar".into(),
        ];
        if line_numbers {
            args.push("/linenum".into());
        }
        args.push(prefixed("/out:", il));
        args.push(dll.into());

        run_tool(&self.ildasm, &args)
    }

    /// Assemble `il` into the library `dll`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ToolSpawn`] or [`crate::Error::ExternalToolFailure`].
    pub fn assemble(&self, il: &Path, dll: &Path, options: AssembleOptions<'_>) -> Result<()> {
        let mut args: Vec<OsString> = vec!["/nologo".into(), prefixed("/out:", dll), "/DLL".into()];
        if let Some(resources) = options.resources {
            args.push(prefixed("/res:", resources));
        }
        let mode = if options.debug { "/debug" } else { "/optimize" };
        args.push(mode.into());
        if let Some(switch) = options.architecture.ilasm_switch() {
            args.push(switch.into());
        }
        args.push(il.into());

        run_tool(&self.ilasm, &args)
    }
}

/// Run `tool` with `args` and wait for it.
///
/// # Errors
/// Returns [`crate::Error::ToolSpawn`] if the process cannot be started and
/// [`crate::Error::ExternalToolFailure`] if it exits unsuccessfully. A process killed by a
/// signal reports exit code `-1`.
pub fn run_tool<S: AsRef<OsStr>>(tool: &Path, args: &[S]) -> Result<()> {
    let name = tool
        .file_name()
        .map_or_else(|| tool.display().to_string(), |name| name.to_string_lossy().into_owned());

    log::debug!(
        "Running {} {}",
        tool.display(),
        args.iter()
            .map(|arg| arg.as_ref().to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|source| ToolSpawn {
            tool: name.clone(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }

    Err(ExternalToolFailure {
        tool: name,
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn prefixed(prefix: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(prefix);
    arg.push(path);
    arg
}

//! Configuration of a [`crate::DllExporter`] run.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{Error::MissingToolPath, Result};

/// The external tools the pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolRole {
    /// `ilasm`, turns the patched IL listing back into a library
    Assembler,
    /// `ildasm`, produces the IL listing of the rewritten library
    Disassembler,
}

impl fmt::Display for ToolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolRole::Assembler => write!(f, "the IL assembler (ilasm)"),
            ToolRole::Disassembler => write!(f, "the IL disassembler (ildasm)"),
        }
    }
}

/// Settings for a [`crate::DllExporter`].
///
/// ```rust,no_run
/// use rvexport::ExporterConfig;
///
/// let config = ExporterConfig::new("bin/Release/MyExtension_x64.dll")
///     .ilasm(r"C:\Windows\Microsoft.NET\Framework64\v4.0.30319\ilasm.exe")
///     .ildasm(r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.8 Tools\x64\ildasm.exe")
///     .keep_intermediate(true);
/// config.validate()?;
/// # Ok::<(), rvexport::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExporterConfig {
    target: PathBuf,
    ilasm: PathBuf,
    ildasm: PathBuf,
    keep_intermediate: bool,
}

impl ExporterConfig {
    /// Configuration for exporting from the library at `target`, without tools set.
    pub fn new<P: Into<PathBuf>>(target: P) -> Self {
        ExporterConfig {
            target: target.into(),
            ..ExporterConfig::default()
        }
    }

    /// Path of the IL assembler.
    #[must_use]
    pub fn ilasm<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.ilasm = path.into();
        self
    }

    /// Path of the IL disassembler.
    #[must_use]
    pub fn ildasm<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.ildasm = path.into();
        self
    }

    /// Keep the `.il` and `.res` files next to the library after the run.
    #[must_use]
    pub fn keep_intermediate(mut self, keep: bool) -> Self {
        self.keep_intermediate = keep;
        self
    }

    /// The library to process
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// The path configured for `role`
    #[must_use]
    pub fn tool(&self, role: ToolRole) -> &Path {
        match role {
            ToolRole::Assembler => &self.ilasm,
            ToolRole::Disassembler => &self.ildasm,
        }
    }

    /// `true` if the intermediate files are kept
    #[must_use]
    pub fn keeps_intermediate(&self) -> bool {
        self.keep_intermediate
    }

    /// Check that both tools are configured and exist, disassembler first.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingToolPath`] for an empty or non-existent tool path.
    pub fn validate(&self) -> Result<()> {
        for role in [ToolRole::Disassembler, ToolRole::Assembler] {
            let path = self.tool(role);
            if path.as_os_str().is_empty() || !path.is_file() {
                return Err(MissingToolPath(role));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::tempdir;

    #[test]
    fn builder() {
        let config = ExporterConfig::new("Extension.dll")
            .ilasm("ilasm.exe")
            .ildasm("ildasm.exe");
        assert_eq!(config.target(), Path::new("Extension.dll"));
        assert_eq!(config.tool(ToolRole::Assembler), Path::new("ilasm.exe"));
        assert_eq!(config.tool(ToolRole::Disassembler), Path::new("ildasm.exe"));
        assert!(!config.keeps_intermediate());
        assert!(config.keep_intermediate(true).keeps_intermediate());
    }

    #[test]
    fn validation() {
        let dir = tempdir().unwrap();
        let ilasm = dir.path().join("ilasm");
        let ildasm = dir.path().join("ildasm");
        std::fs::write(&ilasm, b"").unwrap();
        std::fs::write(&ildasm, b"").unwrap();

        let config = ExporterConfig::new("Extension.dll");
        assert!(matches!(
            config.validate(),
            Err(Error::MissingToolPath(ToolRole::Disassembler))
        ));

        let config = config.ildasm(&ildasm).ilasm(dir.path().join("missing"));
        assert!(matches!(
            config.validate(),
            Err(Error::MissingToolPath(ToolRole::Assembler))
        ));

        // a directory is not a tool
        let config = config.ilasm(dir.path());
        assert!(matches!(
            config.validate(),
            Err(Error::MissingToolPath(ToolRole::Assembler))
        ));

        assert!(config.ilasm(&ilasm).validate().is_ok());
    }

    #[test]
    fn role_names() {
        assert_eq!(
            Error::MissingToolPath(ToolRole::Assembler).to_string(),
            "No usable path configured for the IL assembler (ilasm)"
        );
        assert_eq!(
            ToolRole::Disassembler.to_string(),
            "the IL disassembler (ildasm)"
        );
    }
}

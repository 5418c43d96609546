//! External tool configuration and invocation integration tests.

use rvexport::exporter::toolchain::run_tool;
use rvexport::prelude::*;
use tempfile::tempdir;

#[test]
fn unconfigured_tools_rejected() {
    let config = ExporterConfig::new("Extension.dll").ildasm("ildasm.exe");
    assert!(matches!(
        config.validate(),
        Err(Error::MissingToolPath(ToolRole::Disassembler))
    ));

    let dir = tempdir().unwrap();
    let ildasm = dir.path().join("ildasm.exe");
    std::fs::write(&ildasm, b"MZ").unwrap();
    let config = config.ildasm(&ildasm).ilasm("");
    assert!(matches!(
        config.validate(),
        Err(Error::MissingToolPath(ToolRole::Assembler))
    ));
}

#[test]
fn exporter_reports_missing_tool_before_reading_target() {
    let config = ExporterConfig::new("does-not-exist.dll");
    match DllExporter::new(config) {
        Err(error) => assert_eq!(
            error.to_string(),
            "No usable path configured for the IL disassembler (ildasm)"
        ),
        Ok(_) => panic!("configuration without tools accepted"),
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};

    fn script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn success_is_silent() {
        let dir = tempdir().unwrap();
        let tool = script(dir.path(), "ilasm", "echo 'Operation completed successfully'\n");
        assert!(run_tool(&tool, &["/nologo"]).is_ok());
    }

    #[test]
    fn failure_carries_both_streams() {
        let dir = tempdir().unwrap();
        let tool = script(
            dir.path(),
            "ilasm",
            "echo \"assembling $1\"\necho '***** FAILURE *****' >&2\nexit 1\n",
        );

        match run_tool(&tool, &["Extension.il"]) {
            Err(Error::ExternalToolFailure {
                tool,
                code,
                stdout,
                stderr,
            }) => {
                assert_eq!(tool, "ilasm");
                assert_eq!(code, 1);
                assert_eq!(stdout.trim_end(), "assembling Extension.il");
                assert_eq!(stderr.trim_end(), "***** FAILURE *****");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn killed_tool_reports_minus_one() {
        let dir = tempdir().unwrap();
        let tool = script(dir.path(), "ildasm", "kill -9 $$\n");
        assert!(matches!(
            run_tool(&tool, &["/nobar"]),
            Err(Error::ExternalToolFailure { code: -1, .. })
        ));
    }
}

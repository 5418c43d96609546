//! Insertion of native export directives into disassembled IL.
//!
//! The metadata tables have no way to express a native export. `ilasm` does: a method
//! carrying `.vtentry` and `.export` directives gets a vtable fixup and an export table
//! entry. The directives for all wrappers are inserted as one block at the start of the
//! wrapper class body:
//!
//! ```text
//! .class public auto ansi sealed 'Arma3.DllExport'.'DllExportWrapper'
//!        extends [mscorlib]'System'.'Object'
//! {
//!     .vtentry 1 : 1
//!     .export [1] as RVExtensionVersion
//!     .vtentry 2 : 1
//!     .export [2] as RVExtension
//!   .method public hidebysig static void ...
//! ```
//!
//! `ildasm /unicode` writes UTF-16LE with a byte order mark; the patched listing is written
//! back as UTF-8, keeping the line endings of the input.

use std::{fs, path::Path};

use widestring::U16Str;

use crate::{export::ExportDirective, Error::InvariantViolation, Result};

/// Declaration line of the wrapper container as written by `ildasm /quoteallnames`
pub const WRAPPER_CLASS_HEADER: &str =
    ".class public auto ansi sealed 'Arma3.DllExport'.'DllExportWrapper'";

const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Insert the directives before the first method of the wrapper container.
///
/// An empty `directives` list leaves `lines` untouched.
///
/// # Errors
/// Returns [`crate::Error::InvariantViolation`] if the container is missing or its body
/// closes before any method.
///
/// # Examples
///
/// ```rust
/// use rvexport::{patch_lines, ExportDirective};
///
/// let mut lines: Vec<String> = [
///     ".class public auto ansi sealed 'Arma3.DllExport'.'DllExportWrapper'",
///     "{",
///     "  .method public static void 'RVExtension'() cil managed",
///     "}",
/// ]
/// .iter()
/// .map(|line| line.to_string())
/// .collect();
///
/// let directives = [ExportDirective { ordinal: 1, name: "RVExtension".to_string() }];
/// patch_lines(&mut lines, &directives)?;
/// assert_eq!(lines[2], "    .vtentry 1 : 1");
/// assert_eq!(lines[3], "    .export [1] as RVExtension");
/// # Ok::<(), rvexport::Error>(())
/// ```
pub fn patch_lines(lines: &mut Vec<String>, directives: &[ExportDirective]) -> Result<()> {
    if directives.is_empty() {
        return Ok(());
    }

    let Some(class) = lines
        .iter()
        .position(|line| line.trim().starts_with(WRAPPER_CLASS_HEADER))
    else {
        return Err(InvariantViolation("wrapper container missing".to_string()));
    };

    let mut insert_at = None;
    for (index, line) in lines.iter().enumerate().skip(class + 1) {
        let line = line.trim();
        if line.starts_with(".method") {
            insert_at = Some(index);
            break;
        }
        if line.starts_with('}') {
            break;
        }
    }
    let Some(insert_at) = insert_at else {
        return Err(InvariantViolation(
            "wrapper container has no method to attach the exports to".to_string(),
        ));
    };

    let block = directives.iter().flat_map(|directive| {
        [
            format!("    .vtentry {} : 1", directive.ordinal),
            format!("    .export [{}] as {}", directive.ordinal, directive.name),
        ]
    });
    lines.splice(insert_at..insert_at, block);

    Ok(())
}

/// Patch the IL listing at `path` in place, see [`patch_lines`].
///
/// # Errors
/// Returns [`crate::Error::FileError`] if the file cannot be read or written,
/// [`crate::Error::Malformed`] if it is neither UTF-16LE with a byte order mark nor UTF-8,
/// and the errors of [`patch_lines`].
pub fn patch_file(path: &Path, directives: &[ExportDirective]) -> Result<()> {
    if directives.is_empty() {
        return Ok(());
    }

    let text = decode(&fs::read(path)?)?;
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing_newline = text.ends_with('\n');

    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    patch_lines(&mut lines, directives)?;

    let mut output = lines.join(newline);
    if trailing_newline {
        output.push_str(newline);
    }
    fs::write(path, output)?;

    log::debug!(
        "Inserted {} export directive(s) into {}",
        directives.len(),
        path.display()
    );
    Ok(())
}

/// Decode an IL listing, UTF-16LE if it starts with a byte order mark, UTF-8 otherwise.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid UTF-16 or UTF-8 data.
pub fn decode(data: &[u8]) -> Result<String> {
    if let Some(wide) = data.strip_prefix(&UTF16LE_BOM) {
        if wide.len() % 2 != 0 {
            return Err(malformed_error!(
                "UTF-16 listing has an odd length of {} bytes",
                data.len()
            ));
        }

        let units: Vec<u16> = wide
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return U16Str::from_slice(&units)
            .to_string()
            .map_err(|error| malformed_error!("Invalid UTF-16 in listing - {}", error));
    }

    let data = data.strip_prefix(&UTF8_BOM).unwrap_or(data);
    String::from_utf8(data.to_vec())
        .map_err(|error| malformed_error!("Invalid UTF-8 in listing - {}", error))
}

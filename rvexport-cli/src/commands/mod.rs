pub mod export;
pub mod inspect;

use std::path::Path;

use anyhow::Context;
use rvexport::{discover, ExportSet, TargetModule};

/// Open a library and discover its exports, without modifying it.
pub fn load_module(path: &Path) -> anyhow::Result<(TargetModule, ExportSet)> {
    let module = TargetModule::open(path)
        .with_context(|| format!("failed to load library: {}", path.display()))?;
    let exports = discover(&module)
        .with_context(|| format!("invalid export declarations in {}", path.display()))?;
    Ok((module, exports))
}

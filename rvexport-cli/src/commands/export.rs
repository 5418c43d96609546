use std::path::Path;

use anyhow::Context;
use rvexport::{DllExporter, ExportOutcome, ExporterConfig};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ExportedSymbol {
    ordinal: u32,
    name: String,
}

#[derive(Debug, Serialize)]
struct ExportReport {
    library: String,
    exported: Vec<ExportedSymbol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    intermediate: Option<String>,
}

pub fn run(
    path: &Path,
    ilasm: &Path,
    ildasm: &Path,
    keep_il: bool,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let config = ExporterConfig::new(path)
        .ilasm(ilasm)
        .ildasm(ildasm)
        .keep_intermediate(keep_il);

    let mut exporter = DllExporter::new(config)
        .with_context(|| format!("cannot export from {}", path.display()))?;
    let outcome = exporter
        .export()
        .with_context(|| format!("export failed for {}", path.display()))?;

    let report = match outcome {
        ExportOutcome::NothingToDo => ExportReport {
            library: path.display().to_string(),
            exported: Vec::new(),
            intermediate: None,
        },
        ExportOutcome::Exported {
            directives,
            intermediate,
        } => ExportReport {
            library: path.display().to_string(),
            exported: directives
                .into_iter()
                .map(|d| ExportedSymbol {
                    ordinal: d.ordinal,
                    name: d.name,
                })
                .collect(),
            intermediate: intermediate.map(|il| il.display().to_string()),
        },
    };

    print_output(&report, opts, |report| {
        if report.exported.is_empty() {
            return;
        }
        println!("Exported from {}:", report.library);
        let mut tw = TabWriter::new(&[("Ordinal", Align::Right), ("Symbol", Align::Left)])
            .indent("  ");
        for symbol in &report.exported {
            tw.row(vec![symbol.ordinal.to_string(), symbol.name.clone()]);
        }
        tw.print();
        if let Some(il) = &report.intermediate {
            println!("IL listing kept at {il}");
        }
    })
}

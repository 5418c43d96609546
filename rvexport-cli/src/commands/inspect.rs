use std::path::Path;

use rvexport::ModuleKind;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::load_module,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct CandidateInfo {
    token: String,
    method: String,
    kind: String,
    symbol: String,
    wrapped: bool,
}

#[derive(Debug, Serialize)]
struct DirectiveInfo {
    ordinal: u32,
    name: String,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    library: String,
    architecture: String,
    library_kind: String,
    debug_info: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_symbols: Option<String>,
    injected: bool,
    candidates: Vec<CandidateInfo>,
    directives: Vec<DirectiveInfo>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let (module, exports) = load_module(path)?;
    let architecture = module.architecture();

    let candidates = exports
        .iter()
        .map(|candidate| CandidateInfo {
            token: candidate.method.to_string(),
            method: candidate.full_name(),
            kind: candidate.kind.to_string(),
            symbol: candidate.kind.decorated_name(architecture),
            wrapped: candidate.kind.has_wrapper(),
        })
        .collect();

    let directives = exports
        .planned_directives(architecture)
        .into_iter()
        .map(|d| DirectiveInfo {
            ordinal: d.ordinal,
            name: d.name,
        })
        .collect();

    let report = InspectReport {
        library: path.display().to_string(),
        architecture: architecture.to_string(),
        library_kind: match module.kind() {
            ModuleKind::Library => "library".to_string(),
            ModuleKind::Executable => "executable".to_string(),
        },
        debug_info: module.has_debug_info(),
        debug_symbols: module
            .debug_companion()
            .map(|pdb| pdb.display().to_string()),
        injected: module.is_injected(),
        candidates,
        directives,
    };

    print_output(&report, opts, |report| {
        println!("Library:       {}", report.library);
        println!("Architecture:  {}", report.architecture);
        let debug = if report.debug_info { "yes" } else { "no" };
        println!("Debug info:    {debug}");
        if let Some(pdb) = &report.debug_symbols {
            println!("Symbols:       {pdb}");
        }

        if report.candidates.is_empty() {
            println!("\nNo methods are marked with [ArmaDllExport].");
            return;
        }

        println!("\nMarked methods:");
        let mut tw = TabWriter::new(&[
            ("Token", Align::Left),
            ("Method", Align::Left),
            ("Export", Align::Left),
            ("Symbol", Align::Left),
        ])
        .indent("  ");
        for candidate in &report.candidates {
            let symbol = if candidate.wrapped {
                candidate.symbol.clone()
            } else {
                format!("{} (not supported)", candidate.symbol)
            };
            tw.row(vec![
                candidate.token.clone(),
                candidate.method.clone(),
                candidate.kind.clone(),
                symbol,
            ]);
        }
        tw.print();

        if !report.directives.is_empty() {
            println!("\nPlanned exports:");
            let mut tw = TabWriter::new(&[("Ordinal", Align::Right), ("Symbol", Align::Left)])
                .indent("  ");
            for directive in &report.directives {
                tw.row(vec![directive.ordinal.to_string(), directive.name.clone()]);
            }
            tw.print();
        }
    })
}

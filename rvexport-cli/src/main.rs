mod app;
mod commands;
mod output;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // rvexport info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("rvexport", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Export {
            path,
            ilasm,
            ildasm,
            keep_il,
        } => commands::export::run(path, ilasm, ildasm, *keep_il, &cli.global),
        Command::Inspect { path } => commands::inspect::run(path, &cli.global),
    }
}

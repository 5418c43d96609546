use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rvexport - native export injection for Arma 3 extensions written in .NET
#[derive(Debug, Parser)]
#[command(name = "rvexport", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inject the marked methods of a compiled library as native exports.
    Export {
        /// Path to the compiled extension library.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Path to the IL assembler (ilasm.exe).
        #[arg(long, value_name = "PATH")]
        ilasm: PathBuf,

        /// Path to the IL disassembler (ildasm.exe).
        #[arg(long, value_name = "PATH")]
        ildasm: PathBuf,

        /// Keep the intermediate .il and .res files next to the library.
        #[arg(long)]
        keep_il: bool,
    },

    /// Show the architecture, marked methods and planned exports without changing anything.
    Inspect {
        /// Path to the compiled extension library.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

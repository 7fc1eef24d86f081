//! Lunet command-line runner.
//!
//! Runs script files, evaluates inline chunks, and checks syntax with
//! span diagnostics.

mod diagnostics;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lunet::{Error, LibSet, State};
use lunet_engine::{parser, EngineError};

#[derive(Parser)]
#[command(name = "lunet")]
#[command(about = "Lunet scripting toolchain", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lunet file
    Run {
        /// Input file
        file: PathBuf,
        /// Open no standard libraries
        #[arg(long)]
        no_stdlib: bool,
    },

    /// Evaluate an inline chunk and print its results
    Eval {
        /// Chunk source
        code: String,
        /// Open no standard libraries
        #[arg(long)]
        no_stdlib: bool,
    },

    /// Parse a file without running it
    Check {
        /// Input file
        file: PathBuf,
    },
}

fn libs(no_stdlib: bool) -> LibSet {
    if no_stdlib {
        LibSet::NONE
    } else {
        LibSet::ALL
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { file, no_stdlib } => run_file(&file, libs(no_stdlib)),
        Commands::Eval { code, no_stdlib } => eval_chunk(&code, libs(no_stdlib)),
        Commands::Check { file } => check_file(&file),
    }
}

fn run_file(file: &PathBuf, libs: LibSet) -> ExitCode {
    let mut state = State::with_libs(libs);
    match state.do_file(file) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Syntax(_)) => {
            // Re-parse for the span; the bridge error carries only text
            check_file(file)
        }
        Err(e) => {
            eprintln!("lunet: {e}");
            ExitCode::FAILURE
        }
    }
}

fn eval_chunk(code: &str, libs: LibSet) -> ExitCode {
    let mut state = State::with_libs(libs);
    match state.do_string(code) {
        Ok(()) => {
            // Print whatever the chunk returned
            let results = state.top();
            for i in 1..=results {
                match state.vm().value(i as i32) {
                    Some(v) => println!("{v}"),
                    None => break,
                }
            }
            ExitCode::SUCCESS
        }
        Err(Error::Syntax(_)) => {
            report_source_error(code, "(eval)");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("lunet: {e}");
            ExitCode::FAILURE
        }
    }
}

fn check_file(file: &PathBuf) -> ExitCode {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("lunet: cannot read {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };
    let name = file.display().to_string();
    match parser::parse_chunk(&source, &name) {
        Ok(_) => ExitCode::SUCCESS,
        Err(EngineError::Syntax { message, span, .. }) => {
            diagnostics::report_syntax(&name, &source, span, &message);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("lunet: {e}");
            ExitCode::FAILURE
        }
    }
}

fn report_source_error(source: &str, name: &str) {
    if let Err(EngineError::Syntax { message, span, .. }) = parser::parse_chunk(source, name) {
        diagnostics::report_syntax(name, source, span, &message);
    }
}

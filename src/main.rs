// File: src/main.rs
//
// Command-line entry point for the EBS script core.
// Runs serialized programs, checks them without running, and lists the
// builtin library.

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;
use ebscript::ast::Program;
use ebscript::{init_tracing, Interpreter, InterpreterConfig, RuntimeError};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(ClapParser)]
#[command(
    name = "ebs",
    about = "EBS: a typed scripting language interpreter",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Run a program (AST serialized as JSON)
    Run {
        /// Path to the program file
        program: PathBuf,

        /// Configuration file; defaults to ./ebs.toml when present
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the maximum call depth
        #[arg(long)]
        max_call_depth: Option<usize>,
    },

    /// List builtin functions with their signatures
    Builtins {
        /// Only show names starting with this prefix
        #[arg(long)]
        filter: Option<String>,
    },

    /// Load and statically check a program without running it
    Check {
        program: PathBuf,
    },
}

fn run(program: PathBuf, config: Option<PathBuf>, max_call_depth: Option<usize>) -> Result<(), RuntimeError> {
    let mut config = InterpreterConfig::discover(config.as_deref())?;
    if let Some(depth) = max_call_depth {
        config.max_call_depth = depth;
    }
    Interpreter::with_config(config).run_file(&program)
}

fn check(path: PathBuf) -> Result<(), RuntimeError> {
    let text = fs::read_to_string(&path).map_err(|source| RuntimeError::Io { path: path.clone(), source })?;
    let program = Program::from_json(&text).map_err(|source| RuntimeError::Program { path: path.clone(), source })?;
    let problems = program.validate();
    if problems.is_empty() {
        println!("{}: ok ({} statements)", path.display(), program.main.statements.len());
        Ok(())
    } else {
        Err(RuntimeError::Invalid(problems.join("; ")))
    }
}

fn list_builtins(filter: Option<String>) {
    let interpreter = Interpreter::new();
    let filter = filter.map(|f| f.to_lowercase());
    for name in interpreter.builtin_names() {
        if filter.as_deref().map_or(true, |f| name.starts_with(f)) {
            if let Some(def) = interpreter.builtins().get(name) {
                println!("{}", def.signature());
            }
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { program, config, max_call_depth } => run(program, config, max_call_depth),
        Commands::Builtins { filter } => {
            list_builtins(filter);
            Ok(())
        }
        Commands::Check { program } => check(program),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(RuntimeError::Unhandled(exception)) => {
            eprint!("{}", exception);
            ExitCode::FAILURE
        }
        Err(error) => {
            eprintln!("{} {}", "error:".red().bold(), error);
            ExitCode::FAILURE
        }
    }
}

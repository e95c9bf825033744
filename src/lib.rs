// File: src/lib.rs
//
// Library interface for the EBS script core.
// Exposes the AST, the type system and the interpreter for hosts and
// integration tests. Parsing source text is left to an external front end;
// programs arrive as an AST, built in-process or loaded from JSON.

pub mod ast;
pub mod config;
pub mod errors;
pub mod interpreter;
pub mod module;
pub mod types;

pub use ast::{Block, Expr, Program, Stmt};
pub use config::InterpreterConfig;
pub use errors::{ErrorType, RuntimeError, ScriptException};
pub use interpreter::{Interpreter, Value};
pub use types::{DataType, TypeSpec};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call more than once. Enable with `RUST_LOG=ebscript=debug` or
/// `RUST_LOG=ebscript=trace` (trace also logs every builtin call).
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    });
}

// File: src/interpreter/mod.rs
//
// Tree-walking interpreter for EBS scripts.
// Executes a finished AST by visiting its statements and expressions.
//
// The interpreter owns the scope chain, the user function table, the builtin
// registry, typedef aliases and the open database connections. Every
// statement evaluates to `Result<ControlFlow, ScriptException>`:
// - break/continue/return travel on the Ok side as ControlFlow signals and
//   stop at the nearest loop or call boundary
// - exceptions travel on the Err side and stop at the first matching handler
// so an exception handler can never intercept a control-flow signal.

mod calls;
pub mod control_flow;
pub mod database;
pub mod environment;
pub mod exceptions;
mod expressions;
pub mod native_functions;
pub mod operators;
mod statements;
pub mod value;

pub use control_flow::ControlFlow;
pub use database::{
    ConnectionTarget, CursorSpec, DbAdapter, DbConnection, DbCursor, DbError, MaterializedCursor, Row,
    SqliteAdapter,
};
pub use environment::{Environment, Slot};
pub use native_functions::timers::{TimerFired, TimerQueue, TimerRegistry};
pub use native_functions::{BuiltinDef, BuiltinError, BuiltinRegistry};
pub use value::{ArrayValue, RecordMap, Value, DATE_FORMAT};

use crate::ast::{Block, ExceptionHandler, Program, Stmt, StmtKind};
use crate::config::InterpreterConfig;
use crate::errors::{ErrorType, RuntimeError, ScriptException, StackFrame};
use crate::module::ModuleLoader;
use crate::types::{DataType, TypeRegistry};
use ahash::AHashMap;
use exceptions::find_handler;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of executing a statement
pub type ExecResult = Result<ControlFlow, ScriptException>;
/// Result of evaluating an expression
pub type EvalResult = Result<Value, ScriptException>;

const TIMER_POLL: Duration = Duration::from_millis(25);

/// Grow the native stack when less than this remains
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each stack segment added by `stacker`
const STACK_GROWTH: usize = 1024 * 1024;

/// Main interpreter that executes EBS programs
///
/// The interpreter maintains:
/// - `env`: the scope chain, with the global frame at the bottom
/// - `functions`: user function blocks by lower-cased name
/// - `connections`: open database connections by lower-cased name
/// - `output`: optional capture buffer used instead of stdout
pub struct Interpreter {
    pub env: Environment,
    functions: AHashMap<String, Arc<Block>>,
    builtins: BuiltinRegistry,
    types: TypeRegistry,
    db: Box<dyn DbAdapter>,
    connections: AHashMap<String, Box<dyn DbConnection>>,
    /// Names pushed by `use` blocks; the last one is current
    connection_stack: Vec<String>,
    modules: ModuleLoader,
    current_file: Option<PathBuf>,
    /// Line of the statement being executed, recorded in stack frames
    current_line: usize,
    timers: TimerRegistry,
    timer_queue: TimerQueue,
    call_stack: Vec<StackFrame>,
    config: InterpreterConfig,
    output: Option<Arc<Mutex<Vec<u8>>>>,
}

impl Interpreter {
    /// Creates an interpreter with default configuration, the standard
    /// builtins and the SQLite adapter
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        let (timers, timer_queue) = native_functions::timers::channel();
        let builtins = BuiltinRegistry::with_standard_library(&timers);
        Interpreter {
            env: Environment::new(),
            functions: AHashMap::new(),
            builtins,
            types: TypeRegistry::new(),
            db: Box::new(SqliteAdapter),
            connections: AHashMap::new(),
            connection_stack: Vec::new(),
            modules: ModuleLoader::new(config.module_paths.clone()),
            current_file: None,
            current_line: 0,
            timers,
            timer_queue,
            call_stack: Vec::new(),
            config,
            output: None,
        }
    }

    /// Replaces the database collaborator
    pub fn with_database_adapter(mut self, adapter: impl DbAdapter + 'static) -> Self {
        self.db = Box::new(adapter);
        self
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    /// Mutable registry, for registering host builtins before a run
    pub fn builtins_mut(&mut self) -> &mut BuiltinRegistry {
        &mut self.builtins
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_lowercase())
    }

    pub fn active_timers(&self) -> usize {
        self.timers.active_count()
    }

    /// Sets the output buffer for print statements (used for testing)
    pub fn set_output(&mut self, output: Arc<Mutex<Vec<u8>>>) {
        self.output = Some(output);
    }

    fn write_output(&self, msg: &str) {
        if let Some(out) = &self.output {
            let mut buffer = out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = writeln!(buffer, "{}", msg);
        } else {
            println!("{}", msg);
        }
    }

    /// Runs `f` inside a fresh child scope that is popped on every exit path.
    /// Nested blocks and user calls all pass through here, so the native
    /// stack is grown on demand before descending.
    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            self.env.push_scope();
            let result = f(self);
            self.env.pop_scope();
            result
        })
    }

    /// Executes statements in order, stopping at the first control signal
    /// or exception. Exceptions are stamped with the raising line and the
    /// current call stack.
    fn execute_statements(&mut self, stmts: &[Stmt]) -> ExecResult {
        for stmt in stmts {
            self.current_line = stmt.line;
            let flow = stmt.accept(self).map_err(|e| self.locate(e, stmt.line))?;
            if !flow.is_normal() {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn locate(&self, exception: ScriptException, line: usize) -> ScriptException {
        let exception = exception.at_line(line).with_stack(&self.call_stack);
        match &self.current_file {
            Some(file) => exception.in_file(&file.display().to_string()),
            None => exception,
        }
    }

    /// Registers a function block under its lower-cased name.
    /// Re-visiting the same declaration is a no-op; a different block with
    /// the same name is a VALIDATION_ERROR.
    fn define_function(&mut self, block: &Arc<Block>) -> Result<(), ScriptException> {
        let key = block.display_name().to_lowercase();
        if let Some(existing) = self.functions.get(&key) {
            if Arc::ptr_eq(existing, block) {
                return Ok(());
            }
            return Err(ScriptException::new(
                ErrorType::ValidationError,
                format!("Function '{}' is already declared", key),
            ));
        }
        if self.builtins.contains(&key) {
            tracing::warn!(function = %key, "function is shadowed by a builtin of the same name");
        }
        tracing::debug!(function = %key, params = block.params.len(), "function declared");
        self.functions.insert(key, Arc::clone(block));
        Ok(())
    }

    /// Declares every top-level function before the first statement runs
    fn hoist_functions(&mut self, stmts: &[Stmt]) -> Result<(), ScriptException> {
        for stmt in stmts {
            if let StmtKind::Function(block) = &stmt.kind {
                self.define_function(block).map_err(|e| e.at_line(stmt.line))?;
            }
        }
        Ok(())
    }

    /// Runs a handler block in a fresh scope with the error variable bound
    /// to the exception message
    fn run_handler(&mut self, handler: &ExceptionHandler, exception: &ScriptException) -> ExecResult {
        tracing::debug!(exception = %exception.name(), line = exception.location.line, "exception handled");
        self.scoped(|interp| {
            if let Some(var) = &handler.error_var {
                interp
                    .env
                    .define(var, Slot::new(Value::string(exception.message.as_str()), DataType::String.into()));
            }
            interp.execute_statements(&handler.body)
        })
    }

    /// Executes a top-level block in the global frame.
    ///
    /// Each run starts with no user functions and imports its modules
    /// afresh. Functions are hoisted first, then the statements run. An
    /// exception that escapes is offered to the block's own handlers; if none
    /// matches it is returned as the unhandled failure. Open cursors and
    /// connections are closed whatever the outcome.
    pub fn run(&mut self, block: &Block) -> Result<(), ScriptException> {
        tracing::debug!(statements = block.statements.len(), "run started");
        self.modules.reset();
        self.functions.clear();
        let result = self.run_block(block);
        self.release_resources();

        match &result {
            Ok(()) => tracing::debug!("run finished"),
            Err(e) => tracing::warn!(exception = %e.name(), message = %e.message, line = e.location.line, "unhandled exception"),
        }
        result
    }

    fn run_block(&mut self, block: &Block) -> Result<(), ScriptException> {
        self.hoist_functions(&block.statements)?;
        match self.execute_statements(&block.statements) {
            Ok(_) => Ok(()),
            Err(exception) => match find_handler(&block.handlers, &exception) {
                Some(handler) => self.run_handler(handler, &exception).map(|_| ()),
                None => Err(exception),
            },
        }
    }

    pub fn run_program(&mut self, program: &Program) -> Result<(), ScriptException> {
        self.run(&program.main)
    }

    /// Loads a serialized program, runs it and waits for pending timers
    pub fn run_file(&mut self, path: &Path) -> Result<(), RuntimeError> {
        let text = fs::read_to_string(path)
            .map_err(|source| RuntimeError::Io { path: path.to_path_buf(), source })?;
        let program = Program::from_json(&text)
            .map_err(|source| RuntimeError::Program { path: path.to_path_buf(), source })?;

        self.current_file = Some(path.to_path_buf());
        self.run_program(&program)?;
        self.run_until_idle()?;
        Ok(())
    }

    fn release_resources(&mut self) {
        self.env.close_all_cursors();
        self.connection_stack.clear();
        for (name, mut connection) in self.connections.drain() {
            match connection.close() {
                Ok(()) => tracing::debug!(connection = %name, "connection closed"),
                Err(error) => tracing::warn!(connection = %name, %error, "connection close failed"),
            }
        }
    }

    /// Delivers every timer completion queued so far, on this thread.
    /// Returns the number of callbacks run.
    pub fn pump_timers(&mut self) -> Result<usize, ScriptException> {
        let mut delivered = 0;
        for fired in self.timer_queue.drain() {
            if self.deliver(&fired)? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Pumps timers until none is active. An exception escaping a callback
    /// stops every timer and is returned.
    pub fn run_until_idle(&mut self) -> Result<(), ScriptException> {
        let result = self.wait_for_timers();
        if result.is_err() {
            self.timers.stop_all();
        }
        self.release_resources();
        result
    }

    fn wait_for_timers(&mut self) -> Result<(), ScriptException> {
        loop {
            self.pump_timers()?;
            if self.timers.active_count() == 0 {
                return Ok(());
            }
            if let Some(fired) = self.timer_queue.wait(TIMER_POLL) {
                self.deliver(&fired)?;
            }
        }
    }

    /// Runs the callback for one completion unless it is stale
    fn deliver(&mut self, fired: &TimerFired) -> Result<bool, ScriptException> {
        let Some(callback) = self.timers.accept(fired) else {
            return Ok(false);
        };
        let function = self
            .functions
            .get(&callback.to_lowercase())
            .cloned()
            .ok_or_else(|| ScriptException::undefined_function(&callback))?;
        let args = if function.params.is_empty() {
            Vec::new()
        } else {
            vec![(None, Value::string(fired.name.as_str()))]
        };
        self.invoke_function(&function, args)?;
        Ok(true)
    }

    /// Sorted builtin names, for listings and suggestions
    pub fn builtin_names(&self) -> Vec<&str> {
        self.builtins.names()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

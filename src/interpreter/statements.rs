// File: src/interpreter/statements.rs
//
// Statement execution: the StmtVisitor half of the evaluator.
// Compound statements run their bodies through `scoped`, so the child frame
// (and any cursor declared in it) is released on every exit path.

use super::database::{ConnectionTarget, CursorSpec};
use super::exceptions::find_handler;
use super::operators::require_bool;
use super::value::{ArrayValue, RecordMap};
use super::{ControlFlow, ExecResult, Interpreter, Slot, Value};
use crate::ast::{
    Argument, Block, Call, Expr, ForEach, ForLoop, RaiseStatement, Stmt, StmtVisitor, TryStatement, VarDecl,
};
use crate::errors::{ErrorType, ScriptException};
use crate::module::ModuleLoad;
use crate::types::{coerce, DataType, Shape, TypeSpec};
use std::path::Path;
use std::sync::Arc;

/// What a loop body asked for
enum LoopStep {
    Next,
    Exit,
    Propagate(ControlFlow),
}

fn loop_step(flow: ControlFlow) -> LoopStep {
    match flow {
        ControlFlow::Normal | ControlFlow::Continue => LoopStep::Next,
        ControlFlow::Break => LoopStep::Exit,
        ret @ ControlFlow::Return(_) => LoopStep::Propagate(ret),
    }
}

impl Interpreter {
    fn count_iteration(&self, iterations: &mut u64) -> Result<(), ScriptException> {
        *iterations += 1;
        match self.config.max_loop_iterations {
            Some(max) if *iterations > max => Err(ScriptException::new(
                ErrorType::ValidationError,
                format!("Loop exceeded the limit of {} iterations", max),
            )),
            _ => Ok(()),
        }
    }

    fn run_loop_body(&mut self, body: &[Stmt]) -> Result<LoopStep, ScriptException> {
        self.scoped(|interp| interp.execute_statements(body)).map(loop_step)
    }

    /// Splits evaluated SQL arguments into named and positional bindings
    pub(super) fn evaluate_sql_args(
        &mut self,
        args: &[Argument],
    ) -> Result<(Vec<(String, Value)>, Vec<Value>), ScriptException> {
        let mut named = Vec::new();
        let mut positional = Vec::new();
        for (name, value) in self.evaluate_args(args)? {
            match name {
                Some(name) => named.push((name.to_lowercase(), value)),
                None => positional.push(value),
            }
        }
        Ok((named, positional))
    }

    /// Elements visited by foreach
    fn iteration_items(iterable: Value) -> Result<Vec<Value>, ScriptException> {
        match iterable {
            Value::Array(array) => Ok(array.items.clone()),
            Value::Record(fields) => Ok(fields.keys().map(|k| Value::string(k.as_str())).collect()),
            Value::Json(json) => match json.as_ref() {
                serde_json::Value::Array(items) => Ok(items.iter().map(Value::from_json).collect()),
                serde_json::Value::Object(map) => Ok(map.keys().map(|k| Value::string(k.as_str())).collect()),
                other => Err(ScriptException::type_error(format!("Cannot iterate over json {}", other))),
            },
            Value::Str(text) => Ok(text.chars().map(|c| Value::string(c.to_string())).collect()),
            Value::Null => Err(ScriptException::new(ErrorType::NullError, "Cannot iterate over null")),
            other => Err(ScriptException::type_error(format!("Cannot iterate over {}", other.type_name()))),
        }
    }
}

/// Standard category raised with its evaluated arguments; at most one
/// argument, used as the message
fn standard_raise(error_type: ErrorType, mut payload: Vec<Value>) -> Result<ScriptException, ScriptException> {
    if payload.len() > 1 {
        return Err(ScriptException::new(
            ErrorType::ValidationError,
            format!("raise {} takes at most one parameter, got {}", error_type, payload.len()),
        ));
    }
    let message = match payload.pop() {
        Some(value) => value.to_string(),
        None => error_type.name().to_string(),
    };
    Ok(ScriptException::new(error_type, message))
}

fn index_of(index: &Value, len: usize) -> Result<usize, ScriptException> {
    let n = index
        .as_i64()
        .ok_or_else(|| ScriptException::type_error(format!("Index must be an integer, got {}", index.type_name())))?;
    usize::try_from(n).map_err(|_| {
        ScriptException::new(ErrorType::IndexError, format!("Index {} out of bounds (length {})", n, len))
    })
}

/// Writes `value` at `index` of an array slot: fixed arrays are range
/// checked, dynamic arrays grow and fill the gap with the element default
fn store_array_item(array: &mut Arc<ArrayValue>, element: &TypeSpec, index: &Value, value: Value) -> Result<(), ScriptException> {
    let len = array.items.len();
    let position = index_of(index, len)?;
    let value = coerce(value, element)?;
    if position >= len && array.fixed {
        return Err(ScriptException::new(
            ErrorType::IndexError,
            format!("Index {} out of bounds (length {})", position, len),
        ));
    }

    let array = Arc::make_mut(array);
    if position >= len {
        array.items.resize(position + 1, element.default_value());
    }
    array.items[position] = value;
    Ok(())
}

/// Writes a record field; a declared record shape only accepts its own fields
fn store_record_field(
    fields: &mut Arc<RecordMap>,
    spec: &TypeSpec,
    key: &str,
    value: Value,
) -> Result<(), ScriptException> {
    let value = match spec.record_shape() {
        Some(shape) => {
            let field = shape.get(key).ok_or_else(|| {
                ScriptException::not_found(format!("Record has no field '{}'", key))
            })?;
            coerce(value, &field.spec)?
        }
        None => value,
    };

    let fields = Arc::make_mut(fields);
    let existing = fields.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned();
    fields.insert(existing.unwrap_or_else(|| key.to_lowercase()), value);
    Ok(())
}

fn store_json(json: &mut Arc<serde_json::Value>, key: &Value, value: Value) -> Result<(), ScriptException> {
    let node = Arc::make_mut(json);
    match (node, key) {
        (serde_json::Value::Object(map), Value::Str(name)) => {
            map.insert(name.to_string(), value.to_json());
            Ok(())
        }
        (serde_json::Value::Array(items), index) => {
            let len = items.len();
            let position = index_of(index, len)?;
            if position < len {
                items[position] = value.to_json();
            } else if position == len {
                items.push(value.to_json());
            } else {
                return Err(ScriptException::new(
                    ErrorType::IndexError,
                    format!("Index {} out of bounds (length {})", position, len),
                ));
            }
            Ok(())
        }
        (_, key) => Err(ScriptException::type_error(format!(
            "Cannot assign json member with a {} key",
            key.type_name()
        ))),
    }
}

/// Indexed assignment into the value held by a slot
fn store_indexed(slot: &mut Slot, index: Value, value: Value) -> Result<(), ScriptException> {
    let element = slot.spec.element_spec();
    let spec = slot.spec.clone();
    match &mut slot.value {
        Value::Array(array) => {
            let element = if spec.data_type == DataType::Array { element } else { array.element.into() };
            store_array_item(array, &element, &index, value)
        }
        Value::Record(fields) => match index.as_str() {
            Some(key) => store_record_field(fields, &spec, key, value),
            None => Err(ScriptException::type_error(format!(
                "Record keys are strings, got {}",
                index.type_name()
            ))),
        },
        Value::Json(json) => store_json(json, &index, value),
        Value::Null => Err(ScriptException::new(ErrorType::NullError, "Cannot index into null")),
        other => Err(ScriptException::type_error(format!("Cannot index into {}", other.type_name()))),
    }
}

/// Property assignment: record fields, bitmap/intmap fields, json members
fn store_property(slot: &mut Slot, property: &str, value: Value) -> Result<(), ScriptException> {
    let spec = slot.spec.clone();
    let declared_layout = spec.shape.as_ref().and_then(Shape::bit_fields);
    match &mut slot.value {
        Value::Record(fields) => store_record_field(fields, &spec, property, value),
        Value::Bitmap { bits, layout } => {
            let fields = layout.clone().or(declared_layout).ok_or_else(|| {
                ScriptException::type_error("Bitmap has no field layout")
            })?;
            let n = value.as_i64().ok_or_else(|| {
                ScriptException::type_error(format!("Bit field value must be an integer, got {}", value.type_name()))
            })?;
            *bits = fields.set(*bits as u32, property, n)? as u8;
            Ok(())
        }
        Value::Intmap { bits, layout } => {
            let fields = layout.clone().or(declared_layout).ok_or_else(|| {
                ScriptException::type_error("Intmap has no field layout")
            })?;
            let n = value.as_i64().ok_or_else(|| {
                ScriptException::type_error(format!("Bit field value must be an integer, got {}", value.type_name()))
            })?;
            *bits = fields.set(*bits as u32, property, n)? as i32;
            Ok(())
        }
        Value::Json(json) => store_json(json, &Value::string(property), value),
        Value::Null => Err(ScriptException::new(
            ErrorType::NullError,
            format!("Cannot set '{}' on null", property),
        )),
        other => Err(ScriptException::type_error(format!(
            "{} has no assignable property '{}'",
            other.type_name(),
            property
        ))),
    }
}

impl StmtVisitor for Interpreter {
    type Output = ExecResult;

    fn visit_block(&mut self, block: &Arc<Block>) -> ExecResult {
        match self.scoped(|interp| interp.execute_statements(&block.statements)) {
            Err(exception) => match find_handler(&block.handlers, &exception) {
                Some(handler) => self.run_handler(handler, &exception),
                None => Err(exception),
            },
            flow => flow,
        }
    }

    fn visit_var_decl(&mut self, decl: &VarDecl) -> ExecResult {
        let spec = self.types.resolve(&decl.spec)?;
        let value = match &decl.init {
            Some(init) => {
                let value = init.accept(self)?;
                coerce(value, &spec).map_err(|e| {
                    ScriptException::type_error(format!("Cannot initialise '{}': {}", decl.name, e.message))
                })?
            }
            None => spec.default_value(),
        };
        let slot = if decl.constant { Slot::constant(value, spec) } else { Slot::new(value, spec) };
        self.env.define(&decl.name, slot);
        Ok(ControlFlow::Normal)
    }

    fn visit_assign(&mut self, name: &str, value: &Expr) -> ExecResult {
        let value = value.accept(self)?;
        self.env.assign(name, value)?;
        Ok(ControlFlow::Normal)
    }

    fn visit_index_assign(&mut self, target: &str, index: &Expr, value: &Expr) -> ExecResult {
        let index = index.accept(self)?;
        let value = value.accept(self)?;
        self.env.mutate(target, |slot| store_indexed(slot, index, value))?;
        Ok(ControlFlow::Normal)
    }

    fn visit_property_assign(&mut self, target: &str, property: &str, value: &Expr) -> ExecResult {
        let value = value.accept(self)?;
        self.env.mutate(target, |slot| store_property(slot, property, value))?;
        Ok(ControlFlow::Normal)
    }

    fn visit_if(&mut self, condition: &Expr, then_branch: &[Stmt], else_branch: Option<&[Stmt]>) -> ExecResult {
        let test = condition.accept(self)?;
        if require_bool(&test, "if condition")? {
            self.scoped(|interp| interp.execute_statements(then_branch))
        } else if let Some(else_branch) = else_branch {
            self.scoped(|interp| interp.execute_statements(else_branch))
        } else {
            Ok(ControlFlow::Normal)
        }
    }

    fn visit_while(&mut self, condition: &Expr, body: &[Stmt]) -> ExecResult {
        let mut iterations = 0;
        loop {
            let test = condition.accept(self)?;
            if !require_bool(&test, "while condition")? {
                break;
            }
            self.count_iteration(&mut iterations)?;
            match self.run_loop_body(body)? {
                LoopStep::Next => {}
                LoopStep::Exit => break,
                LoopStep::Propagate(flow) => return Ok(flow),
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn visit_do_while(&mut self, body: &[Stmt], condition: &Expr) -> ExecResult {
        let mut iterations = 0;
        loop {
            self.count_iteration(&mut iterations)?;
            match self.run_loop_body(body)? {
                LoopStep::Next => {}
                LoopStep::Exit => break,
                LoopStep::Propagate(flow) => return Ok(flow),
            }
            let test = condition.accept(self)?;
            if !require_bool(&test, "do-while condition")? {
                break;
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn visit_for(&mut self, for_loop: &ForLoop) -> ExecResult {
        self.scoped(|interp| {
            if let Some(init) = &for_loop.init {
                init.accept(interp)?;
            }
            let mut iterations = 0;
            loop {
                if let Some(condition) = &for_loop.condition {
                    let test = condition.accept(interp)?;
                    if !require_bool(&test, "for condition")? {
                        break;
                    }
                }
                interp.count_iteration(&mut iterations)?;
                match interp.run_loop_body(&for_loop.body)? {
                    LoopStep::Next => {}
                    LoopStep::Exit => break,
                    LoopStep::Propagate(flow) => return Ok(flow),
                }
                if let Some(update) = &for_loop.update {
                    update.accept(interp)?;
                }
            }
            Ok(ControlFlow::Normal)
        })
    }

    fn visit_foreach(&mut self, foreach: &ForEach) -> ExecResult {
        let iterable = foreach.iterable.accept(self)?;
        let items = Self::iteration_items(iterable)?;
        let spec = match &foreach.var_type {
            Some(spec) => self.types.resolve(spec)?,
            None => TypeSpec::any(),
        };

        for item in items {
            let item = coerce(item, &spec)?;
            let flow = self.scoped(|interp| {
                interp.env.define(&foreach.var, Slot::new(item, spec.clone()));
                interp.execute_statements(&foreach.body)
            })?;
            match loop_step(flow) {
                LoopStep::Next => {}
                LoopStep::Exit => break,
                LoopStep::Propagate(flow) => return Ok(flow),
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn visit_break(&mut self) -> ExecResult {
        Ok(ControlFlow::Break)
    }

    fn visit_continue(&mut self) -> ExecResult {
        Ok(ControlFlow::Continue)
    }

    fn visit_return(&mut self, value: Option<&Expr>) -> ExecResult {
        let value = match value {
            Some(expr) => expr.accept(self)?,
            None => Value::Null,
        };
        Ok(ControlFlow::Return(value))
    }

    fn visit_call_stmt(&mut self, call: &Call) -> ExecResult {
        self.call(call)?;
        Ok(ControlFlow::Normal)
    }

    fn visit_print(&mut self, value: &Expr) -> ExecResult {
        let value = value.accept(self)?;
        self.write_output(&value.to_string());
        Ok(ControlFlow::Normal)
    }

    fn visit_connect(&mut self, name: &str, spec: &Expr) -> ExecResult {
        let key = name.to_lowercase();
        if self.connections.contains_key(&key) {
            return Err(ScriptException::new(
                ErrorType::DbError,
                format!("Connection '{}' is already open", key),
            ));
        }
        let spec = spec.accept(self)?;
        let target = ConnectionTarget::resolve(&spec, &self.config)?;
        let connection = self.db.connect(&target)?;
        tracing::debug!(connection = %key, driver = %target.driver, "connection opened");
        self.connections.insert(key, connection);
        Ok(ControlFlow::Normal)
    }

    fn visit_use_connection(&mut self, name: &str, body: &[Stmt]) -> ExecResult {
        let key = name.to_lowercase();
        if !self.connections.contains_key(&key) {
            return Err(ScriptException::not_found(format!("No open connection named '{}'", key)));
        }
        self.connection_stack.push(key);
        let result = self.scoped(|interp| interp.execute_statements(body));
        self.connection_stack.pop();
        result
    }

    fn visit_cursor_decl(&mut self, name: &str, sql: &str) -> ExecResult {
        let connection = self.connection_stack.last().cloned().ok_or_else(|| {
            ScriptException::new(
                ErrorType::DbError,
                format!("Cursor '{}' must be declared inside a use block", name),
            )
        })?;
        self.env.declare_cursor(name, CursorSpec { connection, sql: sql.to_string() });
        Ok(ControlFlow::Normal)
    }

    fn visit_open_cursor(&mut self, name: &str, args: &[Argument]) -> ExecResult {
        let (named, positional) = self.evaluate_sql_args(args)?;

        let entry = self
            .env
            .cursor_mut(name)
            .ok_or_else(|| ScriptException::not_found(format!("Undefined cursor '{}'", name)))?;
        // Re-opening restarts the cursor
        entry.close(name);
        let spec = entry.spec.clone();

        let connection = self.connections.get_mut(&spec.connection).ok_or_else(|| {
            ScriptException::new(
                ErrorType::DbError,
                format!("Connection '{}' of cursor '{}' is closed", spec.connection, name),
            )
        })?;
        let cursor = connection.open_cursor(&spec.sql, &named, &positional)?;
        tracing::debug!(cursor = %name, connection = %spec.connection, "cursor opened");

        if let Some(entry) = self.env.cursor_mut(name) {
            entry.open = Some(cursor);
        }
        Ok(ControlFlow::Normal)
    }

    fn visit_close_cursor(&mut self, name: &str) -> ExecResult {
        if let Some(entry) = self.env.cursor_mut(name) {
            entry.close(name);
        }
        Ok(ControlFlow::Normal)
    }

    fn visit_close_connection(&mut self, name: &str) -> ExecResult {
        let key = name.to_lowercase();
        if let Some(mut connection) = self.connections.remove(&key) {
            connection.close()?;
            tracing::debug!(connection = %key, "connection closed");
        }
        Ok(ControlFlow::Normal)
    }

    fn visit_try(&mut self, try_stmt: &TryStatement) -> ExecResult {
        match self.scoped(|interp| interp.execute_statements(&try_stmt.body)) {
            Err(exception) => match find_handler(&try_stmt.handlers, &exception) {
                Some(handler) => self.run_handler(handler, &exception),
                None => Err(exception),
            },
            flow => flow,
        }
    }

    fn visit_raise(&mut self, raise: &RaiseStatement) -> ExecResult {
        let exception = match raise {
            RaiseStatement::Standard { error_type, message } => {
                let message = match message {
                    Some(expr) => expr.accept(self)?.to_string(),
                    None => error_type.name().to_string(),
                };
                ScriptException::new(*error_type, message)
            }
            RaiseStatement::Custom { name, args } => {
                let mut payload = Vec::with_capacity(args.len());
                for arg in args {
                    payload.push(arg.accept(self)?);
                }
                // a custom raise spelled like a standard category is that category
                match ErrorType::from_name(name) {
                    Some(error_type) => standard_raise(error_type, payload)?,
                    None => ScriptException::custom(name.as_str(), payload),
                }
            }
        };
        tracing::debug!(exception = %exception.name(), message = %exception.message, "exception raised");
        Err(exception)
    }

    fn visit_typedef(&mut self, name: &str, spec: &TypeSpec) -> ExecResult {
        let resolved = self.types.resolve(spec)?;
        self.types.define(name, resolved);
        Ok(ControlFlow::Normal)
    }

    fn visit_import(&mut self, path: &str) -> ExecResult {
        let importer_dir = self.current_file.as_deref().and_then(Path::parent).map(Path::to_path_buf);
        match self.modules.load(path, importer_dir.as_deref())? {
            ModuleLoad::Skipped(resolved) => {
                if self.config.echo_imports {
                    self.write_output(&format!("import skipped: {}", resolved.display()));
                }
                Ok(ControlFlow::Normal)
            }
            ModuleLoad::Loaded { path: resolved, program } => {
                if self.config.echo_imports {
                    self.write_output(&format!("imported: {}", resolved.display()));
                }
                let previous = self.current_file.replace(resolved.clone());
                let statements = &program.main.statements;
                let result = self.hoist_functions(statements).and_then(|_| self.execute_statements(statements));
                self.current_file = previous;
                self.modules.finish(&resolved);
                result.map(|_| ControlFlow::Normal)
            }
        }
    }

    fn visit_function(&mut self, block: &Arc<Block>) -> ExecResult {
        self.define_function(block)?;
        Ok(ControlFlow::Normal)
    }
}

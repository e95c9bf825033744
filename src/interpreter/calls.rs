// File: src/interpreter/calls.rs
//
// Call resolution and user function invocation.
// Builtins are resolved first, then user functions, so a host builtin
// always wins over a script function of the same name.

use super::exceptions::find_handler;
use super::{ControlFlow, EvalResult, Interpreter, Slot, Value};
use crate::ast::{Argument, Block, Call};
use crate::errors::{find_closest_match, ErrorType, ScriptException, StackFrame};
use crate::types::coerce;
use std::sync::Arc;

/// Evaluated call arguments: optional parameter name and value
pub(super) type BoundArgs = Vec<(Option<String>, Value)>;

enum Callee {
    Builtin,
    User(Arc<Block>),
}

impl Interpreter {
    pub(super) fn evaluate_args(&mut self, args: &[Argument]) -> Result<BoundArgs, ScriptException> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push((arg.name.clone(), arg.value.accept(self)?));
        }
        Ok(values)
    }

    fn resolve_callee(&self, name: &str) -> Result<Callee, ScriptException> {
        if self.builtins.contains(name) {
            return Ok(Callee::Builtin);
        }
        if let Some(function) = self.functions.get(&name.to_lowercase()) {
            return Ok(Callee::User(Arc::clone(function)));
        }

        let target = name.to_lowercase();
        let candidates = self.builtins.names().into_iter().chain(self.functions.keys().map(String::as_str));
        let suggestion = find_closest_match(&target, candidates).map(str::to_string);
        let error = ScriptException::undefined_function(name);
        Err(match suggestion {
            Some(s) => error.with_suggestion(s),
            None => error,
        })
    }

    /// Resolves and performs a call expression or statement
    pub(super) fn call(&mut self, call: &Call) -> EvalResult {
        let callee = self.resolve_callee(&call.name)?;
        let args = self.evaluate_args(&call.args)?;
        match callee {
            Callee::Builtin => self.builtins.invoke(&call.name, args),
            Callee::User(function) => self.invoke_function(&function, args),
        }
    }

    /// Invokes a user function block.
    ///
    /// The call frame is a child of the caller's current frame. An exception
    /// escaping the body is offered to the block's attached handlers after the
    /// frame is gone; a handler's `return` value becomes the result,
    /// otherwise the call yields null. The result is coerced to the declared
    /// return type.
    pub(super) fn invoke_function(&mut self, function: &Arc<Block>, args: BoundArgs) -> EvalResult {
        let name = function.display_name().to_string();
        if self.call_stack.len() >= self.config.max_call_depth {
            return Err(ScriptException::new(
                ErrorType::AnyError,
                format!("Maximum call depth of {} exceeded calling '{}'", self.config.max_call_depth, name),
            ));
        }

        tracing::debug!(
            function = %name,
            depth = self.call_stack.len() + 1,
            scopes = self.env.depth(),
            "calling function"
        );
        let caller_line = self.current_line;
        self.call_stack.push(StackFrame { function: name, line: caller_line });

        let outcome = self.scoped(|interp| {
            interp.bind_parameters(function, args)?;
            interp.execute_statements(&function.statements)
        });

        let result = match outcome {
            Ok(ControlFlow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::Null),
            Err(exception) => match find_handler(&function.handlers, &exception) {
                Some(handler) => self.run_handler(handler, &exception).map(|flow| match flow {
                    ControlFlow::Return(value) => value,
                    _ => Value::Null,
                }),
                None => Err(exception),
            },
        };

        self.call_stack.pop();
        self.current_line = caller_line;

        let value = result?;
        match &function.return_type {
            Some(spec) => {
                let spec = self.types.resolve(spec)?;
                coerce(value, &spec).map_err(|e| {
                    ScriptException::type_error(format!(
                        "Function '{}' returned a bad value: {}",
                        function.display_name(),
                        e.message
                    ))
                })
            }
            None => Ok(value),
        }
    }

    /// Binds arguments positionally or by name into the current (callee)
    /// frame. Defaults are evaluated here, after earlier parameters are
    /// bound, so they can refer to them.
    fn bind_parameters(&mut self, function: &Block, args: BoundArgs) -> Result<(), ScriptException> {
        let fname = function.display_name();
        let params = &function.params;
        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        let mut next = 0;

        for (name, value) in args {
            let index = match name {
                Some(name) => params.iter().position(|p| p.name.eq_ignore_ascii_case(&name)).ok_or_else(|| {
                    ScriptException::not_found(format!("Function '{}' has no parameter '{}'", fname, name))
                })?,
                None => {
                    while next < slots.len() && slots[next].is_some() {
                        next += 1;
                    }
                    next
                }
            };
            if index >= slots.len() {
                return Err(ScriptException::new(
                    ErrorType::ValidationError,
                    format!("Function '{}' takes at most {} arguments", fname, params.len()),
                ));
            }
            slots[index] = Some(value);
        }

        for (param, slot) in params.iter().zip(slots) {
            let spec = self.types.resolve(&param.spec)?;
            let value = match (slot, &param.default) {
                (Some(value), _) => value,
                (None, _) if param.mandatory => {
                    return Err(ScriptException::not_found(format!(
                        "Missing mandatory parameter '{}' for '{}'",
                        param.name, fname
                    )))
                }
                (None, Some(default)) => default.accept(self)?,
                (None, None) => Value::Null,
            };
            let value = coerce(value, &spec).map_err(|e| {
                ScriptException::type_error(format!("Parameter '{}' of '{}': {}", param.name, fname, e.message))
            })?;
            self.env.define(&param.name, Slot::new(value, spec));
        }
        Ok(())
    }
}

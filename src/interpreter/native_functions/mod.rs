// File: src/interpreter/native_functions/mod.rs
//
// Builtin dispatch gateway.
// Builtins are registered by name with a parameter signature and a declared
// return type. Category modules (strings, math, json, ...) each expose a
// `register` function that fills the registry; the evaluator resolves calls
// here before looking for user functions.

pub mod collections;
pub mod date;
pub mod json;
pub mod math;
pub mod strings;
pub mod system;
pub mod timers;

use super::value::Value;
use crate::ast::Parameter;
use crate::errors::{ErrorType, ScriptException};
use crate::types::{coerce, DataType};
use ahash::AHashMap;
use std::sync::Arc;
use thiserror::Error;
use timers::TimerRegistry;

/// Failure reported by a builtin, already classified into a category
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BuiltinError {
    pub error_type: ErrorType,
    pub message: String,
}

impl BuiltinError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        BuiltinError { error_type, message: message.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ValidationError, message)
    }
}

impl From<std::io::Error> for BuiltinError {
    fn from(error: std::io::Error) -> Self {
        let error_type = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorType::NotFoundError,
            std::io::ErrorKind::PermissionDenied => ErrorType::AccessError,
            _ => ErrorType::IoError,
        };
        BuiltinError::new(error_type, error.to_string())
    }
}

impl From<serde_json::Error> for BuiltinError {
    fn from(error: serde_json::Error) -> Self {
        BuiltinError::new(ErrorType::ParseError, error.to_string())
    }
}

impl From<rusqlite::Error> for BuiltinError {
    fn from(error: rusqlite::Error) -> Self {
        BuiltinError::new(ErrorType::DbError, error.to_string())
    }
}

impl From<chrono::ParseError> for BuiltinError {
    fn from(error: chrono::ParseError) -> Self {
        BuiltinError::new(ErrorType::ParseError, error.to_string())
    }
}

impl From<regex::Error> for BuiltinError {
    fn from(error: regex::Error) -> Self {
        BuiltinError::new(ErrorType::ParseError, error.to_string())
    }
}

impl From<ScriptException> for BuiltinError {
    fn from(exception: ScriptException) -> Self {
        BuiltinError::new(exception.error_type().unwrap_or(ErrorType::AnyError), exception.message)
    }
}

impl From<BuiltinError> for ScriptException {
    fn from(error: BuiltinError) -> Self {
        ScriptException::new(error.error_type, error.message)
    }
}

pub type BuiltinResult = Result<Value, BuiltinError>;
pub type BuiltinHandler = Arc<dyn Fn(&[Value]) -> BuiltinResult + Send + Sync>;

/// A registered builtin
#[derive(Clone)]
pub struct BuiltinDef {
    pub name: String,
    pub params: Vec<Parameter>,
    /// None when the builtin has no meaningful result
    pub return_type: Option<DataType>,
    handler: BuiltinHandler,
}

impl BuiltinDef {
    /// `name(a: string, b?: int) -> bool` for listings
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let marker = if p.mandatory { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.spec.describe())
            })
            .collect();
        match self.return_type {
            Some(rt) => format!("{}({}) -> {}", self.name, params.join(", "), rt.keyword()),
            None => format!("{}({})", self.name, params.join(", ")),
        }
    }
}

/// Name-keyed builtin registry; names are case-insensitive
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    defs: AHashMap<String, BuiltinDef>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled category module
    pub fn with_standard_library(timers: &TimerRegistry) -> Self {
        let mut registry = Self::new();
        strings::register(&mut registry);
        math::register(&mut registry);
        json::register(&mut registry);
        date::register(&mut registry);
        system::register(&mut registry);
        collections::register(&mut registry);
        timers::register(&mut registry, timers);
        registry
    }

    /// Registers a builtin, replacing any existing one with the same name
    pub fn register<F>(&mut self, name: &str, params: Vec<Parameter>, return_type: Option<DataType>, handler: F)
    where
        F: Fn(&[Value]) -> BuiltinResult + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        let def = BuiltinDef { name: key.clone(), params, return_type, handler: Arc::new(handler) };
        if self.defs.insert(key.clone(), def).is_some() {
            tracing::debug!(builtin = %key, "builtin replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&BuiltinDef> {
        self.defs.get(&name.to_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.defs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Validates and converts call arguments against the signature.
    ///
    /// Arguments may be positional or named. Too many arguments is a
    /// VALIDATION_ERROR, a missing mandatory one NOT_FOUND_ERROR, and an
    /// omitted optional one is passed as null. ANY and JSON parameters pass
    /// through untouched; everything else is coerced.
    pub fn bind_args(def: &BuiltinDef, args: Vec<(Option<String>, Value)>) -> Result<Vec<Value>, ScriptException> {
        let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
        let mut position = 0;

        for (name, value) in args {
            let index = match name {
                Some(name) => def
                    .params
                    .iter()
                    .position(|p| p.name.eq_ignore_ascii_case(&name))
                    .ok_or_else(|| {
                        ScriptException::not_found(format!("{} has no parameter '{}'", def.name, name))
                    })?,
                None => {
                    while position < slots.len() && slots[position].is_some() {
                        position += 1;
                    }
                    position
                }
            };
            if index >= slots.len() {
                return Err(ScriptException::new(
                    ErrorType::ValidationError,
                    format!("{} takes at most {} arguments", def.name, def.params.len()),
                ));
            }
            slots[index] = Some(value);
        }

        let mut bound = Vec::with_capacity(slots.len());
        for (param, slot) in def.params.iter().zip(slots) {
            let value = match slot {
                Some(value) => value,
                None if param.mandatory => {
                    return Err(ScriptException::not_found(format!(
                        "{} is missing mandatory parameter '{}'",
                        def.name, param.name
                    )))
                }
                None => {
                    bound.push(Value::Null);
                    continue;
                }
            };
            let converted = match param.spec.data_type {
                DataType::Any | DataType::Json => value,
                _ => coerce(value, &param.spec).map_err(|e| {
                    ScriptException::type_error(format!("{}: parameter '{}': {}", def.name, param.name, e.message))
                })?,
            };
            bound.push(converted);
        }
        Ok(bound)
    }

    /// Full gateway path: bind, dispatch, translate failures, check the result
    pub fn invoke(&self, name: &str, args: Vec<(Option<String>, Value)>) -> Result<Value, ScriptException> {
        let def = self.get(name).ok_or_else(|| ScriptException::undefined_function(name))?;
        let bound = Self::bind_args(def, args)?;

        tracing::trace!(builtin = %def.name, argc = bound.len(), "dispatching builtin");
        let result = (def.handler)(&bound).map_err(ScriptException::from)?;

        match def.return_type {
            Some(return_type) => coerce(result, &return_type.into()).map_err(|e| {
                ScriptException::type_error(format!("{} returned a bad value: {}", def.name, e.message))
            }),
            None => Ok(Value::Null),
        }
    }
}

// Argument accessors shared by the category modules. Arguments were already
// coerced by `bind_args`, so a mismatch here means a registration bug.

pub(crate) fn arg_str(args: &[Value], index: usize) -> Result<&str, BuiltinError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.as_str()),
        Some(Value::Null) | None => Err(BuiltinError::new(
            ErrorType::NullError,
            format!("argument {} is null", index + 1),
        )),
        Some(other) => Err(BuiltinError::new(
            ErrorType::TypeError,
            format!("argument {} must be a string, got {}", index + 1, other.type_name()),
        )),
    }
}

pub(crate) fn arg_i64(args: &[Value], index: usize) -> Result<i64, BuiltinError> {
    match args.get(index) {
        Some(value) => value.as_i64().ok_or_else(|| {
            BuiltinError::new(
                ErrorType::TypeError,
                format!("argument {} must be an integer, got {}", index + 1, value.type_name()),
            )
        }),
        None => Err(BuiltinError::new(ErrorType::NullError, format!("argument {} is missing", index + 1))),
    }
}

pub(crate) fn arg_f64(args: &[Value], index: usize) -> Result<f64, BuiltinError> {
    match args.get(index) {
        Some(value) => value.as_f64().ok_or_else(|| {
            BuiltinError::new(
                ErrorType::TypeError,
                format!("argument {} must be a number, got {}", index + 1, value.type_name()),
            )
        }),
        None => Err(BuiltinError::new(ErrorType::NullError, format!("argument {} is missing", index + 1))),
    }
}

/// Optional argument: None when omitted or null
pub(crate) fn opt_arg(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index).filter(|v| !v.is_null())
}

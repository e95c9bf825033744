// File: src/errors.rs
//
// Error handling and reporting for the EBS script core.
// Defines the standard exception categories, the in-flight script exception
// carried on the error side of every evaluation, host-level run failures,
// and pretty-printed reports for unhandled exceptions.

use crate::interpreter::Value;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Source location information for tracking where a statement appears
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceLocation {
    pub line: usize,
    pub file: Option<String>,
}

impl SourceLocation {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// Standard exception categories a handler can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    AnyError,
    IoError,
    DbError,
    TypeError,
    NullError,
    IndexError,
    MathError,
    ParseError,
    NetworkError,
    NotFoundError,
    AccessError,
    ValidationError,
}

impl ErrorType {
    pub const ALL: [ErrorType; 12] = [
        ErrorType::AnyError,
        ErrorType::IoError,
        ErrorType::DbError,
        ErrorType::TypeError,
        ErrorType::NullError,
        ErrorType::IndexError,
        ErrorType::MathError,
        ErrorType::ParseError,
        ErrorType::NetworkError,
        ErrorType::NotFoundError,
        ErrorType::AccessError,
        ErrorType::ValidationError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ErrorType::AnyError => "ANY_ERROR",
            ErrorType::IoError => "IO_ERROR",
            ErrorType::DbError => "DB_ERROR",
            ErrorType::TypeError => "TYPE_ERROR",
            ErrorType::NullError => "NULL_ERROR",
            ErrorType::IndexError => "INDEX_ERROR",
            ErrorType::MathError => "MATH_ERROR",
            ErrorType::ParseError => "PARSE_ERROR",
            ErrorType::NetworkError => "NETWORK_ERROR",
            ErrorType::NotFoundError => "NOT_FOUND_ERROR",
            ErrorType::AccessError => "ACCESS_ERROR",
            ErrorType::ValidationError => "VALIDATION_ERROR",
        }
    }

    /// Looks up a standard category by name, ignoring case
    pub fn from_name(name: &str) -> Option<ErrorType> {
        Self::ALL.iter().copied().find(|t| t.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Comma separated list of every standard category name
    pub fn all_names() -> String {
        Self::ALL.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What was raised: a standard category or a script-declared exception name
#[derive(Debug, Clone, PartialEq)]
pub enum ExceptionKind {
    Standard(ErrorType),
    Custom(String),
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExceptionKind::Standard(error_type) => write!(f, "{}", error_type),
            ExceptionKind::Custom(name) => f.write_str(name),
        }
    }
}

/// One entry of the user call stack captured when an exception is raised
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub function: String,
    pub line: usize,
}

/// An exception in flight
///
/// Every evaluation step returns `Result<_, ScriptException>`; the error side
/// is the RAISED state. It is either handled by the first matching handler up
/// the chain or surfaces from `Interpreter::run` as an unhandled failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptException {
    pub kind: ExceptionKind,
    pub message: String,
    /// Evaluated raise-site arguments of a custom exception
    pub payload: Vec<Value>,
    pub location: SourceLocation,
    pub stack: Vec<StackFrame>,
    pub suggestion: Option<String>,
}

impl ScriptException {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::Standard(error_type),
            message: message.into(),
            payload: Vec::new(),
            location: SourceLocation::unknown(),
            stack: Vec::new(),
            suggestion: None,
        }
    }

    /// Builds a custom exception whose message is `NAME(arg1, arg2, ...)`
    pub fn custom(name: impl Into<String>, payload: Vec<Value>) -> Self {
        let name = name.into();
        let rendered: Vec<String> = payload.iter().map(|v| v.to_string()).collect();
        let message = format!("{}({})", name, rendered.join(", "));
        Self {
            kind: ExceptionKind::Custom(name),
            message,
            payload,
            location: SourceLocation::unknown(),
            stack: Vec::new(),
            suggestion: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorType::TypeError, message)
    }

    pub fn math_error(message: impl Into<String>) -> Self {
        Self::new(ErrorType::MathError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorType::NotFoundError, message)
    }

    pub fn undefined_variable(name: &str) -> Self {
        Self::not_found(format!("Undefined variable '{}'.", name))
    }

    pub fn undefined_function(name: &str) -> Self {
        Self::not_found(format!("Function '{}' is not defined", name))
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Records the raising line unless an inner statement already did
    pub fn at_line(mut self, line: usize) -> Self {
        if !self.location.is_known() {
            self.location.line = line;
        }
        self
    }

    pub fn in_file(mut self, file: &str) -> Self {
        if self.location.file.is_none() {
            self.location.file = Some(file.to_string());
        }
        self
    }

    pub fn with_stack(mut self, stack: &[StackFrame]) -> Self {
        if self.stack.is_empty() {
            self.stack = stack.to_vec();
        }
        self
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        match &self.kind {
            ExceptionKind::Standard(error_type) => Some(*error_type),
            ExceptionKind::Custom(_) => None,
        }
    }

    /// Name a handler matches against: the category name or the custom name
    pub fn name(&self) -> String {
        self.kind.to_string()
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.kind, ExceptionKind::Custom(_))
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let header = match &self.kind {
            ExceptionKind::Standard(error_type) => format!("Unhandled {}", error_type),
            ExceptionKind::Custom(name) => format!("Unhandled exception {}", name),
        };
        writeln!(f, "{}: {}", header.red().bold(), self.message.bold())?;

        if self.location.is_known() {
            writeln!(f, "{}", format!("  --> {}", self.location).bright_blue())?;
        }

        for frame in self.stack.iter().rev() {
            writeln!(
                f,
                "   {} {}",
                "|".bright_blue(),
                format!("in {}() called at line {}", frame.function, frame.line).bright_blue()
            )?;
        }

        if let Some(ref suggestion) = self.suggestion {
            writeln!(
                f,
                "   {} {}",
                "=".bright_green(),
                format!("Did you mean '{}'?", suggestion).bright_green()
            )?;
        }

        Ok(())
    }
}

impl std::error::Error for ScriptException {}

/// Host-level failures around a script run
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed program {path}: {source}")]
    Program {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid program: {0}")]
    Invalid(String),

    #[error("{0}")]
    Unhandled(Box<ScriptException>),
}

impl From<ScriptException> for RuntimeError {
    fn from(exception: ScriptException) -> Self {
        RuntimeError::Unhandled(Box::new(exception))
    }
}

/// Computes the Levenshtein distance between two strings
/// Used for "Did you mean?" suggestions
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Single rolling row instead of the full matrix
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            current[j] = (previous[j] + 1).min(current[j - 1] + 1).min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Find the closest match from a list of candidates using Levenshtein distance
/// Returns None if no good match is found (distance > 3)
pub fn find_closest_match<'a, I>(target: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best_match = None;
    let mut best_distance = usize::MAX;

    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);
        if distance <= 3 && distance < best_distance {
            best_distance = distance;
            best_match = Some(candidate);
        }
    }

    best_match
}

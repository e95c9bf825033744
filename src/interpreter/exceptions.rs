// File: src/interpreter/exceptions.rs
//
// Handler matching for try/exceptions constructs and block-attached handlers.

use crate::ast::{ExceptionHandler, HandlerTarget};
use crate::errors::{ErrorType, ExceptionKind, ScriptException};

/// Whether a handler catches the exception.
///
/// ANY_ERROR catches everything, custom exceptions included. A specific
/// category catches only that category, and a custom name catches only a
/// custom exception with the same name, ignoring case. A custom target
/// spelled like a standard category is treated as that category.
pub fn handler_matches(target: &HandlerTarget, exception: &ScriptException) -> bool {
    if let HandlerTarget::Custom(name) = target {
        if let Some(error_type) = ErrorType::from_name(name) {
            return handler_matches(&HandlerTarget::Standard(error_type), exception);
        }
    }
    match (target, &exception.kind) {
        (HandlerTarget::Standard(ErrorType::AnyError), _) => true,
        (HandlerTarget::Standard(expected), ExceptionKind::Standard(actual)) => expected == actual,
        (HandlerTarget::Custom(expected), ExceptionKind::Custom(actual)) => {
            expected.eq_ignore_ascii_case(actual)
        }
        _ => false,
    }
}

/// First handler in declaration order that catches the exception
pub fn find_handler<'a>(
    handlers: &'a [ExceptionHandler],
    exception: &ScriptException,
) -> Option<&'a ExceptionHandler> {
    handlers.iter().find(|handler| handler_matches(&handler.target, exception))
}

// File: src/interpreter/control_flow.rs
//
// Non-local exit signals for loops and function returns.
//
// Statement execution yields `Result<ControlFlow, ScriptException>`. Break,
// continue and return travel on the Ok side and unwind to the nearest loop or
// call boundary; raised exceptions travel on the Err side. Exception handlers
// only ever inspect the Err side, so they cannot intercept these signals.

use super::value::Value;

/// Outcome of executing a statement
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    /// Normal execution, continue to next statement
    Normal,
    /// Exit the innermost loop
    Break,
    /// Skip to the next iteration of the innermost loop
    Continue,
    /// Leave the current function with a value
    Return(Value),
}

impl ControlFlow {
    pub fn is_normal(&self) -> bool {
        matches!(self, ControlFlow::Normal)
    }
}

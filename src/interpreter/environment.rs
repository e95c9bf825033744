// File: src/interpreter/environment.rs
//
// Scope chain for variable management in the EBS interpreter.
// Implements a stack of frames where inner frames shadow outer frames. Each
// frame also owns the cursors declared in it, and closes them when it is
// popped, so a cursor never outlives the block that declared it.

use super::database::{CursorSpec, DbCursor};
use super::value::Value;
use crate::errors::{ErrorType, ScriptException};
use crate::types::{coerce, TypeSpec};
use ahash::AHashMap;

/// A typed variable slot
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub value: Value,
    pub spec: TypeSpec,
    pub constant: bool,
}

impl Slot {
    pub fn new(value: Value, spec: TypeSpec) -> Self {
        Slot { value, spec, constant: false }
    }

    pub fn constant(value: Value, spec: TypeSpec) -> Self {
        Slot { value, spec, constant: true }
    }

    /// Slot that accepts any value
    pub fn untyped(value: Value) -> Self {
        Slot::new(value, TypeSpec::any())
    }
}

/// A declared cursor and, once opened, the live cursor
pub struct CursorEntry {
    pub spec: CursorSpec,
    pub open: Option<Box<dyn DbCursor>>,
}

impl CursorEntry {
    /// Closes the live cursor if any; closing twice is a no-op
    pub fn close(&mut self, name: &str) {
        if let Some(mut cursor) = self.open.take() {
            match cursor.close() {
                Ok(()) => tracing::debug!(cursor = %name, "cursor closed"),
                Err(error) => tracing::warn!(cursor = %name, %error, "cursor close failed"),
            }
        }
    }
}

#[derive(Default)]
struct Frame {
    vars: AHashMap<String, Slot>,
    cursors: AHashMap<String, CursorEntry>,
}

impl Frame {
    fn close_cursors(&mut self) {
        for (name, entry) in self.cursors.iter_mut() {
            entry.close(name);
        }
    }
}

/// Variable storage using a scope chain
///
/// The Environment maintains a stack of frames. When looking up a variable we
/// search from the innermost frame (end of Vec) outward. Names are stored
/// lower-cased, so lookups are case-insensitive.
///
/// # Examples
///
/// ```ignore
/// let mut env = Environment::new();
/// env.define("x", Slot::untyped(Value::Int(10)));  // Global frame
///
/// env.push_scope();                                 // Enter block
/// env.define("x", Slot::untyped(Value::Int(20)));  // Shadows outer x
/// assert_eq!(env.get("X"), Some(Value::Int(20)));
///
/// env.pop_scope();                                  // Exit block
/// assert_eq!(env.get("x"), Some(Value::Int(10)));  // Original x visible again
/// ```
pub struct Environment {
    frames: Vec<Frame>,
}

impl Environment {
    /// Create a new environment with a single global frame
    pub fn new() -> Self {
        Environment { frames: vec![Frame::default()] }
    }

    /// Push a new frame (entering a block or function)
    pub fn push_scope(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Pop the innermost frame, closing any cursors it owns.
    /// The global frame is never popped.
    pub fn pop_scope(&mut self) {
        if self.frames.len() > 1 {
            if let Some(mut frame) = self.frames.pop() {
                frame.close_cursors();
            }
        }
    }

    /// Number of live frames, including the global one
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Close cursors held by every frame, including the global one
    pub fn close_all_cursors(&mut self) {
        for frame in self.frames.iter_mut().rev() {
            frame.close_cursors();
        }
    }

    /// Define a variable in the current (innermost) frame
    pub fn define(&mut self, name: &str, slot: Slot) {
        if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(name.to_lowercase(), slot);
        }
    }

    /// Get a variable's value, searching from inner to outer frames
    pub fn get(&self, name: &str) -> Option<Value> {
        self.slot(name).map(|slot| slot.value.clone())
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        let key = name.to_lowercase();
        self.frames.iter().rev().find_map(|frame| frame.vars.get(&key))
    }

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        let key = name.to_lowercase();
        self.frames.iter_mut().rev().find_map(|frame| frame.vars.get_mut(&key))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    /// Assign to an existing variable, coercing to its declared type
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), ScriptException> {
        let slot = self.slot_mut(name).ok_or_else(|| ScriptException::undefined_variable(name))?;
        if slot.constant {
            return Err(ScriptException::new(
                ErrorType::AccessError,
                format!("Cannot assign to constant '{}'", name),
            ));
        }
        slot.value = coerce(value, &slot.spec)?;
        Ok(())
    }

    /// Mutate an existing variable in place using a closure
    ///
    /// The closure sees the whole slot so it can consult the declared type.
    /// Constants are rejected before the closure runs.
    pub fn mutate<F, R>(&mut self, name: &str, f: F) -> Result<R, ScriptException>
    where
        F: FnOnce(&mut Slot) -> Result<R, ScriptException>,
    {
        let slot = self.slot_mut(name).ok_or_else(|| ScriptException::undefined_variable(name))?;
        if slot.constant {
            return Err(ScriptException::new(
                ErrorType::AccessError,
                format!("Cannot modify constant '{}'", name),
            ));
        }
        f(slot)
    }

    /// Every visible variable name, innermost first
    pub fn names(&self) -> Vec<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.vars.keys().map(String::as_str))
            .collect()
    }

    /// Declare a cursor in the current frame, closing a previous cursor of
    /// the same name in that frame
    pub fn declare_cursor(&mut self, name: &str, spec: CursorSpec) {
        let key = name.to_lowercase();
        if let Some(frame) = self.frames.last_mut() {
            if let Some(mut previous) = frame.cursors.insert(key.clone(), CursorEntry { spec, open: None }) {
                previous.close(&key);
            }
            frame.vars.insert(key.clone(), Slot::untyped(Value::Cursor(key)));
        }
    }

    pub fn cursor_mut(&mut self, name: &str) -> Option<&mut CursorEntry> {
        let key = name.to_lowercase();
        self.frames.iter_mut().rev().find_map(|frame| frame.cursors.get_mut(&key))
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::database::{DbError, Row};
    use crate::types::DataType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCursor {
        closes: Arc<AtomicUsize>,
    }

    impl DbCursor for CountingCursor {
        fn has_next(&mut self) -> Result<bool, DbError> {
            Ok(false)
        }

        fn next(&mut self) -> Result<Row, DbError> {
            Err(DbError::Exhausted)
        }

        fn close(&mut self) -> Result<(), DbError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn inner_scope_shadows_and_disappears() {
        let mut env = Environment::new();
        env.define("x", Slot::untyped(Value::Int(10)));
        env.push_scope();
        env.define("X", Slot::untyped(Value::Int(20)));
        env.define("inner", Slot::untyped(Value::Bool(true)));
        assert_eq!(env.get("x"), Some(Value::Int(20)));
        env.pop_scope();
        assert_eq!(env.get("x"), Some(Value::Int(10)));
        assert_eq!(env.get("inner"), None);
    }

    #[test]
    fn assign_coerces_and_guards() {
        let mut env = Environment::new();
        env.define("total", Slot::new(Value::Long(0), DataType::Long.into()));
        env.define("limit", Slot::constant(Value::Int(3), DataType::Integer.into()));

        env.assign("total", Value::Int(5)).unwrap();
        assert_eq!(env.get("total"), Some(Value::Long(5)));

        let err = env.assign("limit", Value::Int(4)).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::AccessError));

        let err = env.assign("missing", Value::Int(1)).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));

        let err = env.assign("total", Value::string("x")).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::TypeError));
    }

    #[test]
    fn popping_a_frame_closes_its_cursors() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut env = Environment::new();
        env.push_scope();
        env.declare_cursor("c", CursorSpec { connection: "db".into(), sql: "select 1".into() });
        env.cursor_mut("C").unwrap().open = Some(Box::new(CountingCursor { closes: closes.clone() }));

        env.pop_scope();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(env.cursor_mut("c").is_none());
    }
}

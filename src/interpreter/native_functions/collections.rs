// File: src/interpreter/native_functions/collections.rs
//
// Array builtins (`array.*`). Arrays are values: push, sort and reverse
// return a new array and leave the argument untouched.

use super::{BuiltinError, BuiltinRegistry};
use crate::ast::Parameter;
use crate::errors::ErrorType;
use crate::interpreter::operators;
use crate::interpreter::{ArrayValue, Value};
use crate::types::{coerce, DataType, TypeSpec};
use std::cmp::Ordering;
use std::sync::Arc;

fn array_param() -> Parameter {
    Parameter::required("array", DataType::Array)
}

fn item_param() -> Parameter {
    Parameter::required("item", TypeSpec::any())
}

fn arg_array(args: &[Value]) -> Result<&ArrayValue, BuiltinError> {
    match args.first() {
        Some(Value::Array(array)) => Ok(array),
        Some(Value::Null) | None => Err(BuiltinError::new(ErrorType::NullError, "array argument is null")),
        Some(other) => Err(BuiltinError::new(
            ErrorType::TypeError,
            format!("expected an array, got {}", other.type_name()),
        )),
    }
}

/// Position of the first element equal to `item`; mismatched types never match
fn position(array: &ArrayValue, item: &Value) -> Option<usize> {
    array.items.iter().position(|candidate| operators::equals(candidate, item).unwrap_or(false))
}

fn rebuild(array: &ArrayValue, items: Vec<Value>) -> Value {
    Value::Array(Arc::new(ArrayValue { element: array.element, fixed: array.fixed, items }))
}

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register("array.push", vec![array_param(), item_param()], Some(DataType::Array), |args| {
        let array = arg_array(args)?;
        if array.fixed {
            return Err(BuiltinError::new(
                ErrorType::IndexError,
                format!("cannot push onto fixed array of length {}", array.items.len()),
            ));
        }
        let item = coerce(args.get(1).cloned().unwrap_or(Value::Null), &array.element.into())?;
        let mut items = array.items.clone();
        items.push(item);
        Ok(rebuild(array, items))
    });

    registry.register("array.contains", vec![array_param(), item_param()], Some(DataType::Bool), |args| {
        let array = arg_array(args)?;
        let item = args.get(1).unwrap_or(&Value::Null);
        Ok(Value::Bool(position(array, item).is_some()))
    });

    registry.register("array.indexOf", vec![array_param(), item_param()], Some(DataType::Integer), |args| {
        let array = arg_array(args)?;
        let item = args.get(1).unwrap_or(&Value::Null);
        Ok(Value::Int(position(array, item).map(|i| i as i32).unwrap_or(-1)))
    });

    // Sorts with the script's `<` ordering; incomparable elements are a TYPE_ERROR
    registry.register(
        "array.sort",
        vec![array_param(), Parameter::optional("descending", DataType::Bool, None)],
        Some(DataType::Array),
        |args| {
            let array = arg_array(args)?;
            let descending = matches!(args.get(1), Some(Value::Bool(true)));

            // every element must order against the first, so the comparator
            // below is total
            if let Some(first) = array.items.first() {
                for item in &array.items {
                    operators::ordering(first, item)?;
                }
            }

            let mut items = array.items.clone();
            items.sort_by(|a, b| {
                let order = operators::ordering(a, b).unwrap_or(Ordering::Equal);
                if descending {
                    order.reverse()
                } else {
                    order
                }
            });
            Ok(rebuild(array, items))
        },
    );

    registry.register("array.reverse", vec![array_param()], Some(DataType::Array), |args| {
        let array = arg_array(args)?;
        let mut items = array.items.clone();
        items.reverse();
        Ok(rebuild(array, items))
    });
}

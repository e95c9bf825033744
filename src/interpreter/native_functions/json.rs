// File: src/interpreter/native_functions/json.rs
//
// JSON builtins (`json.*`)
// Paths are dotted: `order.items.0.sku`. Numeric segments index arrays.

use super::{arg_str, opt_arg, BuiltinError, BuiltinRegistry};
use crate::ast::Parameter;
use crate::errors::ErrorType;
use crate::interpreter::Value;
use crate::types::DataType;
use serde_json::Value as JsonValue;

fn document(args: &[Value], index: usize) -> Result<JsonValue, BuiltinError> {
    match args.get(index) {
        Some(Value::Null) | None => Err(BuiltinError::new(ErrorType::NullError, "json document is null")),
        // A string argument holds JSON text
        Some(Value::Str(text)) => Ok(serde_json::from_str(text)?),
        Some(other) => Ok(other.to_json()),
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

fn lookup<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    segments(path).try_fold(root, |node, segment| match node {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `value` at `path`, creating intermediate objects as needed
fn assign(root: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), BuiltinError> {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        node = child_mut(node, segment, path)?;
    }

    match node {
        JsonValue::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        JsonValue::Array(items) => {
            let index = array_index(last, path)?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(BuiltinError::new(
                    ErrorType::IndexError,
                    format!("index {} out of range in '{}'", index, path),
                ));
            }
            Ok(())
        }
        _ => Err(BuiltinError::new(ErrorType::TypeError, format!("cannot set '{}' on a scalar", path))),
    }
}

fn child_mut<'a>(node: &'a mut JsonValue, segment: &str, path: &str) -> Result<&'a mut JsonValue, BuiltinError> {
    if node.is_null() {
        *node = JsonValue::Object(serde_json::Map::new());
    }
    match node {
        JsonValue::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()))),
        JsonValue::Array(items) => {
            let index = array_index(segment, path)?;
            let len = items.len();
            items.get_mut(index).ok_or_else(|| {
                BuiltinError::new(ErrorType::IndexError, format!("index {} out of range ({}) in '{}'", index, len, path))
            })
        }
        _ => Err(BuiltinError::new(ErrorType::TypeError, format!("'{}' runs through a scalar", path))),
    }
}

fn array_index(segment: &str, path: &str) -> Result<usize, BuiltinError> {
    segment.parse().map_err(|_| {
        BuiltinError::new(ErrorType::TypeError, format!("'{}' in '{}' is not an array index", segment, path))
    })
}

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register(
        "json.parse",
        vec![Parameter::required("text", DataType::String)],
        Some(DataType::Json),
        |args| Ok(Value::json(serde_json::from_str(arg_str(args, 0)?)?)),
    );

    registry.register(
        "json.stringify",
        vec![
            Parameter::required("value", DataType::Json),
            Parameter::optional("pretty", DataType::Bool, None),
        ],
        Some(DataType::String),
        |args| {
            let json = match args.first() {
                Some(value) => value.to_json(),
                None => JsonValue::Null,
            };
            let pretty = matches!(opt_arg(args, 1), Some(Value::Bool(true)));
            let text = if pretty { serde_json::to_string_pretty(&json)? } else { serde_json::to_string(&json)? };
            Ok(Value::string(text))
        },
    );

    registry.register(
        "json.get",
        vec![
            Parameter::required("json", DataType::Json),
            Parameter::required("path", DataType::String),
            Parameter::optional("fallback", DataType::Any, None),
        ],
        Some(DataType::Any),
        |args| {
            let root = document(args, 0)?;
            let path = arg_str(args, 1)?;
            match lookup(&root, path) {
                Some(node) => Ok(Value::from_json(node)),
                None => match opt_arg(args, 2) {
                    Some(fallback) => Ok(fallback.clone()),
                    None => Err(BuiltinError::new(ErrorType::NotFoundError, format!("no value at '{}'", path))),
                },
            }
        },
    );

    registry.register(
        "json.set",
        vec![
            Parameter::required("json", DataType::Json),
            Parameter::required("path", DataType::String),
            Parameter::required("value", DataType::Any),
        ],
        Some(DataType::Json),
        |args| {
            let mut root = document(args, 0)?;
            let value = args.get(2).map(Value::to_json).unwrap_or(JsonValue::Null);
            assign(&mut root, arg_str(args, 1)?, value)?;
            Ok(Value::json(root))
        },
    );

    registry.register(
        "json.keys",
        vec![Parameter::required("json", DataType::Json)],
        Some(DataType::Array),
        |args| match document(args, 0)? {
            JsonValue::Object(map) => Ok(Value::array(map.keys().map(|k| Value::string(k.as_str())).collect())),
            other => Err(BuiltinError::new(
                ErrorType::TypeError,
                format!("json.keys expects an object, got {}", other),
            )),
        },
    );
}

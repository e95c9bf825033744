// File: src/interpreter/native_functions/strings.rs
//
// String manipulation builtins (`str.*`)

use super::{arg_i64, arg_str, opt_arg, BuiltinError, BuiltinRegistry};
use crate::ast::Parameter;
use crate::errors::ErrorType;
use crate::interpreter::Value;
use crate::types::{DataType, TypeSpec};
use regex::Regex;

fn text(name: &str) -> Parameter {
    Parameter::required(name, DataType::String)
}

/// Character index to byte offset, clamped to the string
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// Widest string lpad/rpad will build, in characters
const MAX_PAD_WIDTH: usize = 1 << 20;

fn pad(args: &[Value], left: bool) -> Result<Value, BuiltinError> {
    let s = arg_str(args, 0)?;
    let requested = arg_i64(args, 1)?.max(0);
    let width = usize::try_from(requested)
        .ok()
        .filter(|w| *w <= MAX_PAD_WIDTH)
        .ok_or_else(|| BuiltinError::invalid(format!("pad width {} exceeds {}", requested, MAX_PAD_WIDTH)))?;
    let fill = match opt_arg(args, 2).and_then(Value::as_str) {
        Some(f) if !f.is_empty() => f.to_string(),
        _ => " ".to_string(),
    };

    let len = s.chars().count();
    if len >= width {
        return Ok(Value::string(s));
    }
    let padding: String = fill.chars().cycle().take(width - len).collect();
    Ok(Value::string(if left { padding + s } else { format!("{}{}", s, padding) }))
}

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register("str.trim", vec![text("s")], Some(DataType::String), |args| {
        Ok(Value::string(arg_str(args, 0)?.trim()))
    });

    registry.register("str.upper", vec![text("s")], Some(DataType::String), |args| {
        Ok(Value::string(arg_str(args, 0)?.to_uppercase()))
    });

    registry.register("str.lower", vec![text("s")], Some(DataType::String), |args| {
        Ok(Value::string(arg_str(args, 0)?.to_lowercase()))
    });

    registry.register("str.length", vec![text("s")], Some(DataType::Integer), |args| {
        Ok(Value::Int(arg_str(args, 0)?.chars().count() as i32))
    });

    registry.register(
        "str.substring",
        vec![
            text("s"),
            Parameter::required("start", DataType::Long),
            Parameter::optional("end", DataType::Long, None),
        ],
        Some(DataType::String),
        |args| {
            let s = arg_str(args, 0)?;
            let len = s.chars().count() as i64;
            let start = arg_i64(args, 1)?;
            let end = match opt_arg(args, 2) {
                Some(_) => arg_i64(args, 2)?,
                None => len,
            };
            if start < 0 || end > len || start > end {
                return Err(BuiltinError::new(
                    ErrorType::IndexError,
                    format!("substring({}, {}) out of range for length {}", start, end, len),
                ));
            }
            let from = byte_offset(s, start as usize);
            let to = byte_offset(s, end as usize);
            Ok(Value::string(&s[from..to]))
        },
    );

    registry.register("str.indexOf", vec![text("s"), text("needle")], Some(DataType::Integer), |args| {
        let s = arg_str(args, 0)?;
        let needle = arg_str(args, 1)?;
        let index = s.find(needle).map(|byte| s[..byte].chars().count() as i32).unwrap_or(-1);
        Ok(Value::Int(index))
    });

    registry.register("str.contains", vec![text("s"), text("needle")], Some(DataType::Bool), |args| {
        Ok(Value::Bool(arg_str(args, 0)?.contains(arg_str(args, 1)?)))
    });

    registry.register("str.startsWith", vec![text("s"), text("prefix")], Some(DataType::Bool), |args| {
        Ok(Value::Bool(arg_str(args, 0)?.starts_with(arg_str(args, 1)?)))
    });

    registry.register("str.endsWith", vec![text("s"), text("suffix")], Some(DataType::Bool), |args| {
        Ok(Value::Bool(arg_str(args, 0)?.ends_with(arg_str(args, 1)?)))
    });

    registry.register(
        "str.replace",
        vec![text("s"), text("from"), text("to")],
        Some(DataType::String),
        |args| Ok(Value::string(arg_str(args, 0)?.replace(arg_str(args, 1)?, arg_str(args, 2)?))),
    );

    registry.register(
        "str.replaceAll",
        vec![text("s"), text("pattern"), text("replacement")],
        Some(DataType::String),
        |args| {
            let re = Regex::new(arg_str(args, 1)?)?;
            Ok(Value::string(re.replace_all(arg_str(args, 0)?, arg_str(args, 2)?).into_owned()))
        },
    );

    registry.register(
        "str.split",
        vec![text("s"), text("separator")],
        Some(DataType::Array),
        |args| {
            let s = arg_str(args, 0)?;
            let separator = arg_str(args, 1)?;
            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(separator).map(Value::string).collect()
            };
            Ok(Value::array(parts))
        },
    );

    registry.register(
        "str.join",
        vec![
            Parameter::required("items", TypeSpec::array(DataType::String, None)),
            Parameter::optional("separator", DataType::String, None),
        ],
        Some(DataType::String),
        |args| {
            let items = match args.first() {
                Some(Value::Array(array)) => &array.items,
                _ => return Err(BuiltinError::new(ErrorType::TypeError, "str.join expects an array")),
            };
            let separator = opt_arg(args, 1).and_then(Value::as_str).unwrap_or("");
            let joined: Vec<String> = items.iter().map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())).collect();
            Ok(Value::string(joined.join(separator)))
        },
    );

    let pad_params = || {
        vec![
            text("s"),
            Parameter::required("width", DataType::Long),
            Parameter::optional("fill", DataType::String, None),
        ]
    };
    registry.register("str.lpad", pad_params(), Some(DataType::String), |args| pad(args, true));
    registry.register("str.rpad", pad_params(), Some(DataType::String), |args| pad(args, false));

    registry.register("str.matches", vec![text("s"), text("pattern")], Some(DataType::Bool), |args| {
        let re = Regex::new(arg_str(args, 1)?)?;
        Ok(Value::Bool(re.is_match(arg_str(args, 0)?)))
    });

    registry.register(
        "str.toString",
        vec![Parameter::required("value", TypeSpec::any())],
        Some(DataType::String),
        |args| {
            Ok(match args.first() {
                Some(Value::Str(s)) => Value::Str(s.clone()),
                Some(other) => Value::string(other.to_string()),
                None => Value::string(""),
            })
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, crate::errors::ScriptException> {
        let mut registry = BuiltinRegistry::new();
        register(&mut registry);
        registry.invoke(name, args.into_iter().map(|v| (None, v)).collect())
    }

    fn s(text: &str) -> Value {
        Value::string(text)
    }

    #[test]
    fn basic_transforms() {
        assert_eq!(call("str.trim", vec![s("  hi ")]).unwrap(), s("hi"));
        assert_eq!(call("STR.UPPER", vec![s("abc")]).unwrap(), s("ABC"));
        assert_eq!(call("str.length", vec![s("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(call("str.indexOf", vec![s("héllo"), s("llo")]).unwrap(), Value::Int(2));
        assert_eq!(call("str.indexOf", vec![s("abc"), s("z")]).unwrap(), Value::Int(-1));
    }

    #[test]
    fn substring_is_range_checked() {
        assert_eq!(call("str.substring", vec![s("héllo"), Value::Int(1), Value::Int(3)]).unwrap(), s("él"));
        assert_eq!(call("str.substring", vec![s("hello"), Value::Int(2)]).unwrap(), s("llo"));
        let err = call("str.substring", vec![s("abc"), Value::Int(2), Value::Int(9)]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::IndexError));
    }

    #[test]
    fn split_and_join() {
        let parts = call("str.split", vec![s("a,b,c"), s(",")]).unwrap();
        assert_eq!(parts.to_string(), r#"["a", "b", "c"]"#);
        assert_eq!(call("str.join", vec![parts, s("-")]).unwrap(), s("a-b-c"));
    }

    #[test]
    fn regex_builtins() {
        assert_eq!(call("str.matches", vec![s("abc123"), s(r"^[a-z]+\d+$")]).unwrap(), Value::Bool(true));
        assert_eq!(call("str.replaceAll", vec![s("a1b22"), s(r"\d+"), s("#")]).unwrap(), s("a#b#"));
        let err = call("str.matches", vec![s("x"), s("(")]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::ParseError));
    }

    #[test]
    fn padding() {
        assert_eq!(call("str.lpad", vec![s("7"), Value::Int(3), s("0")]).unwrap(), s("007"));
        assert_eq!(call("str.rpad", vec![s("ab"), Value::Int(4)]).unwrap(), s("ab  "));
        assert_eq!(call("str.lpad", vec![s("long"), Value::Int(2)]).unwrap(), s("long"));
    }

    #[test]
    fn padding_width_is_capped() {
        let err = call("str.lpad", vec![s("a"), Value::Long(1_000_000_000_000)]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::ValidationError));

        let widest = MAX_PAD_WIDTH as i64;
        let padded = call("str.rpad", vec![s("a"), Value::Long(widest)]).unwrap();
        assert_eq!(padded.as_str().map(|t| t.chars().count()), Some(MAX_PAD_WIDTH));
    }
}

// File: src/interpreter/native_functions/math.rs
//
// Math builtins (`math.*`)

use super::{arg_f64, opt_arg, BuiltinError, BuiltinRegistry};
use crate::ast::Parameter;
use crate::errors::ErrorType;
use crate::interpreter::operators;
use crate::interpreter::Value;
use crate::types::{DataType, TypeSpec};
use rand::Rng;
use std::cmp::Ordering;

fn number(name: &str) -> Parameter {
    Parameter::required(name, TypeSpec::any())
}

fn require_number<'a>(args: &'a [Value], index: usize) -> Result<&'a Value, BuiltinError> {
    match args.get(index) {
        Some(v) if v.is_numeric() => Ok(v),
        Some(Value::Null) | None => Err(BuiltinError::new(
            ErrorType::NullError,
            format!("argument {} is null", index + 1),
        )),
        Some(other) => Err(BuiltinError::new(
            ErrorType::TypeError,
            format!("argument {} must be a number, got {}", index + 1, other.type_name()),
        )),
    }
}

fn pick(args: &[Value], wanted: Ordering) -> Result<Value, BuiltinError> {
    let a = require_number(args, 0)?;
    let b = require_number(args, 1)?;
    let chosen = if operators::ordering(b, a)? == wanted { b } else { a };
    Ok(chosen.clone())
}

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register("math.abs", vec![number("x")], Some(DataType::Any), |args| {
        let value = match require_number(args, 0)? {
            Value::Int(n) => n.checked_abs().map(Value::Int),
            Value::Long(n) => n.checked_abs().map(Value::Long),
            Value::Float(n) => Some(Value::Float(n.abs())),
            Value::Double(n) => Some(Value::Double(n.abs())),
            _ => None,
        };
        value.ok_or_else(|| BuiltinError::new(ErrorType::MathError, "Integer overflow"))
    });

    registry.register("math.sqrt", vec![Parameter::required("x", DataType::Double)], Some(DataType::Double), |args| {
        let x = arg_f64(args, 0)?;
        if x < 0.0 {
            return Err(BuiltinError::new(ErrorType::MathError, format!("sqrt of negative number {}", x)));
        }
        Ok(Value::Double(x.sqrt()))
    });

    registry.register(
        "math.pow",
        vec![Parameter::required("base", DataType::Double), Parameter::required("exponent", DataType::Double)],
        Some(DataType::Double),
        |args| Ok(Value::Double(arg_f64(args, 0)?.powf(arg_f64(args, 1)?))),
    );

    registry.register("math.floor", vec![Parameter::required("x", DataType::Double)], Some(DataType::Double), |args| {
        Ok(Value::Double(arg_f64(args, 0)?.floor()))
    });

    registry.register("math.ceil", vec![Parameter::required("x", DataType::Double)], Some(DataType::Double), |args| {
        Ok(Value::Double(arg_f64(args, 0)?.ceil()))
    });

    registry.register(
        "math.round",
        vec![Parameter::required("x", DataType::Double), Parameter::optional("digits", DataType::Integer, None)],
        Some(DataType::Double),
        |args| {
            let x = arg_f64(args, 0)?;
            let digits = opt_arg(args, 1).and_then(Value::as_i64).unwrap_or(0).clamp(0, 15) as i32;
            let scale = 10f64.powi(digits);
            Ok(Value::Double((x * scale).round() / scale))
        },
    );

    registry.register("math.min", vec![number("a"), number("b")], Some(DataType::Any), |args| {
        pick(args, Ordering::Less)
    });

    registry.register("math.max", vec![number("a"), number("b")], Some(DataType::Any), |args| {
        pick(args, Ordering::Greater)
    });

    // No bounds: [0, 1). With bounds: integer in [min, max].
    registry.register(
        "math.random",
        vec![
            Parameter::optional("min", DataType::Long, None),
            Parameter::optional("max", DataType::Long, None),
        ],
        Some(DataType::Any),
        |args| {
            let mut rng = rand::thread_rng();
            match (opt_arg(args, 0).and_then(Value::as_i64), opt_arg(args, 1).and_then(Value::as_i64)) {
                (None, None) => Ok(Value::Double(rng.gen::<f64>())),
                (Some(max), None) | (None, Some(max)) => {
                    if max < 0 {
                        return Err(BuiltinError::invalid(format!("math.random bound {} is negative", max)));
                    }
                    Ok(Value::Long(rng.gen_range(0..=max)))
                }
                (Some(min), Some(max)) => {
                    if min > max {
                        return Err(BuiltinError::invalid(format!("math.random range {}..{} is empty", min, max)));
                    }
                    Ok(Value::Long(rng.gen_range(min..=max)))
                }
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScriptException;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, ScriptException> {
        let mut registry = BuiltinRegistry::new();
        register(&mut registry);
        registry.invoke(name, args.into_iter().map(|v| (None, v)).collect())
    }

    #[test]
    fn abs_keeps_the_numeric_kind() {
        assert_eq!(call("math.abs", vec![Value::Int(-4)]).unwrap(), Value::Int(4));
        assert_eq!(call("math.abs", vec![Value::Double(-1.5)]).unwrap(), Value::Double(1.5));
        let err = call("math.abs", vec![Value::Int(i32::MIN)]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::MathError));
        let err = call("math.abs", vec![Value::string("3")]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::TypeError));
    }

    #[test]
    fn widening_arguments() {
        assert_eq!(call("math.sqrt", vec![Value::Int(16)]).unwrap(), Value::Double(4.0));
        assert_eq!(call("math.pow", vec![Value::Int(2), Value::Int(10)]).unwrap(), Value::Double(1024.0));
        assert_eq!(call("math.round", vec![Value::Double(2.346), Value::Int(2)]).unwrap(), Value::Double(2.35));
        let err = call("math.sqrt", vec![Value::Int(-1)]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::MathError));
    }

    #[test]
    fn min_max_compare_across_kinds() {
        assert_eq!(call("math.max", vec![Value::Int(3), Value::Double(2.5)]).unwrap(), Value::Int(3));
        assert_eq!(call("math.min", vec![Value::Int(3), Value::Double(2.5)]).unwrap(), Value::Double(2.5));
    }

    #[test]
    fn random_ranges() {
        for _ in 0..50 {
            let v = call("math.random", vec![Value::Int(1), Value::Int(3)]).unwrap();
            let n = v.as_i64().unwrap();
            assert!((1..=3).contains(&n));
        }
        let d = call("math.random", vec![]).unwrap().as_f64().unwrap();
        assert!((0.0..1.0).contains(&d));
        let err = call("math.random", vec![Value::Int(5), Value::Int(1)]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::ValidationError));
    }
}

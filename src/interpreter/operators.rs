// File: src/interpreter/operators.rs
//
// Operator semantics: numeric promotion, checked integer arithmetic, string
// concatenation, equality and ordering. `and`/`or` short-circuit and live in
// the evaluator since they must not evaluate their right operand eagerly.

use super::value::Value;
use crate::ast::{BinaryOp, UnaryOp};
use crate::errors::{ErrorType, ScriptException};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Long(n) => Some(Num::Long(*n)),
            Value::Float(n) => Some(Num::Float(*n)),
            Value::Double(n) => Some(Num::Double(*n)),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Num::Int(_) => 0,
            Num::Long(_) => 1,
            Num::Float(_) => 2,
            Num::Double(_) => 3,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Num::Int(n) => n as i64,
            Num::Long(n) => n,
            Num::Float(n) => n as i64,
            Num::Double(n) => n as i64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Long(n) => n as f64,
            Num::Float(n) => n as f64,
            Num::Double(n) => n,
        }
    }

    fn is_integral(self) -> bool {
        self.rank() <= 1
    }
}

/// Rank both operands up to the wider one; LONG with FLOAT goes to DOUBLE
fn promoted_rank(a: Num, b: Num) -> u8 {
    let (low, high) = (a.rank().min(b.rank()), a.rank().max(b.rank()));
    if low == 1 && high == 2 {
        3
    } else {
        high
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> ScriptException {
    ScriptException::type_error(format!(
        "Operator {} not supported for {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn integer_op(op: BinaryOp, x: i64, y: i64) -> Result<i64, ScriptException> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        BinaryOp::Div => {
            if y == 0 {
                return Err(ScriptException::math_error("Division by zero"));
            }
            x.checked_div(y)
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(ScriptException::math_error("Modulo by zero"));
            }
            x.checked_rem(y)
        }
        other => {
            return Err(ScriptException::type_error(format!(
                "Operator {} is not arithmetic",
                other.symbol()
            )))
        }
    };
    result.ok_or_else(|| ScriptException::math_error("Integer overflow"))
}

fn float_op(op: BinaryOp, x: f64, y: f64) -> Result<f64, ScriptException> {
    match op {
        BinaryOp::Add => Ok(x + y),
        BinaryOp::Sub => Ok(x - y),
        BinaryOp::Mul => Ok(x * y),
        BinaryOp::Div if y == 0.0 => Err(ScriptException::math_error("Division by zero")),
        BinaryOp::Div => Ok(x / y),
        BinaryOp::Mod if y == 0.0 => Err(ScriptException::math_error("Modulo by zero")),
        BinaryOp::Mod => Ok(x % y),
        other => Err(ScriptException::type_error(format!(
            "Operator {} is not arithmetic",
            other.symbol()
        ))),
    }
}

fn numeric(op: BinaryOp, a: Num, b: Num) -> Result<Value, ScriptException> {
    if op == BinaryOp::Pow {
        return Ok(Value::Double(a.as_f64().powf(b.as_f64())));
    }
    match promoted_rank(a, b) {
        0 => {
            let wide = integer_op(op, a.as_i64(), b.as_i64())?;
            i32::try_from(wide)
                .map(Value::Int)
                .map_err(|_| ScriptException::math_error("Integer overflow"))
        }
        1 => integer_op(op, a.as_i64(), b.as_i64()).map(Value::Long),
        2 => float_op(op, a.as_f64(), b.as_f64()).map(|n| Value::Float(n as f32)),
        _ => float_op(op, a.as_f64(), b.as_f64()).map(Value::Double),
    }
}

/// Arithmetic operators: + - * / % ^
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptException> {
    if op == BinaryOp::Add
        && (matches!(left, Value::Str(_) | Value::Date(_)) || matches!(right, Value::Str(_) | Value::Date(_)))
    {
        return Ok(Value::string(format!("{}{}", left, right)));
    }

    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return numeric(op, a, b);
    }

    if left.is_null() || right.is_null() {
        return Err(ScriptException::new(
            ErrorType::NullError,
            format!("Operator {} applied to null", op.symbol()),
        ));
    }

    Err(unsupported(op.symbol(), left, right))
}

fn integral_view(value: &Value) -> Option<Num> {
    match value {
        Value::Bitmap { bits, .. } => Some(Num::Int(*bits as i32)),
        Value::Intmap { bits, .. } => Some(Num::Int(*bits)),
        other => Num::of(other),
    }
}

fn numeric_ordering(a: Num, b: Num) -> Result<Ordering, ScriptException> {
    if a.is_integral() && b.is_integral() {
        return Ok(a.as_i64().cmp(&b.as_i64()));
    }
    a.as_f64()
        .partial_cmp(&b.as_f64())
        .ok_or_else(|| ScriptException::math_error("Cannot compare NaN"))
}

/// Script equality: null equals only null, numbers compare after promotion,
/// a string against a number compares stringified
pub fn equals(left: &Value, right: &Value) -> Result<bool, ScriptException> {
    match (left, right) {
        (Value::Null, Value::Null) => return Ok(true),
        (Value::Null, _) | (_, Value::Null) => return Ok(false),
        _ => {}
    }

    if let (Some(a), Some(b)) = (integral_view(left), integral_view(right)) {
        return Ok(numeric_ordering(a, b).map(|o| o == Ordering::Equal).unwrap_or(false));
    }

    match (left, right) {
        (Value::Str(_), other) | (other, Value::Str(_)) if other.is_numeric() => {
            Ok(left.to_string() == right.to_string())
        }
        (Value::Json(a), Value::Json(b)) => Ok(a == b),
        _ if left.data_type() == right.data_type() => Ok(left == right),
        _ => Err(unsupported("==", left, right)),
    }
}

/// Ordering for < <= > >=
pub fn ordering(left: &Value, right: &Value) -> Result<Ordering, ScriptException> {
    if let (Some(a), Some(b)) = (integral_view(left), integral_view(right)) {
        return numeric_ordering(a, b);
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        (Value::Null, _) | (_, Value::Null) => Err(ScriptException::new(
            ErrorType::NullError,
            "Cannot order a null value",
        )),
        _ => Err(unsupported("<", left, right)),
    }
}

/// Comparison operators, yielding a bool
pub fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, ScriptException> {
    match op {
        BinaryOp::Eq => equals(left, right),
        BinaryOp::Ne => equals(left, right).map(|eq| !eq),
        BinaryOp::Lt => ordering(left, right).map(|o| o == Ordering::Less),
        BinaryOp::Le => ordering(left, right).map(|o| o != Ordering::Greater),
        BinaryOp::Gt => ordering(left, right).map(|o| o == Ordering::Greater),
        BinaryOp::Ge => ordering(left, right).map(|o| o != Ordering::Less),
        other => Err(ScriptException::type_error(format!(
            "Operator {} is not a comparison",
            other.symbol()
        ))),
    }
}

/// Boolean contexts accept only BOOL values
pub fn require_bool(value: &Value, context: &str) -> Result<bool, ScriptException> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Err(ScriptException::new(
            ErrorType::NullError,
            format!("{} requires a bool, got null", context),
        )),
        other => Err(ScriptException::type_error(format!(
            "{} requires a bool, got {}",
            context,
            other.type_name()
        ))),
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ScriptException> {
    match (op, operand) {
        (UnaryOp::TypeOf, value) => Ok(Value::string(value.type_name())),
        (UnaryOp::Not, value) => require_bool(value, "Operator !").map(|b| Value::Bool(!b)),
        (_, Value::Null) => Err(ScriptException::new(
            ErrorType::NullError,
            "Unary operator applied to null",
        )),
        (UnaryOp::Plus, value) if value.is_numeric() => Ok(value.clone()),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ScriptException::math_error("Integer overflow")),
        (UnaryOp::Neg, Value::Long(n)) => n
            .checked_neg()
            .map(Value::Long)
            .ok_or_else(|| ScriptException::math_error("Integer overflow")),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Neg, Value::Double(n)) => Ok(Value::Double(-n)),
        (_, value) => Err(ScriptException::type_error(format!(
            "Unary operator requires a number, got {}",
            value.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_follows_widening_order() {
        assert_eq!(arithmetic(BinaryOp::Add, &Value::Int(2), &Value::Long(3)).unwrap(), Value::Long(5));
        assert_eq!(
            arithmetic(BinaryOp::Mul, &Value::Long(2), &Value::Float(1.5)).unwrap(),
            Value::Double(3.0)
        );
        assert_eq!(arithmetic(BinaryOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(arithmetic(BinaryOp::Pow, &Value::Int(2), &Value::Int(10)).unwrap(), Value::Double(1024.0));
    }

    #[test]
    fn division_by_zero_and_overflow_are_math_errors() {
        for (op, l, r) in [
            (BinaryOp::Div, Value::Int(10), Value::Int(0)),
            (BinaryOp::Mod, Value::Long(10), Value::Long(0)),
            (BinaryOp::Div, Value::Double(1.0), Value::Double(0.0)),
            (BinaryOp::Add, Value::Int(i32::MAX), Value::Int(1)),
        ] {
            let err = arithmetic(op, &l, &r).unwrap_err();
            assert_eq!(err.error_type(), Some(ErrorType::MathError));
        }
    }

    #[test]
    fn plus_concatenates_with_strings() {
        let v = arithmetic(BinaryOp::Add, &Value::string("n="), &Value::Int(4)).unwrap();
        assert_eq!(v, Value::string("n=4"));
        let err = arithmetic(BinaryOp::Sub, &Value::string("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::TypeError));
    }

    #[test]
    fn equality_rules() {
        assert!(equals(&Value::Null, &Value::Null).unwrap());
        assert!(!equals(&Value::Null, &Value::Int(0)).unwrap());
        assert!(equals(&Value::Int(3), &Value::Double(3.0)).unwrap());
        assert!(equals(&Value::string("3"), &Value::Int(3)).unwrap());
        assert!(equals(&Value::Bool(true), &Value::Int(1)).is_err());
    }

    #[test]
    fn ordering_rules() {
        assert!(compare(BinaryOp::Lt, &Value::Int(1), &Value::Long(2)).unwrap());
        assert!(compare(BinaryOp::Ge, &Value::string("b"), &Value::string("a")).unwrap());
        assert!(compare(BinaryOp::Lt, &Value::string("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn unary_rules() {
        assert_eq!(unary(UnaryOp::Neg, &Value::Int(5)).unwrap(), Value::Int(-5));
        assert_eq!(unary(UnaryOp::Not, &Value::Bool(true)).unwrap(), Value::Bool(false));
        assert!(unary(UnaryOp::Not, &Value::Int(1)).is_err());
        assert_eq!(unary(UnaryOp::TypeOf, &Value::Long(1)).unwrap(), Value::string("long"));
        assert_eq!(
            unary(UnaryOp::Neg, &Value::Int(i32::MIN)).unwrap_err().error_type(),
            Some(ErrorType::MathError)
        );
    }
}

// File: src/interpreter/expressions.rs
//
// Expression evaluation: the ExprVisitor half of the evaluator.

use super::operators;
use super::value::ArrayValue;
use super::{EvalResult, Interpreter, Value};
use crate::ast::{Argument, BinaryOp, Call, Expr, ExprVisitor, Literal, UnaryOp};
use crate::errors::{find_closest_match, ErrorType, ScriptException};
use crate::types::{cast, parse_date, DataType, TypeSpec};
use std::sync::Arc;

fn null_error(what: &str) -> ScriptException {
    ScriptException::new(ErrorType::NullError, format!("Cannot {} null", what))
}

fn out_of_bounds(index: i64, len: usize) -> ScriptException {
    ScriptException::new(ErrorType::IndexError, format!("Index {} out of bounds (length {})", index, len))
}

fn position(index: &Value, len: usize) -> Result<usize, ScriptException> {
    let n = index
        .as_i64()
        .ok_or_else(|| ScriptException::type_error(format!("Index must be an integer, got {}", index.type_name())))?;
    match usize::try_from(n) {
        Ok(i) if i < len => Ok(i),
        _ => Err(out_of_bounds(n, len)),
    }
}

fn missing_key<'a>(key: &str, keys: impl Iterator<Item = &'a str>) -> ScriptException {
    let error = ScriptException::not_found(format!("No field '{}'", key));
    match find_closest_match(&key.to_lowercase(), keys) {
        Some(s) => error.with_suggestion(s),
        None => error,
    }
}

fn json_member(json: &serde_json::Value, key: &Value) -> EvalResult {
    match json {
        serde_json::Value::Array(items) => Ok(Value::from_json(&items[position(key, items.len())?])),
        serde_json::Value::Object(map) => {
            let name = key.as_str().ok_or_else(|| {
                ScriptException::type_error(format!("Json object keys are strings, got {}", key.type_name()))
            })?;
            map.get(name)
                .map(Value::from_json)
                .ok_or_else(|| missing_key(name, map.keys().map(String::as_str)))
        }
        other => Err(ScriptException::type_error(format!("Cannot index into json {}", other))),
    }
}

/// Element type shared by every item, or ANY for mixed arrays
fn common_type(items: &[Value]) -> DataType {
    let mut kinds = items.iter().filter(|v| !v.is_null()).map(Value::data_type);
    match kinds.next() {
        Some(first) if kinds.all(|k| k == first) => first,
        _ => DataType::Any,
    }
}

impl ExprVisitor for Interpreter {
    type Output = EvalResult;

    fn visit_literal(&mut self, literal: &Literal) -> EvalResult {
        Ok(match literal {
            Literal::Null => Value::Null,
            Literal::Int(n) => Value::Int(*n),
            Literal::Long(n) => Value::Long(*n),
            Literal::Float(n) => Value::Float(*n),
            Literal::Double(n) => Value::Double(*n),
            Literal::Str(s) => Value::string(s.as_str()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Date(text) => Value::Date(parse_date(text)?),
        })
    }

    fn visit_variable(&mut self, name: &str) -> EvalResult {
        self.env.get(name).ok_or_else(|| {
            let error = ScriptException::undefined_variable(name);
            match find_closest_match(&name.to_lowercase(), self.env.names().into_iter()) {
                Some(s) => error.with_suggestion(s),
                None => error,
            }
        })
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &Expr) -> EvalResult {
        let value = operand.accept(self)?;
        operators::unary(op, &value)
    }

    fn visit_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> EvalResult {
        let lhs = left.accept(self)?;

        // and/or only evaluate the right side when it decides the result
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let l = operators::require_bool(&lhs, &format!("Operator {}", op.symbol()))?;
                if (op == BinaryOp::And && !l) || (op == BinaryOp::Or && l) {
                    return Ok(Value::Bool(l));
                }
                let rhs = right.accept(self)?;
                let r = operators::require_bool(&rhs, &format!("Operator {}", op.symbol()))?;
                Ok(Value::Bool(r))
            }
            _ if op.is_comparison() => {
                let rhs = right.accept(self)?;
                Ok(Value::Bool(operators::compare(op, &lhs, &rhs)?))
            }
            _ => {
                let rhs = right.accept(self)?;
                operators::arithmetic(op, &lhs, &rhs)
            }
        }
    }

    fn visit_chain(&mut self, operands: &[Expr], ops: &[BinaryOp]) -> EvalResult {
        let Some(first) = operands.first() else {
            return Ok(Value::Bool(true));
        };
        let mut left = first.accept(self)?;
        for (op, operand) in ops.iter().zip(&operands[1..]) {
            let right = operand.accept(self)?;
            if !operators::compare(*op, &left, &right)? {
                return Ok(Value::Bool(false));
            }
            left = right;
        }
        Ok(Value::Bool(true))
    }

    fn visit_call(&mut self, call: &Call) -> EvalResult {
        self.call(call)
    }

    fn visit_length(&mut self, target: &Expr) -> EvalResult {
        let len = match target.accept(self)? {
            Value::Array(array) => array.items.len(),
            Value::Str(text) => text.chars().count(),
            Value::Record(fields) => fields.len(),
            Value::Json(json) => match json.as_ref() {
                serde_json::Value::Array(items) => items.len(),
                serde_json::Value::Object(map) => map.len(),
                serde_json::Value::String(text) => text.chars().count(),
                other => return Err(ScriptException::type_error(format!("json {} has no length", other))),
            },
            Value::Null => return Err(null_error("take the length of")),
            other => return Err(ScriptException::type_error(format!("{} has no length", other.type_name()))),
        };
        i32::try_from(len)
            .map(Value::Int)
            .map_err(|_| ScriptException::math_error(format!("Length {} does not fit an int", len)))
    }

    fn visit_index(&mut self, target: &Expr, index: &Expr) -> EvalResult {
        let container = target.accept(self)?;
        let key = index.accept(self)?;
        match container {
            Value::Array(array) => Ok(array.items[position(&key, array.items.len())?].clone()),
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                Ok(Value::string(chars[position(&key, chars.len())?].to_string()))
            }
            Value::Json(json) => json_member(&json, &key),
            Value::Record(fields) => {
                let name = key.as_str().ok_or_else(|| {
                    ScriptException::type_error(format!("Record keys are strings, got {}", key.type_name()))
                })?;
                fields
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| missing_key(name, fields.keys().map(String::as_str)))
            }
            Value::Null => Err(null_error("index into")),
            other => Err(ScriptException::type_error(format!("Cannot index into {}", other.type_name()))),
        }
    }

    fn visit_array_literal(&mut self, items: &[Expr]) -> EvalResult {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(item.accept(self)?);
        }
        let element = common_type(&values);
        Ok(Value::Array(Arc::new(ArrayValue::dynamic(element, values))))
    }

    fn visit_array_init(&mut self, element: &TypeSpec, size: Option<&Expr>) -> EvalResult {
        let element = self.types.resolve(element)?;
        let size = match size {
            Some(expr) => {
                let value = expr.accept(self)?;
                let n = value.as_i64().ok_or_else(|| {
                    ScriptException::type_error(format!("Array size must be an integer, got {}", value.type_name()))
                })?;
                let n = usize::try_from(n).map_err(|_| {
                    ScriptException::new(ErrorType::IndexError, format!("Array size {} is negative", n))
                })?;
                Some(n)
            }
            None => None,
        };
        Ok(TypeSpec::array(element, size).default_value())
    }

    fn visit_property(&mut self, target: &Expr, name: &str) -> EvalResult {
        match target.accept(self)? {
            Value::Record(fields) => fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| missing_key(name, fields.keys().map(String::as_str))),
            Value::Bitmap { bits, layout } => {
                let layout = layout.ok_or_else(|| ScriptException::type_error("Bitmap has no field layout"))?;
                layout
                    .get(bits as u32, name)
                    .map(|n| Value::Int(n as i32))
                    .ok_or_else(|| ScriptException::not_found(format!("Unknown bit field '{}'", name)))
            }
            Value::Intmap { bits, layout } => {
                let layout = layout.ok_or_else(|| ScriptException::type_error("Intmap has no field layout"))?;
                // the top field of an intmap may use bit 31
                layout
                    .get(bits as u32, name)
                    .map(|n| i32::try_from(n).map(Value::Int).unwrap_or(Value::Long(n as i64)))
                    .ok_or_else(|| ScriptException::not_found(format!("Unknown bit field '{}'", name)))
            }
            Value::Json(json) => json_member(&json, &Value::string(name)),
            Value::Null => Err(null_error(&format!("read '{}' of", name))),
            other => Err(ScriptException::type_error(format!(
                "{} has no property '{}'",
                other.type_name(),
                name
            ))),
        }
    }

    fn visit_cast(&mut self, target: &TypeSpec, expr: &Expr) -> EvalResult {
        let spec = self.types.resolve(target)?;
        let value = expr.accept(self)?;
        cast(value, &spec)
    }

    fn visit_cursor_has_next(&mut self, cursor: &str) -> EvalResult {
        let entry = self
            .env
            .cursor_mut(cursor)
            .ok_or_else(|| ScriptException::not_found(format!("Undefined cursor '{}'", cursor)))?;
        let live = entry.open.as_mut().ok_or_else(|| {
            ScriptException::new(ErrorType::DbError, format!("Cursor '{}' is not open", cursor))
        })?;
        Ok(Value::Bool(live.has_next()?))
    }

    fn visit_cursor_next(&mut self, cursor: &str) -> EvalResult {
        let entry = self
            .env
            .cursor_mut(cursor)
            .ok_or_else(|| ScriptException::not_found(format!("Undefined cursor '{}'", cursor)))?;
        let live = entry.open.as_mut().ok_or_else(|| {
            ScriptException::new(ErrorType::DbError, format!("Cursor '{}' is not open", cursor))
        })?;
        Ok(Value::Record(Arc::new(live.next()?)))
    }

    fn visit_select(&mut self, sql: &str, params: &[Argument]) -> EvalResult {
        let (named, positional) = self.evaluate_sql_args(params)?;
        let key = self.connection_stack.last().cloned().ok_or_else(|| {
            ScriptException::new(ErrorType::DbError, "select needs a current connection (use a use block)")
        })?;
        let connection = self.connections.get_mut(&key).ok_or_else(|| {
            ScriptException::new(ErrorType::DbError, format!("Connection '{}' is closed", key))
        })?;
        let rows = connection.execute_select(sql, &named, &positional)?;
        tracing::debug!(connection = %key, rows = rows.len(), "select executed");
        let records = rows.into_iter().map(|row| Value::Record(Arc::new(row))).collect();
        Ok(Value::Array(Arc::new(ArrayValue::dynamic(DataType::Record, records))))
    }
}

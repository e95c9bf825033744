// File: src/interpreter/native_functions/date.rs
//
// Date builtins (`date.*`). Patterns use chrono's strftime syntax; the
// default pattern is the one dates stringify with.

use super::{arg_i64, arg_str, opt_arg, BuiltinError, BuiltinRegistry};
use crate::ast::Parameter;
use crate::errors::ErrorType;
use crate::interpreter::{Value, DATE_FORMAT};
use crate::types::{parse_date, DataType};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use std::fmt::Write;

fn arg_date(args: &[Value], index: usize) -> Result<NaiveDateTime, BuiltinError> {
    match args.get(index) {
        Some(Value::Date(d)) => Ok(*d),
        Some(Value::Null) | None => Err(BuiltinError::new(ErrorType::NullError, "date argument is null")),
        Some(other) => Err(BuiltinError::new(
            ErrorType::TypeError,
            format!("expected a date, got {}", other.type_name()),
        )),
    }
}

fn pattern(args: &[Value], index: usize) -> &str {
    opt_arg(args, index).and_then(Value::as_str).unwrap_or(DATE_FORMAT)
}

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register("date.now", vec![], Some(DataType::Date), |_| Ok(Value::Date(Local::now().naive_local())));

    registry.register(
        "date.format",
        vec![
            Parameter::required("date", DataType::Date),
            Parameter::optional("pattern", DataType::String, None),
        ],
        Some(DataType::String),
        |args| {
            let date = arg_date(args, 0)?;
            let mut out = String::new();
            // bad patterns surface as fmt::Error
            write!(out, "{}", date.format(pattern(args, 1))).map_err(|_| {
                BuiltinError::new(ErrorType::ParseError, format!("invalid date pattern '{}'", pattern(args, 1)))
            })?;
            Ok(Value::string(out))
        },
    );

    registry.register(
        "date.parse",
        vec![
            Parameter::required("text", DataType::String),
            Parameter::optional("pattern", DataType::String, None),
        ],
        Some(DataType::Date),
        |args| {
            let text = arg_str(args, 0)?;
            let parsed = match opt_arg(args, 1).and_then(Value::as_str) {
                None => parse_date(text)?,
                Some(pattern) => match NaiveDateTime::parse_from_str(text, pattern) {
                    Ok(dt) => dt,
                    Err(_) => NaiveDate::parse_from_str(text, pattern)?.and_time(chrono::NaiveTime::MIN),
                },
            };
            Ok(Value::Date(parsed))
        },
    );

    registry.register(
        "date.addDays",
        vec![Parameter::required("date", DataType::Date), Parameter::required("days", DataType::Long)],
        Some(DataType::Date),
        |args| {
            let date = arg_date(args, 0)?;
            let days = arg_i64(args, 1)?;
            Duration::try_days(days)
                .and_then(|d| date.checked_add_signed(d))
                .map(Value::Date)
                .ok_or_else(|| BuiltinError::new(ErrorType::MathError, format!("date overflow adding {} days", days)))
        },
    );
}

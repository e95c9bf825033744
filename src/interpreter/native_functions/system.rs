// File: src/interpreter/native_functions/system.rs
//
// System builtins (`system.*`): environment variables, sleeping, wall clock

use super::{arg_i64, arg_str, opt_arg, BuiltinError, BuiltinRegistry};
use crate::ast::Parameter;
use crate::interpreter::Value;
use crate::types::DataType;
use chrono::Utc;
use std::env;
use std::thread;
use std::time::Duration;

pub fn register(registry: &mut BuiltinRegistry) {
    // Unset variables yield the fallback, or null without one
    registry.register(
        "system.getEnv",
        vec![
            Parameter::required("name", DataType::String),
            Parameter::optional("fallback", DataType::String, None),
        ],
        Some(DataType::Any),
        |args| match env::var(arg_str(args, 0)?) {
            Ok(value) => Ok(Value::string(value)),
            Err(_) => Ok(opt_arg(args, 1).cloned().unwrap_or(Value::Null)),
        },
    );

    registry.register("system.sleep", vec![Parameter::required("ms", DataType::Long)], None, |args| {
        let ms = arg_i64(args, 0)?;
        if ms < 0 {
            return Err(BuiltinError::invalid(format!("cannot sleep for {} ms", ms)));
        }
        thread::sleep(Duration::from_millis(ms as u64));
        Ok(Value::Null)
    });

    registry.register("system.currentTimeMillis", vec![], Some(DataType::Long), |_| {
        Ok(Value::Long(Utc::now().timestamp_millis()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorType, ScriptException};

    fn call(name: &str, args: Vec<Value>) -> Result<Value, ScriptException> {
        let mut registry = BuiltinRegistry::new();
        register(&mut registry);
        registry.invoke(name, args.into_iter().map(|v| (None, v)).collect())
    }

    #[test]
    fn missing_variables_use_the_fallback() {
        let name = Value::string("EBS_TEST_SURELY_UNSET_VARIABLE");
        assert_eq!(call("system.getEnv", vec![name.clone()]).unwrap(), Value::Null);
        assert_eq!(
            call("system.getEnv", vec![name, Value::string("dflt")]).unwrap(),
            Value::string("dflt")
        );
    }

    #[test]
    fn clock_and_sleep() {
        let before = call("system.currentTimeMillis", vec![]).unwrap().as_i64().unwrap();
        assert_eq!(call("system.sleep", vec![Value::Int(5)]).unwrap(), Value::Null);
        let after = call("system.currentTimeMillis", vec![]).unwrap().as_i64().unwrap();
        assert!(after >= before + 5);

        let err = call("system.sleep", vec![Value::Int(-1)]).unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::ValidationError));
    }
}

//! Type conversion utilities for generated routines
//!
//! The `expect_*` functions are the narrowing casts a specialized routine
//! applies to its arguments and upvalues on entry. They never coerce: a
//! value either already has the requested representation or the cast
//! fails with a `TypeError`.

use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::table::TableRef;
use crate::value::{FunctionRef, Value};

fn mismatch(expected: &str, value: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "expected {}, got {}",
        expected,
        value.type_name()
    ))
}

/// Cast to an integer. Floats are rejected even when integral.
pub fn expect_int(value: &Value) -> RuntimeResult<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        _ => Err(mismatch("integer", value)),
    }
}

/// Cast to a float. Integers are rejected.
pub fn expect_float(value: &Value) -> RuntimeResult<f64> {
    match value {
        Value::Float(v) => Ok(*v),
        _ => Err(mismatch("float", value)),
    }
}

pub fn expect_bool(value: &Value) -> RuntimeResult<bool> {
    match value {
        Value::Bool(v) => Ok(*v),
        _ => Err(mismatch("boolean", value)),
    }
}

pub fn expect_str(value: &Value) -> RuntimeResult<Arc<str>> {
    match value {
        Value::Str(s) => Ok(Arc::clone(s)),
        _ => Err(mismatch("string", value)),
    }
}

pub fn expect_table(value: &Value) -> RuntimeResult<TableRef> {
    match value {
        Value::Table(t) => Ok(Arc::clone(t)),
        _ => Err(mismatch("table", value)),
    }
}

pub fn expect_function(value: &Value) -> RuntimeResult<FunctionRef> {
    match value {
        Value::Function(f) => Ok(Arc::clone(f)),
        _ => Err(mismatch("function", value)),
    }
}

pub fn expect_nil(value: &Value) -> RuntimeResult<()> {
    match value {
        Value::Nil => Ok(()),
        _ => Err(mismatch("nil", value)),
    }
}

/// Parse a number the way script code writes numeric literals.
/// Returns `nil` when the text is not a number.
pub fn tonumber(value: &Value) -> Value {
    match value {
        Value::Int(_) | Value::Float(_) => value.clone(),
        Value::Str(s) => {
            let text = s.trim();
            if let Some(hex) = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
            {
                return i64::from_str_radix(hex, 16)
                    .map(Value::Int)
                    .unwrap_or(Value::Nil);
            }
            if let Ok(i) = text.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = text.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::Nil
            }
        }
        _ => Value::Nil,
    }
}

/// Render any value as a string.
pub fn tostring(value: &Value) -> Arc<str> {
    match value {
        Value::Str(s) => Arc::clone(s),
        other => Arc::from(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_casts_do_not_coerce() {
        assert_eq!(expect_int(&Value::Int(3)).unwrap(), 3);
        assert!(expect_int(&Value::Float(3.0)).is_err());
        assert!(expect_float(&Value::Int(3)).is_err());
        assert!(expect_str(&Value::Int(3)).is_err());
    }

    #[test]
    fn test_cast_error_message() {
        let err = expect_table(&Value::Nil).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: expected table, got nil");
        assert!(err.is_type_mismatch());
    }

    #[test]
    fn test_tonumber() {
        assert_eq!(tonumber(&Value::from("42")), Value::Int(42));
        assert_eq!(tonumber(&Value::from(" 2.5 ")), Value::Float(2.5));
        assert_eq!(tonumber(&Value::from("0x10")), Value::Int(16));
        assert!(tonumber(&Value::from("abc")).is_nil());
        assert!(tonumber(&Value::Bool(true)).is_nil());
    }

    #[test]
    fn test_tostring() {
        assert_eq!(&*tostring(&Value::Int(7)), "7");
        assert_eq!(&*tostring(&Value::Float(1.5)), "1.5");
        assert_eq!(&*tostring(&Value::from("s")), "s");
    }
}

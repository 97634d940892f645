//! Dynamic operators
//!
//! This module provides the untyped operator implementations used by
//! generated code whenever operand types are not known statically, plus
//! the typed kernels that specialized code calls directly.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::Value;

/// Binary operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IntDiv,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// Get the operator string
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::IntDiv => "//",
            BinOp::Concat => "..",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow | BinOp::IntDiv
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

/// Unary operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

/// Perform dynamic binary operation
///
/// Dispatches based on the runtime types of the operands.
pub fn dynamic_binop(op: BinOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Mod | BinOp::IntDiv => {
            match (lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b).map(Value::Int),
                _ => {
                    let (a, b) = float_operands(lhs, rhs)?;
                    Ok(Value::Float(float_arith(op, a, b)))
                }
            }
        }
        BinOp::Div | BinOp::Pow => {
            let (a, b) = float_operands(lhs, rhs)?;
            Ok(Value::Float(float_arith(op, a, b)))
        }
        BinOp::Concat => concat(lhs, rhs).map(Value::Str),
        BinOp::Eq => Ok(Value::Bool(lhs.raw_equals(rhs))),
        BinOp::Ne => Ok(Value::Bool(!lhs.raw_equals(rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, lhs, rhs).map(Value::Bool),
    }
}

/// Perform dynamic unary operation
pub fn dynamic_unop(op: UnOp, operand: &Value) -> RuntimeResult<Value> {
    match op {
        UnOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnOp::Neg => match operand {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(arith_error(other)),
        },
        UnOp::Len => match operand {
            Value::Str(s) => Ok(Value::Int(s.len() as i64)),
            Value::Table(t) => Ok(Value::Int(t.read().len())),
            other => Err(RuntimeError::type_error(format!(
                "attempt to get length of a {} value",
                other.type_name()
            ))),
        },
    }
}

/// Integer kernel for `+ - * % //`. Wraps on overflow.
#[inline]
pub fn int_arith(op: BinOp, a: i64, b: i64) -> RuntimeResult<i64> {
    match op {
        BinOp::Add => Ok(a.wrapping_add(b)),
        BinOp::Sub => Ok(a.wrapping_sub(b)),
        BinOp::Mul => Ok(a.wrapping_mul(b)),
        BinOp::Mod => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero("n%0"));
            }
            let r = a.wrapping_rem(b);
            if r != 0 && (r ^ b) < 0 {
                Ok(r + b)
            } else {
                Ok(r)
            }
        }
        BinOp::IntDiv => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero("n//0"));
            }
            let q = a.wrapping_div(b);
            if a.wrapping_rem(b) != 0 && (a ^ b) < 0 {
                Ok(q - 1)
            } else {
                Ok(q)
            }
        }
        other => Err(RuntimeError::internal(format!(
            "operator {} has no integer kernel",
            other.as_str()
        ))),
    }
}

/// Float kernel for every arithmetic operator.
#[inline]
pub fn float_arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Pow => a.powf(b),
        BinOp::Mod => a - (a / b).floor() * b,
        BinOp::IntDiv => (a / b).floor(),
        _ => f64::NAN,
    }
}

/// Ordering comparison on numbers or strings.
/// Exact ordering of an integer against a float, without rounding the
/// integer to the nearest float. `None` when `f` is NaN.
pub fn int_float_ordering(i: i64, f: f64) -> Option<Ordering> {
    // 2^63: the first float above every i64
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return None;
    }
    if f >= BOUND {
        return Some(Ordering::Less);
    }
    if f < -BOUND {
        return Some(Ordering::Greater);
    }
    let whole = f.trunc();
    Some(i.cmp(&(whole as i64)).then_with(|| {
        // equal integer parts: the fraction decides
        whole.partial_cmp(&f).unwrap_or(Ordering::Equal)
    }))
}

pub fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> RuntimeResult<bool> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => int_float_ordering(*a, *b),
        (Value::Float(a), Value::Int(b)) => int_float_ordering(*b, *a).map(Ordering::reverse),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(RuntimeError::type_error(format!(
                    "attempt to compare {} with {}",
                    lhs.type_name(),
                    rhs.type_name()
                )))
            }
        },
    };
    let Some(ordering) = ordering else {
        // NaN compares false with everything
        return Ok(false);
    };
    Ok(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => false,
    })
}

/// String concatenation; numbers are formatted, anything else is an error.
pub fn concat(lhs: &Value, rhs: &Value) -> RuntimeResult<Arc<str>> {
    match (lhs, rhs) {
        (Value::Str(_) | Value::Int(_) | Value::Float(_), Value::Str(_) | Value::Int(_) | Value::Float(_)) => {
            Ok(Arc::from(format!("{}{}", lhs, rhs)))
        }
        _ => {
            let bad = if matches!(lhs, Value::Str(_) | Value::Int(_) | Value::Float(_)) {
                rhs
            } else {
                lhs
            };
            Err(RuntimeError::type_error(format!(
                "attempt to concatenate a {} value",
                bad.type_name()
            )))
        }
    }
}

fn float_operands(lhs: &Value, rhs: &Value) -> RuntimeResult<(f64, f64)> {
    match (lhs.as_float(), rhs.as_float()) {
        (Some(a), Some(b)) => Ok((a, b)),
        (None, _) => Err(arith_error(lhs)),
        (_, None) => Err(arith_error(rhs)),
    }
}

fn arith_error(value: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "attempt to perform arithmetic on a {} value",
        value.type_name()
    ))
}

//! Representation conversions and shared run-time helpers.

use std::cmp::Ordering;
use std::sync::Arc;

use subset_lua_jit_runtime::dispatch::int_float_ordering;
use subset_lua_jit_runtime::{BinOp, RuntimeError, RuntimeResult, TableKey, Value};

use super::{BoolFn, Emitted, FloatFn, IntFn, ValueFn};
use crate::compile::lattice::Type;
use crate::ir::core::{Expr, Stmt};

impl Emitted {
    /// Boxed representation.
    pub(super) fn into_value(self) -> ValueFn {
        match self {
            Emitted::Value(f) => f,
            Emitted::Int(f) => Box::new(move |fr| f(fr).map(Value::Int)),
            Emitted::Float(f) => Box::new(move |fr| f(fr).map(Value::Float)),
            Emitted::Bool(f) => Box::new(move |fr| f(fr).map(Value::Bool)),
        }
    }

    /// Unboxed float; integers widen. Non-numeric code is checked when
    /// it runs.
    pub(super) fn into_float(self) -> FloatFn {
        match self {
            Emitted::Float(f) => f,
            Emitted::Int(f) => Box::new(move |fr| f(fr).map(|v| v as f64)),
            Emitted::Bool(f) => Box::new(move |fr| {
                f(fr)?;
                Err(arith_error("boolean"))
            }),
            Emitted::Value(f) => Box::new(move |fr| {
                let v = f(fr)?;
                v.as_float().ok_or_else(|| arith_error(v.type_name()))
            }),
        }
    }

    /// Unboxed integer. Only code typed `Integer` is expected here; anything
    /// else is reported when it runs.
    pub(super) fn into_int(self) -> IntFn {
        match self {
            Emitted::Int(f) => f,
            other => {
                let f = other.into_value();
                Box::new(move |fr| match f(fr)? {
                    Value::Int(v) => Ok(v),
                    other => Err(violation(ty_name::INTEGER, &other)),
                })
            }
        }
    }

    /// Truthiness test. Numbers are always true but still evaluated.
    pub(super) fn into_truthy(self) -> BoolFn {
        match self {
            Emitted::Bool(f) => f,
            Emitted::Int(f) => Box::new(move |fr| f(fr).map(|_| true)),
            Emitted::Float(f) => Box::new(move |fr| f(fr).map(|_| true)),
            Emitted::Value(f) => Box::new(move |fr| f(fr).map(|v| v.is_truthy())),
        }
    }
}

/// Unbox `f` into the representation of `ty`. A value outside `ty` means
/// inference was unsound and is reported as an internal error.
pub(super) fn narrow(ty: &Type, f: ValueFn) -> Emitted {
    match ty {
        Type::Integer => Emitted::Int(Box::new(move |fr| match f(fr)? {
            Value::Int(v) => Ok(v),
            other => Err(violation(ty_name::INTEGER, &other)),
        })),
        Type::Float => Emitted::Float(Box::new(move |fr| match f(fr)? {
            Value::Float(v) => Ok(v),
            other => Err(violation(ty_name::FLOAT, &other)),
        })),
        Type::Boolean => Emitted::Bool(Box::new(move |fr| match f(fr)? {
            Value::Bool(v) => Ok(v),
            other => Err(violation(ty_name::BOOLEAN, &other)),
        })),
        _ => Emitted::Value(f),
    }
}

mod ty_name {
    pub(super) const INTEGER: &str = "Integer";
    pub(super) const FLOAT: &str = "Float";
    pub(super) const BOOLEAN: &str = "Boolean";
}

fn violation(expected: &str, got: &Value) -> RuntimeError {
    RuntimeError::internal(format!(
        "specialized code expected {}, found a {} value",
        expected,
        got.type_name()
    ))
}

fn arith_error(type_name: &str) -> RuntimeError {
    RuntimeError::type_error(format!(
        "attempt to perform arithmetic on a {} value",
        type_name
    ))
}

fn ordering_holds(op: BinOp, ordering: Ordering) -> bool {
    match op {
        BinOp::Eq => ordering.is_eq(),
        BinOp::Ne => ordering.is_ne(),
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => false,
    }
}

#[inline]
pub(super) fn int_cmp(op: BinOp, a: i64, b: i64) -> bool {
    ordering_holds(op, a.cmp(&b))
}

/// Exact integer-to-float comparison; an unordered result (NaN) only
/// satisfies `~=`.
#[inline]
pub(super) fn int_float_cmp(op: BinOp, a: i64, b: f64) -> bool {
    match int_float_ordering(a, b) {
        Some(ordering) => ordering_holds(op, ordering),
        None => op == BinOp::Ne,
    }
}

#[inline]
pub(super) fn float_int_cmp(op: BinOp, a: f64, b: i64) -> bool {
    match int_float_ordering(b, a) {
        Some(ordering) => ordering_holds(op, ordering.reverse()),
        None => op == BinOp::Ne,
    }
}

/// Float comparison. NaN is unordered: only `~=` holds.
#[inline]
pub(super) fn float_cmp(op: BinOp, a: f64, b: f64) -> bool {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering_holds(op, ordering),
        None => op == BinOp::Ne,
    }
}

/// Generic keyed read. An invalid key (nil, NaN) reads as nil.
pub(super) fn index_value(target: &Value, key: &Value) -> RuntimeResult<Value> {
    match target {
        Value::Table(table) => match TableKey::from_value(key) {
            Ok(key) => Ok(table.read().get(&key)),
            Err(_) => Ok(Value::Nil),
        },
        other => Err(RuntimeError::index_error(other.type_name())),
    }
}

/// Generic keyed write.
pub(super) fn store_index(target: &Value, key: &Value, value: Value) -> RuntimeResult<()> {
    match target {
        Value::Table(table) => {
            let key = TableKey::from_value(key)?;
            table.write().set(key, value);
            Ok(())
        }
        other => Err(RuntimeError::index_error(other.type_name())),
    }
}

/// Slot read on a value statically known to be a table of the layout
/// `shape_id`. A table of another layout is read by key instead.
pub(super) fn load_field(target: &Value, shape_id: u64, slot: usize, key: &str) -> RuntimeResult<Value> {
    match target {
        Value::Table(table) => {
            let table = table.read();
            if table.layout().shape_id() == shape_id {
                Ok(table.load_slot(slot))
            } else {
                Ok(table.get_str(key))
            }
        }
        other => Err(RuntimeError::index_error(other.type_name())),
    }
}

pub(super) fn store_field(
    target: &Value,
    shape_id: u64,
    slot: usize,
    key: &Arc<str>,
    value: Value,
) -> RuntimeResult<()> {
    match target {
        Value::Table(table) => {
            let mut table = table.write();
            if table.layout().shape_id() == shape_id {
                table.store_slot(slot, value)
            } else {
                table.set(TableKey::Str(Arc::clone(key)), value);
                Ok(())
            }
        }
        other => Err(RuntimeError::index_error(other.type_name())),
    }
}

/// Return the variant name of a `Stmt` for diagnostic messages.
pub(super) fn stmt_variant_name(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Local { .. } => "Local",
        Stmt::Assign { .. } => "Assign",
        Stmt::SetUpvalue { .. } => "SetUpvalue",
        Stmt::SetGlobal { .. } => "SetGlobal",
        Stmt::SetIndex { .. } => "SetIndex",
        Stmt::Expr(..) => "Expr",
        Stmt::If { .. } => "If",
        Stmt::While { .. } => "While",
        Stmt::NumericFor { .. } => "NumericFor",
        Stmt::Return(..) => "Return",
        Stmt::Break => "Break",
    }
}

/// Return the variant name of an `Expr` for diagnostic messages.
pub(super) fn expr_variant_name(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(..) => "Literal",
        Expr::Local(..) => "Local",
        Expr::Upvalue(..) => "Upvalue",
        Expr::Global(..) => "Global",
        Expr::Binary { .. } => "Binary",
        Expr::Logical { .. } => "Logical",
        Expr::Unary { .. } => "Unary",
        Expr::Index { .. } => "Index",
        Expr::Call { .. } => "Call",
        Expr::Function { .. } => "Function",
        Expr::Table(..) => "Table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subset_lua_jit_runtime::Table;

    #[test]
    fn test_mixed_comparisons_do_not_round_the_integer() {
        let big = (1i64 << 53) + 1;
        let near = (1i64 << 53) as f64;
        assert!(!int_float_cmp(BinOp::Eq, big, near));
        assert!(int_float_cmp(BinOp::Gt, big, near));
        assert!(float_int_cmp(BinOp::Lt, near, big));
        assert!(float_int_cmp(BinOp::Ne, near, big));
        assert!(int_float_cmp(BinOp::Le, 3, 3.0));
        assert!(int_float_cmp(BinOp::Ne, 3, f64::NAN));
        assert!(!float_int_cmp(BinOp::Ge, f64::NAN, 3));
    }

    #[test]
    fn test_float_cmp_nan() {
        assert!(!float_cmp(BinOp::Lt, f64::NAN, 1.0));
        assert!(!float_cmp(BinOp::Eq, f64::NAN, f64::NAN));
        assert!(float_cmp(BinOp::Ne, f64::NAN, f64::NAN));
        assert!(float_cmp(BinOp::Le, 1.0, 1.0));
    }

    #[test]
    fn test_int_cmp() {
        assert!(int_cmp(BinOp::Lt, -1, 0));
        assert!(!int_cmp(BinOp::Gt, -1, 0));
        assert!(int_cmp(BinOp::Ge, 3, 3));
    }

    #[test]
    fn test_index_value_invalid_key_reads_nil() {
        let table = Value::Table(Table::empty().into_ref());
        assert_eq!(index_value(&table, &Value::Nil).unwrap(), Value::Nil);
        assert!(store_index(&table, &Value::Nil, Value::Int(1)).is_err());
    }

    #[test]
    fn test_load_field_falls_back_to_key_on_other_layout() {
        let table = Table::empty().into_ref();
        table.write().set(TableKey::from("x"), Value::Int(7));
        let value = Value::Table(table);
        assert_eq!(load_field(&value, u64::MAX, 0, "x").unwrap(), Value::Int(7));
    }

    #[test]
    fn test_index_non_table_is_type_error() {
        let err = index_value(&Value::Nil, &Value::from("x")).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: attempt to index a nil value");
    }
}

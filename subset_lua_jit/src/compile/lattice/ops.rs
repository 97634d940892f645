//! Lattice operations: join, typing of run-time values, value checks.

use subset_lua_jit_runtime::convert;
use subset_lua_jit_runtime::table::DYNAMIC_SHAPE_ID;
use subset_lua_jit_runtime::{RuntimeError, RuntimeResult, Value};

use super::types::{TableShape, Type};
use crate::compile::shape::ShapeRegistry;
use crate::vm::Closure;

impl Type {
    /// Least upper bound: `a` if both are equal, otherwise `Unknown`.
    pub fn join(&self, other: &Type) -> Type {
        if self == other {
            self.clone()
        } else {
            Type::Unknown
        }
    }

    /// Most precise type describing a run-time value.
    ///
    /// Tables whose layout was compiled from a registered shape get that
    /// shape; any other table is `Table(Unknown)`. Closures get their
    /// prototype; other callables are `Unknown`.
    pub fn of_value(value: &Value, shapes: &ShapeRegistry) -> Type {
        match value {
            Value::Nil => Type::Nil,
            Value::Bool(_) => Type::Boolean,
            Value::Int(_) => Type::Integer,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::String,
            Value::Table(table) => {
                let shape_id = table.read().layout().shape_id();
                if shape_id == DYNAMIC_SHAPE_ID {
                    return Type::any_table();
                }
                match shapes.lookup(shape_id) {
                    Some(shape) => Type::Table(TableShape::Known(shape)),
                    None => Type::any_table(),
                }
            }
            Value::Function(func) => match func.as_any().downcast_ref::<Closure>() {
                Some(closure) => Type::Function(closure.prototype().clone()),
                None => Type::Unknown,
            },
        }
    }

    /// Cast check used by routine prologues: succeeds iff the value
    /// belongs to this type. Failures are `TypeError`s.
    pub fn check(&self, value: &Value) -> RuntimeResult<()> {
        match self {
            Type::Unknown => Ok(()),
            Type::Nil => convert::expect_nil(value),
            Type::Boolean => convert::expect_bool(value).map(drop),
            Type::Integer => convert::expect_int(value).map(drop),
            Type::Float => convert::expect_float(value).map(drop),
            Type::String => convert::expect_str(value).map(drop),
            Type::Table(TableShape::Unknown) => convert::expect_table(value).map(drop),
            Type::Table(TableShape::Known(shape)) => {
                let table = convert::expect_table(value)?;
                let actual = table.read().layout().shape_id();
                if actual == shape.resolve().id() {
                    Ok(())
                } else {
                    Err(RuntimeError::type_error(format!(
                        "expected {}, got table of shape #{}",
                        self, actual
                    )))
                }
            }
            Type::Function(proto) => {
                let func = convert::expect_function(value)?;
                match func.as_any().downcast_ref::<Closure>() {
                    Some(closure) if closure.prototype().id() == proto.id() => Ok(()),
                    _ => Err(RuntimeError::type_error(format!(
                        "expected {}, got function {}",
                        self,
                        func.name()
                    ))),
                }
            }
        }
    }

    pub fn admits(&self, value: &Value) -> bool {
        self.check(value).is_ok()
    }
}

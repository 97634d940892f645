//! Host functions with typed overloads.
//!
//! A host function is a list of overloads, each a parameter pattern list
//! and a Rust function. Call sites select an overload once per link and
//! re-check its patterns on every call; a generic call selects by the
//! run-time types of the arguments.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use subset_lua_jit_runtime::{Callable, RuntimeError, RuntimeResult, Value};

use crate::compile::lattice::{TableShape, Type};
use crate::compile::shape::ShapeRegistry;

/// Accepted type of one host-function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamPattern {
    Exact(Type),
    Any,
}

impl ParamPattern {
    /// Static match. An `Unknown` type only matches `Any`; a table pattern
    /// without a shape accepts tables of every shape.
    pub fn accepts(&self, ty: &Type) -> bool {
        match (self, ty) {
            (ParamPattern::Any, _) => true,
            (ParamPattern::Exact(Type::Table(TableShape::Unknown)), Type::Table(_)) => true,
            (ParamPattern::Exact(expected), ty) => expected == ty,
        }
    }

    pub fn admits(&self, value: &Value) -> bool {
        match self {
            ParamPattern::Any => true,
            ParamPattern::Exact(expected) => expected.admits(value),
        }
    }
}

type HostFn = Arc<dyn Fn(&[Value]) -> RuntimeResult<Vec<Value>> + Send + Sync>;

struct Overload {
    params: Vec<ParamPattern>,
    func: HostFn,
}

pub struct HostFunction {
    name: Arc<str>,
    overloads: Vec<Overload>,
}

impl HostFunction {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            overloads: Vec::new(),
        }
    }

    /// Add an overload. Earlier overloads win when several match.
    pub fn overload<F>(mut self, params: Vec<ParamPattern>, func: F) -> Self
    where
        F: Fn(&[Value]) -> RuntimeResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.overloads.push(Overload {
            params,
            func: Arc::new(func),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First overload whose patterns accept the static `types`.
    pub fn select(&self, types: &[Type]) -> Option<usize> {
        self.overloads.iter().position(|overload| {
            overload.params.len() == types.len()
                && overload.params.iter().zip(types).all(|(p, ty)| p.accepts(ty))
        })
    }

    /// First overload admitting the run-time `args`.
    pub fn select_values(&self, args: &[Value]) -> Option<usize> {
        (0..self.overloads.len()).find(|&index| self.matches(index, args))
    }

    /// Pattern check for one overload, as done on every linked call.
    pub fn matches(&self, index: usize, args: &[Value]) -> bool {
        self.overloads.get(index).map_or(false, |overload| {
            overload.params.len() == args.len()
                && overload.params.iter().zip(args).all(|(p, v)| p.admits(v))
        })
    }

    pub(crate) fn invoke_overload(&self, index: usize, args: &[Value]) -> RuntimeResult<Vec<Value>> {
        match self.overloads.get(index) {
            Some(overload) => (overload.func)(args),
            None => Err(RuntimeError::internal(format!(
                "{} has no overload {}",
                self.name, index
            ))),
        }
    }

    pub(crate) fn no_match(&self, types: &[Type]) -> RuntimeError {
        let rendered = types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        RuntimeError::no_matching_overload(self.name.as_ref(), rendered)
    }
}

impl Callable for HostFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        match self.select_values(&args) {
            Some(index) => self.invoke_overload(index, &args),
            None => {
                let shapes = ShapeRegistry::new();
                let types: Vec<Type> = args.iter().map(|a| Type::of_value(a, &shapes)).collect();
                Err(self.no_match(&types))
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field(
                "overloads",
                &self.overloads.iter().map(|o| &o.params).collect::<Vec<_>>(),
            )
            .finish()
    }
}

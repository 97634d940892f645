//! Closures and upvalue cells.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use subset_lua_jit_runtime::{Callable, RuntimeError, RuntimeResult, Value};

use super::Engine;
use crate::compile::lattice::Type;
use crate::compile::shape::ShapeRegistry;
use crate::ir::core::FunctionPrototype;

/// Shared mutable variable captured by one or more closures.
#[derive(Debug, Default)]
pub struct UpvalueCell {
    value: RwLock<Value>,
}

impl UpvalueCell {
    pub fn new(value: Value) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.write() = value;
    }
}

/// A function value: a prototype plus the cells of its upvalues.
pub struct Closure {
    proto: Arc<FunctionPrototype>,
    upvalues: Arc<[Arc<UpvalueCell>]>,
    engine: Weak<Engine>,
}

impl Closure {
    pub fn new(
        proto: Arc<FunctionPrototype>,
        upvalues: Arc<[Arc<UpvalueCell>]>,
        engine: Weak<Engine>,
    ) -> Self {
        Self {
            proto,
            upvalues,
            engine,
        }
    }

    pub fn prototype(&self) -> &Arc<FunctionPrototype> {
        &self.proto
    }

    pub fn upvalues(&self) -> &Arc<[Arc<UpvalueCell>]> {
        &self.upvalues
    }

    /// Upvalue types an identity guard may trust for this closure: the
    /// declared type where there is one, the current value's type for
    /// sealed cells, `Unknown` otherwise.
    pub fn identity_upvalue_types(&self, shapes: &ShapeRegistry) -> Vec<Type> {
        self.proto
            .upvalues()
            .iter()
            .zip(self.upvalues.iter())
            .map(|(template, cell)| match &template.known_type {
                Some(ty) => ty.clone(),
                None if template.sealed => Type::of_value(&cell.get(), shapes),
                None => Type::Unknown,
            })
            .collect()
    }

    /// Generic call outside any call site: specialize for the argument
    /// types at hand and run.
    pub fn invoke_in(&self, engine: &Arc<Engine>, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        let arg_types = args
            .iter()
            .map(|arg| Type::of_value(arg, engine.shapes()))
            .collect();
        let upvalue_types = self.identity_upvalue_types(engine.shapes());
        let specialization = self
            .proto
            .specialize(engine, arg_types, upvalue_types, false)?;
        specialization.invoke(engine, &self.upvalues, &args)
    }
}

impl Callable for Closure {
    fn name(&self) -> &str {
        self.proto.name()
    }

    fn call(&self, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        let engine = self.engine.upgrade().ok_or_else(|| {
            RuntimeError::internal(format!("engine of {} has been dropped", self.proto.name()))
        })?;
        self.invoke_in(&engine, args)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("prototype", &self.proto.name())
            .field("prototype_id", &self.proto.id())
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

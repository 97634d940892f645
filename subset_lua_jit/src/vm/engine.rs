//! The execution engine.
//!
//! An `Engine` is the context every routine runs in: configuration, the
//! shape registry, globals, statistics and the loader. It is shared as an
//! `Arc<Engine>` and passed explicitly to compilation, frames and call
//! sites; closures keep a weak reference back to it for generic calls.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use subset_lua_jit_runtime::{RuntimeError, RuntimeResult, Value};

use super::{Closure, EngineStats, HostFunction, UpvalueCell};
use crate::compile::shape::ShapeRegistry;
use crate::config::EngineConfig;
use crate::ir::core::FunctionPrototype;
use crate::loader::Loader;

pub struct Engine {
    config: EngineConfig,
    shapes: ShapeRegistry,
    globals: RwLock<FxHashMap<Arc<str>, Value>>,
    stats: EngineStats,
    loader: Loader,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        log::debug!(
            "engine: relink_limit={} type_change_limit={} max_inference_iterations={}",
            config.relink_limit,
            config.type_change_limit,
            config.max_inference_iterations
        );
        Arc::new(Self {
            config,
            shapes: ShapeRegistry::new(),
            globals: RwLock::new(FxHashMap::default()),
            stats: EngineStats::default(),
            loader: Loader::new(),
        })
    }

    pub fn with_default_config() -> Arc<Self> {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// New closure of a top-level prototype. Every upvalue starts as nil.
    pub fn instantiate(self: &Arc<Self>, proto: &Arc<FunctionPrototype>) -> Value {
        let cells: Vec<Arc<UpvalueCell>> = proto
            .upvalues()
            .iter()
            .map(|_| Arc::new(UpvalueCell::new(Value::Nil)))
            .collect();
        self.instantiate_with(proto, cells)
    }

    /// New closure of `proto` over the given cells.
    pub fn instantiate_with(
        self: &Arc<Self>,
        proto: &Arc<FunctionPrototype>,
        cells: Vec<Arc<UpvalueCell>>,
    ) -> Value {
        Value::function(Closure::new(
            Arc::clone(proto),
            cells.into(),
            Arc::downgrade(self),
        ))
    }

    /// Call any function value from outside generated code.
    pub fn call(self: &Arc<Self>, callee: &Value, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        match callee {
            Value::Function(func) => match func.as_any().downcast_ref::<Closure>() {
                Some(closure) => closure.invoke_in(self, args),
                None => func.call(args),
            },
            other => Err(RuntimeError::link_failure(other.type_name())),
        }
    }

    pub fn set_global(&self, name: impl Into<Arc<str>>, value: Value) {
        let name = name.into();
        let mut globals = self.globals.write();
        if value.is_nil() {
            globals.remove(&name);
        } else {
            globals.insert(name, value);
        }
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.read().get(name).cloned().unwrap_or_default()
    }

    /// Bind a host function to a global of the same name.
    pub fn register_host(&self, function: HostFunction) -> Value {
        let name: Arc<str> = Arc::from(function.name());
        let value = Value::function(function);
        self.set_global(name, value.clone());
        value
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("shapes", &self.shapes.len())
            .field("globals", &self.globals.read().len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

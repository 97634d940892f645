// Prevent accidental debug output in library code.
// Diagnostics go through the `log` facade.
#![deny(clippy::print_stderr)]

//! SubsetLuaJIT: adaptive specialization core.
//!
//! Every function prototype is compiled lazily, once per concrete type
//! signature, into a tree of type-specialized closures. Call sites bind
//! the specialization matching the types they observe behind a guard and
//! relink when the guard or an argument cast fails.
//!
//! # Module structure
//!
//! - `ir`: function prototypes and the expression/statement nodes
//! - `compile`: type lattice, table shapes, inference, specialization cache
//!   and the closure specializer
//! - `loader`: code units and loaded routines
//! - `vm`: the engine, closures, host functions and call-site linking

pub mod compile;
pub mod config;
pub mod error;
pub mod ir;
pub mod loader;
pub mod vm;

pub use compile::cache::{SignatureKey, SpecializationCache};
pub use compile::lattice::{TableShape, Type};
pub use compile::shape::{Layout, ShapeDescriptor, ShapeRegistry};
pub use compile::specialize::{Specialization, SpecializedInstance};
pub use config::{ConfigError, EngineConfig};
pub use error::{CResult, CompileError};
pub use ir::core::{
    Capture, Expr, FunctionPrototype, Literal, LogicalOp, PrototypeBuilder, Stmt, TableEntry,
    TableLiteral, UpvalueTemplate,
};
pub use loader::Loader;
pub use vm::link::{CallSite, GuardKind, LinkOutcome, SiteSnapshot, Trampoline, TypeSource};
pub use vm::{Closure, Engine, EngineStats, HostFunction, ParamPattern, StatsSnapshot, UpvalueCell};

pub use subset_lua_jit_runtime::{
    BinOp, Callable, FunctionRef, RuntimeError, RuntimeResult, Table, TableKey, UnOp, Value,
};

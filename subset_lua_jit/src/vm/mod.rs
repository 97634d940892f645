//! Execution layer.
//!
//! - `engine`: the shared execution context (config, globals, shapes, stats)
//! - `closure`: closures over a prototype and their upvalue cells
//! - `host`: host functions with typed overloads
//! - `frame`: per-activation local storage for generated code
//! - `link`: call sites and the relinking state machine
//! - `stats`: engine-wide counters

mod closure;
mod engine;
pub mod frame;
mod host;
pub mod link;
mod stats;

pub use closure::{Closure, UpvalueCell};
pub use engine::Engine;
pub use host::{HostFunction, ParamPattern};
pub use stats::{EngineStats, StatsSnapshot};

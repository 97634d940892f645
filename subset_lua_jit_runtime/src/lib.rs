//! SubsetLuaJIT Runtime Library
//!
//! This crate provides the value model shared by the specializing compiler
//! and the routines it generates. It includes:
//!
//! - `Value` enum for dynamic typing
//! - `Table` with shape-driven slot layouts and a lazy fallback map
//! - `Callable` trait implemented by every invocable function value
//! - `RuntimeError` for error handling
//! - Dynamic (untyped) operators used when types are not known statically
//! - Value conversion utilities

pub mod convert;
pub mod dispatch;
pub mod error;
pub mod table;
pub mod value;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use subset_lua_jit_runtime::prelude::*;
/// ```
pub mod prelude {
    pub use super::dispatch::{dynamic_binop, dynamic_unop, BinOp, UnOp};
    pub use super::error::{RuntimeError, RuntimeResult};
    pub use super::table::{Table, TableKey, TableLayout, TableRef};
    pub use super::value::{Callable, FunctionRef, Value};
}

pub use prelude::*;

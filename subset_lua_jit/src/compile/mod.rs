//! Compilation pipeline: from a prototype and a concrete signature to a
//! loaded, invocable specialization.
//!
//! - `lattice`: the flat type lattice
//! - `shape`: table shapes and their compiled layouts
//! - `inference`: per-compilation type inference context
//! - `specialize`: closure specializer (typed code generation)
//! - `cache`: per-prototype specialization cache

pub mod cache;
pub mod inference;
pub mod lattice;
pub mod shape;
pub mod specialize;

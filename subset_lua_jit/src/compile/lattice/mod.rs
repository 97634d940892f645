//! Flat type lattice for specialization.
//!
//! ```text
//!                    Unknown (top)
//!   /     |      |      |      |       \        \
//! Nil  Boolean Integer Float String Table(..) Function(..)
//! ```
//!
//! There is no bottom and no unions: joining two different types gives
//! `Unknown`.
//!
//! # Module structure
//!
//! - `types`: the `Type` and `TableShape` definitions
//! - `ops`: join, value typing and value checks

pub mod ops;
pub mod types;

pub use types::{TableShape, Type};

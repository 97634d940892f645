//! Intermediate representation handed to the specializer.
//!
//! The IR is produced by an external front end; this module only defines
//! the node set and the prototype that owns a function body.

pub mod core;

//! Per-prototype specialization cache.
//!
//! Maps a signature (argument types, upvalue types, return truncation) to
//! the one `Specialization` compiled for it. Entries are never evicted or
//! invalidated.
//!
//! Compute-if-absent is atomic per key: the map lock is held only long
//! enough to fetch or insert the key's once-cell, and compilation runs
//! inside that cell. Concurrent requests for the same unseen key wait on
//! the cell and observe the same `Arc`; requests for other keys never wait
//! on an in-flight compilation. A failed compilation leaves the cell empty
//! so a later request retries.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::lattice::types::format_types;
use super::lattice::Type;
use super::specialize::{FunctionSpecializer, Specialization};
use crate::error::CResult;
use crate::ir::core::FunctionPrototype;
use crate::vm::Engine;

/// Cache key: everything a specialization's code depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureKey {
    pub arg_types: Vec<Type>,
    pub upvalue_types: Vec<Type>,
    /// Callers use only the first returned value.
    pub truncate_return: bool,
}

impl SignatureKey {
    pub fn new(arg_types: Vec<Type>, upvalue_types: Vec<Type>, truncate_return: bool) -> Self {
        Self {
            arg_types: arg_types.iter().map(Type::canonical).collect(),
            upvalue_types: upvalue_types.iter().map(Type::canonical).collect(),
            truncate_return,
        }
    }

    /// Key for calling `proto`: argument types are padded with `Nil` or
    /// cut to the prototype's parameter count, since surplus arguments are
    /// dropped and missing ones read as nil.
    pub fn for_prototype(
        proto: &FunctionPrototype,
        mut arg_types: Vec<Type>,
        upvalue_types: Vec<Type>,
        truncate_return: bool,
    ) -> Self {
        arg_types.resize(proto.param_count(), Type::Nil);
        Self::new(arg_types, upvalue_types, truncate_return)
    }
}

impl fmt::Display for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_types(&self.arg_types))?;
        if !self.upvalue_types.is_empty() {
            write!(f, " upvalues {}", format_types(&self.upvalue_types))?;
        }
        if self.truncate_return {
            write!(f, " -> 1")?;
        }
        Ok(())
    }
}

type Slot = Arc<OnceCell<Arc<Specialization>>>;

#[derive(Default)]
pub struct SpecializationCache {
    entries: Mutex<FxHashMap<SignatureKey, Slot>>,
    compilations: AtomicUsize,
}

impl SpecializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The specialization for `key`, compiled on first request.
    pub fn get(
        &self,
        engine: &Arc<Engine>,
        proto: &Arc<FunctionPrototype>,
        key: SignatureKey,
    ) -> CResult<Arc<Specialization>> {
        let slot = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        let specialization = slot.get_or_try_init(|| {
            self.compilations.fetch_add(1, Ordering::Relaxed);
            engine.stats().record_compilation();
            log::debug!("specializing {} for {}", proto.name(), key);
            FunctionSpecializer::specialize(engine, proto, &key).map(Arc::new)
        })?;
        Ok(Arc::clone(specialization))
    }

    /// Already-compiled specialization for `key`, without compiling.
    pub fn lookup(&self, key: &SignatureKey) -> Option<Arc<Specialization>> {
        let entries = self.entries.lock();
        entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of compiled specializations.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signatures(&self) -> Vec<SignatureKey> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn specializations(&self) -> Vec<Arc<Specialization>> {
        self.entries
            .lock()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    /// Number of compilations started (including failed ones).
    pub fn compile_count(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SpecializationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecializationCache")
            .field("specializations", &self.len())
            .field("compilations", &self.compile_count())
            .finish()
    }
}

//! Code-unit loader.
//!
//! The specializer produces a `CodeUnit`: the emitted closure tree for one
//! signature plus its constant pool. Loading turns it into a
//! `LoadedRoutine` with a single entry point; the constant data is handed
//! back separately and delivered with `populate_constants`, exactly once,
//! before the routine is first entered.
//!
//! The entry point runs a prologue that casts every argument and upvalue
//! to the specialized types. A failed cast leaves through
//! `GuardedExit::Deoptimize`; anything raised by the body leaves wrapped as
//! a callee fault, so call sites can tell the two apart.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use subset_lua_jit_runtime::{RuntimeError, Value};

use crate::compile::cache::SignatureKey;
use crate::compile::lattice::Type;
use crate::compile::specialize::{run_block, Block, Flow};
use crate::error::{CResult, CompileError};
use crate::vm::frame::{Frame, LocalSlot};
use crate::vm::link::{CalleeFault, GuardedExit};
use crate::vm::{Engine, UpvalueCell};

/// Generated code for one (prototype, signature) pair, not yet loaded.
pub(crate) struct CodeUnit {
    pub(crate) name: String,
    pub(crate) param_types: Vec<Type>,
    pub(crate) upvalue_types: Vec<Type>,
    /// Per local slot: stored in a shared cell.
    pub(crate) captured: Vec<bool>,
    pub(crate) param_count: usize,
    pub(crate) body: Block,
    pub(crate) constants: Vec<Value>,
    pub(crate) truncate_return: bool,
}

impl CodeUnit {
    /// Stable routine name: `lua_<prototype>_<digest>`, where the digest is
    /// the first 16 hex digits of SHA-256 over the prototype name and the
    /// rendered signature.
    pub(crate) fn digest_name(proto_name: &str, key: &SignatureKey) -> String {
        let hash = compute_signature_hash(proto_name, &key.to_string());
        format!("lua_{}_{}", sanitize_name(proto_name), &hash[..16])
    }
}

/// Constant pool split off a code unit at load time.
#[derive(Debug)]
pub(crate) struct ConstantData {
    values: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct Loader {
    loaded: AtomicUsize,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn load(&self, unit: CodeUnit) -> (LoadedRoutine, ConstantData) {
        self.loaded.fetch_add(1, Ordering::Relaxed);
        let CodeUnit {
            name,
            param_types,
            upvalue_types,
            captured,
            param_count,
            body,
            constants,
            truncate_return,
        } = unit;
        let routine = LoadedRoutine {
            name,
            param_types,
            upvalue_types,
            captured,
            param_count,
            body,
            truncate_return,
            constants: OnceCell::new(),
        };
        (routine, ConstantData { values: constants })
    }

    pub(crate) fn populate_constants(
        &self,
        routine: &LoadedRoutine,
        data: ConstantData,
    ) -> CResult<()> {
        routine
            .constants
            .set(data.values.into_boxed_slice())
            .map_err(|_| CompileError::ConstantsPopulated(routine.name.clone()))
    }

    /// Number of code units loaded so far.
    pub fn loaded_count(&self) -> usize {
        self.loaded.load(Ordering::Relaxed)
    }
}

pub(crate) struct LoadedRoutine {
    name: String,
    param_types: Vec<Type>,
    upvalue_types: Vec<Type>,
    captured: Vec<bool>,
    param_count: usize,
    body: Block,
    truncate_return: bool,
    constants: OnceCell<Box<[Value]>>,
}

impl LoadedRoutine {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Entry point. Missing arguments are nil, surplus ones are dropped.
    pub(crate) fn enter(
        &self,
        engine: &Arc<Engine>,
        upvalues: &[Arc<UpvalueCell>],
        args: &[Value],
    ) -> Result<Vec<Value>, GuardedExit> {
        let Some(constants) = self.constants.get() else {
            return Err(GuardedExit::Fault(CalleeFault::new(RuntimeError::internal(
                format!("{} entered before its constants were populated", self.name),
            ))));
        };

        // Prologue: argument and upvalue casts.
        for (i, ty) in self.param_types.iter().enumerate().take(self.param_count) {
            let arg = args.get(i).unwrap_or(&Value::Nil);
            ty.check(arg).map_err(GuardedExit::Deoptimize)?;
        }
        if upvalues.len() != self.upvalue_types.len() {
            return Err(GuardedExit::Deoptimize(RuntimeError::type_error(format!(
                "{} expects {} upvalues, got {}",
                self.name,
                self.upvalue_types.len(),
                upvalues.len()
            ))));
        }
        for (cell, ty) in upvalues.iter().zip(&self.upvalue_types) {
            ty.check(&cell.get()).map_err(GuardedExit::Deoptimize)?;
        }

        let slots = self
            .captured
            .iter()
            .enumerate()
            .map(|(i, captured)| {
                let value = if i < self.param_count {
                    args.get(i).cloned().unwrap_or_default()
                } else {
                    Value::Nil
                };
                if *captured {
                    LocalSlot::Boxed(Arc::new(UpvalueCell::new(value)))
                } else {
                    LocalSlot::Plain(value)
                }
            })
            .collect();
        let mut frame = Frame::new(engine, slots, upvalues, constants);

        let mut results = match run_block(&self.body, &mut frame) {
            Ok(Flow::Return(values)) => values,
            Ok(Flow::Normal | Flow::Break) => Vec::new(),
            Err(err) => return Err(GuardedExit::Fault(CalleeFault::new(err))),
        };
        if self.truncate_return {
            results.truncate(1);
            if results.is_empty() {
                results.push(Value::Nil);
            }
        }
        Ok(results)
    }
}

impl fmt::Debug for LoadedRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedRoutine")
            .field("name", &self.name)
            .field("param_types", &self.param_types)
            .field("upvalue_types", &self.upvalue_types)
            .field("statements", &self.body.len())
            .field("constants", &self.constants.get().map(|c| c.len()))
            .finish()
    }
}

fn compute_signature_hash(proto_name: &str, signature: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(proto_name.as_bytes());
    hasher.update(b"\n--\n");
    hasher.update(signature.as_bytes());
    let digest = hasher.finalize();
    format!("{:x}", digest)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_unit(name: &str) -> CodeUnit {
        CodeUnit {
            name: name.to_string(),
            param_types: vec![Type::Float],
            upvalue_types: Vec::new(),
            captured: vec![false],
            param_count: 1,
            body: Vec::new().into_boxed_slice(),
            constants: vec![Value::from("k")],
            truncate_return: true,
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("point.new"), "point_new");
    }

    #[test]
    fn test_digest_name_is_stable_per_signature() {
        let a = SignatureKey::new(vec![Type::Float], vec![], false);
        let b = SignatureKey::new(vec![Type::String], vec![], false);
        let name = CodeUnit::digest_name("add", &a);
        assert!(name.starts_with("lua_add_"));
        assert_eq!(name.len(), "lua_add_".len() + 16);
        assert_eq!(name, CodeUnit::digest_name("add", &a));
        assert_ne!(name, CodeUnit::digest_name("add", &b));
    }

    #[test]
    fn test_constants_populate_once() {
        let loader = Loader::new();
        let (routine, data) = loader.load(empty_unit("once"));
        loader.populate_constants(&routine, data).unwrap();
        let again = ConstantData { values: Vec::new() };
        assert_eq!(
            loader.populate_constants(&routine, again),
            Err(CompileError::ConstantsPopulated("once".to_string()))
        );
        assert_eq!(loader.loaded_count(), 1);
    }

    #[test]
    fn test_prologue_cast_failure_deoptimizes() {
        let engine = Engine::with_default_config();
        let loader = Loader::new();
        let (routine, data) = loader.load(empty_unit("cast"));
        loader.populate_constants(&routine, data).unwrap();

        let exit = routine.enter(&engine, &[], &[Value::from("s")]).unwrap_err();
        assert!(matches!(exit, GuardedExit::Deoptimize(_)));

        let results = routine.enter(&engine, &[], &[Value::Float(1.0)]).unwrap();
        assert_eq!(results, vec![Value::Nil]);
    }
}

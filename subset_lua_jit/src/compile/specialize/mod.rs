//! Closure specializer.
//!
//! Lowers a prototype body, under one concrete signature, into a tree of
//! pre-resolved Rust closures. Every expression is emitted together with
//! its static type; expressions whose type is a primitive number or boolean
//! are emitted as closures returning the unboxed value, so arithmetic and
//! comparisons between them skip dynamic dispatch entirely.
//!
//! Each call expression gets its own `CallSite`, and table literals and
//! constant-key indexing use the compiled layout of the literal's shape.
//!
//! Submodules:
//! - `expr`: expression emission
//! - `stmt`: statement and block emission
//! - `helpers`: representation conversions and shared run-time helpers

mod expr;
mod helpers;
mod stmt;

use std::fmt;
use std::sync::Arc;

use subset_lua_jit_runtime::{RuntimeError, RuntimeResult, Value};

use super::cache::SignatureKey;
use super::inference::InferenceContext;
use super::lattice::Type;
use crate::error::CResult;
use crate::ir::core::FunctionPrototype;
use crate::loader::{CodeUnit, LoadedRoutine};
use crate::vm::frame::Frame;
use crate::vm::link::{CallSite, GuardedExit};
use crate::vm::{Engine, UpvalueCell};

pub(crate) use stmt::run_block;

pub(crate) type ValueFn = Box<dyn Fn(&mut Frame<'_>) -> RuntimeResult<Value> + Send + Sync>;
pub(crate) type IntFn = Box<dyn Fn(&mut Frame<'_>) -> RuntimeResult<i64> + Send + Sync>;
pub(crate) type FloatFn = Box<dyn Fn(&mut Frame<'_>) -> RuntimeResult<f64> + Send + Sync>;
pub(crate) type BoolFn = Box<dyn Fn(&mut Frame<'_>) -> RuntimeResult<bool> + Send + Sync>;
pub(crate) type MultiFn = Box<dyn Fn(&mut Frame<'_>) -> RuntimeResult<Vec<Value>> + Send + Sync>;
pub(crate) type StmtFn = Box<dyn Fn(&mut Frame<'_>) -> RuntimeResult<Flow> + Send + Sync>;
pub(crate) type Block = Box<[StmtFn]>;

/// Control-flow outcome of a statement.
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Break,
    Return(Vec<Value>),
}

/// Emitted code for one expression, in its most specific representation.
pub(crate) enum Emitted {
    Int(IntFn),
    Float(FloatFn),
    Bool(BoolFn),
    Value(ValueFn),
}

pub(crate) struct Typed {
    pub(crate) code: Emitted,
    pub(crate) ty: Type,
}

impl Typed {
    fn new(code: Emitted, ty: Type) -> Self {
        Self { code, ty }
    }
}

pub(crate) struct FunctionSpecializer<'a> {
    engine: &'a Arc<Engine>,
    proto: &'a FunctionPrototype,
    ctx: InferenceContext<'a>,
    constants: Vec<Value>,
    call_sites: Vec<Arc<CallSite>>,
    loop_depth: usize,
}

impl<'a> FunctionSpecializer<'a> {
    /// Infer, emit, load. Called by the cache exactly once per signature.
    pub(crate) fn specialize(
        engine: &'a Arc<Engine>,
        proto: &'a Arc<FunctionPrototype>,
        key: &SignatureKey,
    ) -> CResult<Specialization> {
        let mut ctx = InferenceContext::new(
            proto,
            key.arg_types.clone(),
            key.upvalue_types.clone(),
            engine.config().max_inference_iterations,
        );
        ctx.analyze(proto.body());

        let mut specializer = FunctionSpecializer {
            engine,
            proto: &**proto,
            ctx,
            constants: Vec::new(),
            call_sites: Vec::new(),
            loop_depth: 0,
        };
        let body = specializer.compile_block(proto.body())?;

        let mut return_types = specializer.ctx.return_types().to_vec();
        if key.truncate_return {
            return_types.truncate(1);
            if return_types.is_empty() {
                return_types.push(Type::Nil);
            }
        }

        let unit = CodeUnit {
            name: CodeUnit::digest_name(proto.name(), key),
            param_types: key.arg_types.clone(),
            upvalue_types: key.upvalue_types.clone(),
            captured: proto.locals().iter().map(|l| l.captured).collect(),
            param_count: proto.param_count(),
            body,
            constants: std::mem::take(&mut specializer.constants),
            truncate_return: key.truncate_return,
        };
        let loader = engine.loader();
        let (routine, constants) = loader.load(unit);
        loader.populate_constants(&routine, constants)?;

        log::debug!(
            "loaded {} ({} call sites, returns {})",
            routine.name(),
            specializer.call_sites.len(),
            super::lattice::types::format_types(&return_types)
        );

        Ok(Specialization {
            prototype_id: proto.id(),
            prototype_name: Arc::from(proto.name()),
            signature: key.clone(),
            return_types,
            routine,
            call_sites: specializer.call_sites,
        })
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn new_call_site(&mut self, static_arg_types: Vec<Type>, truncate: bool) -> Arc<CallSite> {
        let site = Arc::new(CallSite::new(static_arg_types, truncate));
        self.call_sites.push(Arc::clone(&site));
        site
    }

    fn max_iterations(&self) -> usize {
        self.ctx.max_iterations()
    }
}

/// One compiled, loaded routine for one (prototype, signature) pair.
pub struct Specialization {
    prototype_id: u64,
    prototype_name: Arc<str>,
    signature: SignatureKey,
    return_types: Vec<Type>,
    routine: LoadedRoutine,
    call_sites: Vec<Arc<CallSite>>,
}

impl Specialization {
    pub fn prototype_id(&self) -> u64 {
        self.prototype_id
    }

    pub fn prototype_name(&self) -> &str {
        &self.prototype_name
    }

    pub fn signature(&self) -> &SignatureKey {
        &self.signature
    }

    pub fn return_types(&self) -> &[Type] {
        &self.return_types
    }

    /// Code-unit name of the loaded routine.
    pub fn name(&self) -> &str {
        self.routine.name()
    }

    /// Call sites owned by this routine's code, in emission order.
    pub fn call_sites(&self) -> &[Arc<CallSite>] {
        &self.call_sites
    }

    /// Invoke entry point. A failed argument cast surfaces as the
    /// `TypeError` it is.
    pub fn invoke(
        &self,
        engine: &Arc<Engine>,
        upvalues: &[Arc<UpvalueCell>],
        args: &[Value],
    ) -> RuntimeResult<Vec<Value>> {
        self.routine
            .enter(engine, upvalues, args)
            .map_err(GuardedExit::into_error)
    }

    /// Invoke entry point with tagged exits, for call sites.
    pub(crate) fn run_guarded(
        &self,
        engine: &Arc<Engine>,
        upvalues: &[Arc<UpvalueCell>],
        args: &[Value],
    ) -> Result<Vec<Value>, GuardedExit> {
        self.routine.enter(engine, upvalues, args)
    }

    /// Construct entry point: bind the routine to one closure's upvalue
    /// cells.
    pub fn construct(
        self: &Arc<Self>,
        upvalues: Arc<[Arc<UpvalueCell>]>,
    ) -> RuntimeResult<SpecializedInstance> {
        if upvalues.len() != self.signature.upvalue_types.len() {
            return Err(RuntimeError::internal(format!(
                "{} expects {} upvalues, got {}",
                self.name(),
                self.signature.upvalue_types.len(),
                upvalues.len()
            )));
        }
        Ok(SpecializedInstance {
            specialization: Arc::clone(self),
            upvalues,
        })
    }
}

impl fmt::Debug for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specialization")
            .field("name", &self.routine.name())
            .field("prototype", &self.prototype_name)
            .field("signature", &self.signature)
            .field("return_types", &self.return_types)
            .field("call_sites", &self.call_sites.len())
            .finish()
    }
}

/// A specialization bound to the upvalues of one closure.
#[derive(Debug, Clone)]
pub struct SpecializedInstance {
    specialization: Arc<Specialization>,
    upvalues: Arc<[Arc<UpvalueCell>]>,
}

impl SpecializedInstance {
    pub fn specialization(&self) -> &Arc<Specialization> {
        &self.specialization
    }

    pub fn invoke(&self, engine: &Arc<Engine>, args: &[Value]) -> RuntimeResult<Vec<Value>> {
        self.specialization.invoke(engine, &self.upvalues, args)
    }

    pub(crate) fn run_guarded(
        &self,
        engine: &Arc<Engine>,
        args: &[Value],
    ) -> Result<Vec<Value>, GuardedExit> {
        self.specialization
            .run_guarded(engine, &self.upvalues, args)
    }
}

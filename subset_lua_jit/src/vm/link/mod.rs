//! Call sites and relinking.
//!
//! Every call expression in generated code owns a `CallSite`. A linked
//! site holds an immutable `Trampoline` (bound target plus guard) in a
//! swappable slot. A call whose callee passes the guard runs the bound
//! target directly; a guard failure, or an argument cast rejected by the
//! target's prologue, enters the linker, which picks a new target under
//! the site's policy, publishes a fresh trampoline and runs it.
//!
//! The site's state lock is held only while linking. Targets always run
//! after it is released, so recursive calls through the same site never
//! wait on it. Two threads may relink one site at the same time; the
//! later publication wins and both trampolines are valid.

mod deopt;
mod guard;
mod policy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use subset_lua_jit_runtime::{Callable, FunctionRef, RuntimeError, RuntimeResult, Value};

use crate::compile::lattice::types::format_types;
use crate::compile::lattice::Type;
use crate::compile::specialize::{Specialization, SpecializedInstance};
use crate::vm::{Closure, Engine, HostFunction};

pub(crate) use deopt::{CalleeFault, GuardedExit};
pub use guard::GuardKind;
pub(crate) use guard::Guard;
pub use policy::TypeSource;
use policy::{CallSiteState, LinkPlan};

static NEXT_SITE_ID: AtomicU64 = AtomicU64::new(1);

/// What a trampoline runs.
#[derive(Debug)]
pub(crate) enum BoundTarget {
    /// Specialization bound to one closure's upvalues
    Instance(SpecializedInstance),
    /// Specialization for every closure of a prototype; upvalues are taken
    /// from the callee
    Prototype(Arc<Specialization>),
    /// One overload of a host function, pattern-checked per call
    Host { function: FunctionRef, overload: usize },
    /// Any other callable, called generically
    Dynamic(FunctionRef),
}

impl BoundTarget {
    fn execute(
        &self,
        engine: &Arc<Engine>,
        callee: &Value,
        args: &[Value],
    ) -> Result<Vec<Value>, GuardedExit> {
        match self {
            BoundTarget::Instance(instance) => instance.run_guarded(engine, args),
            BoundTarget::Prototype(specialization) => {
                match callee_closure(callee) {
                    Some(closure) => specialization.run_guarded(engine, closure.upvalues(), args),
                    None => Err(GuardedExit::Deoptimize(RuntimeError::type_error(
                        "prototype-bound target called with a non-closure",
                    ))),
                }
            }
            BoundTarget::Host { function, overload } => {
                let Some(host) = function.as_any().downcast_ref::<HostFunction>() else {
                    return Err(GuardedExit::Fault(CalleeFault::new(RuntimeError::internal(
                        "host-bound target is not a host function",
                    ))));
                };
                if !host.matches(*overload, args) {
                    return Err(GuardedExit::Deoptimize(RuntimeError::type_error(format!(
                        "arguments do not match overload {} of {}",
                        overload,
                        host.name()
                    ))));
                }
                host.invoke_overload(*overload, args)
                    .map_err(|err| GuardedExit::Fault(CalleeFault::new(err)))
            }
            BoundTarget::Dynamic(function) => function
                .call(args.to_vec())
                .map_err(|err| GuardedExit::Fault(CalleeFault::new(err))),
        }
    }

    fn describe(&self) -> String {
        match self {
            BoundTarget::Instance(instance) => instance.specialization().name().to_string(),
            BoundTarget::Prototype(specialization) => specialization.name().to_string(),
            BoundTarget::Host { function, overload } => {
                format!("{}[{}]", function.name(), overload)
            }
            BoundTarget::Dynamic(function) => function.name().to_string(),
        }
    }
}

fn callee_closure(callee: &Value) -> Option<&Closure> {
    match callee {
        Value::Function(func) => func.as_any().downcast_ref::<Closure>(),
        _ => None,
    }
}

/// Immutable `{target, guard}` pair published by a link.
#[derive(Debug)]
pub struct Trampoline {
    target: BoundTarget,
    guard: Guard,
}

impl Trampoline {
    pub fn guard_kind(&self) -> GuardKind {
        self.guard.kind()
    }

    /// Name of the bound routine or function.
    pub fn target_name(&self) -> String {
        self.target.describe()
    }

    pub fn specialization(&self) -> Option<&Arc<Specialization>> {
        match &self.target {
            BoundTarget::Instance(instance) => Some(instance.specialization()),
            BoundTarget::Prototype(specialization) => Some(specialization),
            BoundTarget::Host { .. } | BoundTarget::Dynamic(_) => None,
        }
    }
}

/// Result of entering the linker.
#[derive(Debug)]
pub enum LinkOutcome {
    /// A trampoline was published in the site's slot.
    Linked(Arc<Trampoline>),
    /// A target for this call only; the site is left as it was.
    OneShot(OneShotTarget),
}

/// Target of a single unlinked call.
#[derive(Debug)]
pub struct OneShotTarget(BoundTarget);

/// Per-site statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteSnapshot {
    pub id: u64,
    pub relinks: u32,
    pub type_changes: u32,
    pub trusting: bool,
    pub guard: Option<GuardKind>,
    pub signature: Option<String>,
}

#[derive(Debug)]
pub struct CallSite {
    id: u64,
    static_arg_types: Vec<Type>,
    truncate: bool,
    slot: RwLock<Option<Arc<Trampoline>>>,
    state: Mutex<CallSiteState>,
}

impl CallSite {
    pub fn new(static_arg_types: Vec<Type>, truncate: bool) -> Self {
        Self {
            id: NEXT_SITE_ID.fetch_add(1, Ordering::Relaxed),
            static_arg_types,
            truncate,
            slot: RwLock::new(None),
            state: Mutex::new(CallSiteState::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn static_arg_types(&self) -> &[Type] {
        &self.static_arg_types
    }

    /// Currently published trampoline.
    pub fn trampoline(&self) -> Option<Arc<Trampoline>> {
        self.slot.read().clone()
    }

    /// Call `callee` through this site.
    pub fn invoke(
        &self,
        engine: &Arc<Engine>,
        callee: &Value,
        args: Vec<Value>,
    ) -> RuntimeResult<Vec<Value>> {
        if let Some(trampoline) = self.trampoline() {
            if trampoline.guard.holds(callee) {
                match trampoline.target.execute(engine, callee, &args) {
                    Ok(values) => return Ok(values),
                    Err(GuardedExit::Fault(fault)) => return Err(fault.into_inner()),
                    Err(GuardedExit::Deoptimize(reason)) => {
                        engine.stats().record_deoptimization();
                        log::trace!(
                            "site #{}: {} rejected its arguments ({}); relinking",
                            self.id,
                            trampoline.target.describe(),
                            reason
                        );
                    }
                }
            } else {
                engine.stats().record_guard_failure();
                log::trace!("site #{}: guard failed for {}", self.id, callee);
            }
        }

        let target = match self.link(engine, callee, &args)? {
            LinkOutcome::Linked(trampoline) => {
                return trampoline
                    .target
                    .execute(engine, callee, &args)
                    .map_err(GuardedExit::into_error)
            }
            LinkOutcome::OneShot(OneShotTarget(target)) => target,
        };
        target
            .execute(engine, callee, &args)
            .map_err(GuardedExit::into_error)
    }

    /// Enter the linker: pick a target for `callee` and `args` under the
    /// site's policy. Publishes the new trampoline unless the outcome is
    /// one-shot.
    pub fn link(
        &self,
        engine: &Arc<Engine>,
        callee: &Value,
        args: &[Value],
    ) -> RuntimeResult<LinkOutcome> {
        let func = match callee {
            Value::Function(func) => func,
            other => return Err(RuntimeError::link_failure(other.type_name())),
        };
        let runtime_types =
            || -> Vec<Type> { args.iter().map(|a| Type::of_value(a, engine.shapes())).collect() };

        let mut state = self.state.lock();
        let plan = policy::plan(&state, engine.config(), &self.static_arg_types, runtime_types);

        if let Some(closure) = func.as_any().downcast_ref::<Closure>() {
            let proto = closure.prototype();
            let (guard, upvalue_types) = if plan.identity {
                (
                    Guard::identity(func),
                    closure.identity_upvalue_types(engine.shapes()),
                )
            } else {
                (Guard::Prototype(proto.id()), proto.static_upvalue_types())
            };
            let specialization =
                proto.specialize(engine, plan.arg_types.clone(), upvalue_types, self.truncate)?;
            let target = if plan.identity {
                BoundTarget::Instance(specialization.construct(Arc::clone(closure.upvalues()))?)
            } else {
                BoundTarget::Prototype(specialization)
            };
            return Ok(self.publish(engine, &mut state, &plan, guard, target));
        }

        if let Some(host) = func.as_any().downcast_ref::<HostFunction>() {
            if let Some(overload) = host.select(&plan.arg_types) {
                let target = BoundTarget::Host {
                    function: Arc::clone(func),
                    overload,
                };
                return Ok(self.publish(engine, &mut state, &plan, Guard::identity(func), target));
            }
            return match host.select_values(args) {
                Some(overload) => {
                    engine.stats().record_one_shot();
                    log::trace!(
                        "site #{}: one-shot call of {}[{}] for {}",
                        self.id,
                        host.name(),
                        overload,
                        format_types(&plan.arg_types)
                    );
                    Ok(LinkOutcome::OneShot(OneShotTarget(BoundTarget::Host {
                        function: Arc::clone(func),
                        overload,
                    })))
                }
                None => Err(host.no_match(&runtime_types())),
            };
        }

        let target = BoundTarget::Dynamic(Arc::clone(func));
        Ok(self.publish(engine, &mut state, &plan, Guard::identity(func), target))
    }

    fn publish(
        &self,
        engine: &Engine,
        state: &mut CallSiteState,
        plan: &LinkPlan,
        guard: Guard,
        target: BoundTarget,
    ) -> LinkOutcome {
        policy::record_link(state, engine.config(), plan, guard.kind());
        engine.stats().record_relink();
        log::debug!(
            "site #{}: linked {} for {} ({:?} guard, {:?} types, relink {})",
            self.id,
            target.describe(),
            format_types(&plan.arg_types),
            guard.kind(),
            plan.source,
            state.relinks
        );
        let trampoline = Arc::new(Trampoline { target, guard });
        *self.slot.write() = Some(Arc::clone(&trampoline));
        LinkOutcome::Linked(trampoline)
    }

    pub fn snapshot(&self) -> SiteSnapshot {
        let state = self.state.lock();
        SiteSnapshot {
            id: self.id,
            relinks: state.relinks,
            type_changes: state.type_changes,
            trusting: state.trusting,
            guard: state.guard,
            signature: state.last_signature().map(format_types),
        }
    }

    pub fn relinks(&self) -> u32 {
        self.state.lock().relinks
    }
}

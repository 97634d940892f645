//! Relinking policy.
//!
//! Two counters per call site decide how a link is made. `relinks` counts
//! published links; once it reaches `relink_limit` the site stops binding
//! individual function values and guards on the prototype instead.
//! `type_changes` counts links whose type source or argument signature
//! differs from the previous link; once it reaches `type_change_limit` the
//! site stops trusting run-time argument types and links generically.
//! Neither decision is ever revisited.

use serde::Serialize;

use super::guard::GuardKind;
use crate::compile::lattice::Type;
use crate::config::EngineConfig;

/// Where the argument types of a link come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeSource {
    /// Compile-time types, all known
    Static,
    /// Types of the actual arguments
    Runtime,
    /// Compile-time types with unknowns left in
    Generic,
}

#[derive(Debug)]
pub(crate) struct CallSiteState {
    pub(crate) relinks: u32,
    pub(crate) type_changes: u32,
    pub(crate) trusting: bool,
    pub(crate) guard: Option<GuardKind>,
    last: Option<(TypeSource, Vec<Type>)>,
}

impl Default for CallSiteState {
    fn default() -> Self {
        Self {
            relinks: 0,
            type_changes: 0,
            trusting: true,
            guard: None,
            last: None,
        }
    }
}

impl CallSiteState {
    pub(crate) fn last_signature(&self) -> Option<&[Type]> {
        self.last.as_ref().map(|(_, types)| types.as_slice())
    }
}

#[derive(Debug)]
pub(crate) struct LinkPlan {
    pub(crate) identity: bool,
    pub(crate) source: TypeSource,
    pub(crate) arg_types: Vec<Type>,
}

pub(crate) fn plan(
    state: &CallSiteState,
    config: &EngineConfig,
    static_types: &[Type],
    runtime_types: impl FnOnce() -> Vec<Type>,
) -> LinkPlan {
    let identity = state.relinks < config.relink_limit;
    let (source, arg_types) = if static_types.iter().all(Type::is_known) {
        (TypeSource::Static, static_types.to_vec())
    } else if state.trusting {
        (TypeSource::Runtime, runtime_types())
    } else {
        (TypeSource::Generic, static_types.to_vec())
    };
    LinkPlan {
        identity,
        source,
        arg_types,
    }
}

/// Account for a published link.
pub(crate) fn record_link(
    state: &mut CallSiteState,
    config: &EngineConfig,
    plan: &LinkPlan,
    guard: GuardKind,
) {
    state.relinks = state.relinks.saturating_add(1);
    let changed = match &state.last {
        Some((source, types)) => *source != plan.source || *types != plan.arg_types,
        None => false,
    };
    if changed {
        state.type_changes = state.type_changes.saturating_add(1);
        if state.trusting && state.type_changes >= config.type_change_limit {
            state.trusting = false;
            log::debug!(
                "call site stops trusting run-time types after {} type changes",
                state.type_changes
            );
        }
    }
    if state.guard == Some(GuardKind::Identity) && guard == GuardKind::Prototype {
        log::debug!(
            "call site downgraded to prototype guard after {} relinks",
            state.relinks - 1
        );
    }
    state.guard = Some(guard);
    state.last = Some((plan.source, plan.arg_types.clone()));
}

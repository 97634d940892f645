//! Table shapes (hidden classes for table literals).
//!
//! A `ShapeDescriptor` collects the statically known string keys of a table
//! literal while the literal's function is analyzed. The first `compile()`
//! turns it into a `Layout` (one slot per key, in insertion order) and
//! freezes it: later amendments are ignored, so a compiled layout may miss
//! keys that analysis discovers afterwards.
//!
//! Two unfrozen descriptors assigned to the same variable are merged by
//! forwarding both to a fresh representative holding the union of their
//! keys. Every operation resolves the forwarding chain first.
//!
//! Compiled shapes are registered with the engine's `ShapeRegistry`, so a
//! run-time table can be mapped back to its shape through the shape id
//! stored in its layout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use subset_lua_jit_runtime::TableLayout;

use super::lattice::Type;

// 0 is reserved for layouts not compiled from a shape.
static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

pub struct ShapeDescriptor {
    id: u64,
    state: Mutex<ShapeState>,
}

#[derive(Default)]
struct ShapeState {
    keys: Vec<(Arc<str>, Type)>,
    needs_fallback: bool,
    layout: Option<Arc<Layout>>,
    forward: Option<Arc<ShapeDescriptor>>,
}

impl ShapeDescriptor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_state(ShapeState::default()))
    }

    fn with_state(state: ShapeState) -> Self {
        Self {
            id: NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current representative after merges (`self` if never merged).
    pub fn resolve(self: &Arc<Self>) -> Arc<Self> {
        let mut current = Arc::clone(self);
        loop {
            let next = current.state.lock().forward.clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Run `f` on the representative's state with its lock held.
    fn with_representative<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&Arc<Self>, &mut ShapeState) -> R,
    ) -> R {
        loop {
            let rep = self.resolve();
            let mut state = rep.state.lock();
            // A merge may have forwarded it between resolve and lock.
            if state.forward.is_none() {
                return f(&rep, &mut state);
            }
        }
    }

    /// Record a known key. The type is kept for inference only; references
    /// to other shapes and prototypes are dropped from it. No-op once
    /// compiled.
    pub fn amend(self: &Arc<Self>, key: &str, ty: Type) {
        let ty = ty.shallow();
        self.with_representative(|_, state| {
            if state.layout.is_some() {
                return;
            }
            match state.keys.iter_mut().find(|(k, _)| &**k == key) {
                Some((_, existing)) => *existing = existing.join(&ty),
                None => state.keys.push((Arc::from(key), ty)),
            }
        })
    }

    /// Instances will receive keys outside the layout. No-op once compiled.
    pub fn amend_unknown(self: &Arc<Self>) {
        self.with_representative(|_, state| {
            if state.layout.is_none() {
                state.needs_fallback = true;
            }
        })
    }

    pub fn is_frozen(self: &Arc<Self>) -> bool {
        self.with_representative(|_, state| state.layout.is_some())
    }

    pub fn keys(self: &Arc<Self>) -> Vec<Arc<str>> {
        self.with_representative(|_, state| state.keys.iter().map(|(k, _)| k.clone()).collect())
    }

    pub fn key_type(self: &Arc<Self>, key: &str) -> Option<Type> {
        self.with_representative(|_, state| {
            state
                .keys
                .iter()
                .find(|(k, _)| &**k == key)
                .map(|(_, ty)| ty.clone())
        })
    }

    pub fn needs_fallback_map(self: &Arc<Self>) -> bool {
        self.with_representative(|_, state| state.needs_fallback)
    }

    /// Compile (first call) or fetch (later calls) the layout. Every call
    /// on the same representative returns the same `Arc`.
    pub fn compile(self: &Arc<Self>) -> Arc<Layout> {
        self.with_representative(|rep, state| {
            if let Some(layout) = &state.layout {
                return Arc::clone(layout);
            }
            let keys: Vec<Arc<str>> = state.keys.iter().map(|(k, _)| k.clone()).collect();
            let slot_types = state.keys.iter().map(|(_, ty)| ty.clone()).collect();
            let runtime = Arc::new(TableLayout::new(rep.id, keys, state.needs_fallback));
            let layout = Arc::new(Layout {
                runtime,
                slot_types,
            });
            log::debug!(
                "compiled shape #{} with {} slots (fallback map: {})",
                rep.id,
                layout.runtime.slot_count(),
                state.needs_fallback
            );
            state.layout = Some(Arc::clone(&layout));
            layout
        })
    }

    /// Merge two shapes into a fresh representative. Returns `None` when
    /// either side is already frozen.
    pub fn merge(a: &Arc<Self>, b: &Arc<Self>) -> Option<Arc<Self>> {
        loop {
            let ra = a.resolve();
            let rb = b.resolve();
            if ra.id == rb.id {
                return Some(ra);
            }
            // Lock in id order.
            let (first, second) = if ra.id < rb.id { (&ra, &rb) } else { (&rb, &ra) };
            let mut g1: MutexGuard<'_, ShapeState> = first.state.lock();
            let mut g2: MutexGuard<'_, ShapeState> = second.state.lock();
            if g1.forward.is_some() || g2.forward.is_some() {
                continue;
            }
            if g1.layout.is_some() || g2.layout.is_some() {
                return None;
            }

            let mut keys = g1.keys.clone();
            for (key, ty) in &g2.keys {
                match keys.iter_mut().find(|(k, _)| k == key) {
                    Some((_, existing)) => *existing = existing.join(ty),
                    None => keys.push((key.clone(), ty.clone())),
                }
            }
            let merged = Arc::new(Self::with_state(ShapeState {
                keys,
                needs_fallback: g1.needs_fallback || g2.needs_fallback,
                layout: None,
                forward: None,
            }));
            g1.forward = Some(Arc::clone(&merged));
            g2.forward = Some(Arc::clone(&merged));
            log::trace!("merged shapes #{} and #{} into #{}", ra.id, rb.id, merged.id);
            return Some(merged);
        }
    }
}

impl fmt::Debug for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ShapeDescriptor")
            .field("id", &self.id)
            .field("keys", &state.keys)
            .field("needs_fallback", &state.needs_fallback)
            .field("frozen", &state.layout.is_some())
            .field("forward", &state.forward.as_ref().map(|s| s.id))
            .finish()
    }
}

/// Compiled layout of a shape.
#[derive(Debug)]
pub struct Layout {
    runtime: Arc<TableLayout>,
    slot_types: Vec<Type>,
}

impl Layout {
    pub fn shape_id(&self) -> u64 {
        self.runtime.shape_id()
    }

    /// Keys stored in slots, in slot order.
    pub fn included_keys(&self) -> &[Arc<str>] {
        self.runtime.keys()
    }

    pub fn needs_fallback_map(&self) -> bool {
        self.runtime.needs_fallback_map()
    }

    pub fn slot_of(&self, key: &str) -> Option<usize> {
        self.runtime.slot_of(key)
    }

    /// Inference-time value type per slot.
    pub fn slot_types(&self) -> &[Type] {
        &self.slot_types
    }

    /// Layout handed to table instances.
    pub fn runtime(&self) -> &Arc<TableLayout> {
        &self.runtime
    }
}

/// Maps compiled shape ids back to their descriptors.
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    shapes: RwLock<FxHashMap<u64, Weak<ShapeDescriptor>>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the shape's representative. Idempotent.
    pub fn register(&self, shape: &Arc<ShapeDescriptor>) {
        let rep = shape.resolve();
        if self.shapes.read().contains_key(&rep.id) {
            return;
        }
        let mut shapes = self.shapes.write();
        shapes.retain(|_, weak| weak.strong_count() > 0);
        shapes.insert(rep.id, Arc::downgrade(&rep));
    }

    pub fn lookup(&self, shape_id: u64) -> Option<Arc<ShapeDescriptor>> {
        self.shapes.read().get(&shape_id).and_then(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.shapes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

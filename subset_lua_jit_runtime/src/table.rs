//! Tables with compiled slot layouts
//!
//! A table created from a literal carries the layout compiled from that
//! literal's shape: every key in the layout lives in a fixed slot, and
//! any other key goes to a fallback map that is only allocated once the
//! first such key arrives. Generic keyed access always consults the layout
//! first, so a slot store and a keyed store of the same key are
//! indistinguishable to readers.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::Value;

/// Shape id used by layouts that were not compiled from a shape.
pub const DYNAMIC_SHAPE_ID: u64 = 0;

/// Concrete memory layout of a table: one slot per included key.
#[derive(Debug)]
pub struct TableLayout {
    shape_id: u64,
    keys: Vec<Arc<str>>,
    index: FxHashMap<Arc<str>, usize>,
    needs_fallback_map: bool,
}

impl TableLayout {
    pub fn new(shape_id: u64, keys: Vec<Arc<str>>, needs_fallback_map: bool) -> Self {
        let index = keys
            .iter()
            .enumerate()
            .map(|(slot, key)| (Arc::clone(key), slot))
            .collect();
        Self {
            shape_id,
            keys,
            index,
            needs_fallback_map,
        }
    }

    /// Layout with no slots; every key lives in the fallback map.
    pub fn dynamic() -> Arc<Self> {
        Arc::new(Self::new(DYNAMIC_SHAPE_ID, Vec::new(), true))
    }

    /// Id of the shape this layout was compiled from.
    pub fn shape_id(&self) -> u64 {
        self.shape_id
    }

    pub fn keys(&self) -> &[Arc<str>] {
        &self.keys
    }

    pub fn slot_count(&self) -> usize {
        self.keys.len()
    }

    /// Slot index for a string key, if the key is part of the layout.
    pub fn slot_of(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Whether the literal this layout came from stores keys outside the
    /// layout, so instances will create a fallback map.
    pub fn needs_fallback_map(&self) -> bool {
        self.needs_fallback_map
    }
}

/// Normalized table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Str(Arc<str>),
    Int(i64),
    /// Non-integral float, stored by bit pattern
    Float(u64),
    Bool(bool),
}

impl TableKey {
    /// Normalize a value into a key. Floats with an integral value become
    /// integer keys; `nil` and NaN are rejected.
    pub fn from_value(value: &Value) -> RuntimeResult<Self> {
        match value {
            Value::Str(s) => Ok(TableKey::Str(Arc::clone(s))),
            Value::Int(i) => Ok(TableKey::Int(*i)),
            Value::Float(f) => {
                if f.is_nan() {
                    Err(RuntimeError::invalid_key("table index is NaN"))
                } else if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
                    Ok(TableKey::Int(*f as i64))
                } else {
                    Ok(TableKey::Float(f.to_bits()))
                }
            }
            Value::Bool(b) => Ok(TableKey::Bool(*b)),
            Value::Nil => Err(RuntimeError::invalid_key("table index is nil")),
            other => Err(RuntimeError::invalid_key(format!(
                "unsupported table key of type {}",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Str(s) => Value::Str(Arc::clone(s)),
            TableKey::Int(i) => Value::Int(*i),
            TableKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            TableKey::Bool(b) => Value::Bool(*b),
        }
    }
}

impl From<&str> for TableKey {
    fn from(s: &str) -> Self {
        TableKey::Str(Arc::from(s))
    }
}

/// Shared handle to a table.
pub type TableRef = Arc<RwLock<Table>>;

/// Associative value with slot storage for layout keys.
#[derive(Debug)]
pub struct Table {
    layout: Arc<TableLayout>,
    slots: Vec<Value>,
    fallback: Option<FxHashMap<TableKey, Value>>,
}

impl Table {
    pub fn new(layout: Arc<TableLayout>) -> Self {
        let slots = vec![Value::Nil; layout.slot_count()];
        Self {
            layout,
            slots,
            fallback: None,
        }
    }

    /// Table without any slots.
    pub fn empty() -> Self {
        Self::new(TableLayout::dynamic())
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> TableRef {
        Arc::new(RwLock::new(self))
    }

    pub fn layout(&self) -> &Arc<TableLayout> {
        &self.layout
    }

    pub fn has_fallback_map(&self) -> bool {
        self.fallback.is_some()
    }

    /// Direct slot read. Out-of-range slots read as `nil`.
    #[inline]
    pub fn load_slot(&self, slot: usize) -> Value {
        self.slots.get(slot).cloned().unwrap_or_default()
    }

    /// Direct slot write.
    #[inline]
    pub fn store_slot(&mut self, slot: usize, value: Value) -> RuntimeResult<()> {
        match self.slots.get_mut(slot) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(RuntimeError::internal(format!(
                "slot {} out of range for layout with {} slots",
                slot,
                self.slots.len()
            ))),
        }
    }

    /// Generic keyed read.
    pub fn get(&self, key: &TableKey) -> Value {
        if let TableKey::Str(s) = key {
            if let Some(slot) = self.layout.slot_of(s) {
                return self.load_slot(slot);
            }
        }
        self.fallback
            .as_ref()
            .and_then(|map| map.get(key).cloned())
            .unwrap_or_default()
    }

    /// Convenience read by string key.
    pub fn get_str(&self, key: &str) -> Value {
        self.get(&TableKey::from(key))
    }

    /// Generic keyed write. Writing `nil` removes a fallback entry.
    pub fn set(&mut self, key: TableKey, value: Value) {
        if let TableKey::Str(s) = &key {
            if let Some(slot) = self.layout.slot_of(s) {
                self.slots[slot] = value;
                return;
            }
        }
        if value.is_nil() {
            if let Some(map) = self.fallback.as_mut() {
                map.remove(&key);
            }
            return;
        }
        self.fallback
            .get_or_insert_with(FxHashMap::default)
            .insert(key, value);
    }

    /// Border of the array part: largest `n` such that keys `1..=n` are
    /// all present.
    pub fn len(&self) -> i64 {
        let Some(map) = self.fallback.as_ref() else {
            return 0;
        };
        let mut n = 0i64;
        while map.contains_key(&TableKey::Int(n + 1)) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Value::is_nil)
            && self.fallback.as_ref().map_or(true, |map| map.is_empty())
    }
}

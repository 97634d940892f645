//! Activation frames.

use std::sync::Arc;

use subset_lua_jit_runtime::{RuntimeError, RuntimeResult, Value};

use super::{Engine, UpvalueCell};
use crate::ir::core::Capture;

/// Storage of one local. Locals captured by a nested function literal live
/// in a shared cell.
#[derive(Debug)]
pub(crate) enum LocalSlot {
    Plain(Value),
    Boxed(Arc<UpvalueCell>),
}

/// Locals, upvalues and constants of one running routine.
#[derive(Debug)]
pub struct Frame<'a> {
    pub(crate) engine: &'a Arc<Engine>,
    slots: Vec<LocalSlot>,
    upvalues: &'a [Arc<UpvalueCell>],
    constants: &'a [Value],
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        engine: &'a Arc<Engine>,
        slots: Vec<LocalSlot>,
        upvalues: &'a [Arc<UpvalueCell>],
        constants: &'a [Value],
    ) -> Self {
        Self {
            engine,
            slots,
            upvalues,
            constants,
        }
    }

    #[inline]
    pub(crate) fn read_local(&self, slot: usize) -> Value {
        match self.slots.get(slot) {
            Some(LocalSlot::Plain(value)) => value.clone(),
            Some(LocalSlot::Boxed(cell)) => cell.get(),
            None => Value::Nil,
        }
    }

    #[inline]
    pub(crate) fn write_local(&mut self, slot: usize, value: Value) {
        match self.slots.get_mut(slot) {
            Some(LocalSlot::Plain(current)) => *current = value,
            Some(LocalSlot::Boxed(cell)) => cell.set(value),
            None => {}
        }
    }

    /// Start a new variable in `slot`. A captured slot gets a fresh cell,
    /// so closures created earlier keep the old variable.
    pub(crate) fn declare_local(&mut self, slot: usize, value: Value) {
        match self.slots.get_mut(slot) {
            Some(LocalSlot::Plain(current)) => *current = value,
            Some(boxed @ LocalSlot::Boxed(_)) => {
                *boxed = LocalSlot::Boxed(Arc::new(UpvalueCell::new(value)))
            }
            None => {}
        }
    }

    /// Cell a function literal closes over.
    pub(crate) fn capture(&self, capture: Capture) -> RuntimeResult<Arc<UpvalueCell>> {
        match capture {
            Capture::Local(slot) => match self.slots.get(slot) {
                Some(LocalSlot::Boxed(cell)) => Ok(Arc::clone(cell)),
                _ => Err(RuntimeError::internal(format!(
                    "local slot {} is captured but not boxed",
                    slot
                ))),
            },
            Capture::Upvalue(index) => self.upvalue(index).map(Arc::clone),
        }
    }

    pub(crate) fn upvalue(&self, index: usize) -> RuntimeResult<&Arc<UpvalueCell>> {
        self.upvalues.get(index).ok_or_else(|| {
            RuntimeError::internal(format!(
                "upvalue {} out of range ({} bound)",
                index,
                self.upvalues.len()
            ))
        })
    }

    #[inline]
    pub(crate) fn constant(&self, index: usize) -> Value {
        self.constants.get(index).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_boxed_local_gets_fresh_cell() {
        let engine = Engine::with_default_config();
        let cell = Arc::new(UpvalueCell::new(Value::Int(1)));
        let mut frame = Frame::new(&engine, vec![LocalSlot::Boxed(Arc::clone(&cell))], &[], &[]);

        frame.write_local(0, Value::Int(2));
        assert_eq!(cell.get(), Value::Int(2));

        frame.declare_local(0, Value::Int(3));
        assert_eq!(cell.get(), Value::Int(2));
        assert_eq!(frame.read_local(0), Value::Int(3));
    }

    #[test]
    fn test_capture_plain_local_is_internal_error() {
        let engine = Engine::with_default_config();
        let frame = Frame::new(&engine, vec![LocalSlot::Plain(Value::Nil)], &[], &[]);
        assert!(frame.capture(Capture::Local(0)).is_err());
        assert!(frame.capture(Capture::Upvalue(0)).is_err());
    }
}

use crate::vm::value::{slot, Slot, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Per-instance cache of interned identifier values.
/// Append-only: a name handed out once keeps resolving to the same slot for
/// the lifetime of the instance.
#[derive(Default)]
pub struct IdentifierCache {
    entries: RefCell<Vec<Slot>>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot previously interned for `name`, matched by string equality
    pub fn find(&self, name: &str) -> Option<Slot> {
        self.entries
            .borrow()
            .iter()
            .find(|entry| entry.borrow().as_str() == Some(name))
            .cloned()
    }

    /// Store `value` and return its slot
    pub fn intern(&self, value: Value) -> Slot {
        let interned = slot(value);
        self.entries.borrow_mut().push(Rc::clone(&interned));
        interned
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

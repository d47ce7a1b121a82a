// Papyrus Property Storage
// Object-level variables shared by every instance attached to one object

use crate::bytecode::Script;
use crate::error::StorageError;
use crate::vm::value::{slot, Slot, Value};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Name of the variable holding the active state
pub const STATE_VARIABLE: &str = "::State";

/// Backing store for script variables
pub trait VariablesHolder {
    /// Storage for `name` as declared by `script`, `Ok(None)` when unknown
    fn variable(&self, name: &str, script: &Script) -> Result<Option<Slot>, StorageError>;
}

/// Default holder: variables are created on first access from the
/// declarations of the script asking for them
#[derive(Default)]
pub struct PropertyStorage {
    vars: RefCell<FxHashMap<String, Slot>>,
}

impl PropertyStorage {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Seed or overwrite a variable from the host side
    pub fn set(&self, name: &str, value: Value) {
        let key = name.to_ascii_lowercase();
        let mut vars = self.vars.borrow_mut();
        match vars.get(&key) {
            Some(existing) => *existing.borrow_mut() = value,
            None => {
                vars.insert(key, slot(value));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars
            .borrow()
            .get(&name.to_ascii_lowercase())
            .map(|s| s.borrow().clone())
    }

    pub fn len(&self) -> usize {
        self.vars.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.borrow().is_empty()
    }

    fn declared_value(name: &str, script: &Script) -> Option<Value> {
        if name.eq_ignore_ascii_case(STATE_VARIABLE) {
            let state = script
                .main_object()
                .map(|object| object.auto_state_name.as_str())
                .unwrap_or("");
            return Some(Value::string(state));
        }

        script
            .objects
            .iter()
            .flat_map(|object| object.variables.iter())
            .find(|var| var.name.eq_ignore_ascii_case(name))
            .map(|var| {
                let initial = Value::from(&var.initial);
                if initial.is_none() {
                    Value::zero_of(&var.type_name)
                } else {
                    initial.with_object_type(&var.type_name)
                }
            })
    }
}

impl VariablesHolder for PropertyStorage {
    fn variable(&self, name: &str, script: &Script) -> Result<Option<Slot>, StorageError> {
        let key = name.to_ascii_lowercase();
        if let Some(existing) = self.vars.borrow().get(&key) {
            return Ok(Some(Rc::clone(existing)));
        }

        let Some(value) = Self::declared_value(name, script) else {
            return Ok(None);
        };
        let created = slot(value);
        self.vars.borrow_mut().insert(key, Rc::clone(&created));
        Ok(Some(created))
    }
}

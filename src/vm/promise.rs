// Papyrus Pending Results
// One-shot future used when a call cannot produce its value synchronously.
// Single-threaded: callbacks run on whichever path resolves the promise.

use crate::vm::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

type Continuation = Box<dyn FnOnce(Value)>;

enum PromiseState {
    Pending(Vec<Continuation>),
    Resolved(Value),
}

#[derive(Clone)]
pub struct Promise {
    state: Rc<RefCell<PromiseState>>,
}

impl Promise {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(PromiseState::Pending(Vec::new()))),
        }
    }

    pub fn resolved(value: Value) -> Self {
        Self {
            state: Rc::new(RefCell::new(PromiseState::Resolved(value))),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.borrow(), PromiseState::Resolved(_))
    }

    /// Resolved value, if any
    pub fn value(&self) -> Option<Value> {
        match &*self.state.borrow() {
            PromiseState::Resolved(v) => Some(v.clone()),
            PromiseState::Pending(_) => None,
        }
    }

    /// Settle the promise and fire every registered continuation in order.
    /// Only the first resolution counts.
    pub fn resolve(&self, value: Value) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                PromiseState::Resolved(previous) => {
                    warn!(
                        "Promise::resolve - already resolved with {}, ignoring {}",
                        previous, value
                    );
                    return;
                }
                PromiseState::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = PromiseState::Resolved(value.clone());
                    callbacks
                }
            }
        };

        for callback in callbacks {
            callback(value.clone());
        }
    }

    /// Register a continuation; runs immediately when already resolved
    pub fn then(&self, callback: impl FnOnce(Value) + 'static) {
        let ready = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                PromiseState::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                PromiseState::Resolved(v) => v.clone(),
            }
        };
        callback(ready);
    }

    /// Resolve `other` with whatever this promise resolves to
    pub fn forward_to(&self, other: &Promise) {
        let other = other.clone();
        self.then(move |v| other.resolve(v));
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            PromiseState::Pending(callbacks) => {
                write!(f, "Promise {{ <pending>, {} waiting }}", callbacks.len())
            }
            PromiseState::Resolved(v) => write!(f, "Promise {{ <resolved>: {} }}", v),
        }
    }
}

// Papyrus Execution Guards
// The correlation token threaded through nested calls, with the call depth
// of the logical call chain it belongs to

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

pub struct StackData {
    token: u64,
    depth: Cell<usize>,
    payload: Option<Rc<dyn Any>>,
}

impl StackData {
    pub fn new(token: u64) -> Rc<Self> {
        Rc::new(Self {
            token,
            depth: Cell::new(0),
            payload: None,
        })
    }

    /// Token carrying host data, e.g. the event that triggered the call
    pub fn with_payload(token: u64, payload: Rc<dyn Any>) -> Rc<Self> {
        Rc::new(Self {
            token,
            depth: Cell::new(0),
            payload: Some(payload),
        })
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    /// Active `start_function` calls on this chain
    pub fn depth(&self) -> usize {
        self.depth.get()
    }
}

impl fmt::Debug for StackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackData")
            .field("token", &self.token)
            .field("depth", &self.depth.get())
            .finish()
    }
}

/// Holds one level of call depth until dropped
pub struct DepthGuard {
    stack: Rc<StackData>,
}

impl DepthGuard {
    pub fn enter(stack: &Rc<StackData>) -> Self {
        stack.depth.set(stack.depth.get() + 1);
        Self {
            stack: Rc::clone(stack),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.stack.depth.set(self.stack.depth.get().saturating_sub(1));
    }
}

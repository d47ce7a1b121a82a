// Papyrus Host Interfaces
// What the interpreter needs from the engine embedding it

use crate::bytecode::LazyScript;
use crate::vm::guard::StackData;
use crate::vm::instance::ActiveInstance;
use crate::vm::value::{ObjectHandle, Value};
use std::rc::Rc;

/// Engine object that scripts are attached to
pub trait GameObject {
    /// Display name used in logs and string conversions
    fn name(&self) -> String;

    /// Native class the object was created from, e.g. `Actor`
    fn parent_native_script(&self) -> String;

    /// Attached script instances, most recently attached last.
    /// Returned by value: callers are free to substitute entries.
    fn attached_instances(&self) -> Vec<Rc<ActiveInstance>>;
}

/// The virtual machine side the interpreter calls back into
pub trait ScriptHost {
    /// Compiled script for a class name
    fn script_by_name(&self, name: &str) -> Option<LazyScript>;

    /// Whether any native function is registered for the class
    fn has_native_functions(&self, class_name: &str) -> bool;

    /// Whether `class_name.function_name` is implemented natively
    fn is_native_function(&self, class_name: &str, function_name: &str) -> bool {
        let _ = (class_name, function_name);
        false
    }

    /// Call a method on an object. `instances` replaces the object's attached
    /// instances for this call only (used to route parent calls).
    fn call_method(
        &self,
        object: Option<&ObjectHandle>,
        method: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
        instances: Option<&[Rc<ActiveInstance>]>,
    ) -> Value;

    fn call_static(
        &self,
        class_name: &str,
        function_name: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> Value;

    /// Call a native global function
    fn call_native(
        &self,
        class_name: &str,
        function_name: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> Value {
        self.call_static(class_name, function_name, args, stack)
    }

    /// Fire-and-forget event delivery to every listener
    fn send_event(&self, source: &ActiveInstance, event_name: &str, args: &[Value]);
}

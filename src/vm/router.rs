// Papyrus Call Router
// Resolves call opcodes to call targets and suspends on pending results

use crate::bytecode::OpCode;
use crate::error::{VmError, VmResult};
use crate::vm::executor::{store, ExecutionContext};
use crate::vm::instance::ActiveInstance;
use crate::vm::promise::Promise;
use crate::vm::resolver::Operands;
use crate::vm::value::Value;
use std::rc::Rc;
use tracing::{enabled, error, trace, warn, Level};

/// State events delivered to every listener instead of a single script
const STATE_EVENTS: [&str; 2] = ["onBeginState", "onEndState"];

/// Where a call opcode sends its call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Method on an object, dispatched by the host to its scripts
    Method { name: String },
    /// Method of the parent class, seen from this instance's object
    Parent { name: String },
    /// Global function of a script class
    Static { class: String, name: String },
    /// Global function implemented by the host
    Native { class: String, name: String },
    /// Event broadcast to every listener of this instance
    Broadcast { event: String },
}

/// Call site identity for the call target cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteKey {
    pub class: String,
    pub function: String,
    pub state: String,
    pub op: OpCode,
}

/// Arguments a call opcode forwards to its callee
pub fn forwarded_args(op: OpCode, operands: &Operands) -> Vec<Value> {
    operands
        .iter()
        .skip(op.call_args_offset())
        .map(|arg| arg.borrow().clone())
        .collect()
}

fn literal_name(op: OpCode, operands: &Operands, index: usize) -> VmResult<String> {
    operands
        .get(index)
        .and_then(|name| name.borrow().as_str().map(str::to_string))
        .ok_or_else(|| VmError::malformed(op, format!("operand {} must be a name", index)))
}

impl ActiveInstance {
    /// Call target for a call site, resolved once and cached
    pub fn call_target(&self, op: OpCode, class: &str, function: &str) -> CallTarget {
        let key = CallSiteKey {
            class: class.to_ascii_lowercase(),
            function: function.to_ascii_lowercase(),
            state: self.active_state_name(),
            op,
        };
        if let Some(target) = self.call_targets.borrow().get(&key) {
            return target.clone();
        }

        let target = match op {
            OpCode::CallParent => CallTarget::Parent {
                name: function.to_string(),
            },
            OpCode::CallStatic if self.host.is_native_function(class, function) => {
                CallTarget::Native {
                    class: class.to_string(),
                    name: function.to_string(),
                }
            }
            OpCode::CallStatic => CallTarget::Static {
                class: class.to_string(),
                name: function.to_string(),
            },
            _ if STATE_EVENTS.contains(&function) => CallTarget::Broadcast {
                event: function.to_string(),
            },
            _ => CallTarget::Method {
                name: function.to_string(),
            },
        };
        trace!("call site {:?} resolved to {:?}", key, target);
        self.call_targets.borrow_mut().insert(key, target.clone());
        target
    }

    pub(crate) fn call_parent(
        self: &Rc<Self>,
        ctx: &mut ExecutionContext,
        operands: &Operands,
    ) -> VmResult<()> {
        let op = OpCode::CallParent;
        let function = literal_name(op, operands, 0)?;
        let args = forwarded_args(op, operands);
        let CallTarget::Parent { name } = self.call_target(op, self.source_name(), &function)
        else {
            return Err(VmError::malformed(op, "cached target is not a parent call"));
        };

        let owner = self.owner();
        let object = owner.as_object();
        let mut instances = object
            .map(|object| object.attached_instances())
            .unwrap_or_default();

        match self.parent() {
            Some(parent) => {
                for instance in instances.iter_mut() {
                    if instance.source_name().eq_ignore_ascii_case(self.source_name()) {
                        trace!(
                            "CallParent: redirecting method call {} -> {}",
                            self.source_name(),
                            parent.source_name()
                        );
                        *instance = Rc::clone(parent);
                    }
                }
            }
            None => warn!(
                "CallParent: {} has no parent class, calling {} unchanged",
                self.source_name(),
                name
            ),
        }

        if enabled!(Level::TRACE) {
            let shown: Vec<String> = args.iter().map(Value::to_string).collect();
            trace!("CallParent: calling {} with args {}", name, shown.join(", "));
        }

        let result = self
            .host
            .call_method(object, &name, args, &ctx.stack, Some(instances.as_slice()));
        if self.ensure_synchronous(&result, ctx) {
            store(&operands[1], result);
        }
        Ok(())
    }

    pub(crate) fn call_method(
        self: &Rc<Self>,
        ctx: &mut ExecutionContext,
        operands: &Operands,
    ) -> VmResult<()> {
        let op = OpCode::CallMethod;
        let function = operands[0].borrow().as_str().map(str::to_string);
        let Some(function) = function else {
            error!("CallMethod - anomaly, string expected");
            *operands[2].borrow_mut() = Value::none();
            return Ok(());
        };

        let object = {
            let target = operands[1].borrow();
            if target.is_self_str() {
                self.owner()
            } else {
                target.clone()
            }
        };
        let args = forwarded_args(op, operands);

        match self.call_target(op, self.source_name(), &function) {
            CallTarget::Broadcast { event } => {
                self.host.send_event(self, &event, &args);
                Ok(())
            }
            CallTarget::Method { name } => {
                let result = self
                    .host
                    .call_method(object.as_object(), &name, args, &ctx.stack, None);
                trace!("callmethod object={} funcName={} result={}", object, name, result);
                if self.ensure_synchronous(&result, ctx) {
                    store(&operands[2], result);
                }
                Ok(())
            }
            other => Err(VmError::malformed(
                op,
                format!("unexpected call target {:?}", other),
            )),
        }
    }

    pub(crate) fn call_static(
        self: &Rc<Self>,
        ctx: &mut ExecutionContext,
        operands: &Operands,
    ) -> VmResult<()> {
        let op = OpCode::CallStatic;
        let class = literal_name(op, operands, 0)?;
        let function = literal_name(op, operands, 1)?;
        let args = forwarded_args(op, operands);

        let result = match self.call_target(op, &class, &function) {
            CallTarget::Native { class, name } => {
                self.host.call_native(&class, &name, args, &ctx.stack)
            }
            CallTarget::Static { class, name } => {
                self.host.call_static(&class, &name, args, &ctx.stack)
            }
            other => {
                return Err(VmError::malformed(
                    op,
                    format!("unexpected call target {:?}", other),
                ))
            }
        };
        if self.ensure_synchronous(&result, ctx) {
            store(&operands[2], result);
        }
        Ok(())
    }

    /// `true` when `result` can be stored right away. Otherwise the rest of
    /// the call is parked on the pending result and the current execution
    /// returns a pending value of its own.
    pub(crate) fn ensure_synchronous(
        self: &Rc<Self>,
        result: &Value,
        ctx: &mut ExecutionContext,
    ) -> bool {
        let Some(pending) = result.promise() else {
            return true;
        };

        let outer = Promise::new();
        let snapshot = ctx.clone();
        let this = Rc::clone(self);
        let resolve_outer = outer.clone();
        pending.then(move |value| {
            let mut resumed = snapshot;
            resumed.line += 1;
            let result = match this.execute_all(&mut resumed, Some(value)) {
                Ok(result) => result,
                Err(err) => {
                    error!(
                        "ActiveInstance::ensure_synchronous - resumed call in {} failed: {}",
                        this.source_name(),
                        err
                    );
                    Value::none()
                }
            };
            match result.promise() {
                Some(inner) => inner.forward_to(&resolve_outer),
                None => resolve_outer.resolve(result),
            }
        });

        ctx.need_return = true;
        ctx.return_value = Value::pending(outer);
        false
    }
}

// Papyrus Identifier Resolver
// Builds call locals and turns identifier operands into storage slots

use crate::bytecode::{FunctionInfo, Instruction, Operand};
use crate::vm::instance::ActiveInstance;
use crate::vm::value::{slot, Slot, Value};
use smallvec::SmallVec;
use std::rc::Rc;
use tracing::{error, warn};

/// A named local of one call
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub slot: Slot,
}

impl Local {
    fn new(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            slot: slot(value),
        }
    }
}

/// Locals table, shared between a call and its continuations
pub type Locals = Rc<Vec<Local>>;

/// Resolved operands of one instruction
pub type Operands = SmallVec<[Slot; 4]>;

impl ActiveInstance {
    /// Declared locals, then bound arguments, then the missing parameters
    pub fn make_locals(&self, function: &FunctionInfo, args: Vec<Value>) -> Locals {
        let mut locals = Vec::with_capacity(function.locals.len() + function.params.len());

        for var in &function.locals {
            locals.push(Local::new(&var.name, Value::zero_of(&var.type_name)));
        }

        let bound = args.len().min(function.params.len());
        if args.len() > function.params.len() {
            warn!(
                "ActiveInstance::make_locals - {} arguments passed to a function of {} taking {}, extra ignored",
                args.len(),
                self.source_name(),
                function.params.len()
            );
        }

        for (param, arg) in function.params.iter().zip(args) {
            locals.push(Local::new(&param.name, arg.with_object_type(&param.type_name)));
        }

        for param in &function.params[bound..] {
            locals.push(Local::new(&param.name, Value::zero_of(&param.type_name)));
        }

        for local in &locals {
            let name = match local.slot.borrow().as_identifier() {
                Some(name) => name.to_string(),
                None => continue,
            };
            let resolved = self.resolve_name(&name, &locals).borrow().clone();
            *local.slot.borrow_mut() = resolved;
        }

        Rc::new(locals)
    }

    /// Storage slot for `name`, first match wins
    pub fn resolve_name(&self, name: &str, locals: &[Local]) -> Slot {
        if name == "self" {
            return Rc::clone(&self.owner);
        }

        if let Some(local) = locals.iter().find(|local| local.name == name) {
            return Rc::clone(&local.slot);
        }

        match self.checked_variable(name, "ActiveInstance::resolve_name") {
            Ok(Some(var)) => return var,
            Ok(None) => {}
            Err(_) => return slot(Value::none()),
        }

        if let Some(cached) = self.identifiers.find(name) {
            return cached;
        }

        if self.host.has_native_functions(self.source_name()) {
            return self.identifiers.intern(Value::identifier(name));
        }

        let in_parent_table = || {
            self.parent()
                .is_some_and(|parent| parent.script().string_table.contains(name))
        };
        if self.script().string_table.contains(name) || in_parent_table() {
            return self.identifiers.intern(Value::string(name));
        }

        error!(
            "ActiveInstance::resolve_name - failed all attempts to find variable '{}' in {}",
            name,
            self.source_name()
        );
        slot(Value::none())
    }

    /// One slot per operand; identifiers past the literal prefix are resolved
    pub fn decode(&self, instruction: &Instruction, locals: &[Local]) -> Operands {
        let start = instruction.op.dereference_start();
        instruction
            .args
            .iter()
            .enumerate()
            .map(|(i, operand)| match operand {
                Operand::Ident(name) if i >= start => self.resolve_name(name, locals),
                literal => slot(Value::from(literal)),
            })
            .collect()
    }
}

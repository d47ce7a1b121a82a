// Papyrus Opcode Executor
// Runs one function body over resolved operand slots

use crate::bytecode::{FunctionInfo, Instruction, OpCode};
use crate::error::{VmError, VmResult};
use crate::vm::cast::CastKind;
use crate::vm::guard::{DepthGuard, StackData};
use crate::vm::instance::{ActiveInstance, PropAccess};
use crate::vm::resolver::{Locals, Operands};
use crate::vm::router::forwarded_args;
use crate::vm::value::{Slot, Value, ValueType};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, trace, warn};

/// Largest array a script can create
pub const MAX_ARRAY_SIZE: usize = 128;

/// State of one running call. Cloned as a whole when a call suspends.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub stack: Rc<StackData>,
    pub instructions: Rc<[Instruction]>,
    pub locals: Locals,
    pub need_return: bool,
    pub need_jump: bool,
    /// Relative target of the pending jump
    pub jump_step: isize,
    pub return_value: Value,
    pub line: usize,
}

impl ExecutionContext {
    pub fn new(stack: Rc<StackData>, instructions: Rc<[Instruction]>, locals: Locals) -> Self {
        Self {
            stack,
            instructions,
            locals,
            need_return: false,
            need_jump: false,
            jump_step: 0,
            return_value: Value::none(),
            line: 0,
        }
    }
}

/// Write `value` into `dest`, keeping the declared type name of `dest`
/// when the value doesn't bring its own
pub(crate) fn store(dest: &Slot, mut value: Value) {
    let mut dest = dest.borrow_mut();
    if value.object_type().is_empty() && !dest.object_type().is_empty() {
        let type_name = dest.object_type().to_string();
        value.set_object_type(&type_name);
    }
    *dest = value;
}

fn binary(args: &Operands, op: impl FnOnce(&Value, &Value) -> Value) -> Value {
    let lhs = args[1].borrow();
    let rhs = args[2].borrow();
    op(&lhs, &rhs)
}

fn checked_index(index: i32, len: usize) -> VmResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or(VmError::IndexOutOfRange { index, len })
}

impl ActiveInstance {
    /// Run `function` with `args`. Failures are logged and yield None.
    pub fn start_function(
        self: &Rc<Self>,
        function: &FunctionInfo,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> Value {
        match self.try_start_function(function, args, stack) {
            Ok(value) => value,
            Err(err) => {
                error!(
                    "ActiveInstance::start_function - {} in script {}, returning None",
                    err,
                    self.source_name()
                );
                Value::none()
            }
        }
    }

    pub fn try_start_function(
        self: &Rc<Self>,
        function: &FunctionInfo,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> VmResult<Value> {
        let guard = DepthGuard::enter(stack);
        if guard.depth() >= self.config.max_stack_depth {
            return Err(VmError::StackOverflow {
                script: self.source_name().to_string(),
                depth: guard.depth(),
            });
        }

        let locals = self.make_locals(function, args);
        let mut ctx = ExecutionContext::new(Rc::clone(stack), function.code.clone().into(), locals);
        self.execute_all(&mut ctx, None)
    }

    /// Run from `ctx.line` until a return, the end of the code or a suspension.
    ///
    /// `resumed` is the value of the call that suspended this context; it is
    /// written to the result operand of the instruction before `ctx.line`.
    pub fn execute_all(
        self: &Rc<Self>,
        ctx: &mut ExecutionContext,
        resumed: Option<Value>,
    ) -> VmResult<Value> {
        let instructions = Rc::clone(&ctx.instructions);
        let program: Vec<Operands> = instructions
            .iter()
            .map(|instruction| self.decode(instruction, &ctx.locals))
            .collect();

        if let Some(value) = resumed {
            self.inject_call_result(&instructions, &program, ctx.line, value);
        }

        let quota = self.config.opcode_quota;
        let mut executed = 0usize;

        while ctx.line < program.len() {
            if executed >= quota {
                return Err(VmError::QuotaExceeded {
                    script: self.source_name().to_string(),
                    quota,
                });
            }

            let line = ctx.line;
            let op = instructions[line].op;
            match self.execute_opcode(ctx, op, &program[line]) {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {
                    error!(
                        "ActiveInstance::execute_all - {} at line {} of {}, skipped",
                        err,
                        line,
                        self.source_name()
                    );
                }
                Err(err) => return Err(err),
            }
            executed += 1;

            if ctx.need_return {
                ctx.need_return = false;
                return Ok(ctx.return_value.clone());
            }

            if ctx.need_jump {
                ctx.need_jump = false;
                let target = ctx.line as isize + ctx.jump_step;
                if target < 0 {
                    warn!(
                        "ActiveInstance::execute_all - jump before the first instruction in {}",
                        self.source_name()
                    );
                    break;
                }
                ctx.line = target as usize;
            } else {
                ctx.line += 1;
            }
        }

        Ok(ctx.return_value.clone())
    }

    fn inject_call_result(
        &self,
        instructions: &[Instruction],
        program: &[Operands],
        line: usize,
        value: Value,
    ) {
        let call = line.checked_sub(1).and_then(|index| {
            let op = instructions.get(index)?.op;
            let result = program[index].get(op.call_result_index()?)?;
            Some(result)
        });
        match call {
            Some(result) => store(result, value),
            None => error!(
                "ActiveInstance::execute_all - no call to resume before line {} in {}",
                line,
                self.source_name()
            ),
        }
    }

    fn execute_opcode(
        self: &Rc<Self>,
        ctx: &mut ExecutionContext,
        op: OpCode,
        args: &Operands,
    ) -> VmResult<()> {
        if args.len() < op.operand_count() {
            return Err(VmError::malformed(
                op,
                format!("expected {} operands, got {}", op.operand_count(), args.len()),
            ));
        }

        match op {
            OpCode::Nop => {}

            OpCode::IAdd | OpCode::FAdd => store(&args[0], binary(args, |a, b| a + b)),
            OpCode::ISub | OpCode::FSub => store(&args[0], binary(args, |a, b| a - b)),
            OpCode::IMul | OpCode::FMul => store(&args[0], binary(args, |a, b| a * b)),
            OpCode::IDiv | OpCode::FDiv => store(&args[0], binary(args, |a, b| a / b)),
            OpCode::IMod => store(&args[0], binary(args, |a, b| a % b)),

            OpCode::Not => {
                let value = !&*args[1].borrow();
                store(&args[0], value);
            }
            OpCode::INeg => {
                let value = &*args[1].borrow() * &Value::int(-1);
                store(&args[0], value);
            }
            OpCode::FNeg => {
                let value = &*args[1].borrow() * &Value::float(-1.0);
                store(&args[0], value);
            }

            OpCode::Assign => {
                let value = args[1].borrow().clone();
                store(&args[0], value);
            }
            OpCode::Cast => self.cast(args),

            OpCode::CmpEq => store(&args[0], binary(args, |a, b| Value::bool(a == b))),
            OpCode::CmpLt => store(&args[0], binary(args, |a, b| Value::bool(a < b))),
            OpCode::CmpLe => store(&args[0], binary(args, |a, b| Value::bool(a <= b))),
            OpCode::CmpGt => store(&args[0], binary(args, |a, b| Value::bool(a > b))),
            OpCode::CmpGe => store(&args[0], binary(args, |a, b| Value::bool(a >= b))),

            OpCode::Jmp => {
                ctx.jump_step = args[0].borrow().to_int() as isize;
                ctx.need_jump = true;
            }
            OpCode::Jmpt | OpCode::Jmpf => {
                let condition = args[0].borrow().to_bool();
                if condition == (op == OpCode::Jmpt) {
                    ctx.jump_step = args[1].borrow().to_int() as isize;
                    ctx.need_jump = true;
                }
            }

            OpCode::CallParent => self.call_parent(ctx, args)?,
            OpCode::CallMethod => self.call_method(ctx, args)?,
            OpCode::CallStatic => self.call_static(ctx, args)?,

            OpCode::Return => {
                ctx.return_value = args[0].borrow().clone();
                ctx.need_return = true;
            }

            OpCode::StrCat => {
                let value = binary(args, |a, b| {
                    Value::string(format!("{}{}", a.to_script_string(), b.to_script_string()))
                });
                store(&args[0], value);
            }

            OpCode::PropGet => self.property_get(ctx, args)?,
            OpCode::PropSet => self.property_set(ctx, args)?,

            OpCode::ArrayCreate => Self::array_create(args),
            OpCode::ArrayLength => Self::array_length(args),
            OpCode::ArrayGetElement => Self::array_get(args)?,
            OpCode::ArraySetElement => Self::array_set(args)?,
            OpCode::ArrayFindElement => Self::array_find(args, false),
            OpCode::ArrayRFindElement => Self::array_find(args, true),
        }
        Ok(())
    }

    fn cast(&self, args: &Operands) {
        let (kind, type_name) = {
            let dest = args[0].borrow();
            (
                CastKind::for_destination(dest.value_type()),
                dest.object_type().to_string(),
            )
        };
        let source = {
            let source = args[1].borrow();
            if kind == CastKind::Object && source.is_self_str() {
                self.owner()
            } else {
                source.clone()
            }
        };

        let mut value = kind.apply(&*self.host, &source, &type_name);
        value.set_object_type(&type_name);
        *args[0].borrow_mut() = value;
    }

    // ==================== Properties ====================

    /// Property name and the instance that owns the property
    fn property_target(
        &self,
        op: OpCode,
        args: &Operands,
    ) -> VmResult<(String, Option<Rc<ActiveInstance>>)> {
        let name = args[0]
            .borrow()
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| VmError::malformed(op, "property name must be a string"))?;

        let target = {
            let target = args[1].borrow();
            if target.is_self_str() {
                self.owner()
            } else {
                target.clone()
            }
        };

        let object = match target.as_object() {
            Some(object) => Some(Rc::clone(object)),
            None => {
                if target.value_type() != ValueType::Object {
                    error!(
                        "{:?} - object has unexpected type {:?}",
                        op,
                        target.value_type()
                    );
                }
                let owner = self.owner();
                if owner.value_type() != ValueType::Object {
                    error!(
                        "{:?} - instance owner has unexpected type {:?}",
                        op,
                        owner.value_type()
                    );
                }
                owner.as_object().cloned()
            }
        };

        let instance = object.and_then(|object| object.attached_instances().pop());
        Ok((name, instance))
    }

    fn property_get(self: &Rc<Self>, ctx: &ExecutionContext, args: &Operands) -> VmResult<()> {
        let op = OpCode::PropGet;
        let (name, Some(instance)) = self.property_target(op, args)? else {
            trace!("propget do nothing: no script attached");
            return Ok(());
        };

        if let Some(handler) = instance
            .property(&name, PropAccess::Read)
            .and_then(|prop| prop.read_handler())
        {
            let result = instance.start_function(handler, forwarded_args(op, args), &ctx.stack);
            store(&args[2], result);
            trace!("propget function called");
        } else if let Some(var) = instance.backing_variable(&name) {
            let value = var.borrow().clone();
            store(&args[2], value);
        } else {
            trace!("propget do nothing: prop {} not found", name);
        }
        Ok(())
    }

    fn property_set(self: &Rc<Self>, ctx: &ExecutionContext, args: &Operands) -> VmResult<()> {
        let op = OpCode::PropSet;
        let (name, Some(instance)) = self.property_target(op, args)? else {
            trace!("propset do nothing: no script attached");
            return Ok(());
        };
        let value = args[2].borrow().clone();

        if let Some(handler) = instance
            .property(&name, PropAccess::Write)
            .and_then(|prop| prop.write_handler())
        {
            let mut call_args = forwarded_args(op, args);
            call_args.push(value);
            instance.start_function(handler, call_args, &ctx.stack);
            trace!("propset function called");
        } else if let Some(var) = instance.backing_variable(&name) {
            store(&var, value);
        } else {
            trace!("propset do nothing: prop {} not found", name);
        }
        Ok(())
    }

    // ==================== Arrays ====================

    fn array_create(args: &Operands) {
        let size = args[1].borrow().to_int();
        let mut array = args[0].borrow_mut();

        if !array.value_type().is_array() {
            warn!(
                "ArrayCreate - destination is {:?}, retyped from {}",
                array.value_type(),
                array.object_type()
            );
            let type_name = array.object_type().to_string();
            *array = Value::array(ValueType::from_type_name(&type_name), None)
                .with_object_type(&type_name);
        }

        if size <= 0 {
            warn!("ArrayCreate - zero-size array creation attempt");
            array.set_array_items(None);
            return;
        }

        let size = match usize::try_from(size) {
            Ok(size) if size <= MAX_ARRAY_SIZE => size,
            _ => {
                warn!(
                    "ArrayCreate - size {} exceeds the limit, clamped to {}",
                    size, MAX_ARRAY_SIZE
                );
                MAX_ARRAY_SIZE
            }
        };
        let element = Value::zero(array.value_type().element_type());
        let items = vec![element; size];
        array.set_array_items(Some(Rc::new(RefCell::new(items))));
    }

    fn array_length(args: &Operands) {
        let len = args[1]
            .borrow()
            .array_items()
            .map(|items| items.borrow().len());
        let as_float = args[0].borrow().value_type() == ValueType::Float;

        let value = match len {
            Some(len) if as_float => Value::float(len as f64),
            Some(len) => Value::int(len as i32),
            None => Value::int(0),
        };
        store(&args[0], value);
    }

    fn array_get(args: &Operands) -> VmResult<()> {
        let index = args[2].borrow().to_int();
        let items = args[1].borrow().array_items().cloned();

        let value = match items {
            Some(items) => {
                let items = items.borrow();
                items[checked_index(index, items.len())?].clone()
            }
            None => Value::none(),
        };
        store(&args[0], value);
        Ok(())
    }

    fn array_set(args: &Operands) -> VmResult<()> {
        let index = args[1].borrow().to_int();
        let value = args[2].borrow().clone();
        let Some(items) = args[0].borrow().array_items().cloned() else {
            error!("ArraySetElement - null array passed");
            return Ok(());
        };

        let mut items = items.borrow_mut();
        let index = checked_index(index, items.len())?;
        items[index] = value;
        Ok(())
    }

    fn array_find(args: &Operands, reverse: bool) {
        let needle = args[2].borrow().clone();
        let start = args[3].borrow().to_int();
        let items = args[0].borrow().array_items().cloned();

        let found = items.and_then(|items| {
            let items = items.borrow();
            if reverse {
                let last = items.len().checked_sub(1)?;
                let from = usize::try_from(start).map_or(last, |s| s.min(last));
                (0..=from).rev().find(|&i| items[i] == needle)
            } else {
                let from = usize::try_from(start).unwrap_or(0);
                (from..items.len()).find(|&i| items[i] == needle)
            }
        });

        let index = found.map_or(-1, |i| i as i32);
        store(&args[1], Value::int(index));
    }
}

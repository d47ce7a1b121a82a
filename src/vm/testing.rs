// Test fixtures: a recording host, attachable objects and script builders

use crate::bytecode::{
    FunctionInfo, Instruction, LazyScript, NamedFunction, ObjectInfo, OpCode, Operand, PropInfo,
    Script, StateInfo, StringTable, VarInfo, VariableInfo,
};
use crate::config::VmConfig;
use crate::vm::caller::{GameObject, ScriptHost};
use crate::vm::guard::StackData;
use crate::vm::instance::ActiveInstance;
use crate::vm::value::{ObjectHandle, Value};
use crate::vm::variables::PropertyStorage;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub fn ins(op: OpCode, args: Vec<Operand>) -> Instruction {
    Instruction::new(op, args)
}

pub fn function(params: Vec<VarInfo>, locals: Vec<VarInfo>, code: Vec<Instruction>) -> FunctionInfo {
    FunctionInfo::new(params, locals, code)
}

pub fn instance_of(host: &Rc<MockHost>, name: &str, owner: Value) -> Rc<ActiveInstance> {
    instance_with_config(host, name, owner, VmConfig::default())
}

pub fn instance_with_config(
    host: &Rc<MockHost>,
    name: &str,
    owner: Value,
    config: VmConfig,
) -> Rc<ActiveInstance> {
    let script = host
        .script_by_name(name)
        .unwrap_or_else(|| panic!("script {} not registered", name));
    ActiveInstance::new(
        host.clone(),
        script,
        PropertyStorage::new(),
        owner,
        "",
        Rc::new(config),
    )
}

pub struct ScriptBuilder {
    script: Script,
}

impl ScriptBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            script: Script {
                source: name.to_string(),
                objects: vec![ObjectInfo {
                    name: name.to_string(),
                    states: vec![StateInfo::default()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        }
    }

    fn object(&mut self) -> &mut ObjectInfo {
        &mut self.script.objects[0]
    }

    pub fn parent(mut self, name: &str) -> Self {
        self.object().parent_class_name = name.to_string();
        self
    }

    pub fn strings(mut self, strings: &[&str]) -> Self {
        self.script.string_table =
            StringTable::new(strings.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn variable(mut self, name: &str, type_name: &str) -> Self {
        self.object().variables.push(VariableInfo {
            name: name.to_string(),
            type_name: type_name.to_string(),
            initial: Operand::None,
        });
        self
    }

    pub fn property(mut self, prop: PropInfo) -> Self {
        self.object().properties.push(prop);
        self
    }

    pub fn function(self, name: &str, function: FunctionInfo) -> Self {
        self.state_function("", name, function)
    }

    pub fn state_function(mut self, state: &str, name: &str, function: FunctionInfo) -> Self {
        let object = self.object();
        let index = match object.states.iter().position(|s| s.name == state) {
            Some(index) => index,
            None => {
                object.states.push(StateInfo {
                    name: state.to_string(),
                    functions: vec![],
                });
                object.states.len() - 1
            }
        };
        object.states[index].functions.push(NamedFunction {
            name: name.to_string(),
            function,
        });
        self
    }

    pub fn build(self) -> Script {
        self.script
    }
}

/// One call seen by the mock host
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: &'static str,
    pub class: String,
    pub name: String,
    pub args: Vec<Value>,
    /// Source names of the instance override list, for parent calls
    pub instances: Vec<String>,
    pub token: u64,
}

/// Host that runs script methods on attached instances and records every call
pub struct MockHost {
    this: Weak<MockHost>,
    scripts: RefCell<Vec<LazyScript>>,
    native_classes: RefCell<Vec<String>>,
    natives: RefCell<Vec<(String, String)>>,
    responses: RefCell<FxHashMap<String, Value>>,
    pub calls: RefCell<Vec<RecordedCall>>,
    pub events: RefCell<Vec<(String, String, Vec<Value>)>>,
}

impl MockHost {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            scripts: RefCell::new(Vec::new()),
            native_classes: RefCell::new(Vec::new()),
            natives: RefCell::new(Vec::new()),
            responses: RefCell::new(FxHashMap::default()),
            calls: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
        })
    }

    pub fn add_script(&self, script: Script) {
        self.scripts.borrow_mut().push(LazyScript::from_script(script));
    }

    pub fn add_native_class(&self, class: &str) {
        self.native_classes.borrow_mut().push(class.to_string());
    }

    pub fn add_native(&self, class: &str, name: &str) {
        self.natives
            .borrow_mut()
            .push((class.to_string(), name.to_string()));
    }

    /// Answer every call of `name` with `value` instead of running scripts
    pub fn respond(&self, name: &str, value: Value) {
        self.responses
            .borrow_mut()
            .insert(name.to_ascii_lowercase(), value);
    }

    pub fn calls_named(&self, name: &str) -> Vec<RecordedCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.name.eq_ignore_ascii_case(name))
            .cloned()
            .collect()
    }

    fn response(&self, name: &str) -> Option<Value> {
        self.responses
            .borrow()
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    fn record(
        &self,
        kind: &'static str,
        class: &str,
        name: &str,
        args: &[Value],
        instances: &[Rc<ActiveInstance>],
        stack: &StackData,
    ) {
        self.calls.borrow_mut().push(RecordedCall {
            kind,
            class: class.to_string(),
            name: name.to_string(),
            args: args.to_vec(),
            instances: instances
                .iter()
                .map(|i| i.source_name().to_string())
                .collect(),
            token: stack.token(),
        });
    }

    fn run_on(
        instances: &[Rc<ActiveInstance>],
        name: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> Value {
        let mut result = Value::none();
        for instance in instances {
            let state = instance.active_state_name();
            let function = instance
                .function_by_name(name, &state)
                .or_else(|| instance.function_by_name(name, ""))
                .cloned();
            if let Some(function) = function {
                result = instance.start_function(&function, args.clone(), stack);
            }
        }
        result
    }
}

impl ScriptHost for MockHost {
    fn script_by_name(&self, name: &str) -> Option<LazyScript> {
        let scripts = self.scripts.borrow();
        scripts
            .iter()
            .find(|s| s.source() == name)
            .or_else(|| scripts.iter().find(|s| s.source().eq_ignore_ascii_case(name)))
            .cloned()
    }

    fn has_native_functions(&self, class_name: &str) -> bool {
        self.native_classes
            .borrow()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class_name))
            || self
                .natives
                .borrow()
                .iter()
                .any(|(c, _)| c.eq_ignore_ascii_case(class_name))
    }

    fn is_native_function(&self, class_name: &str, function_name: &str) -> bool {
        self.natives.borrow().iter().any(|(c, f)| {
            c.eq_ignore_ascii_case(class_name) && f.eq_ignore_ascii_case(function_name)
        })
    }

    fn call_method(
        &self,
        object: Option<&ObjectHandle>,
        method: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
        instances: Option<&[Rc<ActiveInstance>]>,
    ) -> Value {
        let attached = match (instances, object) {
            (Some(instances), _) => instances.to_vec(),
            (None, Some(object)) => object.attached_instances(),
            (None, None) => Vec::new(),
        };
        self.record("method", "", method, &args, instances.unwrap_or(&[]), stack);

        match self.response(method) {
            Some(value) => value,
            None => Self::run_on(&attached, method, args, stack),
        }
    }

    fn call_static(
        &self,
        class_name: &str,
        function_name: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> Value {
        self.record("static", class_name, function_name, &args, &[], stack);
        if let Some(value) = self.response(function_name) {
            return value;
        }

        let (Some(host), Some(script)) = (self.this.upgrade(), self.script_by_name(class_name))
        else {
            return Value::none();
        };
        let instance = ActiveInstance::new(
            host,
            script,
            PropertyStorage::new(),
            Value::none(),
            "",
            Rc::new(VmConfig::default()),
        );
        Self::run_on(&[instance], function_name, args, stack)
    }

    fn call_native(
        &self,
        class_name: &str,
        function_name: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> Value {
        self.record("native", class_name, function_name, &args, &[], stack);
        self.response(function_name).unwrap_or_else(Value::none)
    }

    fn send_event(&self, source: &ActiveInstance, event_name: &str, args: &[Value]) {
        self.events.borrow_mut().push((
            source.source_name().to_string(),
            event_name.to_string(),
            args.to_vec(),
        ));
    }
}

/// Engine object stand-in with an attachable script list
pub struct MockObject {
    name: String,
    native: String,
    instances: RefCell<Vec<Rc<ActiveInstance>>>,
}

impl MockObject {
    pub fn new(name: &str, native: &str) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            native: native.to_string(),
            instances: RefCell::new(Vec::new()),
        })
    }

    pub fn attach(&self, instance: Rc<ActiveInstance>) {
        self.instances.borrow_mut().push(instance);
    }

    /// Remove the first attached instance whose source name is exactly `source`
    pub fn detach(&self, source: &str) {
        let mut instances = self.instances.borrow_mut();
        if let Some(index) = instances.iter().position(|i| i.source_name() == source) {
            instances.remove(index);
        }
    }
}

impl GameObject for MockObject {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn parent_native_script(&self) -> String {
        self.native.clone()
    }

    fn attached_instances(&self) -> Vec<Rc<ActiveInstance>> {
        self.instances.borrow().clone()
    }
}

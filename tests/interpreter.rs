use papyrus_vm::bytecode::{NamedFunction, ObjectInfo, PropInfo, StateInfo, VarInfo, VariableInfo};
use papyrus_vm::vm::ObjectHandle;
use papyrus_vm::{
    ActiveInstance, FunctionInfo, GameObject, Instruction, LazyScript, OpCode, Operand, Promise,
    PropertyStorage, Script, ScriptHost, StackData, Value, VmConfig,
};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing_subscriber::EnvFilter;

fn init_logs() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ==================== Host ====================

struct World {
    this: Weak<World>,
    scripts: RefCell<Vec<LazyScript>>,
    config: Rc<VmConfig>,
    method_calls: Cell<usize>,
    events: RefCell<Vec<String>>,
    waits: RefCell<Vec<Promise>>,
}

impl World {
    fn new(config: VmConfig) -> Rc<Self> {
        Rc::new_cyclic(|this| World {
            this: this.clone(),
            scripts: RefCell::new(Vec::new()),
            config: Rc::new(config),
            method_calls: Cell::new(0),
            events: RefCell::new(Vec::new()),
            waits: RefCell::new(Vec::new()),
        })
    }

    fn add(&self, script: Script) {
        self.scripts.borrow_mut().push(LazyScript::from_script(script));
    }

    fn attach(self: &Rc<Self>, actor: &Rc<Actor>, script: &str) -> Rc<ActiveInstance> {
        let instance = ActiveInstance::new(
            self.clone(),
            self.script_by_name(script).expect("script registered"),
            actor.storage.clone(),
            Value::object(actor.clone()),
            "",
            self.config.clone(),
        );
        actor.instances.borrow_mut().push(instance.clone());
        instance
    }
}

impl ScriptHost for World {
    fn script_by_name(&self, name: &str) -> Option<LazyScript> {
        self.scripts
            .borrow()
            .iter()
            .find(|s| s.source().eq_ignore_ascii_case(name))
            .cloned()
    }

    fn has_native_functions(&self, class_name: &str) -> bool {
        class_name.eq_ignore_ascii_case("Utility")
    }

    fn is_native_function(&self, class_name: &str, _function_name: &str) -> bool {
        self.has_native_functions(class_name)
    }

    fn call_method(
        &self,
        object: Option<&ObjectHandle>,
        method: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
        instances: Option<&[Rc<ActiveInstance>]>,
    ) -> Value {
        self.method_calls.set(self.method_calls.get() + 1);
        let instances = match (instances, object) {
            (Some(instances), _) => instances.to_vec(),
            (None, Some(object)) => object.attached_instances(),
            (None, None) => return Value::none(),
        };

        let mut result = Value::none();
        for instance in &instances {
            if let Some(function) = instance.function_by_name(method, "").cloned() {
                result = instance.start_function(&function, args.clone(), stack);
            }
        }
        result
    }

    fn call_static(
        &self,
        class_name: &str,
        function_name: &str,
        args: Vec<Value>,
        stack: &Rc<StackData>,
    ) -> Value {
        if class_name.eq_ignore_ascii_case("Utility") && function_name == "Wait" {
            let promise = Promise::new();
            self.waits.borrow_mut().push(promise.clone());
            return Value::pending(promise);
        }

        let (Some(world), Some(script)) = (self.this.upgrade(), self.script_by_name(class_name))
        else {
            return Value::none();
        };
        let instance = ActiveInstance::new(
            world,
            script,
            PropertyStorage::new(),
            Value::none(),
            "",
            self.config.clone(),
        );
        match instance.function_by_name(function_name, "").cloned() {
            Some(function) => instance.start_function(&function, args, stack),
            None => Value::none(),
        }
    }

    fn send_event(&self, source: &ActiveInstance, event_name: &str, _args: &[Value]) {
        self.events
            .borrow_mut()
            .push(format!("{}.{}", source.source_name(), event_name));
    }
}

struct Actor {
    name: String,
    native: String,
    storage: Rc<PropertyStorage>,
    instances: RefCell<Vec<Rc<ActiveInstance>>>,
}

impl Actor {
    fn new(name: &str, native: &str) -> Rc<Self> {
        Rc::new(Actor {
            name: name.to_string(),
            native: native.to_string(),
            storage: PropertyStorage::new(),
            instances: RefCell::new(Vec::new()),
        })
    }
}

impl GameObject for Actor {
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

// ==================== Script helpers ====================

fn id(name: &str) -> Operand {
    Operand::ident(name)
}

fn ins(op: OpCode, args: Vec<Operand>) -> Instruction {
    Instruction::new(op, args)
}

fn local(name: &str, type_name: &str) -> VarInfo {
    VarInfo::new(name, type_name)
}

fn script(name: &str, parent: &str, functions: Vec<(&str, FunctionInfo)>) -> Script {
    Script {
        source: name.to_string(),
        objects: vec![ObjectInfo {
            name: name.to_string(),
            parent_class_name: parent.to_string(),
            states: vec![StateInfo {
                name: String::new(),
                functions: functions
                    .into_iter()
                    .map(|(name, function)| NamedFunction {
                        name: name.to_string(),
                        function,
                    })
                    .collect(),
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn call(world: &Rc<World>, actor: &Rc<Actor>, method: &str) -> Value {
    init_logs();
    let object: ObjectHandle = actor.clone();
    world.call_method(Some(&object), method, vec![], &StackData::new(1), None)
}

// ==================== Tests ====================

#[test]
fn assign_then_return_from_json_script() {
    let five = Script::from_json(
        r#"{
            "source": "Five",
            "objects": [{
                "name": "Five",
                "states": [{
                    "name": "",
                    "functions": [{
                        "name": "Get",
                        "function": {
                            "return_type": "Int",
                            "locals": [{ "name": "r0", "type_name": "Int" }],
                            "code": [
                                { "op": "Assign", "args": [{ "Ident": "r0" }, { "Int": 5 }] },
                                { "op": "Return", "args": [{ "Ident": "r0" }] }
                            ]
                        }
                    }]
                }]
            }]
        }"#,
    )
    .expect("valid script json");

    init_logs();
    let world = World::new(VmConfig::default());
    world.add(five);
    let actor = Actor::new("Lydia", "Actor");
    let instance = world.attach(&actor, "Five");

    let get = instance.function_by_name("get", "").cloned().expect("function");
    let result = instance.start_function(&get, vec![], &StackData::new(7));
    assert_eq!(result, Value::int(5));
    assert!(!result.is_pending());
}

#[test]
fn call_parent_runs_base_class_method() {
    let world = World::new(VmConfig::default());
    world.add(script(
        "Base",
        "",
        vec![(
            "Greet",
            FunctionInfo::new(vec![], vec![], vec![ins(OpCode::Return, vec![Operand::str("base")])]),
        )],
    ));
    world.add(script(
        "Child",
        "Base",
        vec![(
            "Greet",
            FunctionInfo::new(
                vec![],
                vec![local("r0", "String")],
                vec![
                    ins(OpCode::CallParent, vec![Operand::str("Greet"), id("r0"), 0.into()]),
                    ins(OpCode::StrCat, vec![id("r0"), id("r0"), Operand::str("+child")]),
                    ins(OpCode::Return, vec![id("r0")]),
                ],
            ),
        )],
    ));

    let actor = Actor::new("Lydia", "Actor");
    let child = world.attach(&actor, "Child");
    assert_eq!(child.parent().map(|p| p.source_name()), Some("Base"));

    let result = call(&world, &actor, "Greet");
    assert_eq!(result.as_str(), Some("base+child"));
    // the object's own list is untouched by the parent redirect
    assert_eq!(actor.attached_instances()[0].source_name(), "Child");
}

#[test]
fn call_method_on_self_reaches_sibling_script() {
    let world = World::new(VmConfig::default());
    world.add(script(
        "Caller",
        "",
        vec![(
            "Run",
            FunctionInfo::new(
                vec![],
                vec![local("r0", "Int")],
                vec![
                    ins(
                        OpCode::CallMethod,
                        vec![Operand::str("Ping"), Operand::str("self"), id("r0"), 0.into()],
                    ),
                    ins(OpCode::Return, vec![id("r0")]),
                ],
            ),
        )],
    ));
    world.add(script(
        "Responder",
        "",
        vec![(
            "Ping",
            FunctionInfo::new(vec![], vec![], vec![ins(OpCode::Return, vec![7.into()])]),
        )],
    ));

    let actor = Actor::new("Lydia", "Actor");
    world.attach(&actor, "Caller");
    world.attach(&actor, "Responder");

    assert_eq!(call(&world, &actor, "Run"), Value::int(7));
}

#[test]
fn state_events_are_broadcast() {
    let world = World::new(VmConfig::default());
    world.add(script(
        "Door",
        "",
        vec![(
            "Lock",
            FunctionInfo::new(
                vec![],
                vec![local("r0", "None")],
                vec![ins(
                    OpCode::CallMethod,
                    vec![Operand::str("onBeginState"), Operand::str("self"), id("r0"), 0.into()],
                )],
            ),
        )],
    ));

    let actor = Actor::new("Door01", "ObjectReference");
    world.attach(&actor, "Door");
    call(&world, &actor, "Lock");

    assert_eq!(*world.events.borrow(), vec!["Door.onBeginState".to_string()]);
    assert_eq!(world.method_calls.get(), 1);
}

#[test]
fn auto_property_round_trips_through_backing_variable() {
    let world = World::new(VmConfig::default());
    let mut chest = script(
        "Chest",
        "",
        vec![(
            "Store",
            FunctionInfo::new(
                vec![],
                vec![local("r0", "Int")],
                vec![
                    ins(OpCode::PropSet, vec![id("Gold"), Operand::str("self"), 25.into()]),
                    ins(OpCode::PropGet, vec![id("Gold"), Operand::str("self"), id("r0")]),
                    ins(OpCode::Return, vec![id("r0")]),
                ],
            ),
        )],
    );
    chest.objects[0].variables.push(VariableInfo {
        name: "::Gold_var".into(),
        type_name: "Int".into(),
        initial: Operand::None,
    });
    chest.objects[0].properties.push(PropInfo {
        name: "Gold".into(),
        type_name: "Int".into(),
        flags: PropInfo::FLAG_READ | PropInfo::FLAG_WRITE | PropInfo::FLAG_AUTOVAR,
        auto_var_name: "::Gold_var".into(),
        ..Default::default()
    });
    world.add(chest);

    let actor = Actor::new("Chest01", "ObjectReference");
    world.attach(&actor, "Chest");

    assert_eq!(call(&world, &actor, "Store"), Value::int(25));
    assert_eq!(actor.storage.get("::gold_var"), Some(Value::int(25)));
}

#[test]
fn property_read_handler_is_called() {
    let world = World::new(VmConfig::default());
    let mut shrine = script(
        "Shrine",
        "",
        vec![(
            "Read",
            FunctionInfo::new(
                vec![],
                vec![local("r0", "Int")],
                vec![
                    ins(OpCode::PropGet, vec![id("Blessing"), Operand::str("self"), id("r0")]),
                    ins(OpCode::Return, vec![id("r0")]),
                ],
            ),
        )],
    );
    shrine.objects[0].properties.push(PropInfo {
        name: "Blessing".into(),
        type_name: "Int".into(),
        flags: PropInfo::FLAG_READ,
        read_handler: Some(FunctionInfo::new(
            vec![],
            vec![],
            vec![ins(OpCode::Return, vec![99.into()])],
        )),
        ..Default::default()
    });
    world.add(shrine);

    let actor = Actor::new("Shrine01", "Activator");
    world.attach(&actor, "Shrine");
    assert_eq!(call(&world, &actor, "Read"), Value::int(99));
}

#[test]
fn unknown_property_is_a_no_op() {
    let world = World::new(VmConfig::default());
    world.add(script(
        "Plain",
        "",
        vec![(
            "Touch",
            FunctionInfo::new(
                vec![],
                vec![local("r0", "Int")],
                vec![
                    ins(OpCode::Assign, vec![id("r0"), 3.into()]),
                    ins(OpCode::PropGet, vec![id("Missing"), Operand::str("self"), id("r0")]),
                    ins(OpCode::PropSet, vec![id("Missing"), Operand::str("self"), 8.into()]),
                    ins(OpCode::PropGet, vec![id("Missing"), Operand::str("self"), id("r0")]),
                    ins(OpCode::Return, vec![id("r0")]),
                ],
            ),
        )],
    ));

    let actor = Actor::new("Plain01", "ObjectReference");
    world.attach(&actor, "Plain");
    let storage_before = actor.storage.len();

    assert_eq!(call(&world, &actor, "Touch"), Value::int(3));
    assert_eq!(call(&world, &actor, "Touch"), Value::int(3));
    assert_eq!(actor.storage.len(), storage_before);
}

#[test]
fn cast_finds_attached_script_of_the_owner() {
    let world = World::new(VmConfig::default());
    world.add(script(
        "Caster",
        "",
        vec![(
            "Find",
            FunctionInfo::new(
                vec![],
                vec![local("quest", "QuestScript"), local("ok", "Bool")],
                vec![
                    ins(OpCode::Cast, vec![id("quest"), Operand::str("self")]),
                    ins(OpCode::Cast, vec![id("ok"), id("quest")]),
                    ins(OpCode::Return, vec![id("ok")]),
                ],
            ),
        )],
    ));
    world.add(script("questscript", "", vec![]));

    let actor = Actor::new("Quest01", "Quest");
    world.attach(&actor, "Caster");
    assert_eq!(call(&world, &actor, "Find"), Value::bool(false));

    world.attach(&actor, "QuestScript");
    assert_eq!(call(&world, &actor, "Find"), Value::bool(true));
}

#[test]
fn pending_call_resumes_with_resolved_value() {
    let world = World::new(VmConfig::default());
    world.add(script(
        "Timer",
        "",
        vec![(
            "Tick",
            FunctionInfo::new(
                vec![local("step", "Int")],
                vec![local("r0", "Int")],
                vec![
                    ins(
                        OpCode::CallStatic,
                        vec![Operand::str("Utility"), Operand::str("Wait"), id("r0"), 0.into()],
                    ),
                    ins(OpCode::IAdd, vec![id("r0"), id("r0"), id("step")]),
                    ins(OpCode::Return, vec![id("r0")]),
                ],
            ),
        )],
    ));

    let actor = Actor::new("Timer01", "ObjectReference");
    let timer = world.attach(&actor, "Timer");
    let tick = timer.function_by_name("Tick", "").cloned().expect("function");

    let result = timer.start_function(&tick, vec![Value::int(2)], &StackData::new(3));
    let pending = result.promise().cloned().expect("suspended");
    assert!(!pending.is_resolved());

    let wait = world.waits.borrow()[0].clone();
    wait.resolve(Value::int(40));
    assert_eq!(pending.value(), Some(Value::int(42)));
}

#[test]
fn runaway_loop_is_stopped_by_quota() {
    let world = World::new(VmConfig {
        opcode_quota: 1_000,
        ..Default::default()
    });
    world.add(script(
        "Spin",
        "",
        vec![(
            "Forever",
            FunctionInfo::new(vec![], vec![], vec![
                ins(OpCode::Nop, vec![]),
                ins(OpCode::Jmp, vec![(-1).into()]),
            ]),
        )],
    ));

    let actor = Actor::new("Spin01", "ObjectReference");
    let spin = world.attach(&actor, "Spin");
    let forever = spin.function_by_name("Forever", "").cloned().expect("function");

    assert!(spin
        .try_start_function(&forever, vec![], &StackData::new(1))
        .is_err());
    assert!(spin.start_function(&forever, vec![], &StackData::new(1)).is_none());
}

#[test]
fn deep_recursion_is_cut_at_max_depth() {
    let world = World::new(VmConfig {
        max_stack_depth: 8,
        ..Default::default()
    });
    world.add(script(
        "Echo",
        "",
        vec![(
            "Recurse",
            FunctionInfo::new(
                vec![],
                vec![local("r0", "Int")],
                vec![
                    ins(
                        OpCode::CallMethod,
                        vec![Operand::str("Recurse"), Operand::str("self"), id("r0"), 0.into()],
                    ),
                    ins(OpCode::Return, vec![id("r0")]),
                ],
            ),
        )],
    ));

    let actor = Actor::new("Echo01", "ObjectReference");
    world.attach(&actor, "Echo");

    let stack = StackData::new(9);
    let object: ObjectHandle = actor.clone();
    let result = world.call_method(Some(&object), "Recurse", vec![], &stack, None);

    assert!(result.is_none());
    assert_eq!(world.method_calls.get(), 8);
    assert_eq!(stack.depth(), 0);
}

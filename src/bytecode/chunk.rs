use super::opcode::OpCode;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

/// Instruction operand as stored in a compiled script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    Int(i32),
    Float(f64),
    Bool(bool),
    Str(String),
    Ident(String),
}

impl Operand {
    pub fn ident(name: impl Into<String>) -> Self {
        Operand::Ident(name.into())
    }

    pub fn str(text: impl Into<String>) -> Self {
        Operand::Str(text.into())
    }
}

impl From<i32> for Operand {
    fn from(i: i32) -> Self {
        Operand::Int(i)
    }
}

impl From<f64> for Operand {
    fn from(f: f64) -> Self {
        Operand::Float(f)
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Operand::Bool(b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    #[serde(default)]
    pub args: Vec<Operand>,
}

impl Instruction {
    pub fn new(op: OpCode, args: Vec<Operand>) -> Self {
        Self { op, args }
    }
}

/// Declared parameter or local
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VarInfo {
    pub name: String,
    pub type_name: String,
}

impl VarInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Object-level variable, the storage behind properties and script state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub type_name: String,
    #[serde(default = "VariableInfo::no_initial")]
    pub initial: Operand,
}

impl VariableInfo {
    fn no_initial() -> Operand {
        Operand::None
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionInfo {
    pub return_type: String,
    pub doc: String,
    pub is_native: bool,
    pub params: Vec<VarInfo>,
    pub locals: Vec<VarInfo>,
    pub code: Vec<Instruction>,
}

impl FunctionInfo {
    pub fn new(params: Vec<VarInfo>, locals: Vec<VarInfo>, code: Vec<Instruction>) -> Self {
        Self {
            params,
            locals,
            code,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFunction {
    pub name: String,
    pub function: FunctionInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateInfo {
    pub name: String,
    pub functions: Vec<NamedFunction>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropInfo {
    pub name: String,
    pub type_name: String,
    pub flags: u8,
    pub read_handler: Option<FunctionInfo>,
    pub write_handler: Option<FunctionInfo>,
    pub auto_var_name: String,
}

impl PropInfo {
    pub const FLAG_READ: u8 = 1;
    pub const FLAG_WRITE: u8 = 2;
    pub const FLAG_AUTOVAR: u8 = 4;

    pub fn read_handler(&self) -> Option<&FunctionInfo> {
        if self.flags & (Self::FLAG_READ | Self::FLAG_AUTOVAR) == Self::FLAG_READ {
            self.read_handler.as_ref()
        } else {
            None
        }
    }

    pub fn write_handler(&self) -> Option<&FunctionInfo> {
        if self.flags & (Self::FLAG_WRITE | Self::FLAG_AUTOVAR) == Self::FLAG_WRITE {
            self.write_handler.as_ref()
        } else {
            None
        }
    }
}

/// One class entry of a compiled script
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectInfo {
    pub name: String,
    pub parent_class_name: String,
    pub auto_state_name: String,
    pub variables: Vec<VariableInfo>,
    pub properties: Vec<PropInfo>,
    pub states: Vec<StateInfo>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringTable {
    storage: Vec<String>,
}

impl StringTable {
    pub fn new(storage: Vec<String>) -> Self {
        Self { storage }
    }

    pub fn contains(&self, s: &str) -> bool {
        self.storage.iter().any(|entry| entry == s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.storage.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

/// A compiled script: one class with its string table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub source: String,
    pub user_flags: u32,
    pub string_table: StringTable,
    pub objects: Vec<ObjectInfo>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn main_object(&self) -> Option<&ObjectInfo> {
        self.objects.first()
    }

    /// Immediate parent class, empty for a root class
    pub fn parent_class_name(&self) -> &str {
        self.main_object()
            .map(|object| object.parent_class_name.as_str())
            .unwrap_or("")
    }
}

struct LazyInner {
    source: String,
    loaded: OnceCell<Rc<Script>>,
    loader: Box<dyn Fn() -> Script>,
}

/// Shared handle to a script that is only materialized on first use
#[derive(Clone)]
pub struct LazyScript {
    inner: Rc<LazyInner>,
}

impl LazyScript {
    pub fn new(source: impl Into<String>, loader: impl Fn() -> Script + 'static) -> Self {
        Self {
            inner: Rc::new(LazyInner {
                source: source.into(),
                loaded: OnceCell::new(),
                loader: Box::new(loader),
            }),
        }
    }

    pub fn from_script(script: Script) -> Self {
        let source = script.source.clone();
        let loaded = OnceCell::new();
        let _ = loaded.set(Rc::new(script));
        Self {
            inner: Rc::new(LazyInner {
                source,
                loaded,
                loader: Box::new(Script::default),
            }),
        }
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.get().is_some()
    }

    pub fn get(&self) -> &Rc<Script> {
        self.inner
            .loaded
            .get_or_init(|| Rc::new((self.inner.loader)()))
    }
}

impl fmt::Debug for LazyScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<script {}>", self.inner.source)
    }
}

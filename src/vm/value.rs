use crate::bytecode::Operand;
use crate::vm::caller::GameObject;
use crate::vm::promise::Promise;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops;
use std::rc::Rc;
use tracing::{error, warn};

pub type ObjectHandle = Rc<dyn GameObject>;

/// Shared, independently resizable array payload
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Storage location an operand resolves to
pub type Slot = Rc<RefCell<Value>>;

pub fn slot(value: Value) -> Slot {
    Rc::new(RefCell::new(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    None,
    Object,
    String,
    Integer,
    Float,
    Bool,
    Identifier,
    ObjectArray,
    StringArray,
    IntArray,
    FloatArray,
    BoolArray,
}

impl ValueType {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            ValueType::ObjectArray
                | ValueType::StringArray
                | ValueType::IntArray
                | ValueType::FloatArray
                | ValueType::BoolArray
        )
    }

    /// Tag for a declared type name such as `Int`, `Float[]` or `Actor`
    pub fn from_type_name(type_name: &str) -> ValueType {
        let lower = type_name.to_ascii_lowercase();
        match lower.as_str() {
            "int" => ValueType::Integer,
            "float" => ValueType::Float,
            "string" => ValueType::String,
            "bool" => ValueType::Bool,
            "string[]" => ValueType::StringArray,
            "int[]" => ValueType::IntArray,
            "float[]" => ValueType::FloatArray,
            "bool[]" => ValueType::BoolArray,
            _ if lower.ends_with("[]") => ValueType::ObjectArray,
            // "none" and every script class name
            _ => ValueType::Object,
        }
    }

    pub fn element_type(&self) -> ValueType {
        match self {
            ValueType::ObjectArray => ValueType::Object,
            ValueType::StringArray => ValueType::String,
            ValueType::IntArray => ValueType::Integer,
            ValueType::FloatArray => ValueType::Float,
            ValueType::BoolArray => ValueType::Bool,
            other => {
                error!(
                    "ValueType::element_type - Unable to get required type for {:?}",
                    other
                );
                ValueType::Object
            }
        }
    }

    pub fn array_of(&self) -> ValueType {
        match self {
            ValueType::Object => ValueType::ObjectArray,
            ValueType::String => ValueType::StringArray,
            ValueType::Integer => ValueType::IntArray,
            ValueType::Float => ValueType::FloatArray,
            ValueType::Bool => ValueType::BoolArray,
            other => {
                error!(
                    "ValueType::array_of - Unable to get required type for {:?}",
                    other
                );
                ValueType::ObjectArray
            }
        }
    }
}

#[derive(Clone)]
enum Payload {
    None,
    Object(Option<ObjectHandle>),
    String(Rc<str>),
    Identifier(Rc<str>),
    Integer(i32),
    Float(f64),
    Bool(bool),
    Array(ValueType, Option<ArrayRef>),
}

/// Dynamically typed script value.
///
/// The pending handle is orthogonal to the tag: a pending Int becomes a real
/// Int once its promise resolves.
#[derive(Clone)]
pub struct Value {
    payload: Payload,
    object_type: Option<Rc<str>>,
    promise: Option<Promise>,
}

impl Value {
    fn from_payload(payload: Payload) -> Self {
        Self {
            payload,
            object_type: None,
            promise: None,
        }
    }

    pub fn none() -> Self {
        Self::from_payload(Payload::None)
    }

    pub fn object(handle: ObjectHandle) -> Self {
        Self::from_payload(Payload::Object(Some(handle)))
    }

    /// Object-typed value that points at nothing
    pub fn null_object() -> Self {
        Self::from_payload(Payload::Object(None))
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Self::from_payload(Payload::String(Rc::from(s.as_ref())))
    }

    pub fn identifier(name: impl AsRef<str>) -> Self {
        Self::from_payload(Payload::Identifier(Rc::from(name.as_ref())))
    }

    pub fn int(i: i32) -> Self {
        Self::from_payload(Payload::Integer(i))
    }

    pub fn float(f: f64) -> Self {
        Self::from_payload(Payload::Float(f))
    }

    pub fn bool(b: bool) -> Self {
        Self::from_payload(Payload::Bool(b))
    }

    /// Array value; a non-array tag is coerced to its array counterpart
    pub fn array(tag: ValueType, items: Option<ArrayRef>) -> Self {
        let tag = if tag.is_array() { tag } else { tag.array_of() };
        Self::from_payload(Payload::Array(tag, items))
    }

    pub fn array_from(tag: ValueType, items: Vec<Value>) -> Self {
        Self::array(tag, Some(Rc::new(RefCell::new(items))))
    }

    /// Value carrying a pending result
    pub fn pending(promise: Promise) -> Self {
        Self {
            payload: Payload::None,
            object_type: None,
            promise: Some(promise),
        }
    }

    /// Zero value of a tag, what a freshly declared variable holds
    pub fn zero(tag: ValueType) -> Self {
        match tag {
            ValueType::None => Value::none(),
            ValueType::Object => Value::null_object(),
            ValueType::String => Value::string(""),
            ValueType::Identifier => Value::identifier(""),
            ValueType::Integer => Value::int(0),
            ValueType::Float => Value::float(0.0),
            ValueType::Bool => Value::bool(false),
            array => Value::array(array, None),
        }
    }

    /// Zero value for a declared type name, remembering the name for casts
    pub fn zero_of(type_name: &str) -> Self {
        Value::zero(ValueType::from_type_name(type_name)).with_object_type(type_name)
    }

    pub fn with_object_type(mut self, type_name: &str) -> Self {
        self.set_object_type(type_name);
        self
    }

    pub fn set_object_type(&mut self, type_name: &str) {
        self.object_type = if type_name.is_empty() {
            None
        } else {
            Some(Rc::from(type_name))
        };
    }

    /// Declared static type name, empty when unknown
    pub fn object_type(&self) -> &str {
        self.object_type.as_deref().unwrap_or("")
    }

    pub fn value_type(&self) -> ValueType {
        match &self.payload {
            Payload::None => ValueType::None,
            Payload::Object(_) => ValueType::Object,
            Payload::String(_) => ValueType::String,
            Payload::Identifier(_) => ValueType::Identifier,
            Payload::Integer(_) => ValueType::Integer,
            Payload::Float(_) => ValueType::Float,
            Payload::Bool(_) => ValueType::Bool,
            Payload::Array(tag, _) => *tag,
        }
    }

    pub fn promise(&self) -> Option<&Promise> {
        self.promise.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.promise.is_some()
    }

    pub fn is_none(&self) -> bool {
        matches!(self.payload, Payload::None | Payload::Object(None))
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match &self.payload {
            Payload::Object(handle) => handle.as_ref(),
            _ => None,
        }
    }

    /// Text of a String or Identifier value
    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::String(s) | Payload::Identifier(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self.payload, Payload::String(_) | Payload::Identifier(_))
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match &self.payload {
            Payload::Identifier(s) => Some(s),
            _ => None,
        }
    }

    /// String literal equal to `self`, ignoring ASCII case
    pub fn is_self_str(&self) -> bool {
        matches!(&self.payload, Payload::String(s) if s.eq_ignore_ascii_case("self"))
    }

    pub fn array_items(&self) -> Option<&ArrayRef> {
        match &self.payload {
            Payload::Array(_, items) => items.as_ref(),
            _ => None,
        }
    }

    pub fn set_array_items(&mut self, items: Option<ArrayRef>) {
        if let Payload::Array(_, current) = &mut self.payload {
            *current = items;
        } else {
            error!(
                "Value::set_array_items - {:?} is not an array type",
                self.value_type()
            );
        }
    }

    // ==================== Coercions ====================

    pub fn to_int(&self) -> i32 {
        match &self.payload {
            Payload::Integer(i) => *i,
            Payload::Float(f) => *f as i32,
            Payload::Bool(b) => *b as i32,
            Payload::String(s) | Payload::Identifier(s) => parse_leading_int(s),
            Payload::Object(handle) => handle.is_some() as i32,
            Payload::None | Payload::Array(..) => 0,
        }
    }

    pub fn to_float(&self) -> f64 {
        match &self.payload {
            Payload::Integer(i) => *i as f64,
            Payload::Float(f) => *f,
            Payload::Bool(b) => *b as i32 as f64,
            Payload::String(s) | Payload::Identifier(s) => s.trim().parse().unwrap_or(0.0),
            Payload::Object(handle) => handle.is_some() as i32 as f64,
            Payload::None | Payload::Array(..) => 0.0,
        }
    }

    pub fn to_bool(&self) -> bool {
        match &self.payload {
            Payload::Integer(i) => *i != 0,
            Payload::Float(f) => *f != 0.0,
            Payload::Bool(b) => *b,
            Payload::String(s) | Payload::Identifier(s) => !s.is_empty(),
            Payload::Object(handle) => handle.is_some(),
            Payload::Array(_, items) => items.as_ref().is_some_and(|a| !a.borrow().is_empty()),
            Payload::None => false,
        }
    }

    /// Script-visible text of the value
    pub fn to_script_string(&self) -> String {
        match &self.payload {
            Payload::None | Payload::Object(None) => "None".to_string(),
            Payload::Object(Some(handle)) => format!("[{}]", handle.name()),
            Payload::String(s) | Payload::Identifier(s) => s.to_string(),
            Payload::Integer(i) => i.to_string(),
            Payload::Float(f) => format!("{:.6}", f),
            Payload::Bool(true) => "True".to_string(),
            Payload::Bool(false) => "False".to_string(),
            Payload::Array(_, None) => "None".to_string(),
            Payload::Array(_, Some(items)) => {
                let items: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(Value::to_script_string)
                    .collect();
                format!("[{}]", items.join(", "))
            }
        }
    }

    pub fn cast_to_int(&self) -> Value {
        Value::int(self.to_int())
    }

    pub fn cast_to_float(&self) -> Value {
        Value::float(self.to_float())
    }

    pub fn cast_to_bool(&self) -> Value {
        Value::bool(self.to_bool())
    }

    pub fn cast_to_string(&self) -> Value {
        Value::string(self.to_script_string())
    }

    fn numeric_op(
        &self,
        rhs: &Value,
        name: &str,
        int_op: fn(i32, i32) -> Option<i32>,
        float_op: fn(f64, f64) -> f64,
    ) -> Value {
        match (&self.payload, &rhs.payload) {
            (Payload::Integer(a), Payload::Integer(b)) => match int_op(*a, *b) {
                Some(result) => Value::int(result),
                None => {
                    error!("Value::{} - integer division by zero ({} / {})", name, a, b);
                    Value::int(0)
                }
            },
            (
                Payload::Integer(_) | Payload::Float(_),
                Payload::Integer(_) | Payload::Float(_),
            ) => Value::float(float_op(self.to_float(), rhs.to_float())),
            _ => {
                warn!(
                    "Value::{} - unsupported operands {:?} and {:?}",
                    name,
                    self.value_type(),
                    rhs.value_type()
                );
                Value::none()
            }
        }
    }
}

fn parse_leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    s[..end].parse().unwrap_or(0)
}

fn same_object(a: &ObjectHandle, b: &ObjectHandle) -> bool {
    std::ptr::eq(
        Rc::as_ptr(a) as *const (),
        Rc::as_ptr(b) as *const (),
    )
}

impl ops::Add for &Value {
    type Output = Value;

    fn add(self, rhs: &Value) -> Value {
        self.numeric_op(rhs, "add", |a, b| Some(a.wrapping_add(b)), |a, b| a + b)
    }
}

impl ops::Sub for &Value {
    type Output = Value;

    fn sub(self, rhs: &Value) -> Value {
        self.numeric_op(rhs, "sub", |a, b| Some(a.wrapping_sub(b)), |a, b| a - b)
    }
}

impl ops::Mul for &Value {
    type Output = Value;

    fn mul(self, rhs: &Value) -> Value {
        self.numeric_op(rhs, "mul", |a, b| Some(a.wrapping_mul(b)), |a, b| a * b)
    }
}

impl ops::Div for &Value {
    type Output = Value;

    fn div(self, rhs: &Value) -> Value {
        self.numeric_op(rhs, "div", |a, b| a.checked_div(b), |a, b| a / b)
    }
}

impl ops::Rem for &Value {
    type Output = Value;

    fn rem(self, rhs: &Value) -> Value {
        match (&self.payload, &rhs.payload) {
            (Payload::Integer(_), Payload::Integer(_)) => {
                self.numeric_op(rhs, "rem", |a, b| a.checked_rem(b), |a, b| a % b)
            }
            _ => {
                warn!(
                    "Value::rem - unsupported operands {:?} and {:?}",
                    self.value_type(),
                    rhs.value_type()
                );
                Value::none()
            }
        }
    }
}

impl ops::Not for &Value {
    type Output = Value;

    fn not(self) -> Value {
        Value::bool(!self.to_bool())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.is_none() && other.is_none() {
            return true;
        }
        match (&self.payload, &other.payload) {
            (Payload::Integer(a), Payload::Integer(b)) => a == b,
            (
                Payload::Integer(_) | Payload::Float(_),
                Payload::Integer(_) | Payload::Float(_),
            ) => self.to_float() == other.to_float(),
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (
                Payload::String(a) | Payload::Identifier(a),
                Payload::String(b) | Payload::Identifier(b),
            ) => a.eq_ignore_ascii_case(b),
            (Payload::Object(Some(a)), Payload::Object(Some(b))) => same_object(a, b),
            (Payload::Array(_, Some(a)), Payload::Array(_, Some(b))) => Rc::ptr_eq(a, b),
            (Payload::Array(_, None), Payload::Array(_, None)) => true,
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (&self.payload, &other.payload) {
            (Payload::Integer(a), Payload::Integer(b)) => a.partial_cmp(b),
            (
                Payload::Integer(_) | Payload::Float(_) | Payload::Bool(_),
                Payload::Integer(_) | Payload::Float(_) | Payload::Bool(_),
            ) => self.to_float().partial_cmp(&other.to_float()),
            (
                Payload::String(a) | Payload::Identifier(a),
                Payload::String(b) | Payload::Identifier(b),
            ) => Some(a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())),
            _ if self == other => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.promise.is_some() {
            return write!(f, "<pending {:?}>", self.value_type());
        }
        match &self.payload {
            Payload::String(s) => write!(f, "\"{}\"", s),
            Payload::Identifier(s) => write!(f, "<ident {}>", s),
            _ => write!(f, "{}", self.to_script_string()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<&Operand> for Value {
    fn from(operand: &Operand) -> Self {
        match operand {
            Operand::None => Value::none(),
            Operand::Int(i) => Value::int(*i),
            Operand::Float(f) => Value::float(*f),
            Operand::Bool(b) => Value::bool(*b),
            Operand::Str(s) => Value::string(s),
            Operand::Ident(name) => Value::identifier(name),
        }
    }
}

// Papyrus Casts
// Cast opcode dispatch and object-to-object casts through the class graph

use crate::vm::caller::ScriptHost;
use crate::vm::value::{Value, ValueType};
use tracing::{error, trace};

/// What a Cast does, chosen by the destination's tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Object,
    Int,
    Float,
    Bool,
    String,
    /// Verbatim copy, taken by array and identifier destinations
    Passthrough,
}

impl CastKind {
    pub fn for_destination(tag: ValueType) -> Self {
        match tag {
            ValueType::Object => CastKind::Object,
            ValueType::Integer => CastKind::Int,
            ValueType::Float => CastKind::Float,
            ValueType::Bool => CastKind::Bool,
            ValueType::String => CastKind::String,
            _ => CastKind::Passthrough,
        }
    }

    /// Value to store into a destination declared as `type_name`
    pub fn apply(self, host: &dyn ScriptHost, source: &Value, type_name: &str) -> Value {
        match self {
            CastKind::Object => cast_object(host, source, type_name),
            CastKind::Int => source.cast_to_int(),
            CastKind::Float => source.cast_to_float(),
            CastKind::Bool => source.cast_to_bool(),
            CastKind::String => source.cast_to_string(),
            CastKind::Passthrough => source.clone(),
        }
    }
}

/// Cast an object value to the script class `type_name`.
///
/// Tries the native base-class chain of the object first, then the script
/// instances attached to it. A failed cast is a null object, not an error.
pub fn cast_object(host: &dyn ScriptHost, source: &Value, type_name: &str) -> Value {
    if source.value_type() != ValueType::Object {
        trace!("cast {} -> {}: not an object", source, type_name);
        return Value::null_object();
    }
    if source.is_none() {
        trace!("cast {} -> {}: object is None", source, type_name);
        return Value::null_object();
    }

    let mut classes = Vec::new();
    if let Some(found) = cast_to_base_class(host, source, type_name, &mut classes) {
        trace!("cast {} -> {}: base class found", source, type_name);
        return found;
    }
    if let Some(found) = cast_to_attached_script(source, type_name) {
        trace!("cast {} -> {}: attached script found", source, type_name);
        return found;
    }

    trace!(
        "cast {} -> None: match not found, wanted {}, classes are [{}]",
        source,
        type_name,
        classes.join(", ")
    );
    Value::null_object()
}

fn cast_to_base_class(
    host: &dyn ScriptHost,
    source: &Value,
    type_name: &str,
    classes: &mut Vec<String>,
) -> Option<Value> {
    let object = source.as_object()?;
    let mut class_name = object.parent_native_script();

    while !class_name.is_empty() {
        if class_name.eq_ignore_ascii_case(type_name) {
            return Some(source.clone());
        }
        if classes.iter().any(|seen| seen.eq_ignore_ascii_case(&class_name)) {
            error!("cast_object - class cycle at {}", class_name);
            return None;
        }
        classes.push(class_name.clone());

        let Some(script) = host.script_by_name(&class_name) else {
            error!("cast_object - script not found: {}", class_name);
            return None;
        };
        class_name = script.get().parent_class_name().to_string();
    }
    None
}

fn cast_to_attached_script(source: &Value, type_name: &str) -> Option<Value> {
    let object = source.as_object()?;
    object
        .attached_instances()
        .iter()
        .find(|instance| instance.source_name().eq_ignore_ascii_case(type_name))
        .map(|instance| instance.owner())
}

//! Runtime value model
//!
//! The engine never interprets a program. Hosts own a [`Heap`] of composite values and hand
//! [`Value`]s to the hooks; literals travel either raw or inside a [`Shadow`] handle that carries
//! the identity the engine assigned to them.

pub mod natives;

use id_arena::{Arena, Id};
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::module_import::ImportTag;
use crate::state::Identity;

pub type ObjectId = Id<HeapObject>;

/// Signature shared by every native implementation: heap, receiver, arguments.
pub type NativeFn = fn(&mut Heap, &Value, &[Value]) -> Result<Value, RuntimeError>;

/// Property names the taint queries never look through.
pub const HIDDEN_PROPERTIES: &[&str] = &["caller", "callee", "arguments"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowHandle(pub(crate) u64);

impl ShadowHandle {
    pub fn index(&self) -> u64 {
        self.0
    }
}

/// The value exposed to the analyzed program in place of a raw literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Shadow {
    pub handle: ShadowHandle,
    pub identity: Identity,
    pub raw: Box<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(ObjectId),
    Shadow(Shadow),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn is_literal(&self) -> bool {
        !matches!(self, Value::Object(_) | Value::Shadow(_))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self.raw(), Value::Undefined | Value::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.raw(), Value::Undefined)
    }

    /// Strips a shadow handle without consulting the wrap table.
    pub fn raw(&self) -> &Value {
        match self {
            Value::Shadow(shadow) => shadow.raw.raw(),
            other => other,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self.raw() {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.raw() {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.raw() {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_of(&self, heap: &Heap) -> &'static str {
        match self.raw() {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(id) => match heap.get(*id).kind {
                ObjectKind::Function(_) => "function",
                _ => "object",
            },
            Value::Shadow(_) => "object",
        }
    }

    /// String conversion used for property keys and string coercion of primitives.
    pub fn to_key(&self, heap: &Heap) -> String {
        match self.raw() {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(id) => match &heap.get(*id).kind {
                ObjectKind::Function(f) => format!("function {}() {{ [native code] }}", f.name),
                ObjectKind::Array(elems) => elems
                    .iter()
                    .map(|e| if e.is_nullish() { String::new() } else { e.to_key(heap) })
                    .collect::<Vec<_>>()
                    .join(","),
                _ => "[object Object]".to_string(),
            },
            Value::Shadow(shadow) => shadow.raw.to_key(heap),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Call,
    Apply,
    Bind,
    Require,
    Eval,
    FunctionConstructor,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub native: Option<NativeFn>,
    pub builtin: Option<Builtin>,
}

impl Function {
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Plain { constructor: String },
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Function(Function),
    Global,
    ObjectPrototype,
    Json,
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub kind: ObjectKind,
    pub properties: Vec<(String, Value)>,
    pub import: Option<ImportTag>,
}

impl HeapObject {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            import: None,
        }
    }
}

/// Arena of every composite value the analyzed program can reach.
#[derive(Debug)]
pub struct Heap {
    arena: Arena<HeapObject>,
    global: ObjectId,
    object_prototype: ObjectId,
    json: ObjectId,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let global = arena.alloc(HeapObject::new(ObjectKind::Global));
        let object_prototype = arena.alloc(HeapObject::new(ObjectKind::ObjectPrototype));
        let json = arena.alloc(HeapObject::new(ObjectKind::Json));
        let mut heap = Self {
            arena,
            global,
            object_prototype,
            json,
        };
        heap.set_property(global, "JSON", Value::Object(json));
        heap
    }

    pub fn global(&self) -> ObjectId {
        self.global
    }

    pub fn object_prototype(&self) -> ObjectId {
        self.object_prototype
    }

    pub fn json(&self) -> ObjectId {
        self.json
    }

    pub fn alloc(&mut self, object: HeapObject) -> ObjectId {
        self.arena.alloc(object)
    }

    pub fn get(&self, id: ObjectId) -> &HeapObject {
        &self.arena[id]
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut HeapObject {
        &mut self.arena[id]
    }

    pub fn object(&mut self) -> Value {
        self.object_of("Object")
    }

    pub fn object_of(&mut self, constructor: &str) -> Value {
        Value::Object(self.alloc(HeapObject::new(ObjectKind::Plain {
            constructor: constructor.to_string(),
        })))
    }

    pub fn array(&mut self, elements: Vec<Value>) -> Value {
        Value::Object(self.alloc(HeapObject::new(ObjectKind::Array(elements))))
    }

    pub fn map(&mut self) -> Value {
        Value::Object(self.alloc(HeapObject::new(ObjectKind::Map(Vec::new()))))
    }

    pub fn set(&mut self) -> Value {
        Value::Object(self.alloc(HeapObject::new(ObjectKind::Set(Vec::new()))))
    }

    pub fn native_function(&mut self, name: &str, native: NativeFn) -> Value {
        self.function(Function {
            name: name.to_string(),
            native: Some(native),
            builtin: None,
        })
    }

    pub fn script_function(&mut self, name: &str) -> Value {
        self.function(Function {
            name: name.to_string(),
            native: None,
            builtin: None,
        })
    }

    pub fn function(&mut self, function: Function) -> Value {
        Value::Object(self.alloc(HeapObject::new(ObjectKind::Function(function))))
    }

    pub fn function_data(&self, value: &Value) -> Option<&Function> {
        match &self.get(value.as_object()?).kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_function(&self, value: &Value) -> bool {
        self.function_data(value).is_some()
    }

    pub fn is_array(&self, value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|id| matches!(self.get(id).kind, ObjectKind::Array(_)))
    }

    pub fn elements(&self, value: &Value) -> Option<&[Value]> {
        match &self.get(value.as_object()?).kind {
            ObjectKind::Array(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn elements_mut(&mut self, value: &Value) -> Option<&mut Vec<Value>> {
        match &mut self.get_mut(value.as_object()?).kind {
            ObjectKind::Array(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn import_tag(&self, value: &Value) -> Option<&ImportTag> {
        self.get(value.as_object()?).import.as_ref()
    }

    pub fn set_import_tag(&mut self, id: ObjectId, tag: ImportTag) {
        self.get_mut(id).import = Some(tag);
    }

    pub fn get_property(&self, id: ObjectId, key: &str) -> Value {
        let object = self.get(id);
        if let ObjectKind::Array(elems) = &object.kind {
            if key == "length" {
                return Value::Number(elems.len() as f64);
            }
            if let Ok(index) = key.parse::<usize>() {
                return elems.get(index).cloned().unwrap_or(Value::Undefined);
            }
        }
        object
            .properties
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Undefined)
    }

    pub fn set_property(&mut self, id: ObjectId, key: &str, value: Value) {
        let object = self.get_mut(id);
        if let ObjectKind::Array(elems) = &mut object.kind {
            if let Ok(index) = key.parse::<usize>() {
                if index >= elems.len() {
                    elems.resize(index + 1, Value::Undefined);
                }
                elems[index] = value;
                return;
            }
        }
        match object.properties.iter_mut().find(|(name, _)| name == key) {
            Some(slot) => slot.1 = value,
            None => object.properties.push((key.to_string(), value)),
        }
    }

    /// Own data properties, excluding the hidden function bookkeeping names.
    pub fn data_properties(&self, id: ObjectId) -> Vec<(String, Value)> {
        self.get(id)
            .properties
            .iter()
            .filter(|(name, _)| !HIDDEN_PROPERTIES.contains(&name.as_str()))
            .cloned()
            .collect()
    }

    /// Whether `Object.getOwnPropertyNames` would report anything for this value.
    pub fn has_own_properties(&self, value: &Value) -> bool {
        match value.raw() {
            Value::Str(_) => true,
            Value::Object(id) => {
                let object = self.get(*id);
                matches!(object.kind, ObjectKind::Array(_) | ObjectKind::Function(_))
                    || !object.properties.is_empty()
            }
            _ => false,
        }
    }

    pub fn constructor_name(&self, id: ObjectId) -> &str {
        match &self.get(id).kind {
            ObjectKind::Plain { constructor } => constructor,
            ObjectKind::Array(_) => "Array",
            ObjectKind::Map(_) => "Map",
            ObjectKind::Set(_) => "Set",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Global => "Object",
            ObjectKind::ObjectPrototype => "Object",
            ObjectKind::Json => "Object",
        }
    }
}

/// Renders a short, `util.inspect`-like description of a value truncated to `limit` chars.
pub fn inspect(heap: &Heap, value: &Value, limit: usize) -> String {
    let mut out = String::new();
    render(heap, value, 0, &mut out);
    out.chars().take(limit).collect()
}

fn render(heap: &Heap, value: &Value, depth: usize, out: &mut String) {
    match value.raw() {
        Value::Str(s) => out.push_str(&format!("'{}'", s)),
        Value::Object(id) => render_object(heap, *id, depth, out),
        other => out.push_str(&other.to_key(heap)),
    }
}

fn render_object(heap: &Heap, id: ObjectId, depth: usize, out: &mut String) {
    let object = heap.get(id);
    match &object.kind {
        ObjectKind::Function(f) if f.name.is_empty() => out.push_str("[Function (anonymous)]"),
        ObjectKind::Function(f) => out.push_str(&format!("[Function: {}]", f.name)),
        ObjectKind::Global => out.push_str("Object [global]"),
        ObjectKind::ObjectPrototype => out.push_str("[Object: null prototype] {}"),
        ObjectKind::Json => out.push_str("Object [JSON] {}"),
        ObjectKind::Array(_) if depth > 1 => out.push_str("[Array]"),
        ObjectKind::Array(elems) => {
            if elems.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push_str("[ ");
            for (i, elem) in elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render(heap, elem, depth + 1, out);
            }
            out.push_str(" ]");
        }
        ObjectKind::Map(entries) => out.push_str(&format!("Map({}) {{}}", entries.len())),
        ObjectKind::Set(members) => out.push_str(&format!("Set({}) {{}}", members.len())),
        ObjectKind::Plain { .. } if depth > 1 => out.push_str("[Object]"),
        ObjectKind::Plain { .. } => {
            if object.properties.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{ ");
            for (i, (name, prop)) in object.properties.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                render(heap, prop, depth + 1, out);
            }
            out.push_str(" }");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_seeds_builtin_objects() {
        let heap = Heap::new();
        assert_ne!(heap.global(), heap.object_prototype());
        assert_eq!(
            heap.get_property(heap.global(), "JSON"),
            Value::Object(heap.json())
        );
    }

    #[test]
    fn array_properties_are_index_backed() {
        let mut heap = Heap::new();
        let arr = heap.array(vec![Value::from(1.0)]);
        let id = arr.as_object().unwrap();
        heap.set_property(id, "2", Value::from("x"));
        assert_eq!(heap.get_property(id, "length"), Value::Number(3.0));
        assert_eq!(heap.get_property(id, "1"), Value::Undefined);
        assert_eq!(heap.get_property(id, "2"), Value::from("x"));
    }

    #[test]
    fn plain_object_properties_keep_insertion_order() {
        let mut heap = Heap::new();
        let obj = heap.object();
        let id = obj.as_object().unwrap();
        heap.set_property(id, "b", Value::from(1.0));
        heap.set_property(id, "a", Value::from(2.0));
        heap.set_property(id, "b", Value::from(3.0));
        let names: Vec<_> = heap.data_properties(id).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(heap.get_property(id, "b"), Value::Number(3.0));
    }

    #[test]
    fn data_properties_skip_hidden_names() {
        let mut heap = Heap::new();
        let f = heap.script_function("f");
        let id = f.as_object().unwrap();
        heap.set_property(id, "callee", Value::from(1.0));
        heap.set_property(id, "extra", Value::from(2.0));
        assert_eq!(heap.data_properties(id).len(), 1);
    }

    #[test]
    fn numbers_render_like_javascript() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn inspect_truncates_output() {
        let mut heap = Heap::new();
        let obj = heap.object();
        let id = obj.as_object().unwrap();
        heap.set_property(id, "key", Value::from("a fairly long string value"));
        let rendered = inspect(&heap, &obj, 20);
        assert_eq!(rendered.chars().count(), 20);
        assert!(rendered.starts_with("{ key: 'a"));
    }

    #[test]
    fn inspect_names_functions() {
        let mut heap = Heap::new();
        let f = heap.script_function("run");
        assert_eq!(inspect(&heap, &f, 50), "[Function: run]");
    }

    #[test]
    fn type_of_matches_javascript_names() {
        let mut heap = Heap::new();
        let f = heap.script_function("f");
        assert_eq!(Value::Null.type_of(&heap), "object");
        assert_eq!(Value::from("s").type_of(&heap), "string");
        assert_eq!(f.type_of(&heap), "function");
    }
}

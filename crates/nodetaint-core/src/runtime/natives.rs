//! Native method library
//!
//! Rust implementations of the built-in methods the engine models. Hosts use them to execute the
//! real operation, and the precise string model re-invokes the string methods on tagged strings.

use crate::error::RuntimeError;

use super::{Builtin, Function, Heap, HeapObject, NativeFn, ObjectId, ObjectKind, Value};

pub const STRING_METHODS: &[(&str, NativeFn)] = &[
    ("blink", string_blink),
    ("charAt", string_char_at),
    ("charCodeAt", string_char_code_at),
    ("codePointAt", string_code_point_at),
    ("concat", string_concat),
    ("indexOf", string_index_of),
    ("repeat", string_repeat),
    ("replace", string_replace),
    ("slice", string_slice),
    ("split", string_split),
    ("substr", string_substr),
    ("substring", string_substring),
    ("toLowerCase", string_to_lower_case),
    ("toUpperCase", string_to_upper_case),
    ("trim", string_trim),
];

pub const ARRAY_METHODS: &[(&str, NativeFn)] = &[("join", array_join), ("push", array_push)];

pub const MAP_METHODS: &[(&str, NativeFn)] = &[("get", map_get), ("set", map_set)];

pub const SET_METHODS: &[(&str, NativeFn)] = &[("add", set_add), ("values", set_values)];

pub const CHILD_PROCESS_METHODS: &[(&str, NativeFn)] = &[
    ("exec", process_exec),
    ("execFile", process_exec),
    ("execSync", process_exec_sync),
    ("spawn", process_spawn),
    ("spawnSync", process_spawn),
];

/// Handles to the built-in functions and prototype objects a host needs.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub string_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub map_prototype: ObjectId,
    pub set_prototype: ObjectId,
    pub call: Value,
    pub apply: Value,
    pub bind: Value,
    pub require: Value,
    pub eval: Value,
    pub function_constructor: Value,
}

impl Builtins {
    pub fn install(heap: &mut Heap) -> Self {
        let string_prototype = prototype(heap, STRING_METHODS);
        let array_prototype = prototype(heap, ARRAY_METHODS);
        let map_prototype = prototype(heap, MAP_METHODS);
        let set_prototype = prototype(heap, SET_METHODS);
        let call = builtin(heap, "call", Builtin::Call, function_call);
        let apply = builtin(heap, "apply", Builtin::Apply, function_apply);
        let bind = builtin(heap, "bind", Builtin::Bind, unsupported);
        let require = builtin(heap, "require", Builtin::Require, unsupported);
        let eval = builtin(heap, "eval", Builtin::Eval, unsupported);
        let function_constructor =
            builtin(heap, "Function", Builtin::FunctionConstructor, function_constructor);

        let global = heap.global();
        heap.set_property(global, "require", require.clone());
        heap.set_property(global, "eval", eval.clone());
        heap.set_property(global, "Function", function_constructor.clone());

        Self {
            string_prototype,
            array_prototype,
            map_prototype,
            set_prototype,
            call,
            apply,
            bind,
            require,
            eval,
            function_constructor,
        }
    }

    pub fn string_method(&self, heap: &Heap, name: &str) -> Value {
        heap.get_property(self.string_prototype, name)
    }

    pub fn array_method(&self, heap: &Heap, name: &str) -> Value {
        heap.get_property(self.array_prototype, name)
    }

    pub fn map_method(&self, heap: &Heap, name: &str) -> Value {
        heap.get_property(self.map_prototype, name)
    }

    pub fn set_method(&self, heap: &Heap, name: &str) -> Value {
        heap.get_property(self.set_prototype, name)
    }
}

/// Builds the exports object of the `child_process` built-in module.
pub fn child_process_module(heap: &mut Heap) -> Value {
    let id = prototype(heap, CHILD_PROCESS_METHODS);
    Value::Object(id)
}

fn prototype(heap: &mut Heap, methods: &[(&str, NativeFn)]) -> ObjectId {
    let id = heap.alloc(HeapObject::new(ObjectKind::Plain {
        constructor: "Object".to_string(),
    }));
    for (name, native) in methods {
        let f = heap.native_function(name, *native);
        heap.set_property(id, name, f);
    }
    id
}

fn builtin(heap: &mut Heap, name: &str, builtin: Builtin, native: NativeFn) -> Value {
    heap.function(Function {
        name: name.to_string(),
        native: Some(native),
        builtin: Some(builtin),
    })
}

fn this_str<'a>(this: &'a Value, method: &str) -> Result<&'a str, RuntimeError> {
    this.as_str().ok_or_else(|| {
        RuntimeError::Type(format!("String.prototype.{method} called on a non-string"))
    })
}

fn arg_string(heap: &Heap, args: &[Value], index: usize) -> Option<String> {
    args.get(index)
        .filter(|v| !v.is_undefined())
        .map(|v| v.to_key(heap))
}

/// ToIntegerOrInfinity, with `default` for missing or undefined arguments.
fn arg_integer(args: &[Value], index: usize, default: i64) -> i64 {
    match args.get(index).map(Value::raw) {
        None | Some(Value::Undefined) => default,
        Some(Value::Number(n)) if n.is_nan() => 0,
        Some(Value::Number(n)) if n.is_infinite() => {
            if *n > 0.0 {
                i64::MAX
            } else {
                i64::MIN
            }
        }
        Some(Value::Number(n)) => n.trunc() as i64,
        Some(Value::Bool(b)) => i64::from(*b),
        Some(Value::Str(s)) => s.trim().parse::<f64>().map(|n| n.trunc() as i64).unwrap_or(0),
        Some(_) => 0,
    }
}

fn clamp(index: i64, len: usize) -> usize {
    index.clamp(0, len as i64) as usize
}

fn relative(index: i64, len: usize) -> usize {
    if index < 0 {
        clamp(len as i64 + index.max(-(len as i64)), len)
    } else {
        clamp(index, len)
    }
}

fn char_slice(chars: &[char], start: usize, end: usize) -> Value {
    if start >= end {
        return Value::string("");
    }
    Value::string(chars[start..end].iter().collect::<String>())
}

fn string_blink(_heap: &mut Heap, this: &Value, _args: &[Value]) -> Result<Value, RuntimeError> {
    let s = this_str(this, "blink")?;
    Ok(Value::string(format!("<blink>{s}</blink>")))
}

fn string_char_at(_heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = this_str(this, "charAt")?;
    let index = arg_integer(args, 0, 0);
    let ch = usize::try_from(index).ok().and_then(|i| s.chars().nth(i));
    Ok(Value::string(ch.map(String::from).unwrap_or_default()))
}

fn string_char_code_at(
    _heap: &mut Heap,
    this: &Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let s = this_str(this, "charCodeAt")?;
    let index = arg_integer(args, 0, 0);
    let code = usize::try_from(index)
        .ok()
        .and_then(|i| s.chars().nth(i))
        .map(|c| f64::from(u32::from(c)))
        .unwrap_or(f64::NAN);
    Ok(Value::Number(code))
}

fn string_code_point_at(
    _heap: &mut Heap,
    this: &Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let s = this_str(this, "codePointAt")?;
    let index = arg_integer(args, 0, 0);
    Ok(usize::try_from(index)
        .ok()
        .and_then(|i| s.chars().nth(i))
        .map(|c| Value::Number(f64::from(u32::from(c))))
        .unwrap_or(Value::Undefined))
}

fn string_concat(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = this_str(this, "concat")?.to_string();
    for arg in args {
        out.push_str(&arg.to_key(heap));
    }
    Ok(Value::string(out))
}

fn string_index_of(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = this_str(this, "indexOf")?;
    let needle = arg_string(heap, args, 0).unwrap_or_else(|| "undefined".to_string());
    let found = s
        .find(&needle)
        .map(|byte| s[..byte].chars().count() as f64)
        .unwrap_or(-1.0);
    Ok(Value::Number(found))
}

fn string_repeat(_heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = this_str(this, "repeat")?;
    let count = arg_integer(args, 0, 0);
    let count = usize::try_from(count)
        .map_err(|_| RuntimeError::Range(format!("Invalid count value: {count}")))?;
    Ok(Value::string(s.repeat(count)))
}

fn string_replace(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = this_str(this, "replace")?;
    let pattern = arg_string(heap, args, 0).unwrap_or_else(|| "undefined".to_string());
    let replacement = arg_string(heap, args, 1).unwrap_or_else(|| "undefined".to_string());
    Ok(Value::string(s.replacen(&pattern, &replacement, 1)))
}

fn string_slice(_heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let chars: Vec<char> = this_str(this, "slice")?.chars().collect();
    let len = chars.len();
    let start = relative(arg_integer(args, 0, 0), len);
    let end = relative(arg_integer(args, 1, len as i64), len);
    Ok(char_slice(&chars, start, end))
}

fn string_split(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = this_str(this, "split")?.to_string();
    let limit = match args.get(1).map(Value::raw) {
        None | Some(Value::Undefined) => usize::MAX,
        _ => usize::try_from(arg_integer(args, 1, 0)).unwrap_or(0),
    };
    let parts: Vec<Value> = match arg_string(heap, args, 0) {
        None => vec![Value::string(&s)],
        Some(sep) if sep.is_empty() => s.chars().map(|c| Value::string(c.to_string())).collect(),
        Some(sep) => s.split(sep.as_str()).map(Value::string).collect(),
    };
    Ok(heap.array(parts.into_iter().take(limit).collect()))
}

fn string_substr(_heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let chars: Vec<char> = this_str(this, "substr")?.chars().collect();
    let len = chars.len();
    let start = relative(arg_integer(args, 0, 0), len);
    let count = clamp(arg_integer(args, 1, len as i64), len);
    Ok(char_slice(&chars, start, (start + count).min(len)))
}

fn string_substring(
    _heap: &mut Heap,
    this: &Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let chars: Vec<char> = this_str(this, "substring")?.chars().collect();
    let len = chars.len();
    let a = clamp(arg_integer(args, 0, 0), len);
    let b = clamp(arg_integer(args, 1, len as i64), len);
    Ok(char_slice(&chars, a.min(b), a.max(b)))
}

fn string_to_lower_case(
    _heap: &mut Heap,
    this: &Value,
    _args: &[Value],
) -> Result<Value, RuntimeError> {
    Ok(Value::string(this_str(this, "toLowerCase")?.to_lowercase()))
}

fn string_to_upper_case(
    _heap: &mut Heap,
    this: &Value,
    _args: &[Value],
) -> Result<Value, RuntimeError> {
    Ok(Value::string(this_str(this, "toUpperCase")?.to_uppercase()))
}

fn string_trim(_heap: &mut Heap, this: &Value, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::string(this_str(this, "trim")?.trim()))
}

fn array_push(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let elems = heap
        .elements_mut(this)
        .ok_or_else(|| RuntimeError::Type("Array.prototype.push called on a non-array".into()))?;
    elems.extend(args.iter().cloned());
    Ok(Value::Number(elems.len() as f64))
}

fn array_join(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let sep = arg_string(heap, args, 0).unwrap_or_else(|| ",".to_string());
    let elems = heap
        .elements(this)
        .ok_or_else(|| RuntimeError::Type("Array.prototype.join called on a non-array".into()))?;
    let parts: Vec<String> = elems
        .iter()
        .map(|e| if e.is_nullish() { String::new() } else { e.to_key(heap) })
        .collect();
    Ok(Value::string(parts.join(&sep)))
}

/// SameValueZero over raw values.
fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a.raw(), b.raw()) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (x, y) => x == y,
    }
}

fn map_entries<'a>(
    heap: &'a mut Heap,
    this: &Value,
) -> Result<&'a mut Vec<(Value, Value)>, RuntimeError> {
    let id = this
        .as_object()
        .ok_or_else(|| RuntimeError::Type("Map method called on a non-map".into()))?;
    match &mut heap.get_mut(id).kind {
        ObjectKind::Map(entries) => Ok(entries),
        _ => Err(RuntimeError::Type("Map method called on a non-map".into())),
    }
}

fn map_set(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let key = args.first().cloned().unwrap_or(Value::Undefined);
    let value = args.get(1).cloned().unwrap_or(Value::Undefined);
    let entries = map_entries(heap, this)?;
    match entries.iter_mut().find(|(k, _)| same_value_zero(k, &key)) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
    Ok(this.clone())
}

fn map_get(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let key = args.first().cloned().unwrap_or(Value::Undefined);
    let entries = map_entries(heap, this)?;
    Ok(entries
        .iter()
        .find(|(k, _)| same_value_zero(k, &key))
        .map(|(_, v)| v.clone())
        .unwrap_or(Value::Undefined))
}

fn set_members<'a>(heap: &'a mut Heap, this: &Value) -> Result<&'a mut Vec<Value>, RuntimeError> {
    let id = this
        .as_object()
        .ok_or_else(|| RuntimeError::Type("Set method called on a non-set".into()))?;
    match &mut heap.get_mut(id).kind {
        ObjectKind::Set(members) => Ok(members),
        _ => Err(RuntimeError::Type("Set method called on a non-set".into())),
    }
}

fn set_add(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let value = args.first().cloned().unwrap_or(Value::Undefined);
    let members = set_members(heap, this)?;
    if !members.iter().any(|m| same_value_zero(m, &value)) {
        members.push(value);
    }
    Ok(this.clone())
}

/// Materializes the iterator as an array.
fn set_values(heap: &mut Heap, this: &Value, _args: &[Value]) -> Result<Value, RuntimeError> {
    let members = set_members(heap, this)?.clone();
    Ok(heap.array(members))
}

// Process natives record nothing and spawn nothing; hosts only need a callable sink.
fn process_exec(_heap: &mut Heap, _this: &Value, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Undefined)
}

fn process_exec_sync(
    _heap: &mut Heap,
    _this: &Value,
    _args: &[Value],
) -> Result<Value, RuntimeError> {
    Ok(Value::string(""))
}

fn process_spawn(heap: &mut Heap, _this: &Value, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(heap.object_of("ChildProcess"))
}

fn function_call(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = args.first().cloned().unwrap_or(Value::Undefined);
    invoke_native(heap, this, &receiver, args.get(1..).unwrap_or(&[]))
}

fn function_apply(heap: &mut Heap, this: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = args.first().cloned().unwrap_or(Value::Undefined);
    let spread = args
        .get(1)
        .and_then(|a| heap.elements(a))
        .map(<[Value]>::to_vec)
        .unwrap_or_default();
    invoke_native(heap, this, &receiver, &spread)
}

fn function_constructor(
    heap: &mut Heap,
    _this: &Value,
    _args: &[Value],
) -> Result<Value, RuntimeError> {
    Ok(heap.script_function("anonymous"))
}

fn unsupported(heap: &mut Heap, this: &Value, _args: &[Value]) -> Result<Value, RuntimeError> {
    let name = heap
        .function_data(this)
        .map(|f| f.name.clone())
        .unwrap_or_else(|| "function".to_string());
    Err(RuntimeError::Unsupported { name })
}

/// Calls the native implementation behind `f`. Script functions belong to the host.
pub fn invoke_native(
    heap: &mut Heap,
    f: &Value,
    this: &Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let function = heap
        .function_data(f)
        .ok_or_else(|| RuntimeError::Type("value is not a function".into()))?;
    let Some(native) = function.native else {
        return Err(RuntimeError::Unsupported {
            name: function.name.clone(),
        });
    };
    native(heap, this, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(heap: &mut Heap, builtins: &Builtins, name: &str, this: &str, args: &[Value]) -> Value {
        let f = builtins.string_method(heap, name);
        invoke_native(heap, &f, &Value::from(this), args).unwrap()
    }

    #[test]
    fn substring_swaps_reversed_bounds() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let out = call(&mut heap, &b, "substring", "Hello", &[4.0.into(), 1.0.into()]);
        assert_eq!(out, Value::from("ell"));
    }

    #[test]
    fn slice_counts_negative_indices_from_the_end() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let out = call(&mut heap, &b, "slice", "Hello", &[(-3.0).into()]);
        assert_eq!(out, Value::from("llo"));
    }

    #[test]
    fn substr_takes_a_length() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let out = call(&mut heap, &b, "substr", "Hello", &[1.0.into(), 2.0.into()]);
        assert_eq!(out, Value::from("el"));
    }

    #[test]
    fn split_builds_an_array() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let out = call(&mut heap, &b, "split", "a,b,c", &[",".into()]);
        let elems = heap.elements(&out).unwrap();
        assert_eq!(elems, &[Value::from("a"), Value::from("b"), Value::from("c")]);
    }

    #[test]
    fn split_on_empty_separator_yields_chars() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let out = call(&mut heap, &b, "split", "ab", &["".into()]);
        assert_eq!(heap.elements(&out).unwrap().len(), 2);
    }

    #[test]
    fn char_code_at_out_of_range_is_nan() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let out = call(&mut heap, &b, "charCodeAt", "a", &[5.0.into()]);
        assert!(out.as_number().unwrap().is_nan());
    }

    #[test]
    fn concat_coerces_arguments() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let out = call(&mut heap, &b, "concat", "a", &[1.0.into(), true.into()]);
        assert_eq!(out, Value::from("a1true"));
    }

    #[test]
    fn push_and_join_operate_on_arrays() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let arr = heap.array(vec![]);
        let push = b.array_method(&heap, "push");
        let len = invoke_native(&mut heap, &push, &arr, &["x".into(), "y".into()]).unwrap();
        assert_eq!(len, Value::Number(2.0));
        let join = b.array_method(&heap, "join");
        let joined = invoke_native(&mut heap, &join, &arr, &["-".into()]).unwrap();
        assert_eq!(joined, Value::from("x-y"));
    }

    #[test]
    fn map_set_then_get_round_trips() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let map = heap.map();
        let set = b.map_method(&heap, "set");
        let get = b.map_method(&heap, "get");
        invoke_native(&mut heap, &set, &map, &["k".into(), 3.0.into()]).unwrap();
        let out = invoke_native(&mut heap, &get, &map, &["k".into()]).unwrap();
        assert_eq!(out, Value::Number(3.0));
    }

    #[test]
    fn set_add_ignores_duplicates() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let set = heap.set();
        let add = b.set_method(&heap, "add");
        invoke_native(&mut heap, &add, &set, &[1.0.into()]).unwrap();
        invoke_native(&mut heap, &add, &set, &[1.0.into()]).unwrap();
        let values = b.set_method(&heap, "values");
        let out = invoke_native(&mut heap, &values, &set, &[]).unwrap();
        assert_eq!(heap.elements(&out).unwrap().len(), 1);
    }

    #[test]
    fn call_forwards_to_native_target() {
        let mut heap = Heap::new();
        let b = Builtins::install(&mut heap);
        let upper = b.string_method(&heap, "toUpperCase");
        let out = invoke_native(&mut heap, &b.call, &upper, &["abc".into()]).unwrap();
        assert_eq!(out, Value::from("ABC"));
    }

    #[test]
    fn script_functions_are_not_invoked() {
        let mut heap = Heap::new();
        let f = heap.script_function("user");
        let err = invoke_native(&mut heap, &f, &Value::Undefined, &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Unsupported { .. }));
    }
}

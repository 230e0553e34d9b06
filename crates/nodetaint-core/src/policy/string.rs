//! Precise string policy
//!
//! Tracks taint per character. Well-known methods have bespoke models; any other native returning
//! a string is re-executed on the encoded operands and its result decoded back into a map.

use crate::encoding::{bits_from_entry, decode, encode};
use crate::error::TaintError;
use crate::provenance::PathNode;
use crate::runtime::Value;
use crate::state::{PropMap, TaintEntry};
use crate::taint::HookContext;

use super::{ModulePolicy, NativeCall, Operands, PolicyKind, Precision, ValueKind};

const BLINK_OPEN: &str = "<blink>";

type Model = fn(&mut HookContext<'_>, NativeCall<'_>) -> Result<bool, TaintError>;

const MODELS: &[(&str, Model)] = &[
    ("blink", blink),
    ("substring", substring),
    ("concat", concat),
    ("toUpperCase", same_shape),
    ("toLowerCase", same_shape),
    ("charCodeAt", char_at_code),
    ("codePointAt", char_at_code),
    ("split", split),
];

pub struct StringPolicy;

/// Per-character taint of any operand: strings use their map, other values repeat their bit
/// over their string form.
pub(crate) fn char_bits(cx: &HookContext<'_>, value: &Value) -> Vec<bool> {
    let raw = cx.value_of(value);
    let entry = cx.entry(value);
    match raw.as_str() {
        Some(s) => bits_from_entry(&entry, s.chars().count()),
        None => vec![entry.taint_bit; raw.to_key(cx.heap).chars().count()],
    }
}

fn char_len(cx: &HookContext<'_>, value: &Value) -> usize {
    cx.value_of(value).to_key(cx.heap).chars().count()
}

/// Stores `bits` as the result's map. A length mismatch means the model does not apply.
fn store_bits(
    cx: &mut HookContext<'_>,
    result: &Value,
    bits: Vec<bool>,
    label: &str,
    parents: Vec<PathNode>,
) -> bool {
    if cx.value_of(result).as_str().map(|s| s.chars().count()) != Some(bits.len()) {
        return false;
    }
    let map = PropMap::from_bits(bits);
    let entry = TaintEntry {
        taint_bit: map.all(),
        path: cx.path(label, parents, result),
        props: Some(map),
    };
    cx.put_entry(result, entry);
    true
}

fn index_arg(cx: &HookContext<'_>, value: Option<&Value>, default: usize, len: usize) -> usize {
    match value.map(|v| cx.value_of(v)) {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.as_number().unwrap_or_else(|| {
                v.to_key(cx.heap).trim().parse::<f64>().unwrap_or(0.0)
            });
            if n.is_nan() || n <= 0.0 {
                0
            } else {
                (n.trunc() as usize).min(len)
            }
        }
    }
}

fn blink(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if !call.args.is_empty() {
        return Ok(false);
    }
    let close = BLINK_OPEN.len() + 1;
    let mut bits = vec![false; BLINK_OPEN.len()];
    bits.extend(char_bits(cx, call.base));
    bits.extend(std::iter::repeat_n(false, close));
    let parents = vec![cx.entry(call.base).path];
    Ok(store_bits(cx, call.result, bits, "model:string.blink", parents))
}

fn substring(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if !matches!(call.args.len(), 1 | 2) {
        return Ok(false);
    }
    let base = char_bits(cx, call.base);
    let len = base.len();
    let a = index_arg(cx, call.args.first(), 0, len);
    let b = index_arg(cx, call.args.get(1), len, len);
    let (start, end) = (a.min(b), a.max(b));
    let bits = base[start..end].to_vec();
    let parents = vec![cx.entry(call.base).path];
    Ok(store_bits(cx, call.result, bits, "model:string.substring", parents))
}

fn concat(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if call.args.is_empty() {
        return Ok(false);
    }
    let mut bits = char_bits(cx, call.base);
    let mut parents = vec![cx.entry(call.base).path];
    for arg in call.args {
        bits.extend(char_bits(cx, arg));
        parents.push(cx.entry(arg).path);
    }
    Ok(store_bits(cx, call.result, bits, "model:string.concat", parents))
}

/// Case conversions keep every character in place.
fn same_shape(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if !call.args.is_empty() {
        return Ok(false);
    }
    let label = format!("model:string.{}", cx.function_name(call.f));
    let bits = char_bits(cx, call.base);
    let parents = vec![cx.entry(call.base).path];
    Ok(store_bits(cx, call.result, bits, &label, parents))
}

fn char_at_code(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if call.args.len() != 1 {
        return Ok(false);
    }
    let label = format!("model:string.{}", cx.function_name(call.f));
    let base = char_bits(cx, call.base);
    let index = index_arg(cx, call.args.first(), 0, base.len());
    let entry = TaintEntry {
        taint_bit: base.get(index).copied().unwrap_or(false),
        props: None,
        path: cx.path(&label, vec![cx.entry(call.base).path], call.result),
    };
    cx.put_entry(call.result, entry);
    Ok(true)
}

fn split(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if call.args.len() > 2 {
        return Ok(false);
    }
    let Some(words) = cx.heap.elements(&cx.value_of(call.result)).map(<[Value]>::to_vec) else {
        return Ok(false);
    };
    if cx.policies.precision(&ValueKind::Array) != Precision::Precise {
        if cx.any_props(call.base) {
            let mut entry = cx.entry(call.result);
            entry.taint_bit = true;
            cx.put_entry(call.result, entry);
        }
        return Ok(true);
    }

    let delimiter = match call.args.first().map(|v| cx.value_of(v)) {
        None | Some(Value::Undefined) => 0,
        Some(v) => v.to_key(cx.heap).chars().count(),
    };
    let base = char_bits(cx, call.base);
    let base_path = cx.entry(call.base).path;
    let mut offset = 0;
    let mut all_words = true;
    let mut fresh = Vec::with_capacity(words.len());
    for (i, word) in words.iter().enumerate() {
        let raw = cx.value_of(word);
        let len = char_len(cx, &raw);
        let start = offset + i * delimiter;
        let bits: Vec<bool> = (start..start + len)
            .map(|j| base.get(j).copied().unwrap_or(false))
            .collect();
        let word_tainted = bits.iter().all(|b| *b);
        all_words &= word_tainted;

        let element = cx.wrap_fresh(raw);
        let map = PropMap::from_bits(bits);
        let entry = TaintEntry {
            taint_bit: word_tainted,
            path: cx.path("model:string.split", vec![base_path.clone()], &element),
            props: Some(map),
        };
        cx.put_entry(&element, entry);
        fresh.push(element);
        offset += len;
    }
    let array = cx.value_of(call.result);
    if let Some(elems) = cx.heap.elements_mut(&array) {
        *elems = fresh;
    }
    if all_words {
        let mut entry = cx.entry(call.result);
        entry.taint_bit = true;
        cx.put_entry(call.result, entry);
    }
    Ok(true)
}

/// Re-runs the native on encoded operands. Returns false when the native cannot be re-run or
/// its decoded output disagrees with the real result.
fn execute_encoded(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> bool {
    let Some(base) = cx.value_of(call.base).as_str().map(str::to_string) else {
        return false;
    };
    let Some(expected) = cx.value_of(call.result).as_str().map(str::to_string) else {
        return false;
    };
    let Some(native) = cx
        .heap
        .function_data(&cx.value_of(call.f))
        .and_then(|function| function.native)
    else {
        return false;
    };

    let Ok(encoded_base) = encode(&base, &char_bits(cx, call.base)) else {
        return false;
    };
    let mut encoded_args = Vec::with_capacity(call.args.len());
    let mut parents = vec![cx.entry(call.base).path];
    for arg in call.args {
        let raw = cx.value_of(arg);
        parents.push(cx.entry(arg).path);
        match raw.as_str() {
            Some(s) => match encode(s, &char_bits(cx, arg)) {
                Ok(encoded) => encoded_args.push(Value::string(encoded)),
                Err(_) => return false,
            },
            None => encoded_args.push(raw),
        }
    }

    let Ok(output) = native(cx.heap, &Value::string(encoded_base), &encoded_args) else {
        return false;
    };
    let Some(output) = output.as_str() else {
        return false;
    };
    let (decoded, bits) = decode(output);
    if decoded != expected {
        return false;
    }
    let label = format!("precise:string.{}", cx.function_name(call.f));
    store_bits(cx, call.result, bits, &label, parents)
}

impl ModulePolicy for StringPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::StringPrecise
    }

    fn t_get_field(&self, cx: &mut HookContext<'_>, ops: Operands<'_>) -> Result<(), TaintError> {
        let base = cx.entry(ops.base);
        let Some(map) = &base.props else {
            return cx.policies.object().t_get_field(cx, ops);
        };
        let key = cx.value_of(ops.offset).to_key(cx.heap);
        let tainted = base.taint_bit || map.get(&key).unwrap_or(false);
        let entry = TaintEntry {
            taint_bit: tainted,
            props: cx.init_prop_map(ops.value, tainted),
            path: cx.path("string.GetField", vec![base.path.clone()], ops.value),
        };
        cx.put_entry(ops.value, entry);
        Ok(())
    }

    fn t_binary(
        &self,
        cx: &mut HookContext<'_>,
        op: &str,
        ops: Operands<'_>,
    ) -> Result<(), TaintError> {
        let left = cx.value_of(ops.base);
        let right = cx.value_of(ops.offset);
        if op != "+" || left.is_undefined() || right.is_undefined() {
            return cx.policies.object().t_binary(cx, op, ops);
        }
        let joined = encode(&left.to_key(cx.heap), &char_bits(cx, ops.base)).and_then(|l| {
            encode(&right.to_key(cx.heap), &char_bits(cx, ops.offset)).map(|r| l + &r)
        });
        let Ok(joined) = joined else {
            return cx.policies.object().t_binary(cx, op, ops);
        };
        let (decoded, bits) = decode(&joined);
        let parents = vec![cx.entry(ops.base).path, cx.entry(ops.offset).path];
        let matches = cx.value_of(ops.value).as_str() == Some(decoded.as_str());
        if !matches || !store_bits(cx, ops.value, bits, "precise:string.concat", parents) {
            return cx.policies.object().t_binary(cx, op, ops);
        }
        Ok(())
    }

    fn t_call(&self, cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<(), TaintError> {
        let name = cx.function_name(call.f);
        if let Some((_, model)) = MODELS.iter().find(|(method, _)| *method == name) {
            if model(cx, call)? {
                return Ok(());
            }
        }
        if execute_encoded(cx, call) {
            return Ok(());
        }
        cx.policies.object().t_call(cx, call)
    }
}

//! Array policies
//!
//! The imprecise variant keeps array elements raw and tracks taint on the array as a whole. The
//! precise variant keeps every element wrapped and narrows a few callback-driven natives.

use crate::error::TaintError;
use crate::provenance::PathNode;
use crate::runtime::Value;
use crate::state::{PropMap, TaintEntry};
use crate::taint::HookContext;

use super::string::char_bits;
use super::{ModulePolicy, NativeCall, PolicyKind};

pub struct ListPolicy {
    imprecise: bool,
}

pub static IMPRECISE: ListPolicy = ListPolicy { imprecise: true };
pub static PRECISE: ListPolicy = ListPolicy { imprecise: false };

type Model = fn(&mut HookContext<'_>, NativeCall<'_>) -> Result<bool, TaintError>;

const IMPRECISE_MODELS: &[(&str, Model)] = &[("push", push)];

const PRECISE_MODELS: &[(&str, Model)] = &[
    ("join", join),
    ("map", map),
    ("reduce", reduce),
    ("reduceRight", reduce),
];

fn elements(cx: &HookContext<'_>, value: &Value) -> Vec<Value> {
    cx.heap
        .elements(&cx.value_of(value))
        .map(<[Value]>::to_vec)
        .unwrap_or_default()
}

/// `a.push(b)`: a tainted argument taints the whole receiver.
fn push(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if call.args.iter().any(|arg| cx.taint_bit(arg)) {
        let base = cx.entry(call.base);
        let entry = TaintEntry {
            taint_bit: true,
            path: cx.path("model:array.push", vec![base.path], call.base),
            props: base.props,
        };
        cx.put_entry(call.base, entry);
    }
    Ok(true)
}

/// Element taint spliced between untainted delimiters.
fn join(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if call.args.len() > 1 {
        return Ok(false);
    }
    let delimiter = match call.args.first().map(|v| cx.value_of(v)) {
        None | Some(Value::Undefined) => 1,
        Some(v) => v.to_key(cx.heap).chars().count(),
    };
    let mut bits = Vec::new();
    let mut parents: Vec<PathNode> = Vec::new();
    for (i, elem) in elements(cx, call.base).iter().enumerate() {
        if i > 0 {
            bits.extend(std::iter::repeat_n(false, delimiter));
        }
        parents.push(cx.entry(elem).path);
        if !elem.is_nullish() {
            bits.extend(char_bits(cx, elem));
        }
    }
    let result_len = cx.value_of(call.result).as_str().map(|s| s.chars().count());
    if result_len != Some(bits.len()) {
        return Ok(false);
    }
    let map = PropMap::from_bits(bits);
    let entry = TaintEntry {
        taint_bit: map.all(),
        path: cx.path("model:array.join", parents, call.result),
        props: Some(map),
    };
    cx.put_entry(call.result, entry);
    Ok(true)
}

/// Narrows only elements the callback produced without provenance of their own.
fn map(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    let inputs = elements(cx, call.base);
    let outputs = elements(cx, call.result);
    if inputs.len() != outputs.len() {
        return Ok(false);
    }
    let base_bit = cx.taint_bit(call.base);
    for (input, output) in inputs.iter().zip(&outputs) {
        if cx.entry(output).path.has_parents() {
            continue;
        }
        let tainted = base_bit || cx.is_tainted(input);
        let entry = TaintEntry {
            taint_bit: tainted,
            props: cx.init_prop_map(output, tainted),
            path: cx.path("model:array.map", vec![cx.entry(input).path], output),
        };
        cx.put_entry(output, entry);
    }
    Ok(true)
}

/// Narrows a result without provenance or tainted members. A callback returning a fresh value
/// with empty provenance is narrowed as well.
fn reduce(cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<bool, TaintError> {
    if cx.entry(call.result).path.has_parents() || cx.any_props(call.result) {
        return Ok(true);
    }
    let mut tainted = cx.taint_bit(call.base);
    let mut parents = Vec::new();
    for elem in elements(cx, call.base) {
        tainted = tainted || cx.is_tainted(&elem);
        if tainted {
            parents.push(cx.entry(&elem).path);
        }
    }
    let entry = TaintEntry {
        taint_bit: tainted,
        props: cx.init_prop_map(call.result, tainted),
        path: cx.path("model:array.reduce", parents, call.result),
    };
    cx.put_entry(call.result, entry);
    Ok(true)
}

impl ListPolicy {
    /// Replaces every element with its raw value.
    fn strip_elements(&self, cx: &mut HookContext<'_>, value: &Value) {
        let stripped: Vec<Value> = elements(cx, value)
            .iter()
            .map(|elem| {
                let raw = cx.unwrap(elem);
                cx.discard();
                raw
            })
            .collect();
        if let Some(elems) = cx.heap.elements_mut(value) {
            *elems = stripped;
        }
    }

    /// Gives every raw literal element an identity of its own.
    fn wrap_elements(&self, cx: &mut HookContext<'_>, value: &Value) {
        let wrapped: Vec<Value> = elements(cx, value)
            .into_iter()
            .map(|elem| cx.wrap_fresh(elem))
            .collect();
        if let Some(elems) = cx.heap.elements_mut(value) {
            *elems = wrapped;
        }
    }

    fn models(&self) -> &'static [(&'static str, Model)] {
        if self.imprecise {
            IMPRECISE_MODELS
        } else {
            PRECISE_MODELS
        }
    }
}

impl ModulePolicy for ListPolicy {
    fn kind(&self) -> PolicyKind {
        if self.imprecise {
            PolicyKind::ListImprecise
        } else {
            PolicyKind::ListPrecise
        }
    }

    fn is_tainted(&self, cx: &HookContext<'_>, value: &Value) -> bool {
        cx.taint_bit(value)
    }

    fn wrap_pre(&self, cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        if self.imprecise {
            self.strip_elements(cx, &value);
        } else {
            self.wrap_elements(cx, &value);
        }
        Ok(value)
    }

    fn w_put_field_pre(
        &self,
        cx: &mut HookContext<'_>,
        value: Value,
    ) -> Result<Value, TaintError> {
        if self.imprecise {
            return Ok(cx.unwrap(&value));
        }
        Ok(value)
    }

    fn w_put_field(&self, cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        if self.imprecise {
            return cx.wrap(value);
        }
        Ok(value)
    }

    fn w_invoke_fun_pre(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        base: &Value,
        args: &[Value],
    ) -> Result<Vec<Value>, TaintError> {
        if self.imprecise {
            return cx.policies.object().w_invoke_fun_pre(cx, f, base, args);
        }
        for arg in args {
            cx.reserve(arg);
        }
        Ok(args.to_vec())
    }

    fn w_invoke_fun(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TaintError> {
        if self.imprecise {
            return cx.policies.object().w_invoke_fun(cx, f, args);
        }
        let mut wrapped = Vec::with_capacity(args.len());
        for arg in args.into_iter().rev() {
            wrapped.push(cx.wrap(arg)?);
        }
        wrapped.reverse();
        Ok(wrapped)
    }

    fn t_call(&self, cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<(), TaintError> {
        let name = cx.function_name(call.f);
        if let Some((_, model)) = self.models().iter().find(|(method, _)| *method == name) {
            if model(cx, call)? {
                return Ok(());
            }
        }
        cx.policies.object().t_call(cx, call)
    }
}

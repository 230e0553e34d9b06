//! Generic object policy
//!
//! The fallback for every kind without a policy of its own. The imprecise variant treats an object
//! as tainted as soon as one of its properties is, and taints the receiver of every tainted write.

use std::collections::HashMap;

use crate::error::{FindingKind, TaintError};
use crate::runtime::Value;
use crate::state::TaintEntry;
use crate::taint::HookContext;

use super::{ModulePolicy, NativeCall, Operands, PolicyKind, imprecise_call};

const PROTOTYPE_ALIASES: &[&str] = &["prototype", "__proto__"];

pub struct ObjectPolicy {
    imprecise: bool,
}

pub static IMPRECISE: ObjectPolicy = ObjectPolicy { imprecise: true };
pub static PRECISE: ObjectPolicy = ObjectPolicy { imprecise: false };

/// Refuses tainted writes that would reach the prototype chain.
pub(crate) fn check_pollution(cx: &HookContext<'_>, ops: Operands<'_>) -> Result<(), TaintError> {
    let key = cx.value_of(ops.offset);
    if key.is_nullish() || !cx.is_tainted(ops.value) {
        return Ok(());
    }
    let key = key.to_key(cx.heap);
    let base_is_prototype = cx.value_of(ops.base).as_object() == Some(cx.heap.object_prototype());
    if PROTOTYPE_ALIASES.contains(&key.as_str()) || base_is_prototype {
        return Err(TaintError::finding(
            FindingKind::PrototypePollution {
                property: key.clone(),
            },
            format!("Detected modification of prototype with tainted value: {key}"),
            vec![cx.entry(ops.value).path],
        ));
    }
    Ok(())
}

impl ObjectPolicy {
    fn define_property_pre(
        &self,
        cx: &mut HookContext<'_>,
        args: &[Value],
    ) -> Result<Vec<Value>, TaintError> {
        let mut unwrapped = Vec::with_capacity(args.len());
        let mut trees = HashMap::new();
        for (i, arg) in args.iter().enumerate() {
            // the descriptor's value keeps its shadow so the defined property stays tracked
            let descriptor = (i == 2).then(|| cx.value_of(arg).as_object()).flatten();
            let saved = descriptor
                .map(|id| cx.heap.get_property(id, "value"))
                .filter(|v| !v.is_undefined());
            let mut arg_trees = Vec::new();
            let raw = cx.unwrap_object(arg, &mut arg_trees);
            if let (Some(id), Some(value)) = (descriptor, saved) {
                cx.heap.set_property(id, "value", value);
            }
            if let (Some(id), false) = (raw.as_object(), arg_trees.is_empty()) {
                trees.insert(id, arg_trees);
            }
            unwrapped.push(raw);
        }
        cx.state.frame.taint_trees = trees;
        Ok(unwrapped)
    }
}

impl ModulePolicy for ObjectPolicy {
    fn kind(&self) -> PolicyKind {
        if self.imprecise {
            PolicyKind::ObjectImprecise
        } else {
            PolicyKind::ObjectPrecise
        }
    }

    fn is_tainted(&self, cx: &HookContext<'_>, value: &Value) -> bool {
        if self.imprecise {
            cx.is_tainted(value)
        } else {
            cx.taint_bit(value)
        }
    }

    fn wrap_pre(&self, _cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        Ok(value)
    }

    fn w_get_field(&self, cx: &mut HookContext<'_>, result: Value) -> Result<Value, TaintError> {
        cx.wrap(result)
    }

    // The written value keeps its shadow; its taint entry survives the store.
    fn w_put_field_pre(
        &self,
        _cx: &mut HookContext<'_>,
        value: Value,
    ) -> Result<Value, TaintError> {
        Ok(value)
    }

    fn w_put_field(&self, _cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        Ok(value)
    }

    fn w_invoke_fun_pre(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        _base: &Value,
        args: &[Value],
    ) -> Result<Vec<Value>, TaintError> {
        if cx.function_name(f) == "defineProperty" {
            return self.define_property_pre(cx, args);
        }
        let mut unwrapped = Vec::with_capacity(args.len());
        let mut trees = HashMap::new();
        for arg in args {
            let mut arg_trees = Vec::new();
            let raw = cx.unwrap_object(arg, &mut arg_trees);
            if let (Some(id), false) = (raw.as_object(), arg_trees.is_empty()) {
                trees.insert(id, arg_trees);
            }
            unwrapped.push(raw);
        }
        cx.state.frame.taint_trees = trees;
        Ok(unwrapped)
    }

    fn w_invoke_fun(
        &self,
        cx: &mut HookContext<'_>,
        _f: &Value,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TaintError> {
        let mut wrapped = Vec::with_capacity(args.len());
        for arg in args.into_iter().rev() {
            if let Some(id) = arg.as_object() {
                if let Some(trees) = cx.state.frame.taint_trees.get(&id).cloned() {
                    cx.wrap_object(id, &trees)?;
                }
            }
            wrapped.push(cx.wrap(arg)?);
        }
        wrapped.reverse();
        Ok(wrapped)
    }

    fn t_get_field(&self, cx: &mut HookContext<'_>, ops: Operands<'_>) -> Result<(), TaintError> {
        let base = cx.entry(ops.base);
        let entry = match cx.stored_entry(ops.value).cloned() {
            Some(existing) => TaintEntry {
                taint_bit: self.is_tainted(cx, ops.base) || self.is_tainted(cx, ops.value),
                path: cx.path("object.GetField", vec![base.path, existing.path], ops.value),
                props: existing.props,
            },
            None => TaintEntry {
                taint_bit: self.is_tainted(cx, ops.base),
                props: cx.init_prop_map(ops.value, base.taint_bit),
                path: cx.path("object.GetField", vec![base.path], ops.value),
            },
        };
        cx.put_entry(ops.value, entry);
        Ok(())
    }

    fn t_put_field(&self, cx: &mut HookContext<'_>, ops: Operands<'_>) -> Result<(), TaintError> {
        check_pollution(cx, ops)?;
        if !self.imprecise {
            return Ok(());
        }
        let base = cx.entry(ops.base);
        let written = cx.entry(ops.value);
        let tainted = self.is_tainted(cx, ops.base) || self.is_tainted(cx, ops.value);
        let entry = TaintEntry {
            taint_bit: tainted,
            props: cx.init_prop_map(ops.base, tainted),
            path: cx.path("object.putField", vec![base.path, written.path], ops.value),
        };
        cx.put_entry(ops.base, entry);
        Ok(())
    }

    fn t_binary(
        &self,
        cx: &mut HookContext<'_>,
        op: &str,
        ops: Operands<'_>,
    ) -> Result<(), TaintError> {
        let left = cx.entry(ops.base);
        let right = cx.entry(ops.offset);
        let tainted = self.is_tainted(cx, ops.base) || self.is_tainted(cx, ops.offset);
        let entry = TaintEntry {
            taint_bit: tainted,
            props: cx.init_prop_map(ops.value, tainted),
            path: cx.path(op, vec![left.path, right.path], ops.value),
        };
        cx.put_entry(ops.value, entry);
        Ok(())
    }

    fn t_unary(
        &self,
        cx: &mut HookContext<'_>,
        operand: &Value,
        result: &Value,
    ) -> Result<(), TaintError> {
        let source = cx.entry(operand);
        let entry = TaintEntry {
            taint_bit: self.is_tainted(cx, operand),
            props: cx.init_prop_map(result, source.taint_bit),
            path: cx.path("object.Unary", vec![source.path], operand),
        };
        cx.put_entry(result, entry);
        Ok(())
    }

    fn t_call(&self, cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<(), TaintError> {
        imprecise_call(cx, Some(self), call)
    }
}

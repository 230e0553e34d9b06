//! Map policies
//!
//! Imprecise maps hold raw values and carry one taint bit for the whole container; precise maps
//! keep their values wrapped, so their natives need no taint rules.

use crate::error::TaintError;
use crate::runtime::{ObjectKind, Value};
use crate::state::TaintEntry;
use crate::taint::HookContext;

use super::{ModulePolicy, NativeCall, PolicyKind};

pub struct MapPolicy {
    imprecise: bool,
}

pub static IMPRECISE: MapPolicy = MapPolicy { imprecise: true };
pub static PRECISE: MapPolicy = MapPolicy { imprecise: false };

/// Any tainted argument taints the receiver, keeping its map.
pub(super) fn taint_receiver(cx: &mut HookContext<'_>, call: NativeCall<'_>, label: &str) {
    if !call.args.iter().any(|arg| cx.is_tainted(arg)) {
        return;
    }
    let base = cx.entry(call.base);
    let entry = TaintEntry {
        taint_bit: true,
        path: cx.path(label, vec![base.path], call.base),
        props: base.props,
    };
    cx.put_entry(call.base, entry);
}

/// A read out of a tainted container is tainted.
pub(super) fn taint_read(cx: &mut HookContext<'_>, call: NativeCall<'_>, label: &str) {
    let base = cx.entry(call.base);
    let tainted = cx.taint_bit(call.result) || base.taint_bit || cx.any_props(call.base);
    let entry = TaintEntry {
        taint_bit: tainted,
        props: cx.init_prop_map(call.result, tainted),
        path: cx.path(label, vec![base.path], call.result),
    };
    cx.put_entry(call.result, entry);
}

impl MapPolicy {
    fn rewrite_values(&self, cx: &mut HookContext<'_>, value: &Value) {
        let Some(id) = cx.value_of(value).as_object() else {
            return;
        };
        let ObjectKind::Map(entries) = &cx.heap.get(id).kind else {
            return;
        };
        let entries = entries.clone();
        let rewritten: Vec<(Value, Value)> = entries
            .into_iter()
            .map(|(key, v)| {
                let v = if self.imprecise {
                    let raw = cx.unwrap(&v);
                    cx.discard();
                    raw
                } else {
                    cx.wrap_fresh(v)
                };
                (key, v)
            })
            .collect();
        if let ObjectKind::Map(entries) = &mut cx.heap.get_mut(id).kind {
            *entries = rewritten;
        }
    }
}

impl ModulePolicy for MapPolicy {
    fn kind(&self) -> PolicyKind {
        if self.imprecise {
            PolicyKind::MapImprecise
        } else {
            PolicyKind::MapPrecise
        }
    }

    fn is_tainted(&self, cx: &HookContext<'_>, value: &Value) -> bool {
        cx.taint_bit(value)
    }

    fn wrap_pre(&self, cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        self.rewrite_values(cx, &value);
        Ok(value)
    }

    // `set` stores its value wrapped; only the key is unwrapped.
    fn w_invoke_fun_pre(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        base: &Value,
        args: &[Value],
    ) -> Result<Vec<Value>, TaintError> {
        if self.imprecise || cx.function_name(f) != "set" {
            return cx.policies.object().w_invoke_fun_pre(cx, f, base, args);
        }
        let mut prepared = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            if i == 0 {
                prepared.push(cx.unwrap(arg));
            } else {
                cx.reserve(arg);
                prepared.push(arg.clone());
            }
        }
        Ok(prepared)
    }

    fn w_invoke_fun(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TaintError> {
        if self.imprecise || cx.function_name(f) != "set" {
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
        match (self.imprecise, cx.function_name(call.f).as_str()) {
            (true, "set") => taint_receiver(cx, call, "model:map.set"),
            (true, "get") => taint_read(cx, call, "model:map.get"),
            (false, "set" | "get") => {}
            _ => return cx.policies.object().t_call(cx, call),
        }
        Ok(())
    }
}

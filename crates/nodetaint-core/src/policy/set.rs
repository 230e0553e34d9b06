//! Set policies
//!
//! Mirrors the map policies: imprecise sets hold raw members under one container bit, precise sets
//! keep their members wrapped.

use crate::error::TaintError;
use crate::runtime::{ObjectKind, Value};
use crate::taint::HookContext;

use super::map::{taint_read, taint_receiver};
use super::{ModulePolicy, NativeCall, PolicyKind};

pub struct SetPolicy {
    imprecise: bool,
}

pub static IMPRECISE: SetPolicy = SetPolicy { imprecise: true };
pub static PRECISE: SetPolicy = SetPolicy { imprecise: false };

impl SetPolicy {
    fn rewrite_members(&self, cx: &mut HookContext<'_>, value: &Value) {
        let Some(id) = cx.value_of(value).as_object() else {
            return;
        };
        let ObjectKind::Set(members) = &cx.heap.get(id).kind else {
            return;
        };
        let members = members.clone();
        let rewritten: Vec<Value> = members
            .into_iter()
            .map(|member| {
                if self.imprecise {
                    let raw = cx.unwrap(&member);
                    cx.discard();
                    raw
                } else {
                    cx.wrap_fresh(member)
                }
            })
            .collect();
        if let ObjectKind::Set(members) = &mut cx.heap.get_mut(id).kind {
            *members = rewritten;
        }
    }
}

impl ModulePolicy for SetPolicy {
    fn kind(&self) -> PolicyKind {
        if self.imprecise {
            PolicyKind::SetImprecise
        } else {
            PolicyKind::SetPrecise
        }
    }

    fn is_tainted(&self, cx: &HookContext<'_>, value: &Value) -> bool {
        cx.taint_bit(value)
    }

    fn wrap_pre(&self, cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        self.rewrite_members(cx, &value);
        Ok(value)
    }

    // `add` stores its argument as is.
    fn w_invoke_fun_pre(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        base: &Value,
        args: &[Value],
    ) -> Result<Vec<Value>, TaintError> {
        if self.imprecise || cx.function_name(f) != "add" {
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
        if self.imprecise || cx.function_name(f) != "add" {
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
            (true, "add") => taint_receiver(cx, call, "model:set.add"),
            (true, "values") => taint_read(cx, call, "model:set.values"),
            (false, "add" | "values") => {}
            _ => return cx.policies.object().t_call(cx, call),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyRegistry;
    use crate::runtime::Heap;
    use crate::runtime::natives::{Builtins, invoke_native};
    use crate::state::State;

    #[test]
    fn tainted_members_taint_the_set_and_its_values() {
        let mut heap = Heap::new();
        let builtins = Builtins::install(&mut heap);
        let add = builtins.set_method(&heap, "add");
        let values = builtins.set_method(&heap, "values");
        let set = heap.set();
        let mut state = State::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);

        let secret = cx.wrap_fresh(Value::from("s"));
        cx.set_taint(&secret, true);
        invoke_native(cx.heap, &add, &set, &[Value::from("s")]).unwrap();
        let args = [secret];
        let call = NativeCall {
            f: &add,
            base: &set,
            args: &args,
            result: &set,
        };
        IMPRECISE.t_call(&mut cx, call).unwrap();
        assert!(cx.taint_bit(&set));
        assert_eq!(cx.entry(&set).path.label(), "model:set.add");

        let out = invoke_native(cx.heap, &values, &set, &[]).unwrap();
        let call = NativeCall {
            f: &values,
            base: &set,
            args: &[],
            result: &out,
        };
        IMPRECISE.t_call(&mut cx, call).unwrap();
        assert!(cx.taint_bit(&out));
        assert_eq!(cx.entry(&out).path.label(), "model:set.values");
    }

    #[test]
    fn precise_add_balances_the_identity_stack() {
        let mut heap = Heap::new();
        let builtins = Builtins::install(&mut heap);
        let add = builtins.set_method(&heap, "add");
        let set = heap.set();
        let mut state = State::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);

        let member = cx.wrap_fresh(Value::from(7.0));
        let args = [member.clone()];
        let prepared = PRECISE.w_invoke_fun_pre(&mut cx, &add, &set, &args).unwrap();
        assert_eq!(prepared[0], member);
        assert_eq!(cx.state.pending_ids(), 1);
        let wrapped = PRECISE.w_invoke_fun(&mut cx, &add, prepared).unwrap();
        assert_eq!(wrapped[0], member);
        assert_eq!(cx.state.pending_ids(), 0);
    }

    #[test]
    fn precise_wrapping_tracks_members() {
        let mut heap = Heap::new();
        let set = heap.set();
        let id = set.as_object().unwrap();
        if let ObjectKind::Set(members) = &mut heap.get_mut(id).kind {
            members.push(Value::from("m"));
        }
        let mut state = State::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        PRECISE.wrap_pre(&mut cx, set.clone()).unwrap();
        let ObjectKind::Set(members) = &cx.heap.get(id).kind else {
            panic!("expected a set");
        };
        assert!(cx.state.is_wrapped(&members[0]));
    }
}

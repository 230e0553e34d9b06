//! Lodash policy
//!
//! `each`/`forEach` with a script callback pass their arguments through wrapped, so the callback
//! sees the same shadows the caller held.

use crate::error::TaintError;
use crate::runtime::Value;
use crate::taint::HookContext;

use super::{ModulePolicy, PolicyKind};

const ITERATORS: &[&str] = &["each", "forEach"];

pub struct LodashPolicy;

impl LodashPolicy {
    fn passes_through(cx: &HookContext<'_>, f: &Value, args: &[Value]) -> bool {
        if !ITERATORS.contains(&cx.function_name(f).as_str()) {
            return false;
        }
        let callback = args.get(1).map(|arg| cx.value_of(arg));
        !callback
            .and_then(|cb| cx.heap.function_data(&cb).map(|function| function.is_native()))
            .unwrap_or(false)
    }
}

impl ModulePolicy for LodashPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lodash
    }

    fn w_invoke_fun_pre(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        base: &Value,
        args: &[Value],
    ) -> Result<Vec<Value>, TaintError> {
        if !Self::passes_through(cx, f, args) {
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
        if !Self::passes_through(cx, f, &args) {
            return cx.policies.object().w_invoke_fun(cx, f, args);
        }
        let mut wrapped = Vec::with_capacity(args.len());
        for arg in args.into_iter().rev() {
            wrapped.push(cx.wrap(arg)?);
        }
        wrapped.reverse();
        Ok(wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyRegistry;
    use crate::runtime::Heap;
    use crate::state::State;

    #[test]
    fn script_callbacks_keep_arguments_wrapped() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let each = heap.script_function("each");
        let callback = heap.script_function("visit");
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        let item = cx.wrap_fresh(Value::from("x"));
        let args = [item.clone(), callback];

        let prepared = LodashPolicy
            .w_invoke_fun_pre(&mut cx, &each, &Value::Undefined, &args)
            .unwrap();
        assert_eq!(prepared[0], item);
        let wrapped = LodashPolicy.w_invoke_fun(&mut cx, &each, prepared).unwrap();
        assert_eq!(wrapped[0], item);
        assert_eq!(cx.state.pending_ids(), 0);
    }

    #[test]
    fn native_callbacks_are_unwrapped() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let each = heap.script_function("forEach");
        let callback = heap.native_function("log", |_, _, _| Ok(Value::Undefined));
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        let item = cx.wrap_fresh(Value::from("x"));
        let args = [item, callback];

        let prepared = LodashPolicy
            .w_invoke_fun_pre(&mut cx, &each, &Value::Undefined, &args)
            .unwrap();
        assert_eq!(prepared[0], Value::from("x"));
        LodashPolicy.w_invoke_fun(&mut cx, &each, prepared).unwrap();
        assert_eq!(cx.state.pending_ids(), 0);
    }
}

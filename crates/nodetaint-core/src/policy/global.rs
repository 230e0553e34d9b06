//! Global object policy
//!
//! Reads behave like any object. Writes of tainted values into the global object are findings.

use crate::error::{FindingKind, TaintError};
use crate::runtime::Value;
use crate::taint::HookContext;

use super::{ModulePolicy, NativeCall, Operands, PolicyKind, imprecise_call};

pub struct GlobalPolicy;

impl ModulePolicy for GlobalPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Global
    }

    fn is_tainted(&self, cx: &HookContext<'_>, value: &Value) -> bool {
        cx.taint_bit(value)
    }

    fn t_put_field(&self, cx: &mut HookContext<'_>, ops: Operands<'_>) -> Result<(), TaintError> {
        if !cx.taint_bit(ops.value) {
            return Ok(());
        }
        let value = cx.value_of(ops.value).to_key(cx.heap);
        Err(TaintError::finding(
            FindingKind::GlobalWrite {
                value: value.clone(),
            },
            format!("Attempted modification of global with {value}"),
            vec![cx.entry(ops.value).path],
        ))
    }

    fn t_call(&self, cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<(), TaintError> {
        imprecise_call(cx, None, call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyRegistry;
    use crate::runtime::Heap;
    use crate::state::State;

    #[test]
    fn tainted_global_writes_are_findings() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let global = Value::Object(heap.global());
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        let key = cx.wrap_fresh(Value::from("x"));
        let value = cx.wrap_fresh(Value::from("payload"));
        let ops = Operands {
            base: &global,
            offset: &key,
            value: &value,
        };
        assert!(GlobalPolicy.t_put_field(&mut cx, ops).is_ok());

        cx.set_taint(&value, true);
        let err = GlobalPolicy.t_put_field(&mut cx, ops).unwrap_err();
        assert_eq!(err.to_string(), "Attempted modification of global with payload");
        assert_eq!(err.as_finding().unwrap().kind.as_str(), "global_write");
    }

    #[test]
    fn calls_ignore_the_global_receiver() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let global = Value::Object(heap.global());
        let f = heap.script_function("parseInt");
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        cx.set_taint(&global, true);
        let arg = cx.wrap_fresh(Value::from("1"));
        let result = cx.wrap_fresh(Value::from(1.0));
        let args = [arg.clone()];
        let call = NativeCall {
            f: &f,
            base: &global,
            args: &args,
            result: &result,
        };
        GlobalPolicy.t_call(&mut cx, call).unwrap();
        assert!(!cx.taint_bit(&result));

        cx.set_taint(&arg, true);
        GlobalPolicy.t_call(&mut cx, call).unwrap();
        assert!(cx.taint_bit(&result));
        assert_eq!(cx.entry(&result).path.label(), "imprecise:parseInt");
    }

    #[test]
    fn the_global_object_resolves_to_this_policy() {
        let heap = Heap::new();
        let policies = PolicyRegistry::new();
        let global = Value::Object(heap.global());
        assert_eq!(policies.policy_for(&heap, &global).kind(), PolicyKind::Global);
    }
}

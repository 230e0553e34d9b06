//! Wrap / unwrap protocol
//!
//! Pre-hooks unwrap their operands and push each operand's identity; post-hooks wrap the real
//! operation's inputs and output, popping those identities back in reverse order. Composite values
//! are their own identity, so wrapping them only runs the kind policy's pre-wrap step.

use std::collections::HashSet;

use crate::error::TaintError;
use crate::runtime::{ObjectId, ObjectKind, Shadow, Value};
use crate::state::{Identity, TaintTree};
use crate::taint::HookContext;

impl HookContext<'_> {
    /// Wraps `value` under the identity reserved by the matching pre-hook.
    pub fn wrap(&mut self, value: Value) -> Result<Value, TaintError> {
        if !value.is_literal() {
            let policy = self.policy_for(&value);
            let wrapped = policy.wrap_pre(self, value)?;
            self.state.take_identity();
            return Ok(wrapped);
        }
        let identity = self.state.take_identity();
        Ok(self.shadow(identity, value))
    }

    /// Wraps a literal under a fresh identity, leaving the identity stack alone.
    pub fn wrap_fresh(&mut self, value: Value) -> Value {
        if !value.is_literal() {
            return value;
        }
        let identity = self.state.fresh_identity();
        self.shadow(identity, value)
    }

    fn shadow(&mut self, identity: Identity, value: Value) -> Value {
        if self.state.frame.call_type.skips_wrapping() {
            return value;
        }
        let handle = self.state.fresh_handle();
        self.state
            .wrap_table
            .insert(handle, (identity, value.clone()));
        Value::Shadow(Shadow {
            handle,
            identity,
            raw: Box::new(value),
        })
    }

    /// Unwraps `value`, pushing its identity. Unknown values push a fresh one.
    pub fn unwrap(&mut self, value: &Value) -> Value {
        match self.state.lookup_shadow(value).cloned() {
            Some((identity, raw)) => {
                self.state.push_identity(identity);
                raw
            }
            None => {
                let identity = self.state.fresh_identity();
                self.state.push_identity(identity);
                value.raw().clone()
            }
        }
    }

    /// Pushes the identity of a value that stays wrapped through a native call, so the
    /// post-hook's wrap finds it.
    pub fn reserve(&mut self, value: &Value) {
        let identity = match self.state.lookup_shadow(value) {
            Some((identity, _)) => *identity,
            None => self.state.fresh_identity(),
        };
        self.state.push_identity(identity);
    }

    /// Drops the identity reserved for an operand the post-hook does not rewrap.
    pub fn discard(&mut self) {
        self.state.take_identity();
    }

    fn identity_of(&mut self, value: &Value) -> Identity {
        match self.state.lookup_shadow(value) {
            Some((identity, _)) => *identity,
            None => self.state.fresh_identity(),
        }
    }

    /// Property names the tree walk visits: array indices or data properties.
    fn own_keys(&self, id: ObjectId) -> Vec<String> {
        match &self.heap.get(id).kind {
            ObjectKind::Array(elems) => (0..elems.len()).map(|i| i.to_string()).collect(),
            _ => self
                .heap
                .data_properties(id)
                .into_iter()
                .map(|(name, _)| name)
                .collect(),
        }
    }

    /// Replaces every shadow reachable through the properties of `value` with its raw literal and
    /// records the identities found. The value itself is then unwrapped, pushing one identity.
    pub fn unwrap_object(&mut self, value: &Value, trees: &mut Vec<TaintTree>) -> Value {
        let mut visited = HashSet::new();
        if let Some(id) = self.value_of(value).as_object() {
            visited.insert(id);
            self.strip_properties(id, trees, &mut visited);
        }
        self.unwrap(value)
    }

    fn strip_properties(
        &mut self,
        id: ObjectId,
        trees: &mut Vec<TaintTree>,
        visited: &mut HashSet<ObjectId>,
    ) {
        for property in self.own_keys(id) {
            let child = self.heap.get_property(id, &property);
            let mut branch = TaintTree {
                property: property.clone(),
                identity: None,
                children: Vec::new(),
            };
            if let Some(child_id) = self.value_of(&child).as_object() {
                if !visited.insert(child_id) {
                    continue;
                }
                self.strip_properties(child_id, &mut branch.children, visited);
            }
            branch.identity = Some(self.identity_of(&child));
            let raw = self.value_of(&child);
            self.heap.set_property(id, &property, raw);
            trees.push(branch);
        }
    }

    /// Re-wraps the properties stripped by [`Self::unwrap_object`] under their recorded
    /// identities.
    pub fn wrap_object(&mut self, id: ObjectId, trees: &[TaintTree]) -> Result<(), TaintError> {
        for branch in trees {
            if !self.has_own_key(id, &branch.property) {
                continue;
            }
            let identity = match branch.identity {
                Some(identity) => identity,
                None => self.state.fresh_identity(),
            };
            self.state.push_identity(identity);
            let current = self.heap.get_property(id, &branch.property);
            let wrapped = self.wrap(current)?;
            if let Some(child_id) = wrapped.as_object() {
                self.wrap_object(child_id, &branch.children)?;
            }
            self.heap.set_property(id, &branch.property, wrapped);
        }
        Ok(())
    }

    fn has_own_key(&self, id: ObjectId, key: &str) -> bool {
        let object = self.heap.get(id);
        match &object.kind {
            ObjectKind::Array(elems) => key.parse::<usize>().is_ok_and(|i| i < elems.len()),
            _ => object.properties.iter().any(|(name, _)| name == key),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::policy::PolicyRegistry;
    use crate::runtime::{Heap, Value};
    use crate::state::{CallType, State};
    use crate::taint::HookContext;

    #[test]
    fn unwrap_then_wrap_keeps_the_identity() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);

        let first = cx.wrap(Value::from("x")).unwrap();
        let raw = cx.unwrap(&first);
        assert_eq!(raw, Value::from("x"));
        assert_eq!(cx.state.pending_ids(), 1);
        let again = cx.wrap(raw).unwrap();
        assert_eq!(cx.state.pending_ids(), 0);

        let id_of = |v: &Value| match v {
            Value::Shadow(shadow) => shadow.identity,
            _ => panic!("expected a shadow"),
        };
        assert_eq!(id_of(&first), id_of(&again));
    }

    #[test]
    fn unknown_values_push_a_dummy_identity() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let obj = heap.object();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        assert_eq!(cx.unwrap(&obj), obj);
        assert_eq!(cx.state.pending_ids(), 1);
        assert_eq!(cx.wrap(obj.clone()).unwrap(), obj);
        assert_eq!(cx.state.pending_ids(), 0);
    }

    #[test]
    fn native_frames_leave_literals_raw() {
        let mut state = State::new();
        state.set_call_type(CallType::Native);
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        assert_eq!(cx.wrap(Value::from(1.0)).unwrap(), Value::from(1.0));
        assert_eq!(cx.state.wrapped_count(), 0);
    }

    #[test]
    fn object_trees_restore_shadowed_properties() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let outer = heap.object();
        let inner = heap.object();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);

        let secret = cx.wrap(Value::from("secret")).unwrap();
        cx.set_taint(&secret, true);
        let inner_id = inner.as_object().unwrap();
        let outer_id = outer.as_object().unwrap();
        cx.heap.set_property(inner_id, "s", secret.clone());
        cx.heap.set_property(outer_id, "inner", inner.clone());

        let mut trees = Vec::new();
        let raw = cx.unwrap_object(&outer, &mut trees);
        assert_eq!(raw, outer);
        assert_eq!(cx.heap.get_property(inner_id, "s"), Value::from("secret"));
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].children[0].property, "s");

        cx.wrap_object(outer_id, &trees).unwrap();
        let restored = cx.heap.get_property(inner_id, "s");
        assert!(cx.is_tainted(&restored));
        // the argument's own identity is still reserved
        assert_eq!(cx.state.pending_ids(), 1);
    }
}

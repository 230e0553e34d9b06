//! Taint queries and updates
//!
//! [`HookContext`] bundles the borrows every hook needs (the shadow state, the host heap and the
//! policy registry) and carries the primitive taint operations the policies are written in.

use crate::error::{FindingKind, TaintError};
use crate::policy::{ModulePolicy, PolicyRegistry};
use crate::provenance::{PathNode, SNAPSHOT_LIMIT, TAINTED_LABEL, UNTAINTED_LABEL};
use crate::runtime::{Heap, ObjectKind, Value, inspect};
use crate::state::{PropMap, State, TaintEntry};

pub struct HookContext<'a> {
    pub state: &'a mut State,
    pub heap: &'a mut Heap,
    pub policies: &'a PolicyRegistry,
}

impl<'a> HookContext<'a> {
    pub fn new(state: &'a mut State, heap: &'a mut Heap, policies: &'a PolicyRegistry) -> Self {
        Self {
            state,
            heap,
            policies,
        }
    }

    pub fn value_of(&self, value: &Value) -> Value {
        self.state.value_of(value)
    }

    /// Short rendering of the underlying value, as stored in provenance nodes.
    pub fn snapshot(&self, value: &Value) -> String {
        inspect(self.heap, &self.value_of(value), SNAPSHOT_LIMIT)
    }

    pub fn policy_for(&self, value: &Value) -> &'static dyn ModulePolicy {
        self.policies.policy_for(self.heap, &self.value_of(value))
    }

    /// Name of the function behind `f`; anonymous functions read as `anonymous`.
    pub fn function_name(&self, f: &Value) -> String {
        match self.heap.function_data(&self.value_of(f)) {
            Some(function) if !function.name.is_empty() => function.name.clone(),
            _ => "anonymous".to_string(),
        }
    }

    pub fn path(&self, label: &str, parents: Vec<PathNode>, value: &Value) -> PathNode {
        PathNode::new(label, parents, &self.snapshot(value))
    }

    /// A fresh per-character map for strings; every other value has none.
    pub fn init_prop_map(&self, value: &Value, tainted: bool) -> Option<PropMap> {
        self.value_of(value)
            .as_str()
            .map(|s| PropMap::new(s.chars().count(), tainted))
    }

    pub fn stored_entry(&self, value: &Value) -> Option<&TaintEntry> {
        self.state
            .key_of(value)
            .and_then(|key| self.state.entry(&key))
    }

    /// The stored entry, or the untainted default for values never tainted.
    pub fn entry(&self, value: &Value) -> TaintEntry {
        match self.stored_entry(value) {
            Some(entry) => entry.clone(),
            None => TaintEntry::untainted(self.init_prop_map(value, false), &self.snapshot(value)),
        }
    }

    /// Stores `entry` for `value`. Raw literals have no key, so the write is dropped.
    pub fn put_entry(&mut self, value: &Value, entry: TaintEntry) {
        if let Some(key) = self.state.key_of(value) {
            self.state.insert_entry(key, entry);
        }
    }

    pub fn taint_bit(&self, value: &Value) -> bool {
        self.stored_entry(value).is_some_and(|entry| entry.taint_bit)
    }

    /// Taint bits of the members a composite value exposes to the queries.
    fn member_bits(&self, value: &Value) -> Vec<bool> {
        let raw = self.value_of(value);
        let Some(id) = raw.as_object() else {
            return Vec::new();
        };
        match &self.heap.get(id).kind {
            ObjectKind::Array(elems) => elems.iter().map(|e| self.taint_bit(e)).collect(),
            _ => self
                .heap
                .data_properties(id)
                .iter()
                .map(|(_, v)| self.taint_bit(v))
                .collect(),
        }
    }

    pub fn any_props(&self, value: &Value) -> bool {
        match self.stored_entry(value).and_then(|e| e.props.as_ref()) {
            Some(map) => map.any(),
            None => self.member_bits(value).into_iter().any(|b| b),
        }
    }

    /// Like [`Self::any_props`], but values without members are never fully tainted.
    pub fn all_props(&self, value: &Value) -> bool {
        match self.stored_entry(value).and_then(|e| e.props.as_ref()) {
            Some(map) => map.all(),
            None => {
                let bits = self.member_bits(value);
                !bits.is_empty() && bits.into_iter().all(|b| b)
            }
        }
    }

    pub fn is_tainted(&self, value: &Value) -> bool {
        self.taint_bit(value) || self.any_props(value)
    }

    /// Taints or clears the whole value.
    pub fn set_taint(&mut self, value: &Value, tainted: bool) {
        let old = self.entry(value);
        let label = if tainted { TAINTED_LABEL } else { UNTAINTED_LABEL };
        let entry = TaintEntry {
            taint_bit: tainted,
            props: self.init_prop_map(value, tainted),
            path: self.path(label, vec![old.path], value),
        };
        self.put_entry(value, entry);
    }

    /// Sets the taint of one character of a string.
    pub fn set_prop_taint(
        &mut self,
        value: &Value,
        key: &str,
        tainted: bool,
    ) -> Result<(), TaintError> {
        let raw = self.value_of(value);
        if raw.as_str().is_none() {
            return Err(TaintError::Encoding(format!(
                "Tried to set property taint on non-string: {}",
                raw.to_key(self.heap)
            )));
        }
        let old = self.entry(value);
        let mut map = match old.props {
            Some(map) => map,
            None => self.init_prop_map(value, false).unwrap_or_else(|| PropMap::new(0, false)),
        };
        map.set(key, tainted)?;
        let label = if tainted { TAINTED_LABEL } else { UNTAINTED_LABEL };
        let entry = TaintEntry {
            taint_bit: map.all(),
            path: self.path(label, vec![old.path], value),
            props: Some(map),
        };
        self.put_entry(value, entry);
        Ok(())
    }

    /// Whole-value taint query: the bit, or every member tainted.
    pub fn taint_all(&self, value: &Value) -> bool {
        let bit = self.taint_bit(value);
        if !self.heap.has_own_properties(&self.value_of(value)) {
            return bit;
        }
        bit || self.all_props(value)
    }

    /// Partial taint query: the bit, or any member tainted.
    pub fn taint_any(&self, value: &Value) -> bool {
        let bit = self.taint_bit(value);
        if !self.heap.has_own_properties(&self.value_of(value)) {
            return bit;
        }
        bit || self.any_props(value)
    }

    /// Taint of one key of a string's map.
    pub fn prop_taint(&self, value: &Value, key: &str) -> Result<bool, TaintError> {
        let entry = self.entry(value);
        let map = entry.props.ok_or_else(|| {
            TaintError::Encoding(format!(
                "TaintEntry does not have a PropMap; object: {}",
                self.snapshot(value)
            ))
        })?;
        map.get(key)
            .ok_or_else(|| TaintError::Encoding(format!("PropMap does not have property: {key}")))
    }

    /// Fails with a finding carrying the value's path when any part of it is tainted.
    pub fn check(&self, value: &Value) -> Result<(), TaintError> {
        if self.taint_any(value) {
            return Err(TaintError::finding(
                FindingKind::TaintedArgument,
                "Tainted argument found",
                vec![self.entry(value).path],
            ));
        }
        Ok(())
    }

    /// Appends an operation node to the value's path without touching its taint.
    pub fn relabel(&mut self, value: &Value, label: &str) {
        let entry = self.entry(value);
        let path = self.path(label, vec![entry.path.clone()], value);
        self.put_entry(value, entry.with_path(path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Shadow, ShadowHandle};

    fn wrapped(state: &mut State, raw: Value) -> Value {
        let identity = state.fresh_identity();
        let handle = state.fresh_handle();
        state.wrap_table.insert(handle, (identity, raw.clone()));
        Value::Shadow(Shadow {
            handle,
            identity,
            raw: Box::new(raw),
        })
    }

    #[test]
    fn untracked_values_read_untainted() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let cx = HookContext::new(&mut state, &mut heap, &policies);
        let entry = cx.entry(&Value::from("abc"));
        assert!(!entry.taint_bit);
        assert_eq!(entry.props.unwrap().char_count(), 3);
        assert!(!entry.path.has_parents());
    }

    #[test]
    fn set_taint_covers_every_character() {
        let mut state = State::new();
        let s = wrapped(&mut state, Value::from("ab"));
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        cx.set_taint(&s, true);
        assert!(cx.taint_all(&s));
        assert!(cx.prop_taint(&s, "1").unwrap());
        assert!(cx.entry(&s).path.is_tainted());
        cx.set_taint(&s, false);
        assert!(!cx.taint_any(&s));
    }

    #[test]
    fn raw_literals_drop_writes() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        cx.set_taint(&Value::from("raw"), true);
        assert!(!cx.is_tainted(&Value::from("raw")));
        assert_eq!(cx.state.taint_entry_count(), 0);
    }

    #[test]
    fn single_character_taint_keeps_the_length_invariant() {
        let mut state = State::new();
        let s = wrapped(&mut state, Value::from("abc"));
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        cx.set_prop_taint(&s, "1", true).unwrap();
        assert!(cx.prop_taint(&s, "length").unwrap());
        assert!(cx.taint_any(&s));
        assert!(!cx.taint_all(&s));
        assert!(cx.set_prop_taint(&s, "7", true).is_err());
    }

    #[test]
    fn composite_members_drive_any_and_all() {
        let mut state = State::new();
        let a = wrapped(&mut state, Value::from("a"));
        let b = wrapped(&mut state, Value::from("b"));
        let mut heap = Heap::new();
        let arr = heap.array(vec![a.clone(), b]);
        let empty = heap.array(vec![]);
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        cx.set_taint(&a, true);
        assert!(cx.any_props(&arr));
        assert!(!cx.all_props(&arr));
        assert!(!cx.all_props(&empty));
        assert!(cx.is_tainted(&arr));
    }

    #[test]
    fn prop_taint_requires_a_map() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let obj = heap.object();
        let policies = PolicyRegistry::new();
        let cx = HookContext::new(&mut state, &mut heap, &policies);
        let err = cx.prop_taint(&obj, "0").unwrap_err();
        assert!(err.to_string().starts_with("TaintEntry does not have a PropMap"));
    }

    #[test]
    fn check_reports_the_value_path() {
        let mut state = State::new();
        let s = wrapped(&mut state, Value::from("x"));
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        assert!(cx.check(&s).is_ok());
        cx.set_taint(&s, true);
        let err = cx.check(&s).unwrap_err();
        let finding = err.as_finding().unwrap();
        assert_eq!(finding.kind, FindingKind::TaintedArgument);
        assert_eq!(finding.paths[0].label(), TAINTED_LABEL);
    }

    #[test]
    fn stale_handles_read_their_raw_value() {
        let mut state = State::new();
        let mut heap = Heap::new();
        let policies = PolicyRegistry::new();
        let mut cx = HookContext::new(&mut state, &mut heap, &policies);
        let stale = Value::Shadow(Shadow {
            handle: ShadowHandle(99),
            identity: cx.state.fresh_identity(),
            raw: Box::new(Value::from(1.0)),
        });
        assert_eq!(cx.value_of(&stale), Value::from(1.0));
    }
}

//! Identity & shadow-state model
//!
//! One [`State`] exists per analyzed run. It records the identities in flight between a pre-hook
//! and its post-hook, which shadow handles stand for which literal, the taint entry of every
//! tracked value, and the frames saved around nested invocations.

use std::collections::HashMap;
use std::fmt;

use crate::error::{TaintError, ensure};
use crate::provenance::PathNode;
use crate::runtime::{ObjectId, ShadowHandle, Value};

/// Call site of an invocation; function entry saves under [`FUNCTION_ENTRY_SITE`].
pub type CallSite = i64;

pub const FUNCTION_ENTRY_SITE: CallSite = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(u64);

impl Identity {
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Internal,
    External,
    Native,
    Unknown,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Internal => "Internal",
            CallType::External => "External",
            CallType::Native => "Native",
            CallType::Unknown => "Unknown",
        }
    }

    /// Literals produced while this call type is active are left unwrapped.
    pub fn skips_wrapping(&self) -> bool {
        matches!(self, CallType::Native | CallType::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalContext {
    Unset,
    ConditionalExpr,
}

/// Key under which a taint entry is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaintKey {
    Identity(Identity),
    Object(ObjectId),
}

/// Per-character taint of a string plus its synthetic `length` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropMap {
    chars: Vec<bool>,
    length: bool,
}

impl PropMap {
    pub fn new(len: usize, tainted: bool) -> Self {
        Self {
            chars: vec![tainted; len],
            length: tainted,
        }
    }

    pub fn from_bits(bits: Vec<bool>) -> Self {
        let length = bits.iter().any(|b| *b);
        Self {
            chars: bits,
            length,
        }
    }

    pub fn char_count(&self) -> usize {
        self.chars.len()
    }

    pub fn chars(&self) -> &[bool] {
        &self.chars
    }

    pub fn length_tainted(&self) -> bool {
        self.length
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        if key == "length" {
            return Some(self.length);
        }
        key.parse::<usize>().ok().and_then(|i| self.chars.get(i).copied())
    }

    pub fn char_at(&self, index: usize) -> bool {
        self.chars.get(index).copied().unwrap_or(false)
    }

    /// Sets one key. Tainting a character also taints `length`; clearing leaves it alone.
    pub fn set(&mut self, key: &str, tainted: bool) -> Result<(), TaintError> {
        if key == "length" {
            self.length = tainted;
            return Ok(());
        }
        let slot = key
            .parse::<usize>()
            .ok()
            .and_then(|i| self.chars.get_mut(i))
            .ok_or_else(|| TaintError::Encoding(format!("PropMap does not have property: {key}")))?;
        *slot = tainted;
        if tainted {
            self.length = true;
        }
        Ok(())
    }

    pub fn any(&self) -> bool {
        self.length || self.chars.iter().any(|b| *b)
    }

    /// The map is never empty (`length` always exists), so this is a plain conjunction.
    pub fn all(&self) -> bool {
        self.length && self.chars.iter().all(|b| *b)
    }

    pub fn tainted_indices(&self) -> Vec<usize> {
        self.chars
            .iter()
            .enumerate()
            .filter(|(_, t)| **t)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TaintEntry {
    pub taint_bit: bool,
    pub props: Option<PropMap>,
    pub path: PathNode,
}

impl TaintEntry {
    pub fn untainted(props: Option<PropMap>, snapshot: &str) -> Self {
        Self {
            taint_bit: false,
            props,
            path: PathNode::empty(snapshot),
        }
    }

    pub fn with_path(&self, path: PathNode) -> Self {
        Self {
            taint_bit: self.taint_bit,
            props: self.props.clone(),
            path,
        }
    }

    /// Taint of one property; a missing map or key falls back to the taint bit.
    pub fn prop_taint(&self, key: &str) -> bool {
        match &self.props {
            Some(map) => self.taint_bit || map.get(key).unwrap_or(false),
            None => self.taint_bit,
        }
    }

    pub fn set_prop_taint(&mut self, key: &str, tainted: bool) -> Result<(), TaintError> {
        match &mut self.props {
            Some(map) => map.set(key, tainted),
            None => Err(TaintError::Encoding("taintEntry does not have a map".into())),
        }
    }
}

/// A property's identity and the identities found below it, extracted before a native call.
#[derive(Debug, Clone, PartialEq)]
pub struct TaintTree {
    pub property: String,
    pub identity: Option<Identity>,
    pub children: Vec<TaintTree>,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) id_stack: Vec<Identity>,
    pub(crate) call_type: CallType,
    pub(crate) caller_site: CallSite,
    pub(crate) taint_trees: HashMap<ObjectId, Vec<TaintTree>>,
}

impl Frame {
    pub fn new(call_type: CallType, caller_site: CallSite) -> Self {
        Self {
            id_stack: Vec::new(),
            call_type,
            caller_site,
            taint_trees: HashMap::new(),
        }
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn caller_site(&self) -> CallSite {
        self.caller_site
    }

    pub fn pending(&self) -> usize {
        self.id_stack.len()
    }
}

/// Undo record for the shadow bookkeeping of a single post-hook.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    id_stack: Vec<Identity>,
    next_identity: u64,
    next_handle: u64,
}

#[derive(Debug)]
pub struct State {
    pub(crate) frame: Frame,
    pub(crate) wrap_table: HashMap<ShadowHandle, (Identity, Value)>,
    pub(crate) taint_table: HashMap<TaintKey, TaintEntry>,
    pub(crate) context: EvalContext,
    pub(crate) saved_frames: HashMap<CallSite, Vec<Frame>>,
    next_identity: u64,
    next_handle: u64,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self {
            frame: Frame::new(CallType::Internal, 0),
            wrap_table: HashMap::new(),
            taint_table: HashMap::new(),
            context: EvalContext::Unset,
            saved_frames: HashMap::new(),
            next_identity: 0,
            next_handle: 0,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn context(&self) -> EvalContext {
        self.context
    }

    pub fn pending_ids(&self) -> usize {
        self.frame.id_stack.len()
    }

    pub fn wrapped_count(&self) -> usize {
        self.wrap_table.len()
    }

    pub fn taint_entry_count(&self) -> usize {
        self.taint_table.len()
    }

    pub fn saved_frame_depth(&self, site: CallSite) -> usize {
        self.saved_frames.get(&site).map_or(0, Vec::len)
    }

    pub fn fresh_identity(&mut self) -> Identity {
        let id = Identity(self.next_identity);
        self.next_identity += 1;
        id
    }

    pub(crate) fn fresh_handle(&mut self) -> ShadowHandle {
        let handle = ShadowHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Pops the identity reserved by the matching pre-hook, or mints a fresh one.
    pub fn take_identity(&mut self) -> Identity {
        match self.frame.id_stack.pop() {
            Some(id) => id,
            None => self.fresh_identity(),
        }
    }

    pub fn push_identity(&mut self, id: Identity) {
        self.frame.id_stack.push(id);
    }

    pub fn set_call_type(&mut self, call_type: CallType) {
        self.frame.call_type = call_type;
    }

    pub fn save_frame(&mut self, call_type: CallType, site: CallSite) {
        let previous = std::mem::replace(&mut self.frame, Frame::new(call_type, site));
        self.saved_frames.entry(site).or_default().push(previous);
    }

    pub fn restore_frame(&mut self, site: CallSite) -> Result<(), TaintError> {
        let bucket = self
            .saved_frames
            .get_mut(&site)
            .ok_or_else(|| TaintError::Invariant(format!("Could not find stack matching ID: {site}")))?;
        let frame = bucket
            .pop()
            .ok_or_else(|| TaintError::Invariant(format!("Empty frame stack for ID: {site}")))?;
        if bucket.is_empty() {
            self.saved_frames.remove(&site);
        }
        self.frame = frame;
        Ok(())
    }

    /// Drops whatever the current frame had in flight, keeping its classification.
    pub fn reset_frame(&mut self) {
        self.frame = Frame::new(self.frame.call_type, self.frame.caller_site);
    }

    pub fn lookup_shadow(&self, value: &Value) -> Option<&(Identity, Value)> {
        match value {
            Value::Shadow(shadow) => self.wrap_table.get(&shadow.handle),
            _ => None,
        }
    }

    pub fn is_wrapped(&self, value: &Value) -> bool {
        self.lookup_shadow(value).is_some()
    }

    /// The underlying value: the wrapped literal for known handles, the value itself otherwise.
    pub fn value_of(&self, value: &Value) -> Value {
        match self.lookup_shadow(value) {
            Some((_, raw)) => raw.clone(),
            None => value.raw().clone(),
        }
    }

    /// Taint-table key of a value; raw literals have none and read as untainted.
    pub fn key_of(&self, value: &Value) -> Option<TaintKey> {
        if let Some((id, _)) = self.lookup_shadow(value) {
            return Some(TaintKey::Identity(*id));
        }
        value.as_object().map(TaintKey::Object)
    }

    pub fn entry(&self, key: &TaintKey) -> Option<&TaintEntry> {
        self.taint_table.get(key)
    }

    pub fn insert_entry(&mut self, key: TaintKey, entry: TaintEntry) {
        self.taint_table.insert(key, entry);
    }

    pub fn check_pending(&self, expected: usize, site: &str) -> Result<(), TaintError> {
        ensure(self.pending_ids() == expected, || {
            format!(
                "{site}: IDS must hold {expected} entries, found {}",
                self.pending_ids()
            )
        })
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            id_stack: self.frame.id_stack.clone(),
            next_identity: self.next_identity,
            next_handle: self.next_handle,
        }
    }

    /// Forgets identities and shadow handles handed out since `checkpoint`.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        let first_new = checkpoint.next_handle;
        self.wrap_table.retain(|handle, _| handle.0 < first_new);
        self.frame.id_stack = checkpoint.id_stack;
        self.next_identity = checkpoint.next_identity;
        self.next_handle = checkpoint.next_handle;
    }

    /// Drops every identity reserved for the current operation.
    pub(crate) fn clear_pending(&mut self) {
        self.frame.id_stack.clear();
    }

    /// Multi-line dump used by the debug trace.
    pub fn describe(&self) -> String {
        let ids: Vec<String> = self.frame.id_stack.iter().map(ToString::to_string).collect();
        format!(
            "frame: {{ IDS: [{}], callType: {}, callerIID: {} }}\nMw: {} entries\nMt: {} entries\nC: {:?}",
            ids.join(", "),
            self.frame.call_type.as_str(),
            self.frame.caller_site,
            self.wrap_table.len(),
            self.taint_table.len(),
            self.context
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_identity_prefers_reserved_ids() {
        let mut state = State::new();
        let reserved = state.fresh_identity();
        state.push_identity(reserved);
        assert_eq!(state.take_identity(), reserved);
        let minted = state.take_identity();
        assert_ne!(minted, reserved);
        assert_eq!(state.pending_ids(), 0);
    }

    #[test]
    fn identities_are_monotonic() {
        let mut state = State::new();
        let a = state.fresh_identity();
        let b = state.fresh_identity();
        assert!(a < b);
    }

    #[test]
    fn save_and_restore_frames_per_site() {
        let mut state = State::new();
        let id = state.fresh_identity();
        state.push_identity(id);
        state.save_frame(CallType::External, 7);
        assert_eq!(state.pending_ids(), 0);
        assert_eq!(state.frame().call_type(), CallType::External);
        assert_eq!(state.saved_frame_depth(7), 1);

        state.restore_frame(7).unwrap();
        assert_eq!(state.pending_ids(), 1);
        assert_eq!(state.frame().call_type(), CallType::Internal);
        assert_eq!(state.saved_frame_depth(7), 0);
    }

    #[test]
    fn recursive_saves_stack_up() {
        let mut state = State::new();
        state.save_frame(CallType::Internal, 3);
        state.save_frame(CallType::Native, 3);
        assert_eq!(state.saved_frame_depth(3), 2);
        state.restore_frame(3).unwrap();
        assert_eq!(state.frame().call_type(), CallType::Internal);
        assert_eq!(state.saved_frame_depth(3), 1);
    }

    #[test]
    fn restoring_unknown_site_is_an_invariant_error() {
        let mut state = State::new();
        let err = state.restore_frame(42).unwrap_err();
        assert!(matches!(err, TaintError::Invariant(_)));
    }

    #[test]
    fn prop_map_taints_length_with_any_char() {
        let mut map = PropMap::new(3, false);
        assert!(!map.length_tainted());
        map.set("1", true).unwrap();
        assert!(map.length_tainted());
        assert_eq!(map.tainted_indices(), vec![1]);
    }

    #[test]
    fn prop_map_clearing_keeps_length() {
        let mut map = PropMap::new(2, true);
        map.set("0", false).unwrap();
        assert!(map.length_tainted());
        assert!(!map.all());
        assert!(map.any());
    }

    #[test]
    fn prop_map_rejects_unknown_keys() {
        let mut map = PropMap::new(2, false);
        assert!(map.set("9", true).is_err());
        assert!(map.set("foo", true).is_err());
        assert_eq!(map.get("foo"), None);
    }

    #[test]
    fn empty_string_map_only_has_length() {
        let map = PropMap::new(0, false);
        assert!(!map.any());
        assert!(!map.all());
        assert!(PropMap::new(0, true).all());
    }

    #[test]
    fn prop_taint_falls_back_to_taint_bit() {
        let mut entry = TaintEntry::untainted(None, "x");
        assert!(!entry.prop_taint("0"));
        entry.taint_bit = true;
        assert!(entry.prop_taint("0"));
        assert!(entry.set_prop_taint("0", true).is_err());
    }

    #[test]
    fn rollback_forgets_new_shadows_and_ids() {
        let mut state = State::new();
        let reserved = state.fresh_identity();
        state.push_identity(reserved);
        let checkpoint = state.checkpoint();

        let id = state.take_identity();
        let handle = state.fresh_handle();
        state.wrap_table.insert(handle, (id, Value::from("x")));
        state.rollback(checkpoint);

        assert_eq!(state.wrapped_count(), 0);
        assert_eq!(state.pending_ids(), 1);
        assert_eq!(state.fresh_identity().index(), reserved.index() + 1);
    }

    #[test]
    fn clearing_pending_ids_keeps_the_counter() {
        let mut state = State::new();
        let first = state.fresh_identity();
        let second = state.fresh_identity();
        state.push_identity(first);
        state.push_identity(second);
        state.clear_pending();

        assert_eq!(state.pending_ids(), 0);
        assert!(state.check_pending(0, "WLiteral").is_ok());
        assert_eq!(state.fresh_identity().index(), first.index() + 2);
    }
}

//! Module policies
//!
//! Every value kind has a policy deciding how its operands are wrapped around native calls and how
//! taint propagates through field access, operators and calls. Policies are stateless statics;
//! [`PolicyRegistry`] resolves a value to one from its [`ValueKind`] and the configured
//! [`Precision`] of that kind.

pub mod global;
pub mod list;
pub mod lodash;
pub mod map;
pub mod object;
pub mod set;
pub mod string;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::TaintError;
use crate::provenance::PathNode;
use crate::runtime::{Heap, ObjectKind, Value};
use crate::state::TaintEntry;
use crate::taint::HookContext;

/// Kind names that have registered policies.
pub const KNOWN_KINDS: &[&str] = &["array", "string", "global", "lodash", "map", "set", "object"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Default,
    Imprecise,
    Precise,
}

impl Precision {
    pub fn parse(level: &str) -> Option<Self> {
        match level {
            "default" => Some(Precision::Default),
            "imprecise" => Some(Precision::Imprecise),
            "precise" => Some(Precision::Precise),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Default => "default",
            Precision::Imprecise => "imprecise",
            Precision::Precise => "precise",
        }
    }
}

/// Classification of a raw value used to pick its policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Object,
    String,
    Array,
    Map,
    Set,
    Global,
    Lodash,
    Other(String),
}

impl ValueKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "object" => ValueKind::Object,
            "string" => ValueKind::String,
            "array" => ValueKind::Array,
            "map" => ValueKind::Map,
            "set" => ValueKind::Set,
            "global" => ValueKind::Global,
            "lodash" => ValueKind::Lodash,
            other => ValueKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ValueKind::Object => "object",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
            ValueKind::Set => "set",
            ValueKind::Global => "global",
            ValueKind::Lodash => "lodash",
            ValueKind::Other(name) => name,
        }
    }
}

/// Classifies a raw (unwrapped) value.
pub fn determine_kind(heap: &Heap, value: &Value) -> ValueKind {
    let external_path = || {
        heap.import_tag(value)
            .filter(|tag| tag.is_external())
            .map(|tag| ValueKind::from_name(&tag.module_path))
    };
    match value.raw() {
        Value::Undefined => ValueKind::Other("undefined".to_string()),
        Value::Null => ValueKind::Other("null".to_string()),
        Value::Bool(_) => ValueKind::Other("boolean".to_string()),
        Value::Number(_) => ValueKind::Other("number".to_string()),
        Value::Str(_) => ValueKind::String,
        Value::Object(id) => match &heap.get(*id).kind {
            ObjectKind::Json => ValueKind::Other("json".to_string()),
            ObjectKind::Global => ValueKind::Global,
            ObjectKind::Map(_) => ValueKind::Map,
            ObjectKind::Set(_) => ValueKind::Set,
            ObjectKind::Function(_) => {
                external_path().unwrap_or_else(|| ValueKind::Other("function".to_string()))
            }
            _ => external_path().unwrap_or_else(|| {
                ValueKind::from_name(&heap.constructor_name(*id).to_lowercase())
            }),
        },
        Value::Shadow(_) => ValueKind::Object,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    ObjectImprecise,
    ObjectPrecise,
    StringPrecise,
    ListImprecise,
    ListPrecise,
    MapImprecise,
    MapPrecise,
    SetImprecise,
    SetPrecise,
    Global,
    Lodash,
}

impl PolicyKind {
    pub fn policy(self) -> &'static dyn ModulePolicy {
        match self {
            PolicyKind::ObjectImprecise => &object::IMPRECISE,
            PolicyKind::ObjectPrecise => &object::PRECISE,
            PolicyKind::StringPrecise => &string::StringPolicy,
            PolicyKind::ListImprecise => &list::IMPRECISE,
            PolicyKind::ListPrecise => &list::PRECISE,
            PolicyKind::MapImprecise => &map::IMPRECISE,
            PolicyKind::MapPrecise => &map::PRECISE,
            PolicyKind::SetImprecise => &set::IMPRECISE,
            PolicyKind::SetPrecise => &set::PRECISE,
            PolicyKind::Global => &global::GlobalPolicy,
            PolicyKind::Lodash => &lodash::LodashPolicy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::ObjectImprecise => "object:imprecise",
            PolicyKind::ObjectPrecise => "object:precise",
            PolicyKind::StringPrecise => "string:precise",
            PolicyKind::ListImprecise => "array:imprecise",
            PolicyKind::ListPrecise => "array:precise",
            PolicyKind::MapImprecise => "map:imprecise",
            PolicyKind::MapPrecise => "map:precise",
            PolicyKind::SetImprecise => "set:imprecise",
            PolicyKind::SetPrecise => "set:precise",
            PolicyKind::Global => "global",
            PolicyKind::Lodash => "lodash",
        }
    }

    /// The registered policy for `kind` at `level`, if any.
    pub fn lookup(kind: &ValueKind, level: Precision) -> Option<Self> {
        use Precision::{Default, Imprecise, Precise};
        let policy = match (kind, level) {
            (ValueKind::Array, Precise) => PolicyKind::ListPrecise,
            (ValueKind::Array, Imprecise | Default) => PolicyKind::ListImprecise,
            (ValueKind::String, Precise) => PolicyKind::StringPrecise,
            (ValueKind::String, Imprecise | Default) => PolicyKind::ObjectPrecise,
            (ValueKind::Global, Default) => PolicyKind::Global,
            (ValueKind::Lodash, Imprecise) => PolicyKind::Lodash,
            (ValueKind::Map, Precise) => PolicyKind::MapPrecise,
            (ValueKind::Map, Imprecise | Default) => PolicyKind::MapImprecise,
            (ValueKind::Set, Precise) => PolicyKind::SetPrecise,
            (ValueKind::Set, Imprecise | Default) => PolicyKind::SetImprecise,
            (ValueKind::Object, Precise) => PolicyKind::ObjectPrecise,
            (ValueKind::Object, Imprecise | Default) => PolicyKind::ObjectImprecise,
            (ValueKind::Global | ValueKind::Lodash | ValueKind::Other(_), _) => return None,
        };
        Some(policy)
    }
}

/// Operand triple of a field access or binary operation, all wrapped.
#[derive(Debug, Clone, Copy)]
pub struct Operands<'v> {
    pub base: &'v Value,
    pub offset: &'v Value,
    pub value: &'v Value,
}

/// A completed native call as seen by the taint rules. Every value is wrapped.
#[derive(Debug, Clone, Copy)]
pub struct NativeCall<'v> {
    pub f: &'v Value,
    pub base: &'v Value,
    pub args: &'v [Value],
    pub result: &'v Value,
}

/// Wrapping and taint rules for one value kind.
///
/// Every default method defers to the configured object policy, which implements them all.
pub trait ModulePolicy: Sync {
    fn kind(&self) -> PolicyKind;

    fn is_tainted(&self, cx: &HookContext<'_>, value: &Value) -> bool {
        cx.policies.object().is_tainted(cx, value)
    }

    /// Runs when a composite value of this kind is wrapped.
    fn wrap_pre(&self, cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        cx.policies.object().wrap_pre(cx, value)
    }

    fn w_get_field(&self, cx: &mut HookContext<'_>, result: Value) -> Result<Value, TaintError> {
        cx.policies.object().w_get_field(cx, result)
    }

    fn w_put_field_pre(
        &self,
        cx: &mut HookContext<'_>,
        value: Value,
    ) -> Result<Value, TaintError> {
        cx.policies.object().w_put_field_pre(cx, value)
    }

    fn w_put_field(&self, cx: &mut HookContext<'_>, value: Value) -> Result<Value, TaintError> {
        cx.policies.object().w_put_field(cx, value)
    }

    /// Prepares the arguments of an external call. Returns what the callee receives.
    fn w_invoke_fun_pre(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        base: &Value,
        args: &[Value],
    ) -> Result<Vec<Value>, TaintError> {
        cx.policies.object().w_invoke_fun_pre(cx, f, base, args)
    }

    /// Rewraps the arguments of an external call, last to first.
    fn w_invoke_fun(
        &self,
        cx: &mut HookContext<'_>,
        f: &Value,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TaintError> {
        cx.policies.object().w_invoke_fun(cx, f, args)
    }

    fn t_get_field(&self, cx: &mut HookContext<'_>, ops: Operands<'_>) -> Result<(), TaintError> {
        cx.policies.object().t_get_field(cx, ops)
    }

    fn t_put_field(&self, cx: &mut HookContext<'_>, ops: Operands<'_>) -> Result<(), TaintError> {
        cx.policies.object().t_put_field(cx, ops)
    }

    /// `ops.base` and `ops.offset` are the left and right operands, `ops.value` the result.
    fn t_binary(
        &self,
        cx: &mut HookContext<'_>,
        op: &str,
        ops: Operands<'_>,
    ) -> Result<(), TaintError> {
        cx.policies.object().t_binary(cx, op, ops)
    }

    fn t_unary(
        &self,
        cx: &mut HookContext<'_>,
        operand: &Value,
        result: &Value,
    ) -> Result<(), TaintError> {
        cx.policies.object().t_unary(cx, operand, result)
    }

    fn t_call(&self, cx: &mut HookContext<'_>, call: NativeCall<'_>) -> Result<(), TaintError> {
        cx.policies.object().t_call(cx, call)
    }
}

/// Whole-value call rule: a tainted receiver taints the whole result, otherwise any tainted
/// argument does. Nothing tainted leaves the state untouched.
pub fn imprecise_call(
    cx: &mut HookContext<'_>,
    receiver: Option<&dyn ModulePolicy>,
    call: NativeCall<'_>,
) -> Result<(), TaintError> {
    let label = format!("imprecise:{}", cx.function_name(call.f));
    if let Some(policy) = receiver {
        if policy.is_tainted(cx, call.base) || cx.all_props(call.base) {
            let base_path = cx.entry(call.base).path;
            let entry = TaintEntry {
                taint_bit: true,
                props: cx.init_prop_map(call.result, true),
                path: cx.path(&label, vec![base_path], call.result),
            };
            cx.put_entry(call.result, entry);
            return Ok(());
        }
    }
    let entries: Vec<_> = call.args.iter().map(|arg| cx.entry(arg)).collect();
    if entries.iter().any(|e| e.taint_bit) {
        let parents: Vec<PathNode> = entries.into_iter().map(|e| e.path).collect();
        let entry = TaintEntry {
            taint_bit: true,
            props: cx.init_prop_map(call.result, true),
            path: cx.path(&label, parents, call.result),
        };
        cx.put_entry(call.result, entry);
    }
    Ok(())
}

/// Resolves values to policies using the configured precision of each kind.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    levels: HashMap<String, Precision>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_levels(levels: &BTreeMap<String, Precision>) -> Self {
        Self {
            levels: levels.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    pub fn set_precision(&mut self, kind: &str, precision: Precision) {
        self.levels.insert(kind.to_string(), precision);
    }

    pub fn precision(&self, kind: &ValueKind) -> Precision {
        self.levels
            .get(kind.as_str())
            .copied()
            .unwrap_or(Precision::Default)
    }

    /// Configured level, then the kind's default entry, then the object policy.
    pub fn resolve(&self, kind: &ValueKind) -> PolicyKind {
        PolicyKind::lookup(kind, self.precision(kind))
            .or_else(|| PolicyKind::lookup(kind, Precision::Default))
            .unwrap_or_else(|| self.object_kind())
    }

    fn object_kind(&self) -> PolicyKind {
        match self.precision(&ValueKind::Object) {
            Precision::Precise => PolicyKind::ObjectPrecise,
            Precision::Imprecise | Precision::Default => PolicyKind::ObjectImprecise,
        }
    }

    pub fn policy_for(&self, heap: &Heap, raw: &Value) -> &'static dyn ModulePolicy {
        self.resolve(&determine_kind(heap, raw)).policy()
    }

    pub fn object(&self) -> &'static dyn ModulePolicy {
        self.object_kind().policy()
    }
}

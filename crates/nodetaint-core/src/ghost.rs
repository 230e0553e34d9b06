//! Ghost API
//!
//! Functions the analyzed program (or a driver script) calls to set, clear and assert taint. They
//! are defined on the global object with empty bodies; the engine recognizes them by name when
//! they are invoked and routes the call here before any wrapping happens.

use std::collections::HashMap;

use tracing::info;

use crate::error::{TaintError, ensure};
use crate::eval::{EVAL_POST, EVAL_PRE, EvalScope};
use crate::runtime::{Heap, Value, inspect};
use crate::sinks::{SinkCategory, SinkKind, SinksRegistry};
use crate::taint::HookContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GhostFunction {
    SetTaint,
    ClearTaint,
    SetPropTaint,
    ClearPropTaint,
    StringRangeSetTaint,
    StringRangeClearTaint,
    CheckTaint,
    CheckTaintString,
    AssertWrapped,
    AssertNotWrapped,
    AssertTaintTrue,
    AssertTaintFalse,
    AssertSomePropTainted,
    AssertPropTaintTrue,
    AssertPropTaintFalse,
    SetSink,
    AssertStringRangeAllTainted,
    AssertStringRangeAllUntainted,
    AssertArrayRangeAllTainted,
    AssertArrayRangeAllUntainted,
    PushEvalCtx,
    PopEvalCtx,
}

impl GhostFunction {
    /// Always available; the eval scope pair is added only in implicit-flow mode.
    pub const DEFAULT: &'static [GhostFunction] = &[
        GhostFunction::SetTaint,
        GhostFunction::ClearTaint,
        GhostFunction::SetPropTaint,
        GhostFunction::ClearPropTaint,
        GhostFunction::StringRangeSetTaint,
        GhostFunction::StringRangeClearTaint,
        GhostFunction::CheckTaint,
        GhostFunction::CheckTaintString,
        GhostFunction::AssertWrapped,
        GhostFunction::AssertNotWrapped,
        GhostFunction::AssertTaintTrue,
        GhostFunction::AssertTaintFalse,
        GhostFunction::AssertSomePropTainted,
        GhostFunction::AssertPropTaintTrue,
        GhostFunction::AssertPropTaintFalse,
        GhostFunction::SetSink,
        GhostFunction::AssertStringRangeAllTainted,
        GhostFunction::AssertStringRangeAllUntainted,
        GhostFunction::AssertArrayRangeAllTainted,
        GhostFunction::AssertArrayRangeAllUntainted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GhostFunction::SetTaint => "__jalangi_set_taint__",
            GhostFunction::ClearTaint => "__jalangi_clear_taint__",
            GhostFunction::SetPropTaint => "__jalangi_set_prop_taint__",
            GhostFunction::ClearPropTaint => "__jalangi_clear_prop_taint__",
            GhostFunction::StringRangeSetTaint => "__string_range_set_taint__",
            GhostFunction::StringRangeClearTaint => "__string_range_clear_taint__",
            GhostFunction::CheckTaint => "__jalangi_check_taint__",
            GhostFunction::CheckTaintString => "__jalangi_check_taint_string__",
            GhostFunction::AssertWrapped => "__jalangi_assert_wrapped__",
            GhostFunction::AssertNotWrapped => "__jalangi_assert_not_wrapped__",
            GhostFunction::AssertTaintTrue => "__jalangi_assert_taint_true__",
            GhostFunction::AssertTaintFalse => "__jalangi_assert_taint_false__",
            GhostFunction::AssertSomePropTainted => "__jalangi_assert_some_prop_tainted__",
            GhostFunction::AssertPropTaintTrue => "__jalangi_assert_prop_taint_true__",
            GhostFunction::AssertPropTaintFalse => "__jalangi_assert_prop_taint_false__",
            GhostFunction::SetSink => "__jalangi_set_sink__",
            GhostFunction::AssertStringRangeAllTainted => "__assert_string_range_all_tainted__",
            GhostFunction::AssertStringRangeAllUntainted => "__assert_string_range_all_untainted__",
            GhostFunction::AssertArrayRangeAllTainted => "__assert_array_range_all_tainted__",
            GhostFunction::AssertArrayRangeAllUntainted => "__assert_array_range_all_untainted__",
            GhostFunction::PushEvalCtx => EVAL_PRE,
            GhostFunction::PopEvalCtx => EVAL_POST,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            GhostFunction::PushEvalCtx | GhostFunction::PopEvalCtx => 0,
            GhostFunction::SetPropTaint
            | GhostFunction::ClearPropTaint
            | GhostFunction::AssertPropTaintTrue
            | GhostFunction::AssertPropTaintFalse => 2,
            GhostFunction::StringRangeSetTaint
            | GhostFunction::StringRangeClearTaint
            | GhostFunction::AssertStringRangeAllTainted
            | GhostFunction::AssertStringRangeAllUntainted
            | GhostFunction::AssertArrayRangeAllTainted
            | GhostFunction::AssertArrayRangeAllUntainted => 3,
            _ => 1,
        }
    }

    /// Checks and assertions end the run with [`TaintError::Completed`] in assert-passed mode.
    pub fn is_assertion(&self) -> bool {
        !matches!(
            self,
            GhostFunction::SetTaint
                | GhostFunction::ClearTaint
                | GhostFunction::SetPropTaint
                | GhostFunction::ClearPropTaint
                | GhostFunction::StringRangeSetTaint
                | GhostFunction::StringRangeClearTaint
                | GhostFunction::SetSink
                | GhostFunction::PushEvalCtx
                | GhostFunction::PopEvalCtx
        )
    }
}

/// The ghost functions known to one engine, by name.
#[derive(Debug, Clone, Default)]
pub struct GhostRegistry {
    functions: HashMap<&'static str, GhostFunction>,
}

impl GhostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(eval_sink: bool) -> Result<Self, TaintError> {
        let mut registry = Self::new();
        for ghost in GhostFunction::DEFAULT {
            registry.register(*ghost)?;
        }
        if !eval_sink {
            registry.register(GhostFunction::PushEvalCtx)?;
            registry.register(GhostFunction::PopEvalCtx)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, ghost: GhostFunction) -> Result<(), TaintError> {
        ensure(!self.functions.contains_key(ghost.name()), || {
            "Registering an already declared ghost function is not allowed".to_string()
        })?;
        self.functions.insert(ghost.name(), ghost);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<GhostFunction> {
        self.functions.get(name).copied()
    }

    /// The ghost function `f` (raw) stands for. Natives never are ghosts.
    pub fn lookup(&self, heap: &Heap, f: &Value) -> Option<GhostFunction> {
        let function = heap.function_data(f)?;
        if function.is_native() {
            return None;
        }
        self.get(&function.name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Defines every registered name on the global object as an empty script function.
    pub fn install(&self, heap: &mut Heap) {
        let global = heap.global();
        let mut names: Vec<&'static str> = self.functions.keys().copied().collect();
        names.sort_unstable();
        for name in names {
            let f = heap.script_function(name);
            heap.set_property(global, name, f);
        }
    }
}

/// Engine services a ghost call may touch besides the shadow state.
pub struct GhostEnv<'e> {
    pub sinks: &'e mut SinksRegistry,
    pub eval: &'e mut EvalScope,
    pub assert_passed: bool,
    pub max_length: usize,
}

/// Runs one ghost call on its (still wrapped) arguments.
pub fn dispatch(
    ghost: GhostFunction,
    cx: &mut HookContext<'_>,
    env: GhostEnv<'_>,
    args: &[Value],
) -> Result<(), TaintError> {
    if args.len() != ghost.arity() {
        return Err(TaintError::Assertion(format!(
            "{} expects {} argument(s), got {}",
            ghost.name(),
            ghost.arity(),
            args.len()
        )));
    }
    match ghost {
        GhostFunction::SetTaint => cx.set_taint(&args[0], true),
        GhostFunction::ClearTaint => cx.set_taint(&args[0], false),
        GhostFunction::SetPropTaint => {
            let key = cx.value_of(&args[1]).to_key(cx.heap);
            cx.set_prop_taint(&args[0], &key, true)?;
        }
        GhostFunction::ClearPropTaint => {
            let key = cx.value_of(&args[1]).to_key(cx.heap);
            cx.set_prop_taint(&args[0], &key, false)?;
        }
        GhostFunction::StringRangeSetTaint | GhostFunction::StringRangeClearTaint => {
            let tainted = ghost == GhostFunction::StringRangeSetTaint;
            for i in bounds(cx, ghost, &args[1], &args[2])? {
                cx.set_prop_taint(&args[0], &i.to_string(), tainted)?;
            }
        }
        GhostFunction::CheckTaint => cx.check(&args[0])?,
        GhostFunction::CheckTaintString => {
            let len = cx
                .value_of(&args[0])
                .as_str()
                .map_or(0, |s| s.chars().count());
            let indices = string_indices(cx, &args[0], 0..len, true)?;
            if !indices.is_empty() {
                info!("String has tainted indices: [{}]", join(&indices));
            }
            cx.check(&args[0])?;
        }
        GhostFunction::AssertWrapped => {
            if !cx.state.is_wrapped(&args[0]) {
                return Err(TaintError::Assertion(format!(
                    "{} is not wrapped",
                    inspect(cx.heap, &cx.value_of(&args[0]), env.max_length)
                )));
            }
        }
        GhostFunction::AssertNotWrapped => {
            if cx.state.is_wrapped(&args[0]) {
                return Err(TaintError::Assertion(format!(
                    "{} is wrapped",
                    inspect(cx.heap, &cx.value_of(&args[0]), env.max_length)
                )));
            }
        }
        GhostFunction::AssertTaintTrue => {
            assert_that(cx.taint_all(&args[0]), "Argument expected to be tainted")?;
        }
        GhostFunction::AssertTaintFalse => {
            assert_that(!cx.taint_all(&args[0]), "Argument expected to be untainted")?;
        }
        GhostFunction::AssertSomePropTainted => {
            assert_that(
                cx.taint_any(&args[0]),
                "Argument expected to have at least one tainted property",
            )?;
        }
        GhostFunction::AssertPropTaintTrue => {
            let key = cx.value_of(&args[1]).to_key(cx.heap);
            assert_that(cx.prop_taint(&args[0], &key)?, "Property expected to be tainted")?;
        }
        GhostFunction::AssertPropTaintFalse => {
            let key = cx.value_of(&args[1]).to_key(cx.heap);
            assert_that(
                !cx.prop_taint(&args[0], &key)?,
                "Property expected to be untainted",
            )?;
        }
        GhostFunction::SetSink => {
            let f = cx.value_of(&args[0]);
            if !cx.heap.is_function(&f) {
                return Err(TaintError::Assertion("Sink must be a function".into()));
            }
            env.sinks
                .register_function(cx.heap, &f, SinkKind::Custom, SinkCategory::Custom);
        }
        GhostFunction::AssertStringRangeAllTainted => {
            let range = bounds(cx, ghost, &args[1], &args[2])?;
            let untainted = string_indices(cx, &args[0], range, false)?;
            if !untainted.is_empty() {
                return Err(TaintError::Assertion(format!(
                    "Untainted indices: [{}]",
                    join(&untainted)
                )));
            }
        }
        GhostFunction::AssertStringRangeAllUntainted => {
            let range = bounds(cx, ghost, &args[1], &args[2])?;
            let tainted = string_indices(cx, &args[0], range, true)?;
            if !tainted.is_empty() {
                return Err(TaintError::Assertion(format!(
                    "Tainted indices: [{}]",
                    join(&tainted)
                )));
            }
        }
        GhostFunction::AssertArrayRangeAllTainted => {
            let range = bounds(cx, ghost, &args[1], &args[2])?;
            let untainted = element_indices(cx, &args[0], range, false);
            if !untainted.is_empty() {
                return Err(TaintError::Assertion(format!(
                    "Untainted indices: [{}]",
                    join(&untainted)
                )));
            }
        }
        GhostFunction::AssertArrayRangeAllUntainted => {
            let range = bounds(cx, ghost, &args[1], &args[2])?;
            let tainted = element_indices(cx, &args[0], range, true);
            if !tainted.is_empty() {
                return Err(TaintError::Assertion(format!(
                    "Tainted indices: [{}]",
                    join(&tainted)
                )));
            }
        }
        GhostFunction::PushEvalCtx => env.eval.push(),
        GhostFunction::PopEvalCtx => env.eval.pop()?,
    }
    if env.assert_passed && ghost.is_assertion() {
        return Err(TaintError::Completed);
    }
    Ok(())
}

fn assert_that(cond: bool, message: &str) -> Result<(), TaintError> {
    if cond {
        Ok(())
    } else {
        Err(TaintError::Assertion(message.to_string()))
    }
}

/// The `[lb, ub)` range given by two numeric arguments.
fn bounds(
    cx: &HookContext<'_>,
    ghost: GhostFunction,
    lb: &Value,
    ub: &Value,
) -> Result<std::ops::Range<usize>, TaintError> {
    let index = |v: &Value| {
        cx.value_of(v)
            .as_number()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as usize)
    };
    match (index(lb), index(ub)) {
        (Some(lb), Some(ub)) => Ok(lb..ub.max(lb)),
        _ => Err(TaintError::Assertion(format!(
            "{} expects numeric bounds",
            ghost.name()
        ))),
    }
}

/// String indices in `range` whose character taint equals `tainted`.
fn string_indices(
    cx: &HookContext<'_>,
    value: &Value,
    range: std::ops::Range<usize>,
    tainted: bool,
) -> Result<Vec<usize>, TaintError> {
    let mut out = Vec::new();
    for i in range {
        if cx.prop_taint(value, &i.to_string())? == tainted {
            out.push(i);
        }
    }
    Ok(out)
}

/// Array indices in `range` whose element's whole-value taint equals `tainted`.
fn element_indices(
    cx: &HookContext<'_>,
    value: &Value,
    range: std::ops::Range<usize>,
    tainted: bool,
) -> Vec<usize> {
    let elements = cx
        .heap
        .elements(&cx.value_of(value))
        .map(<[Value]>::to_vec)
        .unwrap_or_default();
    range
        .filter(|i| {
            let element = elements.get(*i).cloned().unwrap_or(Value::Undefined);
            cx.taint_all(&element) == tainted
        })
        .collect()
}

fn join(indices: &[usize]) -> String {
    indices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

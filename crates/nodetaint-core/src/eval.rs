//! Eval detector
//!
//! In sink mode evaluating tainted code is a finding. In implicit-flow mode tainted code is
//! rewritten to run inside an eval scope, and every write made while a scope is open is tainted.

use crate::error::{FindingKind, TaintError, ensure};
use crate::runtime::{Value, inspect};
use crate::state::TaintEntry;
use crate::taint::HookContext;

/// Code carrying this marker is never rewritten nor checked.
pub const DO_NOT_INSTRUMENT: &str = "// JALANGI DO NOT INSTRUMENT";

/// Marks code that was already rewritten once.
pub const DO_NOT_REWRITE: &str = "__nodetaint_do_not_rewrite__";

pub const EVAL_PRE: &str = "__jalangi_push_eval_ctx__";
pub const EVAL_POST: &str = "__jalangi_pop_eval_ctx__";

pub const EVAL_LABEL: &str = "call:eval";

/// Counter of open eval scopes, and whether eval is a sink.
#[derive(Debug, Clone, Default)]
pub struct EvalScope {
    depth: usize,
    sink: bool,
}

impl EvalScope {
    pub fn new(sink: bool) -> Self {
        Self { depth: 0, sink }
    }

    pub fn is_sink(&self) -> bool {
        self.sink
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn push(&mut self) {
        self.depth += 1;
    }

    pub fn pop(&mut self) -> Result<(), TaintError> {
        ensure(self.depth > 0, || "Mismatch in evalctx handling".to_string())?;
        self.depth -= 1;
        Ok(())
    }

    /// Writes are tainted only in implicit-flow mode while a scope is open.
    pub fn is_active(&self) -> bool {
        !self.sink && self.depth > 0
    }

    /// The code the host should evaluate in place of `raw`. In sink mode this also runs the
    /// eval check on `code`, the wrapped original.
    pub fn prepare(
        &self,
        cx: &mut HookContext<'_>,
        raw: &str,
        code: &Value,
        max_length: usize,
    ) -> Result<String, TaintError> {
        if self.sink {
            self.check(cx, code, max_length)?;
            return Ok(raw.to_string());
        }
        if cx.is_tainted(code) && !raw.contains(DO_NOT_REWRITE) {
            return Ok(rewrite(raw));
        }
        Ok(raw.to_string())
    }

    /// Records the evaluation on the code's path and, in sink mode, refuses tainted code.
    pub fn check(
        &self,
        cx: &mut HookContext<'_>,
        code: &Value,
        max_length: usize,
    ) -> Result<(), TaintError> {
        cx.relabel(code, EVAL_LABEL);
        if self.sink && cx.is_tainted(code) {
            let rendered = inspect(cx.heap, &cx.value_of(code), max_length);
            return Err(TaintError::finding(
                FindingKind::EvalReached,
                format!("Sink function eval reached with tainted argument {rendered}"),
                vec![cx.entry(code).path],
            ));
        }
        Ok(())
    }
}

/// Wraps `code` so it runs inside an eval scope and still yields its completion value.
pub fn rewrite(code: &str) -> String {
    let escaped = escape(&format!("{DO_NOT_REWRITE};{code}"));
    format!(
        "var __orig__ = undefined; {EVAL_PRE}(); try{{ __orig__ = eval(\"{escaped}\");}}finally{{{EVAL_POST}(); __orig__;}}"
    )
}

fn escape(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for c in code.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Taints a value written inside an open eval scope. Its path is kept as is.
pub fn taint_write(cx: &mut HookContext<'_>, value: &Value) {
    let old = cx.entry(value);
    let entry = TaintEntry {
        taint_bit: true,
        props: cx.init_prop_map(value, true),
        path: old.path,
    };
    cx.put_entry(value, entry);
}

//! Analysis engine
//!
//! [`Engine`] owns the shadow state and the registries and exposes one method per
//! instrumentation callback. Pre-hooks hand the host the unwrapped operands to run the real
//! operation on; post-hooks take the real operands and result back, rewrap them and apply the
//! taint rule of the operation. Findings abort the hook with [`TaintError::Finding`] after their
//! provenance has been exported.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{Finding, FindingKind, TaintError};
use crate::eval::{DO_NOT_INSTRUMENT, EvalScope, taint_write};
use crate::ghost::{GhostEnv, GhostRegistry, dispatch};
use crate::module_import::ImportTag;
use crate::policy::{NativeCall, Operands, PolicyRegistry};
use crate::provenance::{ExportFormat, write_export};
use crate::runtime::{Builtin, Heap, ObjectKind, Value, inspect};
use crate::sinks::{SinkKind, SinksRegistry};
use crate::state::{CallSite, CallType, EvalContext, FUNCTION_ENTRY_SITE, State};
use crate::taint::HookContext;

/// Function names that run as native code even though they are entered like script functions.
const NATIVE_ENTRY_NAMES: &[&str] = &["toString", "valueOf"];

/// One call as seen by `invoke_fun_pre` and `invoke_fun`.
///
/// The host builds it from the wrapped operands; `invoke_fun_pre` returns the operands the real
/// call must use, with `is_external` resolved, and the host hands that value back to
/// `invoke_fun` together with the result.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub f: Value,
    pub base: Value,
    pub args: Vec<Value>,
    pub is_method: bool,
    pub is_external: bool,
    pub site: CallSite,
}

impl Invocation {
    pub fn new(f: Value, base: Value, args: Vec<Value>, site: CallSite) -> Self {
        Self {
            f,
            base,
            args,
            is_method: false,
            is_external: false,
            site,
        }
    }

    pub fn method(mut self) -> Self {
        self.is_method = true;
        self
    }

    /// Marks the callee as defined outside the analyzed code.
    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }
}

/// Wrapped operands after a call completed.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub call: Invocation,
    pub result: Value,
}

/// Operands of a field access or store.
#[derive(Debug, Clone)]
pub struct FieldAccess {
    pub base: Value,
    pub offset: Value,
    pub value: Value,
}

pub struct Engine {
    state: State,
    policies: PolicyRegistry,
    sinks: SinksRegistry,
    ghosts: GhostRegistry,
    eval: EvalScope,
    config: Config,
    report: Box<dyn Write>,
    reported: HashSet<String>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("policies", &self.policies)
            .field("sinks", &self.sinks.len())
            .field("ghosts", &self.ghosts.len())
            .field("eval", &self.eval)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, TaintError> {
        Ok(Self {
            state: State::new(),
            policies: config.policy_registry(),
            sinks: SinksRegistry::with_defaults(),
            ghosts: GhostRegistry::with_defaults(config.eval_sink)?,
            eval: EvalScope::new(config.eval_sink),
            config,
            report: Box::new(io::stdout()),
            reported: HashSet::new(),
        })
    }

    /// Sends `SINKHIT:` lines to `writer` instead of stdout.
    pub fn with_report(mut self, writer: impl Write + 'static) -> Self {
        self.report = Box::new(writer);
        self
    }

    /// Defines the ghost functions on the global object of `heap`.
    pub fn install_ghost_functions(&self, heap: &mut Heap) {
        self.ghosts.install(heap);
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sinks(&self) -> &SinksRegistry {
        &self.sinks
    }

    pub fn sinks_mut(&mut self) -> &mut SinksRegistry {
        &mut self.sinks
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn eval_scope(&self) -> &EvalScope {
        &self.eval
    }

    /// A context over the engine state, for hosts and tests that query taint directly.
    pub fn context<'a>(&'a mut self, heap: &'a mut Heap) -> HookContext<'a> {
        HookContext::new(&mut self.state, heap, &self.policies)
    }

    pub fn literal(&mut self, heap: &mut Heap, value: Value) -> Result<Value, TaintError> {
        if self.config.log_level.explain {
            debug!(hook = "literal", value = %self.render(heap, &value));
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<Value, TaintError> {
            expect_idle(&mut cx, "WLiteral")?;
            let wrapped = cx.wrap(value)?;
            cx.state.check_pending(0, "WLiteral")?;
            Ok(wrapped)
        })();
        self.finish("literal", result)
    }

    /// Assignment of `value` to `lhs`. Returns the value to store.
    pub fn write(&mut self, heap: &mut Heap, lhs: &Value, value: Value) -> Result<Value, TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "write",
                lhs = %self.render(heap, lhs),
                value = %self.render(heap, &value)
            );
        }
        let eval_active = self.eval.is_active();
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<Value, TaintError> {
            let value = if cx.state.context() == EvalContext::ConditionalExpr {
                cx.state.check_pending(1, "WWrite")?;
                let wrapped = cx.wrap(value)?;
                cx.state.check_pending(0, "WWrite")?;
                wrapped
            } else {
                cx.state.check_pending(0, "WWrite")?;
                value
            };
            cx.state.context = EvalContext::Unset;
            if eval_active {
                taint_write(&mut cx, &value);
            }
            Ok(value)
        })();
        self.finish("write", result)
    }

    /// Returns the unwrapped base and offset.
    pub fn get_field_pre(
        &mut self,
        heap: &mut Heap,
        base: &Value,
        offset: &Value,
    ) -> Result<(Value, Value), TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "get_field_pre",
                base = %self.render(heap, base),
                offset = %self.render(heap, offset)
            );
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<(Value, Value), TaintError> {
            expect_idle(&mut cx, "WGetFieldPre")?;
            let base = cx.unwrap(base);
            let offset = cx.unwrap(offset);
            Ok((base, offset))
        })();
        self.finish("get_field_pre", result)
    }

    /// `value` is the result of reading `base[offset]` on the unwrapped operands.
    pub fn get_field(
        &mut self,
        heap: &mut Heap,
        base: Value,
        offset: Value,
        value: Value,
    ) -> Result<FieldAccess, TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "get_field",
                base = %self.render(heap, &base),
                offset = %self.render(heap, &offset),
                value = %self.render(heap, &value)
            );
        }
        name_anonymous_function(heap, &value, &offset);
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<FieldAccess, TaintError> {
            let policy = cx.policies.policy_for(cx.heap, &base);
            let offset = cx.wrap(offset)?;
            let base = cx.wrap(base)?;
            let value = policy.w_get_field(&mut cx, value)?;
            cx.state.check_pending(0, "WGetField")?;
            cx.policy_for(&base).t_get_field(
                &mut cx,
                Operands {
                    base: &base,
                    offset: &offset,
                    value: &value,
                },
            )?;
            Ok(FieldAccess {
                base,
                offset,
                value,
            })
        })();
        self.finish("get_field", result)
    }

    /// Returns the unwrapped base and offset, and the value to store as the policy of the base
    /// prepared it.
    pub fn put_field_pre(
        &mut self,
        heap: &mut Heap,
        base: &Value,
        offset: &Value,
        value: Value,
    ) -> Result<FieldAccess, TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "put_field_pre",
                base = %self.render(heap, base),
                offset = %self.render(heap, offset),
                value = %self.render(heap, &value)
            );
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<FieldAccess, TaintError> {
            expect_idle(&mut cx, "WPutFieldPre")?;
            let base = cx.unwrap(base);
            let offset = cx.unwrap(offset);
            let value = cx.policies.policy_for(cx.heap, &base).w_put_field_pre(&mut cx, value)?;
            Ok(FieldAccess {
                base,
                offset,
                value,
            })
        })();
        self.finish("put_field_pre", result)
    }

    /// Runs after the host stored `value` at `base[offset]`. A refused store leaves the shadow
    /// state as it was before this hook.
    pub fn put_field(
        &mut self,
        heap: &mut Heap,
        base: Value,
        offset: Value,
        value: Value,
    ) -> Result<FieldAccess, TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "put_field",
                base = %self.render(heap, &base),
                offset = %self.render(heap, &offset),
                value = %self.render(heap, &value)
            );
        }
        let checkpoint = self.state.checkpoint();
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<FieldAccess, TaintError> {
            let policy = cx.policies.policy_for(cx.heap, &base);
            let value = policy.w_put_field(&mut cx, value)?;
            let offset = cx.wrap(offset)?;
            let base = cx.wrap(base)?;
            cx.state.check_pending(0, "WPutField")?;
            cx.policy_for(&base).t_put_field(
                &mut cx,
                Operands {
                    base: &base,
                    offset: &offset,
                    value: &value,
                },
            )?;
            Ok(FieldAccess {
                base,
                offset,
                value,
            })
        })();
        if result.is_err() {
            // The refused store still consumed the identities its pre-hook reserved.
            self.state.rollback(checkpoint);
            self.state.clear_pending();
        }
        self.finish("put_field", result)
    }

    /// Classifies the call, checks sinks and unwraps what the callee must see. Ghost functions
    /// run here and their operands are returned untouched.
    pub fn invoke_fun_pre(
        &mut self,
        heap: &mut Heap,
        call: Invocation,
    ) -> Result<Invocation, TaintError> {
        let mut call = call;
        call.is_external = self.classify(heap, &call);
        let native = self.is_native(heap, &call);
        if self.config.log_level.explain {
            debug!(
                hook = "invoke_fun_pre",
                f = %self.render(heap, &call.f),
                base = %self.render(heap, &call.base),
                args = %self.render_all(heap, &call.args),
                call_type = call_type(call.is_external, native).as_str()
            );
        }
        let result = match self.check_call(heap, &call) {
            Ok(()) => self.enter_call(heap, call, native),
            Err(err) => Err(err),
        };
        self.finish("invoke_fun_pre", result)
    }

    /// Runs a ghost function, or unwraps the operands of a real call and opens its frame.
    fn enter_call(
        &mut self,
        heap: &mut Heap,
        call: Invocation,
        native: bool,
    ) -> Result<Invocation, TaintError> {
        let ghost = self.ghosts.lookup(heap, &self.state.value_of(&call.f));
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let Some(ghost) = ghost else {
            return unwrap_call(&mut cx, call, native);
        };
        expect_idle(&mut cx, "WGhostCall")?;
        let env = GhostEnv {
            sinks: &mut self.sinks,
            eval: &mut self.eval,
            assert_passed: self.config.assert_passed,
            max_length: self.config.max_length,
        };
        dispatch(ghost, &mut cx, env, &call.args)?;
        Ok(call)
    }

    /// `call` is what `invoke_fun_pre` returned and `result` what the callee produced.
    pub fn invoke_fun(
        &mut self,
        heap: &mut Heap,
        call: Invocation,
        result: Value,
    ) -> Result<CallResult, TaintError> {
        let native = self.is_native(heap, &call);
        if self.config.log_level.explain {
            debug!(
                hook = "invoke_fun",
                f = %self.render(heap, &call.f),
                base = %self.render(heap, &call.base),
                args = %self.render_all(heap, &call.args),
                result = %self.render(heap, &result)
            );
        }
        let raw_f = self.state.value_of(&call.f);
        if self.ghosts.lookup(heap, &raw_f).is_some() {
            return self.finish("invoke_fun", Ok(CallResult { call, result }));
        }
        if call.is_external || self.config.aggressive_sink_propagation {
            self.launder_sinks(heap, &call, &result);
        }
        let builtin = heap.function_data(&raw_f).and_then(|f| f.builtin);
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let outcome = (|| -> Result<CallResult, TaintError> {
            let Invocation {
                f,
                base,
                args,
                is_method,
                is_external,
                site,
            } = call;
            cx.state.restore_frame(site)?;
            let (f, base, args, result) = if is_external {
                let policy = cx.policy_for(&base);
                let args = policy.w_invoke_fun(&mut cx, &f, args)?;
                let base = if is_method { cx.wrap(base)? } else { base };
                let f = cx.wrap(f)?;
                let result = cx.wrap(result)?;
                (f, base, args, result)
            } else {
                let f = cx.wrap(f)?;
                let result = cx.wrap(result)?;
                (f, base, args, result)
            };
            cx.state.check_pending(0, "WInvokeFun")?;

            if native && !cx.value_of(&result).is_undefined() {
                cx.policy_for(&base).t_call(
                    &mut cx,
                    NativeCall {
                        f: &f,
                        base: &base,
                        args: &args,
                        result: &result,
                    },
                )?;
            }
            if builtin == Some(Builtin::Require) {
                tag_import(&mut cx, &args, &result);
            }
            Ok(CallResult {
                call: Invocation {
                    f,
                    base,
                    args,
                    is_method,
                    is_external,
                    site,
                },
                result,
            })
        })();
        self.finish("invoke_fun", outcome)
    }

    /// Entry into a script function body.
    pub fn function_enter(&mut self, heap: &mut Heap, f: &Value) -> Result<(), TaintError> {
        if self.config.log_level.explain {
            debug!(hook = "function_enter", f = %self.render(heap, f));
        }
        let name = heap
            .function_data(&self.state.value_of(f))
            .map(|f| f.name.clone())
            .unwrap_or_default();
        let call_type = if NATIVE_ENTRY_NAMES.contains(&name.as_str()) {
            CallType::Native
        } else {
            CallType::Internal
        };
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<(), TaintError> {
            // Entered from native code without an invoke_fun_pre of our own.
            if cx.state.pending_ids() != 0 {
                cx.state.save_frame(call_type, FUNCTION_ENTRY_SITE);
            } else {
                cx.state.set_call_type(call_type);
            }
            expect_idle(&mut cx, "WFunctionEnter")
        })();
        self.finish("function_enter", result)
    }

    pub fn function_exit(&mut self, threw: bool) -> Result<(), TaintError> {
        if self.config.log_level.explain {
            debug!(hook = "function_exit", threw);
        }
        let result = if threw {
            self.state.reset_frame();
            self.state.check_pending(0, "WFunctionExit")
        } else if self.state.frame().caller_site() == FUNCTION_ENTRY_SITE {
            self.state.restore_frame(FUNCTION_ENTRY_SITE)
        } else {
            Ok(())
        };
        self.finish("function_exit", result)
    }

    /// Returns the unwrapped operands.
    pub fn binary_pre(
        &mut self,
        heap: &mut Heap,
        op: &str,
        left: &Value,
        right: &Value,
    ) -> Result<(Value, Value), TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "binary_pre",
                op,
                left = %self.render(heap, left),
                right = %self.render(heap, right)
            );
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<(Value, Value), TaintError> {
            expect_idle(&mut cx, "WBinaryPre")?;
            let left = cx.unwrap(left);
            let right = cx.unwrap(right);
            Ok((left, right))
        })();
        self.finish("binary_pre", result)
    }

    /// Returns the wrapped left operand, right operand and result.
    pub fn binary(
        &mut self,
        heap: &mut Heap,
        op: &str,
        left: Value,
        right: Value,
        result: Value,
    ) -> Result<(Value, Value, Value), TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "binary",
                op,
                left = %self.render(heap, &left),
                right = %self.render(heap, &right),
                result = %self.render(heap, &result)
            );
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let outcome = (|| -> Result<(Value, Value, Value), TaintError> {
            let right = cx.wrap(right)?;
            let left = cx.wrap(left)?;
            let result = cx.wrap(result)?;
            cx.state.check_pending(0, "WBinary")?;
            cx.policy_for(&result).t_binary(
                &mut cx,
                op,
                Operands {
                    base: &left,
                    offset: &right,
                    value: &result,
                },
            )?;
            Ok((left, right, result))
        })();
        self.finish("binary", outcome)
    }

    pub fn unary_pre(
        &mut self,
        heap: &mut Heap,
        op: &str,
        operand: &Value,
    ) -> Result<Value, TaintError> {
        if self.config.log_level.explain {
            debug!(hook = "unary_pre", op, operand = %self.render(heap, operand));
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<Value, TaintError> {
            expect_idle(&mut cx, "WUnaryPre")?;
            Ok(cx.unwrap(operand))
        })();
        self.finish("unary_pre", result)
    }

    /// Returns the wrapped operand and result.
    pub fn unary(
        &mut self,
        heap: &mut Heap,
        op: &str,
        operand: Value,
        result: Value,
    ) -> Result<(Value, Value), TaintError> {
        if self.config.log_level.explain {
            debug!(
                hook = "unary",
                op,
                operand = %self.render(heap, &operand),
                result = %self.render(heap, &result)
            );
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let outcome = (|| -> Result<(Value, Value), TaintError> {
            let operand = cx.wrap(operand)?;
            let result = cx.wrap(result)?;
            cx.state.check_pending(0, "WUnary")?;
            cx.policy_for(&operand).t_unary(&mut cx, &operand, &result)?;
            Ok((operand, result))
        })();
        self.finish("unary", outcome)
    }

    /// Code about to be evaluated. Returns the source the host must instrument and run.
    pub fn instrument_code_pre(
        &mut self,
        heap: &mut Heap,
        code: &Value,
        is_internal: bool,
    ) -> Result<String, TaintError> {
        if self.config.log_level.explain {
            debug!(hook = "instrument_code_pre", code = %self.render(heap, code), is_internal);
        }
        let max_length = self.config.max_length;
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let eval = &self.eval;
        let result = (|| -> Result<String, TaintError> {
            expect_idle(&mut cx, "WEvalPre")?;
            let raw = cx.unwrap(code);
            if is_internal {
                cx.discard();
            }
            let raw = raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_key(cx.heap));
            if raw.contains(DO_NOT_INSTRUMENT) {
                return Ok(raw);
            }
            eval.prepare(&mut cx, &raw, code, max_length)
        })();
        self.finish("instrument_code_pre", result)
    }

    /// The instrumented source produced from what `instrument_code_pre` returned.
    pub fn instrument_code(
        &mut self,
        heap: &mut Heap,
        new_code: &str,
    ) -> Result<String, TaintError> {
        if self.config.log_level.explain {
            let shown = inspect(heap, &crate::runtime::Value::from(new_code), self.config.max_length);
            debug!(hook = "instrument_code", code = %shown);
        }
        let max_length = self.config.max_length;
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let eval = &self.eval;
        let result = (|| -> Result<String, TaintError> {
            let wrapped = cx.wrap(Value::from(new_code))?;
            cx.state.check_pending(0, "WEval")?;
            eval.check(&mut cx, &wrapped, max_length)?;
            Ok(new_code.to_string())
        })();
        self.finish("instrument_code", result)
    }

    /// Test of a conditional. Returns the raw value to branch on.
    pub fn conditional(&mut self, heap: &mut Heap, value: &Value) -> Result<Value, TaintError> {
        if self.config.log_level.explain {
            debug!(hook = "conditional", value = %self.render(heap, value));
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = (|| -> Result<Value, TaintError> {
            expect_idle(&mut cx, "WConditional")?;
            let raw = cx.unwrap(value);
            cx.state.check_pending(1, "WConditional")?;
            Ok(raw)
        })();
        let result = self.finish("conditional", result);
        if result.is_ok() {
            self.state.context = EvalContext::ConditionalExpr;
        }
        result
    }

    pub fn end_expression(&mut self, heap: &mut Heap) -> Result<(), TaintError> {
        if self.config.log_level.explain {
            debug!(hook = "end_expression");
        }
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let result = expect_idle(&mut cx, "WEndExpr");
        self.finish("end_expression", result)
    }

    /// External when the host says so, when the callee belongs to an external module or is
    /// native. `require` always is; `call`, `apply` and `bind` follow their receiver.
    fn classify(&self, heap: &Heap, call: &Invocation) -> bool {
        let f = self.state.value_of(&call.f);
        let external_tag = |value: &Value| heap.import_tag(value).is_some_and(ImportTag::is_external);
        match heap.function_data(&f).and_then(|data| data.builtin) {
            Some(Builtin::Require) => true,
            Some(Builtin::Call | Builtin::Apply | Builtin::Bind) => {
                external_tag(&self.state.value_of(&call.base))
            }
            _ => {
                call.is_external
                    || external_tag(&f)
                    || heap.function_data(&f).is_some_and(|data| data.is_native())
            }
        }
    }

    fn is_native(&self, heap: &Heap, call: &Invocation) -> bool {
        call.is_external
            && heap
                .function_data(&self.state.value_of(&call.f))
                .is_some_and(|f| f.is_native())
    }

    /// Labels every argument with the callee and refuses tainted arguments to a sink.
    fn check_call(&mut self, heap: &mut Heap, call: &Invocation) -> Result<(), TaintError> {
        let raw_f = self.state.value_of(&call.f);
        let callee = match heap.function_data(&raw_f).and_then(|f| f.builtin) {
            Some(Builtin::Call | Builtin::Apply) => self.state.value_of(&call.base),
            _ => raw_f,
        };
        let mut cx = HookContext::new(&mut self.state, heap, &self.policies);
        let name = cx.function_name(&callee);
        let label = format!("call:{name}");
        for arg in &call.args {
            cx.relabel(arg, &label);
        }
        let tainted: Vec<usize> = call
            .args
            .iter()
            .enumerate()
            .filter(|(_, arg)| cx.is_tainted(arg))
            .map(|(i, _)| i)
            .collect();
        if tainted.is_empty() || !self.sinks.is_sink(cx.heap, &callee) {
            return Ok(());
        }

        if self.config.sink_report {
            if self.reported.insert(name.clone()) {
                if let Err(err) = writeln!(self.report, "SINKHIT:{name}") {
                    warn!(sink = %name, error = %err, "could not write sink report");
                }
            }
            return Ok(());
        }
        let paths = tainted.iter().map(|i| cx.entry(&call.args[*i]).path).collect();
        let indices: Vec<String> = tainted.iter().map(ToString::to_string).collect();
        Err(TaintError::finding(
            FindingKind::SinkReached {
                sink: name.clone(),
                tainted_args: tainted,
            },
            format!(
                "Sink {name} reached with tainted arguments [{}]",
                indices.join(", ")
            ),
            paths,
        ))
    }

    /// A callable produced by a call that received a sink is a sink of the same category.
    fn launder_sinks(&mut self, heap: &Heap, call: &Invocation, result: &Value) {
        let result = self.state.value_of(result);
        if !heap.is_function(&result) {
            return;
        }
        let category = call
            .args
            .iter()
            .find_map(|arg| self.sinks.matches(heap, &self.state.value_of(arg)))
            .map(|pattern| pattern.category);
        if let Some(category) = category {
            self.sinks
                .register_function(heap, &result, SinkKind::Laundered, category);
        }
    }

    fn finish<T>(
        &mut self,
        hook: &'static str,
        result: Result<T, TaintError>,
    ) -> Result<T, TaintError> {
        self.state.context = EvalContext::Unset;
        if let Err(TaintError::Finding(finding)) = &result {
            self.report_finding(finding);
        }
        if self.config.log_level.debug {
            trace!(hook, state = %self.state.describe());
        }
        if self.config.log_level.explain {
            debug!(hook, wrapped = self.state.wrapped_count(), "done");
        }
        result
    }

    /// Exports the provenance of every path of `finding` and logs it. `taint_paths` writes the
    /// DOT graph and `taint_paths_json` the JSON export; each flag is honored on its own.
    fn report_finding(&self, finding: &Finding) {
        let formats = [
            (self.config.taint_paths, ExportFormat::Dot),
            (self.config.taint_paths_json, ExportFormat::Json),
        ];
        for format in formats
            .into_iter()
            .filter_map(|(enabled, format)| enabled.then_some(format))
        {
            for (i, path) in finding.paths.iter().enumerate() {
                let suffix = match &finding.kind {
                    FindingKind::SinkReached { tainted_args, .. } => {
                        tainted_args.get(i).map(ToString::to_string)
                    }
                    _ if finding.paths.len() > 1 => Some(i.to_string()),
                    _ => None,
                };
                match write_export(path, self.config.output_dir(), suffix.as_deref(), format) {
                    Ok(file) => info!(file = %file.display(), "wrote taint path"),
                    Err(err) => warn!(error = %err, "could not export taint path"),
                }
            }
        }
        warn!(kind = finding.kind.as_str(), "{}", finding.message);
    }

    fn render(&self, heap: &Heap, value: &Value) -> String {
        inspect(heap, &self.state.value_of(value), self.config.max_length)
    }

    fn render_all(&self, heap: &Heap, values: &[Value]) -> String {
        let rendered: Vec<String> = values.iter().map(|v| self.render(heap, v)).collect();
        format!("[{}]", rendered.join(", "))
    }
}

fn call_type(external: bool, native: bool) -> CallType {
    if native {
        CallType::Native
    } else if external {
        CallType::External
    } else {
        CallType::Internal
    }
}

/// Common prologue of the pre-hooks: consumes the identity a conditional left behind, then
/// requires an empty identity stack.
fn expect_idle(cx: &mut HookContext<'_>, site: &str) -> Result<(), TaintError> {
    if cx.state.context() == EvalContext::ConditionalExpr {
        cx.state.check_pending(1, site)?;
        cx.discard();
    }
    cx.state.check_pending(0, site)
}

fn unwrap_call(
    cx: &mut HookContext<'_>,
    call: Invocation,
    native: bool,
) -> Result<Invocation, TaintError> {
    expect_idle(cx, "WInvokeFunPre")?;
    let f = cx.unwrap(&call.f);
    if !call.is_external {
        cx.state.save_frame(CallType::Internal, call.site);
        return Ok(Invocation { f, ..call });
    }
    let base = if call.is_method {
        cx.unwrap(&call.base)
    } else {
        call.base.clone()
    };
    let args = cx
        .policies
        .policy_for(cx.heap, &base)
        .w_invoke_fun_pre(cx, &call.f, &call.base, &call.args)?;
    let call_type = if native {
        CallType::Native
    } else {
        CallType::External
    };
    cx.state.save_frame(call_type, call.site);
    Ok(Invocation {
        f,
        base,
        args,
        ..call
    })
}

/// Gives an anonymous function read from a property the property's name.
fn name_anonymous_function(heap: &mut Heap, value: &Value, offset: &Value) {
    let Some(id) = value.as_object() else {
        return;
    };
    let key = offset.to_key(heap);
    if let ObjectKind::Function(function) = &mut heap.get_mut(id).kind {
        if function.name.is_empty() {
            function.name = key;
        }
    }
}

/// Tags the object a `require` call returned with the module it was loaded from.
fn tag_import(cx: &mut HookContext<'_>, args: &[Value], result: &Value) {
    let Some(id) = cx.value_of(result).as_object() else {
        return;
    };
    let Some(module_path) = args.first().map(|arg| cx.value_of(arg)) else {
        return;
    };
    if let Some(module_path) = module_path.as_str() {
        let tag = ImportTag::classify(module_path);
        debug!(module = %tag.module_path, kind = tag.kind.as_str(), "tagged import");
        cx.heap.set_import_tag(id, tag);
    }
}

//! A minimal host that drives the engine the way an instrumentation framework does: every
//! operation runs its pre-hook, performs the real operation on the unwrapped operands, then
//! runs its post-hook.

#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use nodetaint_core::engine::{CallResult, FieldAccess, Invocation};
use nodetaint_core::runtime::natives::{Builtins, invoke_native};
use nodetaint_core::state::CallSite;
use nodetaint_core::{Config, Engine, Heap, HookContext, TaintError, Value};

pub struct Host {
    pub engine: Engine,
    pub heap: Heap,
    pub builtins: Builtins,
    next_site: CallSite,
}

impl Host {
    pub fn new(config: Config) -> Self {
        Self::with_engine(Engine::new(config).expect("engine"))
    }

    /// Configured from tokens, never writing provenance files.
    pub fn quiet(tokens: &[&str]) -> Self {
        Self::new(quiet_config(tokens))
    }

    /// Like [`Host::quiet`], with `SINKHIT:` lines going to `report`.
    pub fn reporting(tokens: &[&str], report: SharedBuffer) -> Self {
        Self::with_engine(
            Engine::new(quiet_config(tokens))
                .expect("engine")
                .with_report(report),
        )
    }

    fn with_engine(engine: Engine) -> Self {
        let mut heap = Heap::new();
        let builtins = Builtins::install(&mut heap);
        engine.install_ghost_functions(&mut heap);
        Self {
            engine,
            heap,
            builtins,
            next_site: 1,
        }
    }

    fn site(&mut self) -> CallSite {
        self.next_site += 1;
        self.next_site
    }

    pub fn pending(&self) -> usize {
        self.engine.state().pending_ids()
    }

    pub fn cx(&mut self) -> HookContext<'_> {
        self.engine.context(&mut self.heap)
    }

    pub fn literal(&mut self, raw: impl Into<Value>) -> Value {
        self.engine.literal(&mut self.heap, raw.into()).expect("literal")
    }

    pub fn global(&self, name: &str) -> Value {
        self.heap.get_property(self.heap.global(), name)
    }

    pub fn ghost(&mut self, name: &str, args: Vec<Value>) -> Result<(), TaintError> {
        let f = self.global(name);
        let site = self.site();
        let call = self
            .engine
            .invoke_fun_pre(&mut self.heap, Invocation::new(f, Value::Undefined, args, site))?;
        self.engine.invoke_fun(&mut self.heap, call, Value::Undefined)?;
        Ok(())
    }

    pub fn taint(&mut self, value: &Value) {
        self.ghost("__jalangi_set_taint__", vec![value.clone()])
            .expect("set_taint");
    }

    /// Taints the characters `[lb, ub)` of a string.
    pub fn taint_range(&mut self, value: &Value, lb: f64, ub: f64) {
        let lb = self.literal(lb);
        let ub = self.literal(ub);
        self.ghost("__string_range_set_taint__", vec![value.clone(), lb, ub])
            .expect("range taint");
    }

    /// `base.f(...args)` for a native `f`.
    pub fn call_method(
        &mut self,
        base: &Value,
        f: Value,
        args: Vec<Value>,
    ) -> Result<CallResult, TaintError> {
        let site = self.site();
        let call = Invocation::new(f, base.clone(), args, site).method();
        let call = self.engine.invoke_fun_pre(&mut self.heap, call)?;
        let result = invoke_native(&mut self.heap, &call.f, &call.base, &call.args)?;
        self.engine.invoke_fun(&mut self.heap, call, result)
    }

    pub fn string_call(
        &mut self,
        base: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, TaintError> {
        let f = self.builtins.string_method(&self.heap, method);
        Ok(self.call_method(base, f, args)?.result)
    }

    /// `left + right` on string operands.
    pub fn concat(&mut self, left: &Value, right: &Value) -> Result<Value, TaintError> {
        let (l, r) = self.engine.binary_pre(&mut self.heap, "+", left, right)?;
        let joined = Value::string(format!("{}{}", l.to_key(&self.heap), r.to_key(&self.heap)));
        let (_, _, result) = self.engine.binary(&mut self.heap, "+", l, r, joined)?;
        Ok(result)
    }

    /// `base[key]` on an object.
    pub fn get_field(&mut self, base: &Value, key: &str) -> Result<Value, TaintError> {
        let key = self.literal(key);
        let (b, k) = self.engine.get_field_pre(&mut self.heap, base, &key)?;
        let value = match b.as_object() {
            Some(id) => self.heap.get_property(id, &k.to_key(&self.heap)),
            None => Value::Undefined,
        };
        Ok(self.engine.get_field(&mut self.heap, b, k, value)?.value)
    }

    /// `base[key] = value` on an object.
    pub fn put_field(
        &mut self,
        base: &Value,
        key: &Value,
        value: &Value,
    ) -> Result<FieldAccess, TaintError> {
        let access = self
            .engine
            .put_field_pre(&mut self.heap, base, key, value.clone())?;
        if let Some(id) = access.base.as_object() {
            let name = access.offset.to_key(&self.heap);
            self.heap.set_property(id, &name, access.value.clone());
        }
        self.engine
            .put_field(&mut self.heap, access.base, access.offset, access.value)
    }

    /// Calls a script function whose body is `body`, with the enter and exit hooks around it.
    pub fn call_script<F>(&mut self, f: &Value, args: Vec<Value>, body: F) -> Result<Value, TaintError>
    where
        F: FnOnce(&mut Host, &[Value]) -> Result<Value, TaintError>,
    {
        let site = self.site();
        let call = Invocation::new(f.clone(), Value::Undefined, args, site);
        let call = self.engine.invoke_fun_pre(&mut self.heap, call)?;
        self.engine.function_enter(&mut self.heap, f)?;
        let returned = match body(self, &call.args) {
            Ok(value) => {
                self.engine.function_exit(false)?;
                value
            }
            Err(err) => {
                self.engine.function_exit(true)?;
                return Err(err);
            }
        };
        Ok(self.engine.invoke_fun(&mut self.heap, call, returned)?.result)
    }

    pub fn char_bits(&mut self, value: &Value) -> Vec<bool> {
        self.cx()
            .entry(value)
            .props
            .map(|map| map.chars().to_vec())
            .unwrap_or_default()
    }
}

pub fn quiet_config(tokens: &[&str]) -> Config {
    let mut config = Config::from_tokens(["taint_paths=false"]);
    config.apply_tokens(tokens);
    config
}

/// Collects `SINKHIT:` lines.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

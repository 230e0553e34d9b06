//! Sink registry
//!
//! Tracks the functions whose invocation with a tainted argument is a finding. The registry is
//! seeded with the code evaluation and process execution built-ins and grows at run time, either
//! through an explicit registration or when a call launders a sink into a new callable.

use std::collections::HashMap;

use tracing::info;

use crate::runtime::{Builtin, Heap, ObjectId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkCategory {
    CodeExecution,
    CommandInjection,
    /// Registered by the analyzed program without a known effect.
    Custom,
}

impl SinkCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkCategory::CodeExecution => "code_execution",
            SinkCategory::CommandInjection => "command_injection",
            SinkCategory::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    BuiltIn,
    /// Registered by the analyzed program through the ghost API.
    Custom,
    /// A callable returned by a call that received a sink.
    Laundered,
}

/// What a pattern recognizes a callee by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Builtin(Builtin),
    /// A native function with this name.
    Native(&'static str),
    /// One specific function object.
    Function(ObjectId),
}

#[derive(Debug, Clone)]
pub struct SinkPattern {
    pub target: SinkTarget,
    pub kind: SinkKind,
    pub category: SinkCategory,
    pub description: String,
}

impl SinkPattern {
    pub fn new(
        target: SinkTarget,
        kind: SinkKind,
        category: SinkCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            target,
            kind,
            category,
            description: description.into(),
        }
    }

    pub fn builtin(target: SinkTarget, category: SinkCategory, description: &str) -> Self {
        Self::new(target, SinkKind::BuiltIn, category, description)
    }

    /// Whether `callee` (raw) is the function this pattern describes.
    pub fn matches(&self, heap: &Heap, callee: &Value) -> bool {
        match &self.target {
            SinkTarget::Function(id) => callee.as_object() == Some(*id),
            SinkTarget::Builtin(builtin) => heap
                .function_data(callee)
                .is_some_and(|f| f.builtin == Some(*builtin)),
            SinkTarget::Native(name) => heap
                .function_data(callee)
                .is_some_and(|f| f.is_native() && f.builtin.is_none() && f.name == *name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinksRegistry {
    patterns: Vec<SinkPattern>,
    function_index: HashMap<ObjectId, usize>,
}

impl Default for SinksRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SinksRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            function_index: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_code_execution_sinks();
        registry.register_command_injection_sinks();
        registry
    }

    fn register_code_execution_sinks(&mut self) {
        self.register_pattern(SinkPattern::builtin(
            SinkTarget::Builtin(Builtin::Eval),
            SinkCategory::CodeExecution,
            "Dynamic code evaluation",
        ));
        self.register_pattern(SinkPattern::builtin(
            SinkTarget::Builtin(Builtin::FunctionConstructor),
            SinkCategory::CodeExecution,
            "Function constructor",
        ));
    }

    fn register_command_injection_sinks(&mut self) {
        let methods = [
            ("exec", "Shell command execution"),
            ("execSync", "Synchronous shell command execution"),
            ("spawn", "Process spawn"),
            ("spawnSync", "Synchronous process spawn"),
        ];
        for (name, description) in methods {
            self.register_pattern(SinkPattern::builtin(
                SinkTarget::Native(name),
                SinkCategory::CommandInjection,
                description,
            ));
        }
    }

    pub fn register_pattern(&mut self, pattern: SinkPattern) {
        let index = self.patterns.len();
        if let SinkTarget::Function(id) = pattern.target {
            self.function_index.insert(id, index);
        }
        self.patterns.push(pattern);
    }

    /// Registers one function object as a sink. Returns false when it already was one.
    pub fn register_function(
        &mut self,
        heap: &Heap,
        function: &Value,
        kind: SinkKind,
        category: SinkCategory,
    ) -> bool {
        let Some(id) = function.as_object() else {
            return false;
        };
        if self.matches(heap, function).is_some() {
            return false;
        }
        let name = heap
            .function_data(function)
            .map(|f| f.name.clone())
            .unwrap_or_default();
        info!(sink = %name, kind = ?kind, category = category.as_str(), "registered sink");
        self.register_pattern(SinkPattern::new(
            SinkTarget::Function(id),
            kind,
            category,
            format!("{kind:?} sink {name}"),
        ));
        true
    }

    /// The first pattern describing `callee`, if it is a sink.
    pub fn matches(&self, heap: &Heap, callee: &Value) -> Option<&SinkPattern> {
        if let Some(index) = callee.as_object().and_then(|id| self.function_index.get(&id)) {
            return self.patterns.get(*index);
        }
        self.patterns
            .iter()
            .filter(|p| !matches!(p.target, SinkTarget::Function(_)))
            .find(|p| p.matches(heap, callee))
    }

    pub fn is_sink(&self, heap: &Heap, value: &Value) -> bool {
        self.matches(heap, value).is_some()
    }

    pub fn patterns(&self) -> &[SinkPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

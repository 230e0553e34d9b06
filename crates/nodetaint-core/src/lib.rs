//! Dynamic taint tracking for instrumented JavaScript execution.
//!
//! An instrumentation framework drives an [`Engine`] through one hook per executed operation.
//! The engine shadows primitive values with identities, tracks which values (and which characters
//! of strings) derive from untrusted input, and reports a [`Finding`] when such a value reaches a
//! sink. Every finding carries the provenance graph of the offending value, exportable as JSON or
//! DOT.

pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod eval;
pub mod ghost;
pub mod logging;
pub mod module_import;
pub mod policy;
pub mod provenance;
pub mod runtime;
pub mod sinks;
pub mod state;
pub mod taint;
pub mod wrapper;

pub use config::{Config, ConfigError, load_config, load_config_or_default};
pub use engine::{CallResult, Engine, FieldAccess, Invocation};
pub use error::{Finding, FindingKind, TaintError};
pub use provenance::{ExportFormat, PathExport, PathNode, TriageReport};
pub use runtime::{Heap, Value};
pub use taint::HookContext;

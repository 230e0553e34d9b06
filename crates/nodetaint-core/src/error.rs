//! Error and finding types returned by the engine hooks

use std::fmt;
use std::path::PathBuf;

use crate::provenance::PathNode;

/// A native method failed while the runtime model executed it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("TypeError: {0}")]
    Type(String),
    #[error("RangeError: {0}")]
    Range(String),
    #[error("{name} is not executable by the runtime model")]
    Unsupported { name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to write taint path '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid taint path export: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid node id '{0}' in taint path export")]
    NodeId(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingKind {
    SinkReached { sink: String, tainted_args: Vec<usize> },
    EvalReached,
    PrototypePollution { property: String },
    GlobalWrite { value: String },
    TaintedArgument,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::SinkReached { .. } => "sink_reached",
            FindingKind::EvalReached => "eval_reached",
            FindingKind::PrototypePollution { .. } => "prototype_pollution",
            FindingKind::GlobalWrite { .. } => "global_write",
            FindingKind::TaintedArgument => "tainted_argument",
        }
    }
}

/// A tainted value reached an operation that proves a vulnerability.
#[derive(Debug, Clone)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
    pub paths: Vec<PathNode>,
}

impl Finding {
    pub fn new(kind: FindingKind, message: impl Into<String>, paths: Vec<PathNode>) -> Self {
        Self {
            kind,
            message: message.into(),
            paths,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaintError {
    #[error("Assertion failure: {0}")]
    Invariant(String),
    #[error("{0}")]
    Finding(Box<Finding>),
    #[error("{0}")]
    Assertion(String),
    #[error("Completed execution")]
    Completed,
    #[error("{0}")]
    Encoding(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl TaintError {
    pub fn finding(kind: FindingKind, message: impl Into<String>, paths: Vec<PathNode>) -> Self {
        TaintError::Finding(Box::new(Finding::new(kind, message, paths)))
    }

    pub fn is_finding(&self) -> bool {
        matches!(self, TaintError::Finding(_))
    }

    pub fn as_finding(&self) -> Option<&Finding> {
        match self {
            TaintError::Finding(finding) => Some(finding),
            _ => None,
        }
    }
}

/// Fails with [`TaintError::Invariant`] when `cond` does not hold.
pub(crate) fn ensure(cond: bool, message: impl FnOnce() -> String) -> Result<(), TaintError> {
    if cond {
        Ok(())
    } else {
        Err(TaintError::Invariant(message()))
    }
}

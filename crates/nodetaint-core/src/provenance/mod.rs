//! Provenance path engine
//!
//! Every taint mutation produces a [`PathNode`] joining the paths of the values it was computed
//! from. Nodes are immutable and shared, so the graph is an append-only DAG whose leaves are
//! untainted roots.

pub mod export;
pub mod triage;

use std::fmt;
use std::rc::Rc;

pub use export::{ExportFormat, ExportNode, PathExport, write_export};
pub use triage::{SanitizerClass, SinkClass, TriageReport};

pub const TAINTED_LABEL: &str = "Tainted";
pub const UNTAINTED_LABEL: &str = "Untainted";

/// Snapshots longer than this are truncated.
pub const SNAPSHOT_LIMIT: usize = 20;

#[derive(Clone)]
pub struct PathNode(Rc<Node>);

struct Node {
    label: String,
    parents: Vec<PathNode>,
    value: String,
    tainted: bool,
}

impl PathNode {
    /// An untainted root with no history.
    pub fn empty(value: &str) -> Self {
        Self(Rc::new(Node {
            label: UNTAINTED_LABEL.to_string(),
            parents: Vec::new(),
            value: truncate(value),
            tainted: false,
        }))
    }

    /// Joins `parents` under a new operation. Without parents the node is an untainted leaf
    /// hanging off a fresh empty root.
    pub fn new(label: impl Into<String>, parents: Vec<PathNode>, value: &str) -> Self {
        let label = label.into();
        if parents.is_empty() {
            return Self(Rc::new(Node {
                label,
                parents: vec![PathNode::empty(value)],
                value: truncate(value),
                tainted: false,
            }));
        }

        let mut unique: Vec<PathNode> = Vec::with_capacity(parents.len());
        for parent in parents {
            if !unique.iter().any(|seen| seen.ptr_eq(&parent)) {
                unique.push(parent);
            }
        }
        let tainted = label == TAINTED_LABEL || unique.iter().any(PathNode::is_tainted);
        Self(Rc::new(Node {
            label,
            parents: unique,
            value: truncate(value),
            tainted,
        }))
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn parents(&self) -> &[PathNode] {
        &self.0.parents
    }

    pub fn value(&self) -> &str {
        &self.0.value
    }

    pub fn is_tainted(&self) -> bool {
        self.0.tainted
    }

    pub fn has_parents(&self) -> bool {
        !self.0.parents.is_empty()
    }

    pub fn ptr_eq(&self, other: &PathNode) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathNode")
            .field("label", &self.0.label)
            .field("value", &self.0.value)
            .field("tainted", &self.0.tainted)
            .field("parents", &self.0.parents.len())
            .finish()
    }
}

fn truncate(value: &str) -> String {
    value.chars().take(SNAPSHOT_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parentless_nodes_are_untainted_even_when_labelled_tainted() {
        let node = PathNode::new(TAINTED_LABEL, vec![], "'x'");
        assert!(!node.is_tainted());
        assert_eq!(node.parents().len(), 1);
        assert_eq!(node.parents()[0].label(), UNTAINTED_LABEL);
    }

    #[test]
    fn tainted_label_taints_the_node() {
        let root = PathNode::empty("'x'");
        let node = PathNode::new(TAINTED_LABEL, vec![root], "'x'");
        assert!(node.is_tainted());
    }

    #[test]
    fn taint_flows_from_any_parent() {
        let clean = PathNode::empty("1");
        let dirty = PathNode::new(TAINTED_LABEL, vec![PathNode::empty("2")], "2");
        let sum = PathNode::new("binary:+", vec![clean.clone(), dirty], "3");
        assert!(sum.is_tainted());
        let clean_sum = PathNode::new("binary:+", vec![clean.clone(), clean], "2");
        assert!(!clean_sum.is_tainted());
    }

    #[test]
    fn shared_parents_are_joined_once() {
        let root = PathNode::empty("'a'");
        let node = PathNode::new("binary:+", vec![root.clone(), root], "'aa'");
        assert_eq!(node.parents().len(), 1);
    }

    #[test]
    fn snapshots_are_truncated() {
        let node = PathNode::empty("'a very long string that keeps going'");
        assert_eq!(node.value().chars().count(), SNAPSHOT_LIMIT);
    }
}

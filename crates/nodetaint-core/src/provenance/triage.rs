//! Triage of exported provenance paths
//!
//! Summarizes a JSON export for the exploit pipeline: which sink class the root reached, which
//! leaves an attacker controls and which sanitizer-like operations the taint crossed.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::export::PathExport;

const IMPLICIT_SANITIZERS: &[&str] = &["stringify", "replace", "substr", "indexOf"];
const EXPLICIT_SANITIZERS: &[&str] = &[
    "htmlencode",
    "urlencode",
    "encode",
    "escape",
    "sanitize",
    "queryString",
    "paramString",
    "bodyString",
    "headerString",
];
const OBJECT_ACCESS: &[&str] = &["getField", "putField"];
const T1_SINKS: &[&str] = &["exec"];
const T2_SINKS: &[&str] = &["eval", "Function", "execSync"];

/// Marks the consumer of an attacker-controlled leaf.
const CONTROL_MARKER: &str = "set_taint";

static IMPLICIT_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(IMPLICIT_SANITIZERS));
static EXPLICIT_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(EXPLICIT_SANITIZERS));
static OBJECT_ACCESS_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(OBJECT_ACCESS));
static T1_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(T1_SINKS));
static T2_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(T2_SINKS));

fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
    Regex::new(&format!("(?i){}", alternation.join("|"))).expect("Invalid regex pattern")
}

/// Case-insensitive containment in either direction.
fn operation_matches(operation: &str, re: &Regex, keywords: &[&str]) -> bool {
    if re.is_match(operation) {
        return true;
    }
    let lowered = operation.to_lowercase();
    !lowered.is_empty() && keywords.iter().any(|k| k.to_lowercase().contains(&lowered))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkClass {
    /// Command injection through the `exec` family.
    T1,
    /// Code injection through `eval`, `Function` or `execSync`.
    T2,
}

impl SinkClass {
    pub fn classify(operation: &str) -> Option<Self> {
        if operation_matches(operation, &T2_RE, T2_SINKS) {
            Some(SinkClass::T2)
        } else if operation_matches(operation, &T1_RE, T1_SINKS) {
            Some(SinkClass::T1)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkClass::T1 => "t1",
            SinkClass::T2 => "t2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SanitizerClass {
    Implicit,
    Explicit,
    ObjectAccess,
}

impl SanitizerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanitizerClass::Implicit => "implicit",
            SanitizerClass::Explicit => "explicit",
            SanitizerClass::ObjectAccess => "object_access",
        }
    }

    fn matches(&self, operation: &str) -> bool {
        match self {
            SanitizerClass::Implicit => {
                operation_matches(operation, &IMPLICIT_RE, IMPLICIT_SANITIZERS)
            }
            SanitizerClass::Explicit => {
                operation_matches(operation, &EXPLICIT_RE, EXPLICIT_SANITIZERS)
            }
            SanitizerClass::ObjectAccess => {
                operation_matches(operation, &OBJECT_ACCESS_RE, OBJECT_ACCESS)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizerSummary {
    pub count: usize,
    pub operations: BTreeSet<String>,
}

impl SanitizerSummary {
    fn collect(export: &PathExport, class: SanitizerClass) -> Self {
        let hits: Vec<&str> = export
            .iter()
            .map(|(_, node)| node.operation.as_str())
            .filter(|op| class.matches(op))
            .collect();
        Self {
            count: hits.len(),
            operations: hits.into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriageReport {
    pub root_operation: String,
    pub sink: Option<SinkClass>,
    pub count_nodes: usize,
    pub longest_path: usize,
    pub leaf_ids: Vec<u32>,
    pub controllable_leaf_ids: Vec<u32>,
    pub implicit: SanitizerSummary,
    pub explicit: SanitizerSummary,
    pub object_access: SanitizerSummary,
}

impl TriageReport {
    pub fn from_export(export: &PathExport) -> Self {
        let consumers = consumers(export);
        let leaf_ids: Vec<u32> = export
            .iter()
            .filter(|(_, node)| node.flows_from.is_empty())
            .map(|(id, _)| id)
            .collect();
        let controllable_leaf_ids = leaf_ids
            .iter()
            .copied()
            .filter(|leaf| match consumers.get(leaf).map(Vec::as_slice) {
                Some([consumer]) => export
                    .get(*consumer)
                    .is_some_and(|node| node.operation.contains(CONTROL_MARKER)),
                _ => false,
            })
            .collect();
        let root_operation = export
            .root()
            .map(|node| node.operation.clone())
            .unwrap_or_default();

        Self {
            sink: SinkClass::classify(&root_operation),
            root_operation,
            count_nodes: export.len(),
            longest_path: longest_path(export),
            leaf_ids,
            controllable_leaf_ids,
            implicit: SanitizerSummary::collect(export, SanitizerClass::Implicit),
            explicit: SanitizerSummary::collect(export, SanitizerClass::Explicit),
            object_access: SanitizerSummary::collect(export, SanitizerClass::ObjectAccess),
        }
    }

    pub fn sanitizers(&self, class: SanitizerClass) -> &SanitizerSummary {
        match class {
            SanitizerClass::Implicit => &self.implicit,
            SanitizerClass::Explicit => &self.explicit,
            SanitizerClass::ObjectAccess => &self.object_access,
        }
    }
}

/// For every id, the nodes that list it in `flows_from`.
fn consumers(export: &PathExport) -> HashMap<u32, Vec<u32>> {
    let mut flows_to: HashMap<u32, Vec<u32>> = HashMap::new();
    for (id, _) in export.iter() {
        for parent in export.parents_of(id) {
            flows_to.entry(parent).or_default().push(id);
        }
    }
    flows_to
}

/// Node count of the longest chain from the root. Parents always carry larger ids in a
/// pre-order export; references to smaller ids are cycles and are ignored.
fn longest_path(export: &PathExport) -> usize {
    let mut depth: HashMap<u32, usize> = HashMap::new();
    let ids: Vec<u32> = export.iter().map(|(id, _)| id).collect();
    for id in ids.into_iter().rev() {
        let longest_parent = export
            .parents_of(id)
            .into_iter()
            .filter(|parent| *parent > id)
            .filter_map(|parent| depth.get(&parent).copied())
            .max()
            .unwrap_or(0);
        depth.insert(id, longest_parent + 1);
    }
    depth.get(&1).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{PathNode, TAINTED_LABEL};

    fn exec_path() -> PathExport {
        let input = PathNode::empty("'x'");
        let marked = PathNode::new("call:__jalangi_set_taint__", vec![input], "'x'");
        let tainted = PathNode::new(TAINTED_LABEL, vec![marked], "'x'");
        let escaped = PathNode::new("call:escape", vec![tainted], "'x'");
        let prefix = PathNode::empty("'ls '");
        let cmd = PathNode::new("binary:+", vec![prefix, escaped], "'ls x'");
        let field = PathNode::new("getField", vec![cmd], "'ls x'");
        PathExport::from_path(&PathNode::new("call:exec", vec![field], "'ls x'"))
    }

    #[test]
    fn sink_classes_check_code_injection_first() {
        assert_eq!(SinkClass::classify("call:exec"), Some(SinkClass::T1));
        assert_eq!(SinkClass::classify("call:execSync"), Some(SinkClass::T2));
        assert_eq!(SinkClass::classify("call:eval"), Some(SinkClass::T2));
        assert_eq!(SinkClass::classify("call:Function"), Some(SinkClass::T2));
        assert_eq!(SinkClass::classify("call:spawn"), None);
    }

    #[test]
    fn matching_is_case_insensitive_both_ways() {
        assert!(SanitizerClass::Explicit.matches("call:HTMLEncode"));
        assert!(SanitizerClass::Implicit.matches("place"));
        assert!(!SanitizerClass::ObjectAccess.matches("binary:+"));
    }

    #[test]
    fn report_finds_leaves_and_controllable_leaves() {
        let export = exec_path();
        let report = TriageReport::from_export(&export);
        assert_eq!(report.root_operation, "call:exec");
        assert_eq!(report.sink, Some(SinkClass::T1));
        assert_eq!(report.count_nodes, export.len());
        assert_eq!(report.leaf_ids.len(), 2);
        assert_eq!(report.controllable_leaf_ids.len(), 1);
        let leaf = report.controllable_leaf_ids[0];
        assert_eq!(export.get(leaf).unwrap().value, "'x'");
    }

    #[test]
    fn report_groups_sanitizers() {
        let report = TriageReport::from_export(&exec_path());
        assert_eq!(report.explicit.count, 1);
        assert!(report.explicit.operations.contains("call:escape"));
        assert_eq!(report.object_access.count, 1);
        assert_eq!(report.implicit.count, 0);
    }

    #[test]
    fn longest_path_counts_nodes_from_the_root() {
        let report = TriageReport::from_export(&exec_path());
        // exec <- getField <- + <- escape <- Tainted <- set_taint <- leaf
        assert_eq!(report.longest_path, 7);
    }

    #[test]
    fn empty_exports_have_no_sink() {
        let report = TriageReport::from_export(&PathExport::default());
        assert_eq!(report.sink, None);
        assert_eq!(report.longest_path, 0);
    }
}

//! Provenance export
//!
//! The DAG is unfolded into a tree numbered in pre-order (root = 1) and written either as a JSON
//! object keyed by node id or as a Graphviz `digraph`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::PathNode;
use crate::error::ExportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Dot,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Dot => "dot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportNode {
    pub operation: String,
    pub value: String,
    pub tainted: bool,
    pub flows_from: Vec<String>,
}

/// Numbered, flattened view of one provenance path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathExport {
    nodes: BTreeMap<u32, ExportNode>,
}

impl PathExport {
    pub fn from_path(root: &PathNode) -> Self {
        let mut nodes: BTreeMap<u32, ExportNode> = BTreeMap::new();
        let mut next_id = 0u32;
        // (node, id of the child it flows into)
        let mut stack: Vec<(PathNode, Option<u32>)> = vec![(root.clone(), None)];

        while let Some((node, child)) = stack.pop() {
            next_id += 1;
            let id = next_id;
            if let Some(entry) = child.and_then(|c| nodes.get_mut(&c)) {
                entry.flows_from.push(id.to_string());
            }
            nodes.insert(
                id,
                ExportNode {
                    operation: node.label().to_string(),
                    value: sanitize(node.value()),
                    tainted: node.is_tainted(),
                    flows_from: Vec::new(),
                },
            );
            for parent in node.parents().iter().rev() {
                stack.push((parent.clone(), Some(id)));
            }
        }

        Self { nodes }
    }

    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        let raw: BTreeMap<String, ExportNode> = serde_json::from_str(json)?;
        let mut nodes = BTreeMap::new();
        for (key, node) in raw {
            let id = key.parse::<u32>().map_err(|_| ExportError::NodeId(key.clone()))?;
            nodes.insert(id, node);
        }
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&ExportNode> {
        self.nodes.get(&id)
    }

    pub fn root(&self) -> Option<&ExportNode> {
        self.nodes.get(&1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &ExportNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Parent ids of `id`, skipping references that do not parse.
    pub fn parents_of(&self, id: u32) -> Vec<u32> {
        self.nodes
            .get(&id)
            .map(|node| {
                node.flows_from
                    .iter()
                    .filter_map(|p| p.parse::<u32>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph Taint_Paths {\n");
        for (id, node) in &self.nodes {
            let _ = write!(
                out,
                "    n{id} [label=\"({id}) {}\\n{}\"",
                escape_dot(&node.operation),
                escape_dot(&node.value)
            );
            if node.tainted {
                out.push_str(", color=red");
            }
            out.push_str("];\n");
        }
        for (id, node) in &self.nodes {
            for parent in &node.flows_from {
                let parent_tainted = parent
                    .parse::<u32>()
                    .ok()
                    .and_then(|p| self.nodes.get(&p))
                    .is_some_and(|p| p.tainted);
                let _ = write!(out, "    n{parent} -> n{id}");
                if parent_tainted {
                    out.push_str(" [color=red]");
                }
                out.push_str(";\n");
            }
        }
        out.push_str("}\n");
        out
    }

    pub fn render(&self, format: ExportFormat) -> Result<String, ExportError> {
        match format {
            ExportFormat::Json => self.to_json(),
            ExportFormat::Dot => Ok(self.to_dot()),
        }
    }
}

impl Serialize for PathExport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (id, node) in &self.nodes {
            map.serialize_entry(&id.to_string(), node)?;
        }
        map.end()
    }
}

/// File name for an export: `taint.<ext>` or `taint_<suffix>.<ext>`.
pub fn export_file_name(suffix: Option<&str>, format: ExportFormat) -> String {
    match suffix {
        Some(suffix) => format!("taint_{suffix}.{}", format.extension()),
        None => format!("taint.{}", format.extension()),
    }
}

/// Writes the export of `root` into `dir` and returns the file written.
pub fn write_export(
    root: &PathNode,
    dir: &Path,
    suffix: Option<&str>,
    format: ExportFormat,
) -> Result<PathBuf, ExportError> {
    let path = dir.join(export_file_name(suffix, format));
    let contents = PathExport::from_path(root).render(format)?;
    fs::write(&path, contents).map_err(|source| ExportError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn sanitize(value: &str) -> String {
    value.chars().filter(|c| *c != '"' && *c != '`').collect()
}

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::TAINTED_LABEL;

    fn sample() -> PathNode {
        let source = PathNode::new(TAINTED_LABEL, vec![PathNode::empty("'ls'")], "'ls'");
        let other = PathNode::empty("' -la'");
        let joined = PathNode::new("binary:+", vec![source, other], "'ls -la'");
        PathNode::new("call:exec", vec![joined], "'ls -la'")
    }

    #[test]
    fn numbering_is_pre_order() {
        let export = PathExport::from_path(&sample());
        assert_eq!(export.len(), 5);
        assert_eq!(export.root().unwrap().operation, "call:exec");
        assert_eq!(export.parents_of(1), vec![2]);
        assert_eq!(export.parents_of(2), vec![3, 5]);
        assert_eq!(export.parents_of(3), vec![4]);
        assert_eq!(export.get(4).unwrap().operation, "Untainted");
        assert!(export.get(5).unwrap().flows_from.is_empty());
    }

    #[test]
    fn values_drop_quotes_and_backticks() {
        let node = PathNode::empty("\"a`b\"");
        let export = PathExport::from_path(&node);
        assert_eq!(export.root().unwrap().value, "ab");
    }

    #[test]
    fn json_uses_four_space_indent_and_numeric_order() {
        let json = PathExport::from_path(&sample()).to_json().unwrap();
        assert!(json.starts_with("{\n    \"1\": {\n        \"operation\": \"call:exec\""));
        let two = json.find("\"2\"").unwrap();
        let five = json.find("\"5\"").unwrap();
        assert!(two < five);
    }

    #[test]
    fn json_round_trips_through_from_json() {
        let export = PathExport::from_path(&sample());
        let parsed = PathExport::from_json(&export.to_json().unwrap()).unwrap();
        assert_eq!(parsed, export);
    }

    #[test]
    fn from_json_rejects_non_numeric_ids() {
        let err = PathExport::from_json(
            r#"{"x": {"operation": "a", "value": "", "tainted": false, "flows_from": []}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::NodeId(id) if id == "x"));
    }

    #[test]
    fn dot_colors_tainted_edges() {
        let dot = PathExport::from_path(&sample()).to_dot();
        assert!(dot.starts_with("digraph Taint_Paths {"));
        assert!(dot.contains("n3 -> n2 [color=red];"));
        assert!(dot.contains("n5 -> n2;"));
        assert!(dot.contains("n1 [label=\"(1) call:exec\\n'ls -la'\", color=red];"));
    }

    #[test]
    fn file_names_follow_the_suffix() {
        assert_eq!(export_file_name(None, ExportFormat::Json), "taint.json");
        assert_eq!(export_file_name(Some("0"), ExportFormat::Dot), "taint_0.dot");
    }

    #[test]
    fn write_export_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(&sample(), dir.path(), Some("1"), ExportFormat::Json).unwrap();
        assert_eq!(path.file_name().unwrap(), "taint_1.json");
        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(PathExport::from_json(&contents).unwrap().len(), 5);
    }
}

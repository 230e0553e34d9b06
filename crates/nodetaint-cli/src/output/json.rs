//! JSON output formatter for triage reports
//!
//! Wraps the report with version metadata so downstream tooling can check what produced it.

use nodetaint_core::TriageReport;
use serde::Serialize;

#[derive(Serialize)]
pub struct JsonOutput<'a> {
    pub version: &'static str,
    pub metadata: JsonMetadata,
    pub triage: &'a TriageReport,
}

#[derive(Serialize)]
pub struct JsonMetadata {
    pub nodetaint_version: &'static str,
    pub working_directory: String,
    pub export_path: String,
}

pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format_triage(&self, report: &TriageReport, export_path: &str) -> String {
        let output = JsonOutput {
            version: "1.0",
            metadata: self.build_metadata(export_path),
            triage: report,
        };
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }

    fn build_metadata(&self, export_path: &str) -> JsonMetadata {
        JsonMetadata {
            nodetaint_version: env!("CARGO_PKG_VERSION"),
            working_directory: std::env::current_dir()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            export_path: export_path.to_string(),
        }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodetaint_core::PathExport;

    fn sample_report() -> TriageReport {
        let export = PathExport::from_json(
            r#"{
                "1": {"operation": "call:eval", "value": "x", "tainted": true, "flows_from": ["2"]},
                "2": {"operation": "JSON.stringify", "value": "x", "tainted": true, "flows_from": ["3"]},
                "3": {"operation": "Untainted", "value": "x", "tainted": false, "flows_from": []}
            }"#,
        )
        .unwrap();
        TriageReport::from_export(&export)
    }

    #[test]
    fn output_carries_version_and_metadata() {
        let json = JsonFormatter::new().format_triage(&sample_report(), "taint.json");
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["version"], "1.0");
        assert_eq!(parsed["metadata"]["export_path"], "taint.json");
        assert_eq!(
            parsed["metadata"]["nodetaint_version"],
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn triage_fields_are_serialized() {
        let json = JsonFormatter::new().format_triage(&sample_report(), "taint.json");
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let triage = &parsed["triage"];
        assert_eq!(triage["root_operation"], "call:eval");
        assert_eq!(triage["sink"], "t2");
        assert_eq!(triage["count_nodes"], 3);
        assert_eq!(triage["leaf_ids"], serde_json::json!([3]));
        assert_eq!(triage["controllable_leaf_ids"], serde_json::json!([]));
        assert_eq!(triage["implicit"]["count"], 1);
        assert_eq!(
            triage["implicit"]["operations"],
            serde_json::json!(["JSON.stringify"])
        );
    }
}

//! Configuration loading and parsing for nodetaint
//!
//! A run is configured from an optional `nodetaint.toml` file and a list of `key=value` tokens
//! passed at process start. Tokens are applied after the file and override it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::policy::{PolicyRegistry, Precision};

pub const CONFIG_FILENAME: &str = "nodetaint.toml";

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "assert_passed",
    "eval_sink",
    "taint_paths",
    "taint_paths_json",
    "aggressive_sink_propagation",
    "sink_report",
    "log_level",
    "policies",
    "max_length",
    "output_dir",
];
const KNOWN_LOG_LEVEL_KEYS: &[&str] = &["explain", "debug"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML in '{path}': {message}")]
    ParseError { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ConfigResult {
    pub config: Config,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogFlags {
    /// Per-hook trace of operands and results.
    pub explain: bool,
    /// Shadow state dumps after every hook.
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Successful ghost assertions end the run with a completion sentinel.
    pub assert_passed: bool,
    /// Tainted code reaching eval is a finding; otherwise it runs in an eval scope.
    pub eval_sink: bool,
    /// Write the provenance of findings as DOT graphs.
    pub taint_paths: bool,
    /// Write the provenance of findings as JSON, alongside or instead of DOT.
    pub taint_paths_json: bool,
    /// Launder sinks through internal calls too.
    pub aggressive_sink_propagation: bool,
    /// Report sink hits as `SINKHIT:` lines instead of failing.
    pub sink_report: bool,
    pub log_level: LogFlags,
    pub policies: BTreeMap<String, Precision>,
    pub max_length: usize,
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assert_passed: false,
            eval_sink: true,
            taint_paths: true,
            taint_paths_json: false,
            aggressive_sink_propagation: true,
            sink_report: false,
            log_level: LogFlags::default(),
            policies: BTreeMap::new(),
            max_length: 50,
            output_dir: None,
        }
    }
}

impl Config {
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        config.apply_tokens(tokens);
        config
    }

    /// Applies `key=value` tokens on top of the current values. Unknown or malformed tokens
    /// are skipped.
    pub fn apply_tokens<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            let token = token.as_ref();
            let Some((key, value)) = token.split_once('=') else {
                debug!(token, "ignoring malformed config token");
                continue;
            };
            match key {
                "assert_passed" => self.assert_passed = is_true(value),
                "eval_sink" => self.eval_sink = !is_false(value),
                "taint_paths" => self.taint_paths = !is_false(value),
                "taint_paths_json" => self.taint_paths_json = is_true(value),
                "aggressive_sink_propagation" => {
                    self.aggressive_sink_propagation = !is_false(value)
                }
                "sink_report" => self.sink_report = is_true(value),
                "log_level" => {
                    let levels: Vec<&str> = value.split(',').collect();
                    self.log_level.explain = levels.contains(&"info");
                    self.log_level.debug = levels.contains(&"debug");
                }
                "policies" => self.apply_policies(value),
                "max_length" => match value.parse() {
                    Ok(n) => self.max_length = n,
                    Err(_) => debug!(token, "ignoring malformed config token"),
                },
                "output_dir" => self.output_dir = Some(PathBuf::from(value)),
                _ => debug!(token, "ignoring unknown config token"),
            }
        }
    }

    /// `kind:level` pairs separated by commas.
    fn apply_policies(&mut self, value: &str) {
        for pair in value.split(',').filter(|p| !p.is_empty()) {
            let parsed = pair
                .split_once(':')
                .and_then(|(kind, level)| Some((kind, Precision::parse(level)?)));
            match parsed {
                Some((kind, precision)) => {
                    self.policies.insert(kind.to_string(), precision);
                }
                None => debug!(pair, "ignoring malformed policy entry"),
            }
        }
    }

    pub fn policy_registry(&self) -> PolicyRegistry {
        PolicyRegistry::from_levels(&self.policies)
    }

    /// Directory provenance exports are written to.
    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(Path::new("."))
    }
}

fn is_true(value: &str) -> bool {
    matches!(value, "true" | "t")
}

fn is_false(value: &str) -> bool {
    matches!(value, "false" | "f")
}

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if !current.pop() {
            return None;
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })
}

pub fn load_config_with_warnings(path: &Path) -> Result<ConfigResult, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;

    let warnings = detect_unknown_keys(&content);

    Ok(ConfigResult { config, warnings })
}

fn detect_unknown_keys(content: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(_) => return warnings,
    };

    let known_top: HashSet<&str> = KNOWN_TOP_LEVEL_KEYS.iter().copied().collect();
    for key in table.keys() {
        if !known_top.contains(key.as_str()) {
            warnings.push(format!("Unknown config option: '{}'", key));
        }
    }

    if let Some(toml::Value::Table(levels)) = table.get("log_level") {
        let known: HashSet<&str> = KNOWN_LOG_LEVEL_KEYS.iter().copied().collect();
        for key in levels.keys() {
            if !known.contains(key.as_str()) {
                warnings.push(format!("Unknown config option in [log_level]: '{}'", key));
            }
        }
    }

    warnings
}

pub fn load_config_or_default(start_dir: &Path) -> Config {
    find_config_file(start_dir)
        .and_then(|path| load_config(&path).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyKind, ValueKind};
    use std::fs;

    fn create_temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("Failed to create temp dir")
    }

    #[test]
    fn defaults_match_a_plain_run() {
        let config = Config::default();
        assert!(config.eval_sink);
        assert!(config.taint_paths);
        assert!(!config.taint_paths_json);
        assert!(!config.assert_passed);
        assert!(config.aggressive_sink_propagation);
        assert_eq!(config.max_length, 50);
        assert_eq!(config.output_dir(), Path::new("."));
    }

    #[test]
    fn tokens_follow_the_loose_boolean_rules() {
        let config = Config::from_tokens([
            "eval_sink=no",
            "taint_paths=f",
            "taint_paths_json=t",
            "assert_passed=yes",
        ]);
        assert!(config.eval_sink);
        assert!(!config.taint_paths);
        assert!(config.taint_paths_json);
        assert!(!config.assert_passed);

        let config = Config::from_tokens(["eval_sink=false", "assert_passed=true"]);
        assert!(!config.eval_sink);
        assert!(config.assert_passed);
    }

    #[test]
    fn log_level_sets_both_flags() {
        let config = Config::from_tokens(["log_level=info,debug"]);
        assert!(config.log_level.explain);
        assert!(config.log_level.debug);
        let config = Config::from_tokens(["log_level=debug"]);
        assert!(!config.log_level.explain);
    }

    #[test]
    fn policies_token_configures_precision() {
        let config = Config::from_tokens(["policies=array:precise,string:precise,map:bogus,oops"]);
        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.policies.get("array"), Some(&Precision::Precise));
        let registry = config.policy_registry();
        assert_eq!(registry.resolve(&ValueKind::String), PolicyKind::StringPrecise);
        assert_eq!(registry.resolve(&ValueKind::Map), PolicyKind::MapImprecise);
    }

    #[test]
    fn unknown_and_malformed_tokens_are_ignored() {
        let config = Config::from_tokens(["verbose", "color=always", "max_length=abc"]);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_config_from_file() {
        let dir = create_temp_dir();
        let config_path = dir.path().join(CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
eval_sink = false
sink_report = true
output_dir = "out"

[log_level]
explain = true

[policies]
array = "precise"
"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();

        assert!(!config.eval_sink);
        assert!(config.sink_report);
        assert!(config.log_level.explain);
        assert!(!config.log_level.debug);
        assert_eq!(config.policies.get("array"), Some(&Precision::Precise));
        assert_eq!(config.output_dir(), Path::new("out"));
    }

    #[test]
    fn tokens_override_file_values() {
        let dir = create_temp_dir();
        let config_path = dir.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "taint_paths_json = true\n").unwrap();

        let mut config = load_config(&config_path).unwrap();
        config.apply_tokens(["taint_paths_json=false"]);

        assert!(!config.taint_paths_json);
    }

    #[test]
    fn default_config_when_missing() {
        let dir = create_temp_dir();
        let config = load_config_or_default(dir.path());

        assert_eq!(config, Config::default());
    }

    #[test]
    fn error_on_invalid_toml() {
        let dir = create_temp_dir();
        let config_path = dir.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "this is not valid { toml }").unwrap();

        let result = load_config(&config_path);

        match result.unwrap_err() {
            ConfigError::ParseError { path, message } => {
                assert_eq!(path, config_path);
                assert!(!message.is_empty());
            }
            _ => panic!("Expected ParseError"),
        }
    }

    #[test]
    fn find_config_file_in_parent_directory() {
        let parent = create_temp_dir();
        let child = parent.path().join("subdir");
        fs::create_dir(&child).unwrap();
        let config_path = parent.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "").unwrap();

        let found = find_config_file(&child);

        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn warns_on_unknown_options() {
        let dir = create_temp_dir();
        let config_path = dir.path().join(CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
eval_sink = true
verbose = true

[log_level]
trace = true
"#,
        )
        .unwrap();

        let result = load_config_with_warnings(&config_path).unwrap();

        assert_eq!(
            result.warnings,
            vec![
                "Unknown config option: 'verbose'".to_string(),
                "Unknown config option in [log_level]: 'trace'".to_string(),
            ]
        );
    }

    #[test]
    fn config_error_display_is_helpful() {
        let err = ConfigError::ParseError {
            path: PathBuf::from("/path/to/nodetaint.toml"),
            message: "expected `=`".to_string(),
        };

        let msg = format!("{}", err);

        assert!(msg.contains("/path/to/nodetaint.toml"));
        assert!(msg.contains("expected `=`"));
    }
}

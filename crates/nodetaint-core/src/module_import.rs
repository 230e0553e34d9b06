//! Imported-module tags
//!
//! The result of every module load is tagged as a built-in, a dependency, or same-project code.
//! Invocation classification and policy dispatch read the tag back later.

use std::path::{Component, Path, PathBuf};

/// Node's built-in module names.
pub const BUILTIN_MODULES: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "crypto",
    "dgram",
    "dns",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "net",
    "os",
    "path",
    "process",
    "querystring",
    "readline",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Builtin,
    Dependency,
    Internal,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Builtin => "builtin",
            ModuleKind::Dependency => "dependency",
            ModuleKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTag {
    pub kind: ModuleKind,
    pub module_path: String,
}

impl ImportTag {
    pub fn classify(module_path: &str) -> Self {
        let name = module_path.strip_prefix("node:").unwrap_or(module_path);
        let kind = if BUILTIN_MODULES.contains(&name) {
            ModuleKind::Builtin
        } else if is_relative(module_path) {
            ModuleKind::Internal
        } else {
            ModuleKind::Dependency
        };
        Self {
            kind,
            module_path: module_path.to_string(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kind, ModuleKind::Builtin | ModuleKind::Dependency)
    }

    pub fn is_builtin(&self) -> bool {
        self.kind == ModuleKind::Builtin
    }

    pub fn is_internal(&self) -> bool {
        self.kind == ModuleKind::Internal
    }

    /// Filesystem locations a loader should try, in order, for a script living in `script_dir`.
    pub fn candidates(&self, script_dir: &Path, home: Option<&Path>) -> Vec<PathBuf> {
        match self.kind {
            ModuleKind::Builtin => vec![PathBuf::from(&self.module_path)],
            ModuleKind::Internal => vec![script_dir.join(&self.module_path)],
            ModuleKind::Dependency => {
                let mut dirs = node_modules_paths(script_dir, &self.module_path);
                if let Some(home) = home {
                    dirs.push(home.join(".node_modules").join(&self.module_path));
                    dirs.push(home.join(".node_libraries").join(&self.module_path));
                }
                dirs
            }
        }
    }
}

fn is_relative(module_path: &str) -> bool {
    module_path.starts_with("./") || module_path.starts_with("../") || module_path.starts_with('/')
}

/// Walks up from `start`, skipping directories that are themselves `node_modules`.
fn node_modules_paths(start: &Path, module_path: &str) -> Vec<PathBuf> {
    let parts: Vec<Component<'_>> = start.components().collect();
    let mut dirs = Vec::new();
    for end in (1..=parts.len()).rev() {
        if parts[end - 1].as_os_str() == "node_modules" {
            continue;
        }
        let dir: PathBuf = parts[..end].iter().collect();
        dirs.push(dir.join("node_modules").join(module_path));
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_modules_are_external() {
        let tag = ImportTag::classify("child_process");
        assert!(tag.is_builtin());
        assert!(tag.is_external());
        assert!(!tag.is_internal());
    }

    #[test]
    fn node_prefix_is_still_builtin() {
        assert!(ImportTag::classify("node:fs").is_builtin());
    }

    #[test]
    fn relative_paths_are_internal() {
        for path in ["./lib", "../x", "/abs/mod"] {
            let tag = ImportTag::classify(path);
            assert!(tag.is_internal(), "{path} should be internal");
            assert!(!tag.is_external());
        }
    }

    #[test]
    fn bare_names_are_dependencies() {
        let tag = ImportTag::classify("lodash");
        assert_eq!(tag.kind, ModuleKind::Dependency);
        assert!(tag.is_external());
        assert_eq!(tag.module_path, "lodash");
    }

    #[test]
    fn dependency_candidates_walk_up_and_skip_node_modules() {
        let tag = ImportTag::classify("lodash");
        let dirs = tag.candidates(Path::new("/a/node_modules/b"), Some(Path::new("/home/u")));
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/a/node_modules/b/node_modules/lodash"),
                PathBuf::from("/a/node_modules/lodash"),
                PathBuf::from("/node_modules/lodash"),
                PathBuf::from("/home/u/.node_modules/lodash"),
                PathBuf::from("/home/u/.node_libraries/lodash"),
            ]
        );
    }

    #[test]
    fn internal_candidates_resolve_against_script_dir() {
        let tag = ImportTag::classify("./util");
        assert_eq!(
            tag.candidates(Path::new("/proj"), None),
            vec![PathBuf::from("/proj/./util")]
        );
    }
}

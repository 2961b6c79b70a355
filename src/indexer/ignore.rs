//! Ignore policy / 忽略规则
//!
//! Built-in rules match a single path component. They are checked against the components
//! below the watched root only, so a root that itself lives under a dot-directory still works.
//! Extra rules from the config are regexes tested against the whole path.

use regex::{Regex, RegexBuilder};
use std::path::Path;

use crate::error::{IndexerError, Result};

const BUILTIN_RULES: &[(&str, bool)] = &[
    // dotfiles and dot-directories (.git, .cache, .hidden ...)
    (r"^\.", false),
    // dependency caches
    (r"^node_modules$", false),
    // OS profile caches
    (r"^AppData$", false),
    // paging / hibernation files
    (r"^(hiberfil\.sys|pagefile\.sys|swapfile\.sys|DumpStack\.log\.tmp)$", true),
    // OS system directories
    (
        r"^(System Volume Information|\$RECYCLE\.BIN|Config\.Msi|Windows|Program Files|Program Files \(x86\))$",
        true,
    ),
];

#[derive(Debug, Clone)]
pub struct IgnorePolicy {
    component_rules: Vec<Regex>,
    path_rules: Vec<Regex>,
}

impl IgnorePolicy {
    /// Built-in rules plus user supplied path regexes / 内置规则加自定义规则
    pub fn new(extra: &[String]) -> Result<Self> {
        let mut component_rules = Vec::with_capacity(BUILTIN_RULES.len());
        for (pattern, case_insensitive) in BUILTIN_RULES {
            let rule = RegexBuilder::new(pattern)
                .case_insensitive(*case_insensitive)
                .build()
                .map_err(|e| IndexerError::Internal(format!("bad builtin rule {}: {}", pattern, e)))?;
            component_rules.push(rule);
        }

        let mut path_rules = Vec::with_capacity(extra.len());
        for pattern in extra {
            let rule = Regex::new(pattern)
                .map_err(|e| IndexerError::Config(format!("Invalid ignore rule {:?}: {}", pattern, e)))?;
            path_rules.push(rule);
        }

        Ok(Self {
            component_rules,
            path_rules,
        })
    }

    /// Built-in rules only / 仅内置规则
    pub fn builtin() -> Self {
        Self::new(&[]).unwrap_or_else(|_| Self {
            component_rules: Vec::new(),
            path_rules: Vec::new(),
        })
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.component_rules.iter().any(|rule| rule.is_match(name))
    }

    /// Whether `path` (somewhere under `root`) is excluded / 判断路径是否被忽略
    pub fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        if let Ok(relative) = path.strip_prefix(root) {
            for component in relative.components() {
                if self.is_ignored_name(&component.as_os_str().to_string_lossy()) {
                    return true;
                }
            }
        }

        if self.path_rules.is_empty() {
            return false;
        }
        let full = path.to_string_lossy();
        self.path_rules.iter().any(|rule| rule.is_match(&full))
    }
}

impl Default for IgnorePolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ignored(path: &str) -> bool {
        IgnorePolicy::builtin().is_ignored(Path::new("/home/ada"), Path::new(path))
    }

    #[test]
    fn test_builtin_rules() {
        assert!(ignored("/home/ada/.hidden"));
        assert!(ignored("/home/ada/.git/config"));
        assert!(ignored("/home/ada/proj/node_modules/react/index.js"));
        assert!(ignored("/home/ada/AppData/Local/Temp/x.log"));
        assert!(ignored("/home/ada/PAGEFILE.SYS"));
        assert!(ignored("/home/ada/$Recycle.Bin/junk"));
        assert!(ignored("/home/ada/Program Files (x86)/app.exe"));

        assert!(!ignored("/home/ada/docs/report.pdf"));
        assert!(!ignored("/home/ada/WindowsNotes.txt"));
        assert!(!ignored("/home/ada/my.file.txt"));
    }

    #[test]
    fn test_root_components_are_not_checked() {
        let policy = IgnorePolicy::builtin();
        let root = PathBuf::from("/tmp/.tmpAbc123");
        assert!(!policy.is_ignored(&root, &root.join("report.pdf")));
        assert!(policy.is_ignored(&root, &root.join(".hidden")));
        assert!(!policy.is_ignored(&root, &root));
    }

    #[test]
    fn test_extra_rules_match_full_path() {
        let policy = IgnorePolicy::new(&[r"\.tmp$".to_string()]).unwrap();
        assert!(policy.is_ignored(Path::new("/r"), Path::new("/r/build/out.tmp")));
        assert!(!policy.is_ignored(Path::new("/r"), Path::new("/r/build/out.txt")));

        assert!(IgnorePolicy::new(&["(".to_string()]).is_err());
    }
}

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use pathdiff::diff_paths;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Include/exclude globs for template discovery.
///
/// Include patterns without a `/` are matched against the file name, the
/// rest against the path relative to the template directory.
pub struct TemplateFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    excluded_dirs: Vec<String>,
}

impl TemplateFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Self {
        let mut excluded_dirs = Vec::new();
        for pattern in exclude {
            let pattern = pattern.as_ref();
            if let Some(dir) = pattern
                .strip_prefix("**/")
                .and_then(|rest| rest.strip_suffix("/**"))
            {
                if !dir.contains(['*', '?', '[', '/']) {
                    excluded_dirs.push(dir.to_string());
                }
            }
        }
        Self {
            include: compile(include),
            exclude: compile(exclude),
            excluded_dirs,
        }
    }

    pub fn is_included(&self, relative: &Path) -> bool {
        let text = normalize(relative);
        let file_name = relative
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.include.iter().any(|pattern| {
            if pattern.as_str().contains('/') {
                pattern.matches_with(&text, MATCH_OPTIONS)
            } else {
                pattern.matches_with(&file_name, MATCH_OPTIONS)
            }
        })
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        let in_excluded_dir = relative.parent().is_some_and(|parent| {
            parent
                .components()
                .any(|component| self.excluded_dirs.iter().any(|dir| component.as_os_str() == dir.as_str()))
        });
        if in_excluded_dir {
            return true;
        }
        let text = normalize(relative);
        self.exclude
            .iter()
            .any(|pattern| pattern.matches_with(&text, MATCH_OPTIONS))
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Vec<Pattern> {
    let mut compiled = Vec::new();
    for pattern in patterns {
        let cleaned = pattern.as_ref().trim_start_matches("./");
        match Pattern::new(cleaned) {
            Ok(pattern) => compiled.push(pattern),
            Err(error) => warn!(pattern = cleaned, %error, "ignoring invalid template pattern"),
        }
    }
    compiled
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Collects matching templates below `dir` into `targets`. Missing
/// directories contribute nothing.
pub fn collect_templates(dir: &Path, filter: &TemplateFilter, targets: &mut BTreeSet<PathBuf>) {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "template directory does not exist");
        return;
    }
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(dir = %dir.display(), %error, "walk failed");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = diff_paths(path, dir).unwrap_or_else(|| path.to_path_buf());
        if filter.is_included(&relative) && !filter.is_excluded(&relative) {
            targets.insert(path.to_path_buf());
        }
    }
}

//! `typja.toml` loading.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults written by `typja init`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use typja_core::{AnalyzerOptions, LintOptions, UnionStyle};

pub const CONFIG_FILE_NAME: &str = "typja.toml";

pub const DEFAULT_CONFIG: &str = r#"# typja configuration
# See `typja check --help` for command line overrides.

[project]
# Project root, relative to this file.
root = "."
# Python files or directories holding the types templates refer to.
# Glob patterns such as "./src/**/models.py" are accepted.
paths = ["./types"]
# Exit with a failure status when only warnings are found.
fail_on_warning = false

[environment]
template_dirs = ["./templates"]
include_patterns = ["*.html", "*.jinja", "*.jinja2", "*.j2"]
exclude_patterns = ["**/node_modules/**", "**/.git/**", "**/dist/**", "**/__pycache__/**"]

[linting]
strict = false
prefer_pep604_unions = true
# One of "error", "warning" or "ignore".
union_style = "warning"
fix_union_syntax = true
warn_unused_imports = true
warn_undefined_variables = true
validate_imports = true
validate_filters = true
validate_macros = true
validate_variables = true

[formatting]
sort_imports = true

[errors]
show_snippets = true
show_hints = true
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("typja.toml not found in {} or any parent directory", .searched.display())]
    NotFound { searched: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub environment: EnvironmentConfig,
    pub linting: LintingConfig,
    pub formatting: FormattingConfig,
    pub errors: ErrorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub paths: Vec<String>,
    pub fail_on_warning: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            paths: vec!["./types".to_string()],
            fail_on_warning: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub template_dirs: Vec<PathBuf>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            template_dirs: vec![PathBuf::from("./templates")],
            include_patterns: ["*.html", "*.jinja", "*.jinja2", "*.j2"]
                .map(String::from)
                .to_vec(),
            exclude_patterns: [
                "**/node_modules/**",
                "**/.git/**",
                "**/dist/**",
                "**/__pycache__/**",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LintingConfig {
    pub strict: bool,
    pub prefer_pep604_unions: bool,
    pub union_style: UnionStyle,
    pub fix_union_syntax: bool,
    pub warn_unused_imports: bool,
    pub warn_undefined_variables: bool,
    pub validate_imports: bool,
    pub validate_filters: bool,
    pub validate_macros: bool,
    pub validate_variables: bool,
}

impl Default for LintingConfig {
    fn default() -> Self {
        Self {
            strict: false,
            prefer_pep604_unions: true,
            union_style: UnionStyle::Warning,
            fix_union_syntax: true,
            warn_unused_imports: true,
            warn_undefined_variables: true,
            validate_imports: true,
            validate_filters: true,
            validate_macros: true,
            validate_variables: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormattingConfig {
    pub sort_imports: bool,
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self { sort_imports: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    pub show_snippets: bool,
    pub show_hints: bool,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            show_snippets: true,
            show_hints: true,
        }
    }
}

impl Config {
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content, path)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Project root: `project.root` taken relative to the directory holding
    /// the configuration file.
    pub fn root_path(&self, config_path: &Path) -> PathBuf {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        base.join(&self.project.root).clean()
    }

    /// Existing type paths under `root`. Entries with glob metacharacters are
    /// expanded; plain entries that do not exist are dropped.
    pub fn type_paths(&self, root: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for entry in &self.project.paths {
            let joined = root.join(entry).clean();
            if entry.contains(['*', '?', '[', ']']) {
                let pattern = joined.to_string_lossy().into_owned();
                match glob::glob(&pattern) {
                    Ok(matches) => paths.extend(matches.filter_map(Result::ok)),
                    Err(error) => warn!(pattern = entry.as_str(), %error, "ignoring invalid type path pattern"),
                }
            } else if joined.exists() {
                paths.push(joined);
            } else {
                debug!(path = %joined.display(), "type path does not exist");
            }
        }
        paths
    }

    pub fn template_dirs(&self, root: &Path) -> Vec<PathBuf> {
        self.environment
            .template_dirs
            .iter()
            .map(|dir| root.join(dir).clean())
            .collect()
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            warn_undefined_variables: self.linting.warn_undefined_variables,
            validate_variables: self.linting.validate_variables,
            validate_filters: self.linting.validate_filters,
            validate_macros: self.linting.validate_macros,
            validate_imports: self.linting.validate_imports,
        }
    }

    pub fn lint_options(&self) -> LintOptions {
        LintOptions {
            prefer_pep604_unions: self.linting.prefer_pep604_unions,
            union_style: self.linting.union_style,
            warn_unused_imports: self.linting.warn_unused_imports,
            sort_imports: self.formatting.sort_imports,
        }
    }

    pub fn fail_on_warning(&self) -> bool {
        self.project.fail_on_warning || self.linting.strict
    }
}

/// Walks from `start` towards the filesystem root looking for `typja.toml`.
pub fn find_config(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        current = dir.parent();
    }
    Err(ConfigError::NotFound {
        searched: start.to_path_buf(),
    })
}

/// An explicit `--config` wins; otherwise search upwards from `root`.
pub fn locate_config(root: &Path, explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        }),
        None => find_config(root),
    }
}

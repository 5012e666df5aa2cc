use std::fmt;

use thiserror::Error;

/// A malformed directive comment or type annotation.
///
/// Raised fail-fast by the directive parser; the analyzer turns it into a
/// single error issue for the template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{filename}:{line}:{col}: {message}")]
pub struct ParseError {
    pub message: String,
    pub filename: String,
    pub line: usize,
    pub col: usize,
}

impl ParseError {
    pub fn new<S: Into<String>>(message: S, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            filename: "<unknown>".to_string(),
            line,
            col,
        }
    }

    pub fn with_location<S: Into<String>>(mut self, filename: S, line: usize, col: usize) -> Self {
        self.filename = filename.into();
        self.line = line;
        self.col = col;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    ModuleNotFound,
    ModuleNotImported,
    ModuleMissingType,
    UnknownTypingName,
    MissingTypingImport,
    UnknownName,
    AmbiguousType,
}

impl fmt::Display for RegistryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RegistryErrorKind::ModuleNotFound => "module not found",
            RegistryErrorKind::ModuleNotImported => "module not imported",
            RegistryErrorKind::ModuleMissingType => "module missing type",
            RegistryErrorKind::UnknownTypingName => "unknown typing name",
            RegistryErrorKind::MissingTypingImport => "missing typing import",
            RegistryErrorKind::UnknownName => "unknown name",
            RegistryErrorKind::AmbiguousType => "ambiguous type",
        };
        f.write_str(label)
    }
}

/// A failed import or type resolution against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RegistryError {
    pub kind: RegistryErrorKind,
    pub message: String,
    pub hint: Option<String>,
}

impl RegistryError {
    pub fn new<S: Into<String>>(kind: RegistryErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Malformed template markup reported by the template front end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line})")]
pub struct TemplateSyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl TemplateSyntaxError {
    pub fn new<S: Into<String>>(message: S, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

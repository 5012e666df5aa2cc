use std::fmt;

use serde::Serialize;

use crate::template::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    pub filename: String,
    pub line: usize,
    pub col: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_col: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationIssue {
    pub fn new<M: Into<String>, F: Into<String>>(
        severity: Severity,
        message: M,
        filename: F,
        line: usize,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            filename: filename.into(),
            line,
            col: 0,
            end_col: None,
            hint: None,
        }
    }

    pub fn error<M: Into<String>, F: Into<String>>(message: M, filename: F, line: usize) -> Self {
        Self::new(Severity::Error, message, filename, line)
    }

    pub fn warning<M: Into<String>, F: Into<String>>(message: M, filename: F, line: usize) -> Self {
        Self::new(Severity::Warning, message, filename, line)
    }

    pub fn at_col(mut self, col: usize) -> Self {
        self.col = col;
        self
    }

    /// Points the issue at a token span; multi-line spans keep only the start column.
    pub fn at_span(mut self, span: SourceSpan) -> Self {
        self.line = span.line;
        self.col = span.column;
        if span.end_line == span.line && span.end_column >= span.column {
            self.end_col = Some(span.end_column);
        }
        self
    }

    pub fn with_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_optional_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)?;
        if self.col > 0 {
            write!(f, ":{}", self.col)?;
        }
        write!(f, ": {}: {}", self.severity.label(), self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\nHint: {hint}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<ValidationIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.entries.push(issue);
    }

    pub fn push_error_with_span<M: Into<String>>(
        &mut self,
        message: M,
        filename: &str,
        span: SourceSpan,
        hint: Option<String>,
    ) {
        self.entries.push(
            ValidationIssue::error(message, filename, span.line)
                .at_span(span)
                .with_optional_hint(hint),
        );
    }

    pub fn push_warning_with_span<M: Into<String>>(
        &mut self,
        message: M,
        filename: &str,
        span: SourceSpan,
        hint: Option<String>,
    ) {
        self.entries.push(
            ValidationIssue::warning(message, filename, span.line)
                .at_span(span)
                .with_optional_hint(hint),
        );
    }

    pub fn extend<I: IntoIterator<Item = ValidationIssue>>(&mut self, other: I) {
        self.entries.extend(other);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(ValidationIssue::is_error)
    }

    pub fn entries(&self) -> &[ValidationIssue] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ValidationIssue> {
        self.entries
    }
}

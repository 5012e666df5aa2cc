use std::io::{self, Write};

use typja_core::{Severity, SourceFile, ValidationIssue};

use crate::config::ErrorsConfig;

/// A checked template and what was found in it.
pub struct FileReport {
    pub source: SourceFile,
    pub display: String,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Summary {
    pub files: usize,
    pub errors: usize,
    pub warnings: usize,
}

impl Summary {
    pub fn collect(reports: &[FileReport]) -> Self {
        let mut summary = Summary {
            files: reports.len(),
            ..Summary::default()
        };
        for issue in reports.iter().flat_map(|report| &report.issues) {
            match issue.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.errors + self.warnings
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checked {} template(s): ", self.files)?;
        if self.total() == 0 {
            return write!(f, "no issues found");
        }
        write!(f, "{} error(s), {} warning(s)", self.errors, self.warnings)
    }
}

pub fn write_text<W: Write>(out: &mut W, reports: &[FileReport], options: &ErrorsConfig) -> io::Result<()> {
    for report in reports {
        if report.issues.is_empty() {
            continue;
        }
        let mut issues: Vec<&ValidationIssue> = report.issues.iter().collect();
        issues.sort_by_key(|issue| (issue.line, issue.col));

        writeln!(out, "Diagnostics for {}:", report.display)?;
        for issue in issues {
            write_issue(out, report, issue, options)?;
        }
    }
    Ok(())
}

fn write_issue<W: Write>(
    out: &mut W,
    report: &FileReport,
    issue: &ValidationIssue,
    options: &ErrorsConfig,
) -> io::Result<()> {
    let marker = match issue.severity {
        Severity::Error => "  -",
        Severity::Warning => "  ~",
    };
    writeln!(out, "{} {}: {}", marker, issue.severity.label(), issue.message)?;
    if issue.col > 0 {
        writeln!(out, "     --> {}:{}:{}", report.display, issue.line, issue.col)?;
    } else {
        writeln!(out, "     --> {}:{}", report.display, issue.line)?;
    }

    if options.show_snippets {
        if let Some(raw_line) = report.source.line(issue.line) {
            let display_line = raw_line.replace('\t', "    ");
            writeln!(out, "      {}", display_line)?;
            if issue.col > 0 {
                writeln!(out, "{}", caret_line(raw_line, issue))?;
            }
        }
    }

    if options.show_hints {
        if let Some(hint) = &issue.hint {
            writeln!(out, "     = hint: {}", hint)?;
        }
    }
    Ok(())
}

fn caret_line(raw_line: &str, issue: &ValidationIssue) -> String {
    let mut caret_line = String::from("      ");
    let mut current_col = 1usize;
    for ch in raw_line.chars() {
        if current_col >= issue.col {
            break;
        }
        match ch {
            '\t' => caret_line.push_str("    "),
            _ => caret_line.push(' '),
        }
        current_col += 1;
    }

    let highlight_len = match issue.end_col {
        Some(end_col) => end_col.saturating_sub(issue.col).saturating_add(1),
        None => 1,
    };
    caret_line.push_str(&"^".repeat(highlight_len.max(1)));
    caret_line
}

/// Every issue as one JSON array, in report order.
pub fn write_json<W: Write>(out: &mut W, reports: &[FileReport]) -> io::Result<()> {
    let issues: Vec<&ValidationIssue> = reports.iter().flat_map(|report| &report.issues).collect();
    serde_json::to_writer_pretty(&mut *out, &issues)?;
    writeln!(out)
}

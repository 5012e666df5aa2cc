//! Style rules for typja directives.

use std::collections::BTreeMap;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::annotation::{matching_close, split_top_level, TypeAnnotation};
use crate::diagnostics::{Severity, ValidationIssue};
use crate::directives::{CommentParser, Declaration, TypjaComment};

const PEP604_PREFIX: &str = "Use PEP 604 union syntax";

/// How `prefer-pep604-union` findings are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnionStyle {
    Error,
    #[default]
    Warning,
    Ignore,
}

impl UnionStyle {
    fn severity(self) -> Option<Severity> {
        match self {
            UnionStyle::Error => Some(Severity::Error),
            UnionStyle::Warning => Some(Severity::Warning),
            UnionStyle::Ignore => None,
        }
    }
}

impl FromStr for UnionStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "error" => Ok(UnionStyle::Error),
            "warning" => Ok(UnionStyle::Warning),
            "ignore" => Ok(UnionStyle::Ignore),
            other => Err(format!("unknown union style '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintOptions {
    pub prefer_pep604_unions: bool,
    pub union_style: UnionStyle,
    pub warn_unused_imports: bool,
    pub sort_imports: bool,
}

impl Default for LintOptions {
    fn default() -> Self {
        Self {
            prefer_pep604_unions: true,
            union_style: UnionStyle::Warning,
            warn_unused_imports: true,
            sort_imports: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Linter {
    comment_parser: CommentParser,
}

impl Linter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lint_template(&self, content: &str, filename: &str, options: &LintOptions) -> Vec<ValidationIssue> {
        // Malformed directives are reported by the analyzer.
        let comments = self.comment_parser.parse(content, filename).unwrap_or_default();
        let mut issues = Vec::new();

        if options.prefer_pep604_unions {
            if let Some(severity) = options.union_style.severity() {
                issues.extend(check_legacy_unions(content, filename, severity));
            }
        }
        if options.warn_unused_imports {
            issues.extend(check_unused_imports(content, filename, &comments));
        }
        issues.extend(check_duplicate_declarations(filename, &comments));
        if options.sort_imports {
            issues.extend(check_sorted_imports(filename, &comments));
        }
        issues.extend(check_redundant_none(filename, &comments));

        debug!(filename, issues = issues.len(), "linted template");
        issues
    }

    /// Rewrites legacy unions to `X | Y` on every line flagged by
    /// `prefer-pep604-union`.
    pub fn auto_fix(&self, content: &str, issues: &[ValidationIssue]) -> String {
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

        for issue in issues {
            if !issue.message.starts_with(PEP604_PREFIX) || issue.line == 0 {
                continue;
            }
            if let Some(line) = lines.get_mut(issue.line - 1) {
                *line = fix_line(line);
            }
        }

        let mut fixed = lines.join("\n");
        if content.ends_with('\n') {
            fixed.push('\n');
        }
        fixed
    }
}

fn check_legacy_unions(content: &str, filename: &str, severity: Severity) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let Some((start, end)) = find_legacy_union(line) else {
            continue;
        };
        let old_style = &line[start..end];
        let new_style = modernize_union(old_style);
        issues.push(
            ValidationIssue::new(
                severity,
                format!("{PEP604_PREFIX} (X | Y) instead of {old_style}"),
                filename,
                index + 1,
            )
            .at_col(start + 1)
            .with_hint(format!("Use: {new_style}")),
        );
    }
    issues
}

/// Byte range of the first `Optional[...]` or `Union[...]` on a line.
fn find_legacy_union(line: &str) -> Option<(usize, usize)> {
    ["Optional[", "Union["]
        .iter()
        .filter_map(|prefix| {
            let start = line
                .match_indices(prefix)
                .map(|(start, _)| start)
                .find(|start| is_word_start(line, *start))?;
            let close = matching_close(line, start + prefix.len() - 1)?;
            Some((start, close + 1))
        })
        .min_by_key(|(start, _)| *start)
}

fn is_word_start(line: &str, start: usize) -> bool {
    let before = &line[..start];
    match before.chars().last() {
        None => true,
        Some(ch) => ch == '.' && before.ends_with("typing.") || !(ch.is_alphanumeric() || ch == '_' || ch == '.'),
    }
}

fn modernize_union(old_style: &str) -> String {
    if let Some(inner) = old_style
        .strip_prefix("Optional[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        return format!("{} | None", inner.trim());
    }
    if let Some(inner) = old_style
        .strip_prefix("Union[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        return split_top_level(inner, ',')
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" | ");
    }
    old_style.to_string()
}

fn fix_line(line: &str) -> String {
    let mut fixed = line.to_string();
    // Each pass removes one legacy form, so nesting depth bounds the loop.
    while let Some((start, end)) = find_legacy_union(&fixed) {
        let replacement = modernize_union(&fixed[start..end]);
        let start = if fixed[..start].ends_with("typing.") {
            start - "typing.".len()
        } else {
            start
        };
        fixed.replace_range(start..end, &replacement);
    }
    fixed
}

fn word_pattern(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(name))).ok()
}

fn is_import_line(line: &str) -> bool {
    line.contains("typja:import") || line.contains("typja:from")
}

fn check_unused_imports(content: &str, filename: &str, comments: &[TypjaComment]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for declaration in comments.iter().flat_map(|comment| &comment.declarations) {
        match declaration {
            Declaration::Import(statement) => {
                let used = Regex::new(&format!(r"\b{}\.\w+", regex::escape(&statement.module)))
                    .map(|pattern| pattern.is_match(content))
                    .unwrap_or(true);
                if !used {
                    issues.push(
                        ValidationIssue::warning(
                            format!("Import '{}' is unused", statement.module),
                            filename,
                            statement.line,
                        )
                        .with_hint(format!(
                            "Remove unused import or use types from '{}'",
                            statement.module
                        )),
                    );
                }
            }
            Declaration::FromImport(statement) => {
                for (name, alias) in &statement.names {
                    let bound = alias.as_deref().unwrap_or(name);
                    let used = word_pattern(bound)
                        .map(|pattern| {
                            content
                                .lines()
                                .filter(|line| !is_import_line(line))
                                .any(|line| pattern.is_match(line))
                        })
                        .unwrap_or(true);
                    if !used {
                        issues.push(
                            ValidationIssue::warning(
                                format!("Import '{name}' from '{}' is unused", statement.module),
                                filename,
                                statement.line,
                            )
                            .with_hint(format!("Remove unused import '{name}'")),
                        );
                    }
                }
            }
            _ => {}
        }
    }
    issues
}

fn declaration_kind(declaration: &Declaration) -> &'static str {
    match declaration {
        Declaration::Import(_) => "import",
        Declaration::FromImport(_) => "from",
        Declaration::Variable(_) => "var",
        Declaration::Filter(_) => "filter",
        Declaration::Macro(_) => "macro",
    }
}

fn check_duplicate_declarations(filename: &str, comments: &[TypjaComment]) -> Vec<ValidationIssue> {
    let mut seen: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    let mut issues = Vec::new();

    for declaration in comments.iter().flat_map(|comment| &comment.declarations) {
        let Some(name) = declaration.name() else {
            continue;
        };
        let key = (declaration_kind(declaration), name);
        match seen.get(&key) {
            Some(first_line) => issues.push(
                ValidationIssue::error(format!("Duplicate declaration of '{name}'"), filename, declaration.line())
                    .with_hint(format!("'{name}' was already declared at line {first_line}")),
            ),
            None => {
                seen.insert(key, declaration.line());
            }
        }
    }
    issues
}

struct ImportEntry {
    line: usize,
    sort_key: String,
}

fn check_sorted_imports(filename: &str, comments: &[TypjaComment]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut block: Vec<ImportEntry> = Vec::new();

    for declaration in comments.iter().flat_map(|comment| &comment.declarations) {
        let sort_key = match declaration {
            Declaration::Import(statement) => format!("0:{}", statement.module),
            Declaration::FromImport(statement) => format!("1:{}", statement.module),
            _ => continue,
        };
        let line = declaration.line();
        if block.last().is_some_and(|last| line.saturating_sub(last.line) > 2) {
            issues.extend(check_import_block(filename, &block));
            block.clear();
        }
        block.push(ImportEntry { line, sort_key });
    }
    issues.extend(check_import_block(filename, &block));
    issues
}

fn check_import_block(filename: &str, block: &[ImportEntry]) -> Option<ValidationIssue> {
    let sorted = block.windows(2).all(|pair| pair[0].sort_key <= pair[1].sort_key);
    if sorted {
        return None;
    }
    trace!(filename, first_line = block[0].line, "unsorted import block");
    Some(
        ValidationIssue::warning("Imports should be sorted alphabetically", filename, block[0].line)
            .with_hint("Group imports by type (import first, then from) and sort alphabetically"),
    )
}

fn has_redundant_none(annotation: &TypeAnnotation) -> bool {
    annotation.is_union && annotation.union_types.iter().filter(|branch| branch.is_none()).count() > 1
}

fn check_redundant_none(filename: &str, comments: &[TypjaComment]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for declaration in comments.iter().flat_map(|comment| &comment.declarations) {
        let annotations: Vec<&TypeAnnotation> = match declaration {
            Declaration::Variable(variable) => vec![&variable.type_annotation],
            Declaration::Filter(filter) => vec![&filter.type_annotation],
            Declaration::Macro(macro_declaration) => macro_declaration
                .params
                .iter()
                .map(|param| &param.type_annotation)
                .chain(std::iter::once(&macro_declaration.return_type))
                .collect(),
            Declaration::Import(_) | Declaration::FromImport(_) => Vec::new(),
        };

        for annotation in annotations.into_iter().filter(|annotation| has_redundant_none(annotation)) {
            trace!(filename, annotation = %annotation, "redundant None");
            issues.push(
                ValidationIssue::warning("Redundant None in union type", filename, declaration.line())
                    .with_hint("Remove duplicate None types"),
            );
        }
    }
    issues
}

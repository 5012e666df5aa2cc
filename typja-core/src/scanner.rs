//! Line-oriented extraction of class shapes from Python sources.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::annotation::{matching_close, split_top_level};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedClass {
    pub name: String,
    pub bases: Vec<String>,
    pub fields: BTreeMap<String, String>,
    pub methods: BTreeMap<String, String>,
}

impl ScannedClass {
    fn is_enum(&self) -> bool {
        self.bases.iter().any(|base| base.contains("Enum") || base == "Flag" || base == "IntFlag")
    }
}

/// `from .x import A, B` or `from .x import *` found in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReExport {
    /// Number of leading dots; zero for absolute imports.
    pub level: usize,
    pub module: String,
    /// Empty for a star import.
    pub names: Vec<String>,
}

impl ReExport {
    pub fn is_star(&self) -> bool {
        self.names.is_empty()
    }

    /// Absolute module path this import reads from, relative to `package`.
    pub fn source_module(&self, package: &str) -> String {
        if self.level == 0 || package.is_empty() {
            self.module.clone()
        } else {
            format!("{package}.{}", self.module)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedModule {
    pub classes: Vec<ScannedClass>,
    pub re_exports: Vec<ReExport>,
}

#[derive(Debug)]
struct LogicalLine {
    indent: usize,
    text: String,
}

fn class_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^class\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*:").expect("class pattern is valid")
    })
}

fn def_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("def pattern is valid")
    })
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.+?)(?:\s*=\s*(.*))?$").expect("field pattern is valid")
    })
}

fn assignment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([^=].*)$").expect("assignment pattern is valid")
    })
}

fn self_assignment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^self\.([A-Za-z_][A-Za-z0-9_]*)\s*(?::\s*(.+?))?\s*=(?:[^=]|$)")
            .expect("self assignment pattern is valid")
    })
}

fn from_import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^from\s+(\.*)([A-Za-z_][A-Za-z0-9_.]*)?\s+import\s+(.+)$").expect("from pattern is valid")
    })
}

/// Extracts every class (nested ones included) and every `from … import`.
pub fn scan_python_source(source: &str) -> ScannedModule {
    let mut module = ScannedModule::default();
    let mut stack: Vec<OpenClass> = Vec::new();

    for line in logical_lines(source) {
        while stack.last().is_some_and(|open| line.indent <= open.indent) {
            if let Some(open) = stack.pop() {
                module.classes.push(open.class);
            }
        }

        if let Some(captures) = class_pattern().captures(&line.text) {
            if let Some(top) = stack.last_mut() {
                top.body_indent.get_or_insert(line.indent);
                top.init_indent = None;
            }
            let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let bases = captures
                .get(2)
                .map(|m| parse_bases(m.as_str()))
                .unwrap_or_default();
            stack.push(OpenClass {
                indent: line.indent,
                body_indent: None,
                init_indent: None,
                class: ScannedClass {
                    name: name.to_string(),
                    bases,
                    ..ScannedClass::default()
                },
            });
            continue;
        }

        if let Some(top) = stack.last_mut() {
            top.scan_line(&line);
            continue;
        }

        if let Some(re_export) = parse_from_import(&line.text) {
            module.re_exports.push(re_export);
        }
    }

    while let Some(open) = stack.pop() {
        module.classes.push(open.class);
    }
    module
}

#[derive(Debug)]
struct OpenClass {
    indent: usize,
    body_indent: Option<usize>,
    /// Indent of the `def __init__` line while its body is being read.
    init_indent: Option<usize>,
    class: ScannedClass,
}

impl OpenClass {
    fn scan_line(&mut self, line: &LogicalLine) {
        let body_indent = *self.body_indent.get_or_insert(line.indent);

        if line.indent > body_indent {
            if self.init_indent.is_some() {
                self.scan_init_statement(&line.text);
            }
            return;
        }
        self.init_indent = None;

        let text = line.text.as_str();
        if text.starts_with('@') {
            return;
        }

        if let Some(captures) = def_pattern().captures(text) {
            let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let Some(open) = captures.get(0).map(|m| m.end() - 1) else {
                return;
            };
            let signature = method_signature(name, text, open);
            if name == "__init__" {
                self.init_indent = Some(line.indent);
                self.collect_init_params(text, open);
            }
            self.class.methods.insert(name.to_string(), signature);
            return;
        }

        if let Some(captures) = field_pattern().captures(text) {
            let (Some(name), Some(annotation)) = (captures.get(1), captures.get(2)) else {
                return;
            };
            self.class
                .fields
                .insert(name.as_str().to_string(), annotation.as_str().trim().to_string());
            return;
        }

        if self.class.is_enum() {
            if let Some(captures) = assignment_pattern().captures(text) {
                let (Some(name), Some(value)) = (captures.get(1), captures.get(2)) else {
                    return;
                };
                if !name.as_str().starts_with('_') {
                    self.class
                        .fields
                        .insert(name.as_str().to_string(), value.as_str().trim().to_string());
                }
            }
        }
    }

    fn collect_init_params(&mut self, text: &str, open: usize) {
        let Some(close) = matching_close(text, open) else {
            return;
        };
        for param in split_top_level(&text[open + 1..close], ',').into_iter().skip(1) {
            if param.starts_with('*') || param == "/" {
                break;
            }
            let declaration = split_top_level(&param, '=')
                .into_iter()
                .next()
                .unwrap_or_default();
            let (name, annotation) = match declaration.split_once(':') {
                Some((name, annotation)) => (name.trim(), annotation.trim()),
                None => (declaration.trim(), "Any"),
            };
            if !name.is_empty() {
                self.class
                    .fields
                    .insert(name.to_string(), annotation.to_string());
            }
        }
    }

    fn scan_init_statement(&mut self, text: &str) {
        let Some(captures) = self_assignment_pattern().captures(text) else {
            return;
        };
        let Some(name) = captures.get(1) else {
            return;
        };
        let annotation = captures
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| "Any".to_string());
        self.class
            .fields
            .entry(name.as_str().to_string())
            .or_insert(annotation);
    }
}

fn parse_bases(text: &str) -> Vec<String> {
    split_top_level(text, ',')
        .into_iter()
        .filter(|base| !base.is_empty() && !base.contains('=') && !base.contains('['))
        .collect()
}

/// `def name(params) -> R` with defaults and splats dropped.
fn method_signature(name: &str, text: &str, open: usize) -> String {
    let Some(close) = matching_close(text, open) else {
        return format!("def {name}()");
    };

    let params = split_top_level(&text[open + 1..close], ',')
        .into_iter()
        .filter(|param| !param.is_empty() && !param.starts_with('*') && param != "/")
        .map(|param| {
            let declaration = split_top_level(&param, '=')
                .into_iter()
                .next()
                .unwrap_or_default();
            match declaration.split_once(':') {
                Some((name, annotation)) => format!("{}: {}", name.trim(), annotation.trim()),
                None => declaration,
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let returns = text[close + 1..]
        .trim()
        .trim_end_matches(':')
        .trim()
        .strip_prefix("->")
        .map(str::trim)
        .filter(|returns| !returns.is_empty());

    match returns {
        Some(returns) => format!("def {name}({params}) -> {returns}"),
        None => format!("def {name}({params})"),
    }
}

fn parse_from_import(text: &str) -> Option<ReExport> {
    let captures = from_import_pattern().captures(text)?;
    let level = captures.get(1).map(|m| m.as_str().len()).unwrap_or(0);
    let module = captures.get(2)?.as_str().to_string();
    let names_text = captures.get(3)?.as_str().trim();
    let names_text = names_text
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(names_text);

    if names_text.trim() == "*" {
        return Some(ReExport {
            level,
            module,
            names: Vec::new(),
        });
    }

    let names = names_text
        .split(',')
        .filter_map(|entry| {
            let name = entry.split(" as ").next()?.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect::<Vec<_>>();

    (!names.is_empty()).then_some(ReExport {
        level,
        module,
        names,
    })
}

/// Joins bracketed continuations and backslash continuations, drops
/// comments, blank lines and the contents of triple-quoted strings.
fn logical_lines(source: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut pending: Option<LogicalLine> = None;
    let mut depth = 0i32;
    let mut triple: Option<char> = None;

    for raw in source.lines() {
        let chars: Vec<char> = raw.chars().collect();
        let mut text = String::new();
        let mut quote: Option<char> = None;
        let mut index = 0;

        while index < chars.len() {
            let ch = chars[index];

            if let Some(delimiter) = triple {
                if is_triple_at(&chars, index, delimiter) {
                    triple = None;
                    text.push_str("\"\"");
                    index += 3;
                } else {
                    index += 1;
                }
                continue;
            }

            if let Some(q) = quote {
                text.push(ch);
                if ch == '\\' && index + 1 < chars.len() {
                    text.push(chars[index + 1]);
                    index += 2;
                    continue;
                }
                if ch == q {
                    quote = None;
                }
                index += 1;
                continue;
            }

            match ch {
                '#' => break,
                '"' | '\'' if is_triple_at(&chars, index, ch) => {
                    triple = Some(ch);
                    index += 3;
                    continue;
                }
                '"' | '\'' => {
                    quote = Some(ch);
                    text.push(ch);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    text.push(ch);
                }
                ')' | ']' | '}' => {
                    depth -= 1;
                    text.push(ch);
                }
                _ => text.push(ch),
            }
            index += 1;
        }

        let trimmed_end = text.trim_end();
        let continued = trimmed_end.ends_with('\\');
        let text = if continued {
            trimmed_end.trim_end_matches('\\').to_string()
        } else {
            text
        };

        match pending.as_mut() {
            Some(line) => {
                let part = text.trim();
                if !part.is_empty() {
                    if !line.text.is_empty() {
                        line.text.push(' ');
                    }
                    line.text.push_str(part);
                }
            }
            None => {
                if text.trim().is_empty() && triple.is_none() && !continued {
                    continue;
                }
                let indent = raw.chars().take_while(|c| c.is_whitespace()).count();
                pending = Some(LogicalLine {
                    indent,
                    text: text.trim().to_string(),
                });
            }
        }

        if depth <= 0 && !continued && triple.is_none() {
            depth = 0;
            if let Some(line) = pending.take() {
                if !line.text.is_empty() {
                    lines.push(line);
                }
            }
        }
    }

    if let Some(line) = pending {
        if !line.text.is_empty() {
            lines.push(line);
        }
    }
    lines
}

fn is_triple_at(chars: &[char], index: usize, quote: char) -> bool {
    chars.get(index) == Some(&quote)
        && chars.get(index + 1) == Some(&quote)
        && chars.get(index + 2) == Some(&quote)
}

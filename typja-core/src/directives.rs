use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

use crate::annotation::{matching_close, split_top_level, TypeAnnotation, TypeParser};
use crate::errors::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Import,
    FromImport,
    Var,
    Filter,
    Macro,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    pub module: String,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromImportStatement {
    pub module: String,
    pub names: Vec<(String, Option<String>)>,
    pub line: usize,
    pub col: usize,
}

impl FromImportStatement {
    /// Names as they are bound in the template: the alias when present.
    pub fn bound_names(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .map(|(name, alias)| alias.as_deref().unwrap_or(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDeclaration {
    pub name: String,
    pub type_annotation: TypeAnnotation,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDeclaration {
    pub name: String,
    pub type_annotation: TypeAnnotation,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroParameter {
    pub name: String,
    pub type_annotation: TypeAnnotation,
    pub has_default: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDeclaration {
    pub name: String,
    pub params: Vec<MacroParameter>,
    pub return_type: TypeAnnotation,
    pub line: usize,
    pub col: usize,
}

impl MacroDeclaration {
    pub fn required_params(&self) -> impl Iterator<Item = &MacroParameter> {
        self.params.iter().filter(|param| !param.has_default)
    }

    pub fn param(&self, name: &str) -> Option<&MacroParameter> {
        self.params.iter().find(|param| param.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Import(ImportStatement),
    FromImport(FromImportStatement),
    Variable(VariableDeclaration),
    Filter(FilterDeclaration),
    Macro(MacroDeclaration),
}

impl Declaration {
    pub fn name(&self) -> Option<&str> {
        match self {
            Declaration::Variable(decl) => Some(&decl.name),
            Declaration::Filter(decl) => Some(&decl.name),
            Declaration::Macro(decl) => Some(&decl.name),
            Declaration::Import(_) | Declaration::FromImport(_) => None,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Declaration::Import(stmt) => stmt.line,
            Declaration::FromImport(stmt) => stmt.line,
            Declaration::Variable(decl) => decl.line,
            Declaration::Filter(decl) => decl.line,
            Declaration::Macro(decl) => decl.line,
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Import(stmt) => write!(f, "import {}", stmt.module),
            Declaration::FromImport(stmt) => {
                let names = stmt
                    .names
                    .iter()
                    .map(|(name, alias)| match alias {
                        Some(alias) => format!("{name} as {alias}"),
                        None => name.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "from {} import {names}", stmt.module)
            }
            Declaration::Variable(decl) => write!(f, "{}: {}", decl.name, decl.type_annotation),
            Declaration::Filter(decl) => write!(f, "filter {}: {}", decl.name, decl.type_annotation),
            Declaration::Macro(decl) => {
                let params = decl
                    .params
                    .iter()
                    .map(|param| match &param.default {
                        Some(default) => {
                            format!("{}: {} = {default}", param.name, param.type_annotation)
                        }
                        None => format!("{}: {}", param.name, param.type_annotation),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "macro {}({params}) -> {}", decl.name, decl.return_type)
            }
        }
    }
}

/// One `{# typja:... #}` comment and everything it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypjaComment {
    pub kind: DirectiveKind,
    pub declarations: Vec<Declaration>,
    pub line: usize,
    pub col: usize,
    pub raw: String,
}

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)\{#[-+]?\s*typja:([^#]+?)[-+]?#\}").expect("directive pattern is valid")
    })
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^import\s+([a-zA-Z_][a-zA-Z0-9_.]*)\s*$").expect("import pattern is valid")
    })
}

fn from_import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?s)^from\s+(\.+[a-zA-Z_][a-zA-Z0-9_.]*|\.+|[a-zA-Z_][a-zA-Z0-9_.]*)\s+import\s+(.+)$",
        )
        .expect("from-import pattern is valid")
    })
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("identifier pattern is valid"))
}

/// Extracts typja directive comments from raw template text.
#[derive(Debug, Default)]
pub struct CommentParser {
    type_parser: TypeParser,
}

impl CommentParser {
    pub fn new() -> Self {
        Self {
            type_parser: TypeParser::new(),
        }
    }

    /// Parses every directive in `content`, stopping at the first malformed one.
    pub fn parse(&self, content: &str, filename: &str) -> Result<Vec<TypjaComment>, ParseError> {
        let mut comments = Vec::new();

        for captures in directive_pattern().captures_iter(content) {
            let (Some(whole), Some(body)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let (line, col) = position_of(content, whole.start());
            let body = body.as_str().trim();

            let comment = self
                .parse_body(body, line, col, whole.as_str())
                .map_err(|err| err.with_location(filename, line, col))?;
            trace!(line, col, kind = ?comment.kind, "parsed directive");
            comments.push(comment);
        }

        Ok(comments)
    }

    fn parse_body(&self, body: &str, line: usize, col: usize, raw: &str) -> Result<TypjaComment, ParseError> {
        let (keyword, rest) = split_keyword(body);
        let comment = |kind, declarations| TypjaComment {
            kind,
            declarations,
            line,
            col,
            raw: raw.to_string(),
        };

        match keyword {
            "import" if !rest.is_empty() => {
                let stmt = self.parse_import(body, line, col)?;
                Ok(comment(DirectiveKind::Import, vec![Declaration::Import(stmt)]))
            }
            "from" if !rest.is_empty() => {
                let stmt = self.parse_from_import(body, line, col)?;
                Ok(comment(DirectiveKind::FromImport, vec![Declaration::FromImport(stmt)]))
            }
            "var" => {
                let declarations = self.parse_variables(rest, line, col)?;
                Ok(comment(DirectiveKind::Var, declarations))
            }
            "filter" if !rest.is_empty() => {
                let decl = self.parse_filter(rest, line, col)?;
                Ok(comment(DirectiveKind::Filter, vec![Declaration::Filter(decl)]))
            }
            "macro" if !rest.is_empty() => {
                let decl = self.parse_macro(rest, line, col)?;
                Ok(comment(DirectiveKind::Macro, vec![Declaration::Macro(decl)]))
            }
            "ignore" => Ok(comment(DirectiveKind::Ignore, Vec::new())),
            _ => {
                let preview: String = body.chars().take(20).collect();
                Err(ParseError::new(
                    format!("Unknown typja directive: {preview}..."),
                    line,
                    col,
                ))
            }
        }
    }

    fn parse_import(&self, body: &str, line: usize, col: usize) -> Result<ImportStatement, ParseError> {
        let captures = import_pattern()
            .captures(body)
            .ok_or_else(|| ParseError::new(format!("Invalid import statement: {body}"), line, col))?;
        let module = captures
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Ok(ImportStatement { module, line, col })
    }

    fn parse_from_import(&self, body: &str, line: usize, col: usize) -> Result<FromImportStatement, ParseError> {
        let invalid = || ParseError::new(format!("Invalid from-import statement: {body}"), line, col);
        let captures = from_import_pattern().captures(body).ok_or_else(invalid)?;
        let (Some(module), Some(names)) = (captures.get(1), captures.get(2)) else {
            return Err(invalid());
        };

        let mut names_text = names.as_str().trim();
        if let Some(inner) = names_text
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        {
            names_text = inner;
        }

        let mut names = Vec::new();
        for part in names_text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, alias) = match part.split_once(" as ") {
                Some((name, alias)) => (name.trim(), Some(alias.trim().to_string())),
                None => (part, None),
            };
            if !identifier_pattern().is_match(name)
                || alias
                    .as_deref()
                    .is_some_and(|alias| !identifier_pattern().is_match(alias))
            {
                return Err(invalid());
            }
            names.push((name.to_string(), alias));
        }
        if names.is_empty() {
            return Err(invalid());
        }

        Ok(FromImportStatement {
            module: module.as_str().to_string(),
            names,
            line,
            col,
        })
    }

    fn parse_variables(&self, rest: &str, line: usize, col: usize) -> Result<Vec<Declaration>, ParseError> {
        let mut declarations = Vec::new();

        for part in split_top_level(rest, ',') {
            if part.is_empty() {
                continue;
            }
            let (name, type_text) = part.split_once(':').ok_or_else(|| {
                ParseError::new(format!("Invalid variable declaration: {part}"), line, col)
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ParseError::new("Variable name cannot be empty", line, col));
            }
            if !identifier_pattern().is_match(name) {
                return Err(ParseError::new(
                    format!("Invalid variable name: {name}"),
                    line,
                    col,
                ));
            }

            let type_annotation = self.type_parser.parse(type_text, line, col)?;
            declarations.push(Declaration::Variable(VariableDeclaration {
                name: name.to_string(),
                type_annotation,
                line,
                col,
            }));
        }

        Ok(declarations)
    }

    fn parse_filter(&self, rest: &str, line: usize, col: usize) -> Result<FilterDeclaration, ParseError> {
        let (name, type_text) = rest.split_once(':').ok_or_else(|| {
            ParseError::new(format!("Invalid filter declaration: {rest}"), line, col)
        })?;
        let name = name.trim();
        if !identifier_pattern().is_match(name) {
            return Err(ParseError::new(
                format!("Invalid filter declaration: {rest}"),
                line,
                col,
            ));
        }

        let type_annotation = self.type_parser.parse(type_text, line, col)?;
        Ok(FilterDeclaration {
            name: name.to_string(),
            type_annotation,
            line,
            col,
        })
    }

    fn parse_macro(&self, rest: &str, line: usize, col: usize) -> Result<MacroDeclaration, ParseError> {
        let invalid = || ParseError::new(format!("Invalid macro declaration: {rest}"), line, col);

        let open = rest.find('(').ok_or_else(invalid)?;
        let close = matching_close(rest, open).ok_or_else(invalid)?;
        let name = rest[..open].trim();
        if !identifier_pattern().is_match(name) {
            return Err(invalid());
        }

        let return_text = rest[close + 1..]
            .trim()
            .strip_prefix("->")
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                ParseError::new(format!("Macro must specify return type: {rest}"), line, col)
            })?;

        let mut params = Vec::new();
        for param in split_top_level(&rest[open + 1..close], ',') {
            if param.is_empty() {
                continue;
            }

            let (signature, default) = match split_top_level(&param, '=').as_slice() {
                [signature] => (signature.clone(), None),
                [signature, rest @ ..] => (signature.clone(), Some(rest.join("="))),
                [] => continue,
            };

            let (param_name, type_text) = signature.split_once(':').ok_or_else(|| {
                ParseError::new(
                    format!("Parameter must have type annotation: {signature}"),
                    line,
                    col,
                )
            })?;
            let param_name = param_name.trim();
            if !identifier_pattern().is_match(param_name) {
                return Err(invalid());
            }

            params.push(MacroParameter {
                name: param_name.to_string(),
                type_annotation: self.type_parser.parse(type_text, line, col)?,
                has_default: default.is_some(),
                default,
            });
        }

        let return_type = self.type_parser.parse(return_text, line, col)?;

        Ok(MacroDeclaration {
            name: name.to_string(),
            params,
            return_type,
            line,
            col,
        })
    }
}

/// First whitespace-delimited word of a directive body and the remainder.
fn split_keyword(body: &str) -> (&str, &str) {
    match body.find(char::is_whitespace) {
        Some(index) => (&body[..index], body[index..].trim()),
        None => (body, ""),
    }
}

/// 1-based line and column of a byte offset.
pub fn position_of(content: &str, offset: usize) -> (usize, usize) {
    let prefix = &content[..offset];
    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map(|index| index + 1).unwrap_or(0);
    let col = prefix[line_start..].chars().count() + 1;
    (line, col)
}

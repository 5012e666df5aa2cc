use std::fmt;

use crate::builtins::TYPING_MODULE;
use crate::errors::ParseError;

/// A parsed type expression such as `list[User]`, `str | None` or
/// `Callable[[int], str]`.
///
/// Unions keep their branches in `union_types`; generics and callables keep
/// their arguments in `args` (a callable's return type is the last argument).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotation {
    pub raw: String,
    pub name: String,
    pub module: Option<String>,
    pub args: Vec<TypeAnnotation>,
    pub is_union: bool,
    pub union_types: Vec<TypeAnnotation>,
}

impl TypeAnnotation {
    pub fn leaf<S: Into<String>>(raw: S, name: S, module: Option<String>) -> Self {
        Self {
            raw: raw.into(),
            name: name.into(),
            module,
            args: Vec::new(),
            is_union: false,
            union_types: Vec::new(),
        }
    }

    pub fn none() -> Self {
        Self::leaf("None", "None", None)
    }

    fn union(raw: &str, name: &str, module: Option<String>, union_types: Vec<Self>) -> Self {
        Self {
            raw: raw.to_string(),
            name: name.to_string(),
            module,
            args: Vec::new(),
            is_union: true,
            union_types,
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.is_union && !self.args.is_empty()
    }

    pub fn is_none(&self) -> bool {
        !self.is_union && self.name == "None"
    }

    pub fn is_callable(&self) -> bool {
        !self.is_union && self.name == "Callable"
    }

    /// `module.name` when qualified, otherwise the bare name.
    pub fn qualified_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{module}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// First union branch that is not `None`, unwrapping nested unions.
    pub fn without_none(&self) -> Option<&TypeAnnotation> {
        if !self.is_union {
            return if self.is_none() { None } else { Some(self) };
        }
        self.union_types
            .iter()
            .find_map(|branch| branch.without_none())
    }

    /// Parameter types of a callable (everything but the trailing return type).
    pub fn callable_params(&self) -> &[TypeAnnotation] {
        match self.args.split_last() {
            Some((_, params)) if self.is_callable() => params,
            _ => &[],
        }
    }

    pub fn callable_return(&self) -> Option<&TypeAnnotation> {
        if self.is_callable() {
            self.args.last()
        } else {
            None
        }
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_union && !self.union_types.is_empty() {
            let rendered = self
                .union_types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | ");
            return f.write_str(&rendered);
        }

        f.write_str(&self.qualified_name())?;

        if self.is_callable() {
            if let Some((ret, params)) = self.args.split_last() {
                let params = params
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return if params == "..." {
                    write!(f, "[..., {ret}]")
                } else {
                    write!(f, "[[{params}], {ret}]")
                };
            }
        }

        if !self.args.is_empty() {
            let args = self
                .args
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "[{args}]")?;
        }

        Ok(())
    }
}

/// Recursive-descent parser for type annotation text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeParser;

impl TypeParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str, line: usize, col: usize) -> Result<TypeAnnotation, ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::new("Empty type annotation", line, col));
        }
        if !brackets_balanced(text) {
            return Err(ParseError::new(
                format!("Unbalanced brackets in type annotation: {text}"),
                line,
                col,
            ));
        }

        if text == "..." {
            return Ok(TypeAnnotation::leaf(text, text, None));
        }

        let branches = split_top_level(text, '|');
        if branches.len() > 1 {
            return self.parse_union(text, &branches, line, col);
        }

        let unqualified = text.strip_prefix("typing.").unwrap_or(text);
        if unqualified.starts_with("Union[") {
            return self.parse_legacy_union(text, unqualified, line, col);
        }
        if unqualified.starts_with("Optional[") {
            return self.parse_optional(text, unqualified, line, col);
        }
        if text.contains('[') {
            return self.parse_generic(text, line, col);
        }
        if text.contains('.') {
            return self.parse_qualified(text, line, col);
        }

        Ok(TypeAnnotation::leaf(text, text, None))
    }

    fn parse_union(
        &self,
        text: &str,
        branches: &[String],
        line: usize,
        col: usize,
    ) -> Result<TypeAnnotation, ParseError> {
        let mut union_types = Vec::with_capacity(branches.len());
        for branch in branches {
            if branch.is_empty() {
                return Err(ParseError::new(
                    format!("Invalid union syntax: {text}"),
                    line,
                    col,
                ));
            }
            union_types.push(self.parse(branch, line, col)?);
        }
        Ok(TypeAnnotation::union(text, "Union", None, union_types))
    }

    fn parse_legacy_union(
        &self,
        raw: &str,
        text: &str,
        line: usize,
        col: usize,
    ) -> Result<TypeAnnotation, ParseError> {
        let inner = bracketed_inner(text, "Union".len())
            .ok_or_else(|| ParseError::new(format!("Invalid Union syntax: {raw}"), line, col))?;

        let mut union_types = Vec::new();
        for part in split_top_level(inner, ',') {
            if part.is_empty() {
                continue;
            }
            union_types.push(self.parse(&part, line, col)?);
        }

        match union_types.len() {
            0 => Err(ParseError::new(
                format!("Invalid Union syntax: {raw}"),
                line,
                col,
            )),
            1 => Ok(union_types.remove(0)),
            _ => Ok(TypeAnnotation::union(
                raw,
                "Union",
                Some(TYPING_MODULE.to_string()),
                union_types,
            )),
        }
    }

    fn parse_optional(
        &self,
        raw: &str,
        text: &str,
        line: usize,
        col: usize,
    ) -> Result<TypeAnnotation, ParseError> {
        let inner = bracketed_inner(text, "Optional".len())
            .filter(|inner| !inner.trim().is_empty())
            .ok_or_else(|| ParseError::new(format!("Invalid Optional syntax: {raw}"), line, col))?;

        let inner_type = self.parse(inner, line, col)?;
        Ok(TypeAnnotation::union(
            raw,
            "Optional",
            Some(TYPING_MODULE.to_string()),
            vec![inner_type, TypeAnnotation::none()],
        ))
    }

    fn parse_generic(&self, text: &str, line: usize, col: usize) -> Result<TypeAnnotation, ParseError> {
        let invalid = || ParseError::new(format!("Invalid generic syntax: {text}"), line, col);

        let open = text.find('[').ok_or_else(invalid)?;
        let base = text[..open].trim();
        if base.is_empty() {
            return Err(invalid());
        }
        let inner = bracketed_inner(text, open).ok_or_else(invalid)?.trim();

        let (module, name) = split_qualified(base);

        if name == "Callable" && matches!(module.as_deref(), None | Some(TYPING_MODULE)) {
            let args = self.parse_callable_args(text, inner, line, col)?;
            return Ok(TypeAnnotation {
                raw: text.to_string(),
                name,
                module,
                args,
                is_union: false,
                union_types: Vec::new(),
            });
        }

        let mut args = Vec::new();
        for part in split_top_level(inner, ',') {
            if part.is_empty() {
                continue;
            }
            args.push(self.parse(&part, line, col)?);
        }
        if args.is_empty() {
            return Err(invalid());
        }

        Ok(TypeAnnotation {
            raw: text.to_string(),
            name,
            module,
            args,
            is_union: false,
            union_types: Vec::new(),
        })
    }

    fn parse_callable_args(
        &self,
        raw: &str,
        inner: &str,
        line: usize,
        col: usize,
    ) -> Result<Vec<TypeAnnotation>, ParseError> {
        let invalid = || ParseError::new(format!("Invalid Callable syntax: {raw}"), line, col);

        let parts = split_top_level(inner, ',');
        let [params, ret] = parts.as_slice() else {
            return Err(invalid());
        };
        if ret.is_empty() {
            return Err(invalid());
        }

        let mut args = Vec::new();
        if params == "..." {
            args.push(TypeAnnotation::leaf("...", "...", None));
        } else {
            let params = params
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(invalid)?;
            for param in split_top_level(params, ',') {
                if param.is_empty() {
                    continue;
                }
                args.push(self.parse(&param, line, col)?);
            }
        }
        args.push(self.parse(ret, line, col)?);
        Ok(args)
    }

    fn parse_qualified(&self, text: &str, line: usize, col: usize) -> Result<TypeAnnotation, ParseError> {
        match text.rsplit_once('.') {
            Some((module, name)) if !module.is_empty() && !name.is_empty() => Ok(
                TypeAnnotation::leaf(text.to_string(), name.to_string(), Some(module.to_string())),
            ),
            _ => Err(ParseError::new(
                format!("Invalid qualified name: {text}"),
                line,
                col,
            )),
        }
    }
}

fn split_qualified(base: &str) -> (Option<String>, String) {
    match base.rsplit_once('.') {
        Some((module, name)) => (Some(module.to_string()), name.to_string()),
        None => (None, base.to_string()),
    }
}

/// Content between the bracket at `open` and its partner, provided the
/// partner is the final character of `text`.
fn bracketed_inner(text: &str, open: usize) -> Option<&str> {
    if text.as_bytes().get(open) != Some(&b'[') {
        return None;
    }
    let close = matching_close(text, open)?;
    if close + 1 != text.len() {
        return None;
    }
    Some(&text[open + 1..close])
}

/// Byte index of the bracket closing the one at `open`.
pub fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    for (index, byte) in text.bytes().enumerate().skip(open) {
        if let Some(q) = quote {
            if byte == q {
                quote = None;
            }
            continue;
        }
        match byte {
            b'"' | b'\'' => quote = Some(byte),
            b'[' | b'(' | b'{' => depth += 1,
            b']' | b')' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn brackets_balanced(text: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && quote.is_none()
}

/// Splits `text` on `delimiter` wherever it appears outside brackets and
/// quotes. Parts are trimmed; empty parts are kept so callers can reject them.
pub fn split_top_level(text: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in text.chars() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '[' | '(' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            c if c == delimiter && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

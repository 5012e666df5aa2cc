use std::sync::OnceLock;

use regex::Regex;

use crate::errors::TemplateSyntaxError;

type LexResult<T> = Result<T, TemplateSyntaxError>;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Data(String),
    VariableBegin,
    VariableEnd,
    BlockBegin,
    BlockEnd,
    Name,
    Integer(i64),
    Float(f64),
    Str(String),
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Tilde,
    Eq,
    Ne,
    Lt,
    Lteq,
    Gt,
    Gteq,
    Assign,
    Dot,
    Comma,
    Colon,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,
}

impl TokenKind {
    /// Human-readable name used in syntax error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Data(_) => "template data",
            TokenKind::VariableBegin => "begin of print statement",
            TokenKind::VariableEnd => "end of print statement",
            TokenKind::BlockBegin => "begin of statement block",
            TokenKind::BlockEnd => "end of statement block",
            TokenKind::Name => "name",
            TokenKind::Integer(_) => "integer",
            TokenKind::Float(_) => "float",
            TokenKind::Str(_) => "string",
            TokenKind::Eof => "end of template",
            _ => "operator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Variable,
    Block,
}

impl Region {
    fn closer(self) -> &'static str {
        match self {
            Region::Variable => "}}",
            Region::Block => "%}",
        }
    }

    fn end_kind(self) -> TokenKind {
        match self {
            Region::Variable => TokenKind::VariableEnd,
            Region::Block => TokenKind::BlockEnd,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Region::Variable => "end of print statement",
            Region::Block => "end of statement block",
        }
    }
}

fn raw_begin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\{%[-+]?\s*raw\s*[-+]?%\}").expect("raw pattern is valid"))
}

fn raw_end_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{%([-+]?)\s*endraw\s*[-+]?%\}").expect("endraw pattern is valid")
    })
}

/// Splits template text into data and tag tokens.
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
    lstrip_next: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            line: 1,
            column: 1,
            lstrip_next: false,
        }
    }

    pub fn tokenize(&mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();

        let input = self.input;
        while self.position < input.len() {
            let rest = &input[self.position..];
            let Some(offset) = find_tag_start(rest) else {
                self.push_data(&mut tokens, rest.len(), false);
                break;
            };

            let marker = rest[offset + 2..].chars().next();
            self.push_data(&mut tokens, offset, marker == Some('-'));

            match &rest[offset + 1..offset + 2] {
                "#" => self.skip_comment()?,
                "%" if raw_begin_pattern().is_match(&input[self.position..]) => {
                    self.lex_raw(&mut tokens)?;
                }
                "%" => self.lex_region(&mut tokens, Region::Block)?,
                _ => self.lex_region(&mut tokens, Region::Variable)?,
            }
        }

        tokens.push(Token::new(TokenKind::Eof, String::new(), self.line, self.column));
        Ok(tokens)
    }

    /// Emits the next `len` bytes as data, honoring whitespace-control markers.
    fn push_data(&mut self, tokens: &mut Vec<Token>, len: usize, rstrip: bool) {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_bytes(len);

        let mut text = self.slice(start, start + len);
        if std::mem::take(&mut self.lstrip_next) {
            text = text.trim_start();
        }
        if rstrip {
            text = text.trim_end();
        }
        if !text.is_empty() {
            tokens.push(Token::new(
                TokenKind::Data(text.to_string()),
                text.to_string(),
                start_line,
                start_column,
            ));
        }
    }

    fn skip_comment(&mut self) -> LexResult<()> {
        let start_line = self.line;
        let start_column = self.column;
        let input = self.input;
        let rest = &input[self.position + 2..];
        let Some(end) = rest.find("#}") else {
            return Err(TemplateSyntaxError::new(
                "Missing end of comment tag",
                start_line,
                start_column,
            ));
        };

        self.lstrip_next = rest[..end].ends_with('-');
        self.advance_bytes(2 + end + 2);
        Ok(())
    }

    fn lex_raw(&mut self, tokens: &mut Vec<Token>) -> LexResult<()> {
        let start_line = self.line;
        let start_column = self.column;
        let opener_len = raw_begin_pattern()
            .find(&self.input[self.position..])
            .map(|m| m.end())
            .unwrap_or(0);
        self.advance_bytes(opener_len);

        let input = self.input;
        let rest = &input[self.position..];
        let Some(captures) = raw_end_pattern().captures(rest) else {
            return Err(TemplateSyntaxError::new(
                "Missing end of raw directive",
                start_line,
                start_column,
            ));
        };
        let Some(closer) = captures.get(0) else {
            return Ok(());
        };
        let rstrip = captures.get(1).is_some_and(|m| m.as_str() == "-");
        let closer_len = closer.end() - closer.start();

        self.push_data(tokens, closer.start(), rstrip);
        self.lstrip_next = self.input[..self.position + closer_len].ends_with("-%}");
        self.advance_bytes(closer_len);
        Ok(())
    }

    fn lex_region(&mut self, tokens: &mut Vec<Token>, region: Region) -> LexResult<()> {
        let begin_kind = match region {
            Region::Variable => TokenKind::VariableBegin,
            Region::Block => TokenKind::BlockBegin,
        };
        let begin_line = self.line;
        let begin_column = self.column;
        let start = self.position;
        self.advance_bytes(2);
        if matches!(self.peek_char(), Some('-') | Some('+')) {
            self.advance_char();
        }
        tokens.push(Token::new(
            begin_kind,
            self.slice(start, self.position).to_string(),
            begin_line,
            begin_column,
        ));

        let mut depth = 0usize;
        loop {
            let Some(ch) = self.peek_char() else {
                return Err(TemplateSyntaxError::new(
                    format!("unexpected end of template, expected '{}'.", region.label()),
                    begin_line,
                    begin_column,
                ));
            };

            if depth == 0 {
                if let Some(len) = self.closer_len(region) {
                    let start = self.position;
                    let line = self.line;
                    let column = self.column;
                    self.lstrip_next = self.slice(start, start + len).starts_with('-');
                    self.advance_bytes(len);
                    tokens.push(Token::new(
                        region.end_kind(),
                        self.slice(start, self.position).to_string(),
                        line,
                        column,
                    ));
                    return Ok(());
                }
            }

            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance_char();
                }
                '\'' | '"' => tokens.push(self.lex_string(ch)?),
                '0'..='9' => tokens.push(self.lex_number()?),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.lex_name()),
                '(' | '[' | '{' => {
                    depth += 1;
                    let kind = match ch {
                        '(' => TokenKind::LParen,
                        '[' => TokenKind::LBracket,
                        _ => TokenKind::LBrace,
                    };
                    tokens.push(self.simple_token(kind));
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    let kind = match ch {
                        ')' => TokenKind::RParen,
                        ']' => TokenKind::RBracket,
                        _ => TokenKind::RBrace,
                    };
                    tokens.push(self.simple_token(kind));
                }
                '*' if self.peek_next_char() == Some('*') => {
                    tokens.push(self.double_token(TokenKind::Pow));
                }
                '/' if self.peek_next_char() == Some('/') => {
                    tokens.push(self.double_token(TokenKind::FloorDiv));
                }
                '=' if self.peek_next_char() == Some('=') => {
                    tokens.push(self.double_token(TokenKind::Eq));
                }
                '!' if self.peek_next_char() == Some('=') => {
                    tokens.push(self.double_token(TokenKind::Ne));
                }
                '<' if self.peek_next_char() == Some('=') => {
                    tokens.push(self.double_token(TokenKind::Lteq));
                }
                '>' if self.peek_next_char() == Some('=') => {
                    tokens.push(self.double_token(TokenKind::Gteq));
                }
                '+' => tokens.push(self.simple_token(TokenKind::Add)),
                '-' => tokens.push(self.simple_token(TokenKind::Sub)),
                '*' => tokens.push(self.simple_token(TokenKind::Mul)),
                '/' => tokens.push(self.simple_token(TokenKind::Div)),
                '%' => tokens.push(self.simple_token(TokenKind::Mod)),
                '~' => tokens.push(self.simple_token(TokenKind::Tilde)),
                '<' => tokens.push(self.simple_token(TokenKind::Lt)),
                '>' => tokens.push(self.simple_token(TokenKind::Gt)),
                '=' => tokens.push(self.simple_token(TokenKind::Assign)),
                '.' => tokens.push(self.simple_token(TokenKind::Dot)),
                ',' => tokens.push(self.simple_token(TokenKind::Comma)),
                ':' => tokens.push(self.simple_token(TokenKind::Colon)),
                '|' => tokens.push(self.simple_token(TokenKind::Pipe)),
                other => {
                    return Err(TemplateSyntaxError::new(
                        format!("unexpected char '{other}' at {}", self.position),
                        self.line,
                        self.column,
                    ));
                }
            }
        }
    }

    /// Length of the region closer at the cursor, including a `-`/`+` marker.
    fn closer_len(&self, region: Region) -> Option<usize> {
        let rest = &self.input[self.position..];
        let closer = region.closer();
        if rest.starts_with(closer) {
            return Some(closer.len());
        }
        let marked = rest.strip_prefix('-').or_else(|| rest.strip_prefix('+'))?;
        marked.starts_with(closer).then_some(closer.len() + 1)
    }

    fn lex_string(&mut self, quote: char) -> LexResult<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char();

        let mut value = String::new();
        while let Some(ch) = self.peek_char() {
            match ch {
                c if c == quote => {
                    self.advance_char();
                    return Ok(Token::new(
                        TokenKind::Str(value),
                        self.slice(start, self.position).to_string(),
                        start_line,
                        start_column,
                    ));
                }
                '\\' => {
                    self.advance_char();
                    let Some(escaped) = self.advance_char() else {
                        break;
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                }
                _ => {
                    value.push(ch);
                    self.advance_char();
                }
            }
        }

        Err(TemplateSyntaxError::new(
            "unexpected end of string",
            start_line,
            start_column,
        ))
    }

    fn lex_number(&mut self) -> LexResult<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        let mut is_float = false;

        self.advance_char();
        while let Some(ch) = self.peek_char() {
            match ch {
                '0'..='9' | '_' => {
                    self.advance_char();
                }
                '.' if !is_float
                    && self.peek_next_char().is_some_and(|next| next.is_ascii_digit()) =>
                {
                    is_float = true;
                    self.advance_char();
                }
                'e' | 'E'
                    if self
                        .peek_next_char()
                        .is_some_and(|next| next.is_ascii_digit() || next == '-' || next == '+') =>
                {
                    is_float = true;
                    self.advance_char();
                    self.advance_char();
                }
                _ => break,
            }
        }

        let lexeme = self.slice(start, self.position).to_string();
        let digits = lexeme.replace('_', "");
        let kind = if is_float {
            digits.parse::<f64>().map(TokenKind::Float).ok()
        } else {
            digits.parse::<i64>().map(TokenKind::Integer).ok()
        };

        kind.map(|kind| Token::new(kind, lexeme.clone(), start_line, start_column))
            .ok_or_else(|| {
                TemplateSyntaxError::new(
                    format!("invalid number literal '{lexeme}'"),
                    start_line,
                    start_column,
                )
            })
    }

    fn lex_name(&mut self) -> Token {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char();

        while let Some(ch) = self.peek_char() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        Token::new(
            TokenKind::Name,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn simple_token(&mut self, kind: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn double_token(&mut self, kind: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();
        self.advance_char();
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.input[self.position..].chars();
        iter.next()?;
        iter.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn advance_bytes(&mut self, len: usize) {
        let target = (self.position + len).min(self.input.len());
        while self.position < target {
            if self.advance_char().is_none() {
                break;
            }
        }
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.input[start..end]
    }
}

/// Byte offset of the next `{{`, `{%` or `{#`.
fn find_tag_start(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut index = 0;
    while let Some(found) = text[index..].find('{') {
        let at = index + found;
        if matches!(bytes.get(at + 1), Some(b'{') | Some(b'%') | Some(b'#')) {
            return Some(at);
        }
        index = at + 1;
    }
    None
}

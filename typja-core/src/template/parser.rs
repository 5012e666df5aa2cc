use crate::errors::TemplateSyntaxError;

use super::ast::*;
use super::lexer::{Token, TokenKind};

type ParseResult<T> = Result<T, TemplateSyntaxError>;

/// Recursive-descent parser over the token stream of one template.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn span_from_token(token: &Token) -> SourceSpan {
        let len = token.lexeme.chars().count().max(1);
        SourceSpan::new(
            token.line,
            token.column,
            token.line,
            token.column + len.saturating_sub(1),
        )
    }

    fn union_spans(a: &SourceSpan, b: &SourceSpan) -> SourceSpan {
        SourceSpan::union(a, b)
    }

    fn error_at(token: &Token, message: String) -> TemplateSyntaxError {
        TemplateSyntaxError::new(message, token.line, token.column)
    }

    pub fn parse(&mut self) -> ParseResult<Template> {
        let body = self.subparse(&[])?;
        Ok(Template::new(body))
    }

    /// Parses nodes until one of `end_tags` opens a block.
    ///
    /// On return the `{%` of the end tag is consumed and the tag name is the
    /// current token.
    fn subparse(&mut self, end_tags: &[&str]) -> ParseResult<Vec<Node>> {
        let mut body = Vec::new();

        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => {
                    if end_tags.is_empty() {
                        return Ok(body);
                    }
                    let expected = end_tags
                        .iter()
                        .map(|tag| format!("'{tag}'"))
                        .collect::<Vec<_>>()
                        .join(" or ");
                    return Err(Self::error_at(
                        &token,
                        format!(
                            "Unexpected end of template. Expected one of the following tags: {expected}."
                        ),
                    ));
                }
                TokenKind::Data(text) => {
                    self.advance();
                    body.push(Node::Data(text));
                }
                TokenKind::VariableBegin => {
                    self.advance();
                    let expression = self.parse_tuple(false, true, &[], false)?;
                    self.expect_token(TokenKind::VariableEnd, "expected end of print statement")?;
                    body.push(Node::Output(expression));
                }
                TokenKind::BlockBegin => {
                    self.advance();
                    let tag = self.peek();
                    if tag.kind == TokenKind::Name && end_tags.contains(&tag.lexeme.as_str()) {
                        return Ok(body);
                    }
                    body.push(self.parse_statement()?);
                }
                _ => {
                    return Err(Self::error_at(
                        &token,
                        format!("unexpected '{}'", token.lexeme),
                    ));
                }
            }
        }
    }

    fn parse_statement(&mut self) -> ParseResult<Node> {
        let token = self.peek().clone();
        if token.kind != TokenKind::Name {
            return Err(Self::error_at(&token, "tag name expected".to_string()));
        }

        match token.lexeme.as_str() {
            "for" => self.parse_for(),
            "if" => self.parse_if(),
            "macro" => self.parse_macro(),
            "call" => self.parse_call_block(),
            "filter" => self.parse_filter_block(),
            "set" => self.parse_set(),
            "block" => self.parse_block(),
            "extends" => self.parse_extends(),
            "include" => self.parse_include(),
            "import" => self.parse_import(),
            "from" => self.parse_from(),
            "with" => self.parse_with(),
            "autoescape" => self.parse_autoescape(),
            "do" => self.parse_do(),
            "break" | "continue" => {
                let span = Self::span_from_token(&self.advance());
                self.expect_block_end()?;
                Ok(if token.lexeme == "break" {
                    Node::Break(span)
                } else {
                    Node::Continue(span)
                })
            }
            other => Err(Self::error_at(
                &token,
                format!("Encountered unknown tag '{other}'."),
            )),
        }
    }

    fn parse_for(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let target = self.parse_assign_target(true, &["in"])?;
        self.expect_name("in", "expected 'in' after for-loop target")?;
        let iter = self.parse_tuple(false, false, &["recursive"], false)?;

        let condition = if self.skip_name("if") {
            Some(self.parse_expression(true)?)
        } else {
            None
        };
        let recursive = self.skip_name("recursive");
        self.expect_block_end()?;

        let body = self.subparse(&["endfor", "else"])?;
        let else_body = if self.advance().lexeme == "else" {
            self.expect_block_end()?;
            let else_body = self.subparse(&["endfor"])?;
            self.advance();
            else_body
        } else {
            Vec::new()
        };
        self.expect_block_end()?;

        Ok(Node::For(ForNode {
            target,
            iter,
            condition,
            recursive,
            body,
            else_body,
            span,
        }))
    }

    fn parse_if(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let mut branches = Vec::new();
        let mut else_body = Vec::new();

        loop {
            let condition = self.parse_tuple(false, false, &[], false)?;
            self.expect_block_end()?;
            let body = self.subparse(&["elif", "else", "endif"])?;
            branches.push(IfBranch { condition, body });

            match self.advance().lexeme.as_str() {
                "elif" => continue,
                "else" => {
                    self.expect_block_end()?;
                    else_body = self.subparse(&["endif"])?;
                    self.advance();
                    break;
                }
                _ => break,
            }
        }
        self.expect_block_end()?;

        Ok(Node::If(IfNode {
            branches,
            else_body,
            span,
        }))
    }

    fn parse_macro(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let name = self.expect_token(TokenKind::Name, "expected macro name")?.lexeme;
        let params = self.parse_signature()?;
        self.expect_block_end()?;
        let body = self.subparse(&["endmacro"])?;
        self.finish_end_tag()?;

        Ok(Node::Macro(MacroNode {
            name,
            params,
            body,
            span,
        }))
    }

    fn parse_call_block(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let params = if matches!(self.peek_kind(), TokenKind::LParen) {
            self.parse_signature()?
        } else {
            Vec::new()
        };

        let call = self.parse_expression(true)?;
        if !matches!(call.kind, ExpressionKind::Call { .. }) {
            return Err(TemplateSyntaxError::new(
                "expected call",
                call.span.line,
                call.span.column,
            ));
        }
        self.expect_block_end()?;
        let body = self.subparse(&["endcall"])?;
        self.finish_end_tag()?;

        Ok(Node::CallBlock(CallBlockNode {
            call,
            params,
            body,
            span,
        }))
    }

    fn parse_filter_block(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let filter = self.parse_filter_chain(None)?;
        self.expect_block_end()?;
        let body = self.subparse(&["endfilter"])?;
        self.finish_end_tag()?;

        Ok(Node::FilterBlock(FilterBlockNode { filter, body, span }))
    }

    fn parse_set(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let target = self.parse_set_target()?;

        if matches!(self.peek_kind(), TokenKind::Assign) {
            self.advance();
            let value = self.parse_tuple(false, true, &[], false)?;
            self.expect_block_end()?;
            return Ok(Node::Set(SetNode {
                target,
                value,
                span,
            }));
        }

        let filter = if matches!(self.peek_kind(), TokenKind::Pipe) {
            self.advance();
            Some(self.parse_filter_chain(None)?)
        } else {
            None
        };
        self.expect_block_end()?;
        let body = self.subparse(&["endset"])?;
        self.finish_end_tag()?;

        Ok(Node::SetBlock(SetBlockNode {
            target,
            filter,
            body,
            span,
        }))
    }

    /// `set` targets may also be namespace attributes (`ns.count`).
    fn parse_set_target(&mut self) -> ParseResult<Expression> {
        if matches!(self.peek_kind(), TokenKind::Name)
            && matches!(self.peek_kind_at(1), Some(TokenKind::Dot))
            && matches!(self.peek_kind_at(2), Some(TokenKind::Name))
        {
            let object = self.advance();
            self.advance();
            let attr = self.advance();
            let node = Expression::new(
                ExpressionKind::Name {
                    name: object.lexeme.clone(),
                    ctx: NameContext::Load,
                },
                Self::span_from_token(&object),
            );
            let attr_span = Self::span_from_token(&attr);
            return Ok(Expression::new(
                ExpressionKind::Getattr {
                    node: Box::new(node),
                    attr: attr.lexeme,
                    attr_span,
                },
                Self::union_spans(&Self::span_from_token(&object), &attr_span),
            ));
        }

        self.parse_assign_target(true, &[])
    }

    fn parse_block(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let name = self.expect_token(TokenKind::Name, "expected block name")?.lexeme;
        let scoped = self.skip_name("scoped");
        let required = self.skip_name("required");
        self.expect_block_end()?;
        let body = self.subparse(&["endblock"])?;
        self.advance();
        if matches!(self.peek_kind(), TokenKind::Name) {
            let closing = self.advance();
            if closing.lexeme != name {
                return Err(Self::error_at(
                    &closing,
                    format!("mismatched endblock: expected '{name}', found '{}'", closing.lexeme),
                ));
            }
        }
        self.expect_block_end()?;

        Ok(Node::Block(BlockNode {
            name,
            scoped,
            required,
            body,
            span,
        }))
    }

    fn parse_extends(&mut self) -> ParseResult<Node> {
        self.advance();
        let template = self.parse_expression(true)?;
        self.expect_block_end()?;
        Ok(Node::Extends(template))
    }

    fn parse_include(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let template = self.parse_expression(true)?;

        let ignore_missing = self.check_name("ignore") && self.check_name_at(1, "missing");
        if ignore_missing {
            self.advance();
            self.advance();
        }
        let with_context = self.parse_import_context().unwrap_or(true);
        self.expect_block_end()?;

        Ok(Node::Include(IncludeNode {
            template,
            ignore_missing,
            with_context,
            span,
        }))
    }

    fn parse_import(&mut self) -> ParseResult<Node> {
        self.advance();
        let template = self.parse_expression(true)?;
        self.expect_name("as", "expected 'as' after imported template")?;
        let target = self.expect_token(TokenKind::Name, "expected name after 'as'")?;
        let with_context = self.parse_import_context().unwrap_or(false);
        self.expect_block_end()?;

        Ok(Node::Import(ImportNode {
            template,
            target_span: Self::span_from_token(&target),
            target: target.lexeme,
            with_context,
        }))
    }

    fn parse_from(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let template = self.parse_expression(true)?;
        self.expect_name("import", "expected 'import' after template name")?;

        let mut names: Vec<ImportedMacro> = Vec::new();
        let mut with_context = None;
        loop {
            if !names.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' between imported names")?;
            }
            if let Some(context) = self.parse_import_context() {
                with_context = Some(context);
                break;
            }

            let token = self.expect_token(TokenKind::Name, "expected name to import")?;
            if token.lexeme.starts_with('_') {
                return Err(Self::error_at(
                    &token,
                    "names starting with an underline can not be imported".to_string(),
                ));
            }
            let alias = if self.skip_name("as") {
                Some(self.expect_token(TokenKind::Name, "expected alias after 'as'")?.lexeme)
            } else {
                None
            };
            names.push(ImportedMacro {
                span: Self::span_from_token(&token),
                name: token.lexeme,
                alias,
            });

            if let Some(context) = self.parse_import_context() {
                with_context = Some(context);
                break;
            }
            if !matches!(self.peek_kind(), TokenKind::Comma) {
                break;
            }
        }
        self.expect_block_end()?;

        Ok(Node::FromImport(FromImportNode {
            template,
            names,
            with_context: with_context.unwrap_or(false),
            span,
        }))
    }

    /// Consumes `with context` / `without context` when present.
    fn parse_import_context(&mut self) -> Option<bool> {
        let with = if self.check_name("with") {
            true
        } else if self.check_name("without") {
            false
        } else {
            return None;
        };
        if !self.check_name_at(1, "context") {
            return None;
        }
        self.advance();
        self.advance();
        Some(with)
    }

    fn parse_with(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let mut targets = Vec::new();
        let mut values = Vec::new();

        while !matches!(self.peek_kind(), TokenKind::BlockEnd) {
            if !targets.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' between with assignments")?;
            }
            targets.push(self.parse_assign_target(false, &[])?);
            self.expect_token(TokenKind::Assign, "expected '=' in with assignment")?;
            values.push(self.parse_expression(true)?);
        }
        self.expect_block_end()?;
        let body = self.subparse(&["endwith"])?;
        self.finish_end_tag()?;

        Ok(Node::With(WithNode {
            targets,
            values,
            body,
            span,
        }))
    }

    fn parse_autoescape(&mut self) -> ParseResult<Node> {
        let span = Self::span_from_token(&self.advance());
        let value = self.parse_expression(true)?;
        self.expect_block_end()?;
        let body = self.subparse(&["endautoescape"])?;
        self.finish_end_tag()?;

        Ok(Node::AutoEscape(AutoEscapeNode { value, body, span }))
    }

    fn parse_do(&mut self) -> ParseResult<Node> {
        self.advance();
        let expression = self.parse_tuple(false, true, &[], false)?;
        self.expect_block_end()?;
        Ok(Node::Do(expression))
    }

    fn parse_signature(&mut self) -> ParseResult<Vec<MacroParam>> {
        self.expect_token(TokenKind::LParen, "expected '(' to start parameter list")?;
        let mut params = Vec::new();

        while !matches!(self.peek_kind(), TokenKind::RParen) {
            if !params.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' between parameters")?;
            }
            let token = self.expect_token(TokenKind::Name, "expected parameter name")?;
            let default = if matches!(self.peek_kind(), TokenKind::Assign) {
                self.advance();
                Some(self.parse_expression(true)?)
            } else {
                None
            };
            params.push(MacroParam {
                span: Self::span_from_token(&token),
                name: token.lexeme,
                default,
            });
        }
        self.expect_token(TokenKind::RParen, "expected ')' to close parameter list")?;

        Ok(params)
    }

    fn parse_assign_target(&mut self, with_tuple: bool, extra_end: &[&str]) -> ParseResult<Expression> {
        let target = if with_tuple {
            self.parse_tuple(true, true, extra_end, false)?
        } else {
            let token = self.expect_token(TokenKind::Name, "expected assignment target")?;
            Expression::new(
                ExpressionKind::Name {
                    name: token.lexeme.clone(),
                    ctx: NameContext::Load,
                },
                Self::span_from_token(&token),
            )
        };
        into_store(target)
    }

    fn parse_expression(&mut self, with_condexpr: bool) -> ParseResult<Expression> {
        if with_condexpr {
            self.parse_condexpr()
        } else {
            self.parse_or()
        }
    }

    fn parse_condexpr(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_or()?;

        while self.skip_name("if") {
            let test = self.parse_or()?;
            let otherwise = if self.skip_name("else") {
                Some(Box::new(self.parse_condexpr()?))
            } else {
                None
            };
            let mut span = Self::union_spans(&expression.span, &test.span);
            if let Some(otherwise) = &otherwise {
                span = Self::union_spans(&span, &otherwise.span);
            }
            expression = Expression::new(
                ExpressionKind::CondExpr {
                    test: Box::new(test),
                    then: Box::new(expression),
                    otherwise,
                },
                span,
            );
        }

        Ok(expression)
    }

    fn parse_or(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_and()?;
        while self.skip_name("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_not()?;
        while self.skip_name("and") {
            let right = self.parse_not()?;
            left = binary(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expression> {
        if self.check_name("not") {
            let span = Self::span_from_token(&self.advance());
            let operand = self.parse_not()?;
            let span = Self::union_spans(&span, &operand.span);
            return Ok(Expression::new(
                ExpressionKind::Unary {
                    op: UnaryOperator::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> ParseResult<Expression> {
        let left = self.parse_math1()?;
        let mut ops = Vec::new();

        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => CompareOperator::Eq,
                TokenKind::Ne => CompareOperator::Ne,
                TokenKind::Lt => CompareOperator::Lt,
                TokenKind::Lteq => CompareOperator::Lteq,
                TokenKind::Gt => CompareOperator::Gt,
                TokenKind::Gteq => CompareOperator::Gteq,
                TokenKind::Name if self.check_name("in") => CompareOperator::In,
                TokenKind::Name if self.check_name("not") && self.check_name_at(1, "in") => {
                    CompareOperator::NotIn
                }
                _ => break,
            };
            if op == CompareOperator::NotIn {
                self.advance();
            }
            self.advance();
            ops.push((op, self.parse_math1()?));
        }

        if ops.is_empty() {
            return Ok(left);
        }
        let span = ops
            .iter()
            .fold(left.span, |span, (_, operand)| Self::union_spans(&span, &operand.span));
        Ok(Expression::new(
            ExpressionKind::Compare {
                left: Box::new(left),
                ops,
            },
            span,
        ))
    }

    fn parse_math1(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Add => BinaryOperator::Add,
                TokenKind::Sub => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_concat()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> ParseResult<Expression> {
        let mut items = vec![self.parse_math2()?];
        while matches!(self.peek_kind(), TokenKind::Tilde) {
            self.advance();
            items.push(self.parse_math2()?);
        }

        if items.len() == 1 {
            return Ok(items.remove(0));
        }
        let span = items
            .iter()
            .skip(1)
            .fold(items[0].span, |span, item| Self::union_spans(&span, &item.span));
        Ok(Expression::new(ExpressionKind::Concat(items), span))
    }

    fn parse_math2(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_pow()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Mul => BinaryOperator::Mul,
                TokenKind::Div => BinaryOperator::Div,
                TokenKind::FloorDiv => BinaryOperator::FloorDiv,
                TokenKind::Mod => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_pow()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_pow(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_unary(true)?;
        while matches!(self.peek_kind(), TokenKind::Pow) {
            self.advance();
            let right = self.parse_unary(true)?;
            left = binary(BinaryOperator::Pow, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self, with_filter: bool) -> ParseResult<Expression> {
        let op = match self.peek_kind() {
            TokenKind::Sub => Some(UnaryOperator::Neg),
            TokenKind::Add => Some(UnaryOperator::Pos),
            _ => None,
        };

        let mut expression = match op {
            Some(op) => {
                let span = Self::span_from_token(&self.advance());
                let operand = self.parse_unary(false)?;
                let span = Self::union_spans(&span, &operand.span);
                Expression::new(
                    ExpressionKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                )
            }
            None => self.parse_primary()?,
        };

        expression = self.parse_postfix(expression)?;
        if with_filter {
            expression = self.parse_filter_expr(expression)?;
        }
        Ok(expression)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let token = self.peek().clone();
        let span = Self::span_from_token(&token);

        match &token.kind {
            TokenKind::Name => {
                self.advance();
                let kind = match token.lexeme.as_str() {
                    "true" | "True" => ExpressionKind::Const(Literal::Bool(true)),
                    "false" | "False" => ExpressionKind::Const(Literal::Bool(false)),
                    "none" | "None" => ExpressionKind::Const(Literal::None),
                    name => ExpressionKind::Name {
                        name: name.to_string(),
                        ctx: NameContext::Load,
                    },
                };
                Ok(Expression::new(kind, span))
            }
            TokenKind::Str(value) => {
                self.advance();
                let mut value = value.clone();
                let mut span = span;
                while let TokenKind::Str(next) = self.peek_kind() {
                    value.push_str(next);
                    let next_span = Self::span_from_token(self.peek());
                    span = Self::union_spans(&span, &next_span);
                    self.advance();
                }
                Ok(Expression::new(ExpressionKind::Const(Literal::Str(value)), span))
            }
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expression::new(ExpressionKind::Const(Literal::Int(*value)), span))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expression::new(ExpressionKind::Const(Literal::Float(*value)), span))
            }
            TokenKind::LParen => {
                self.advance();
                let mut expression = self.parse_tuple(false, true, &[], true)?;
                let closing =
                    self.expect_token(TokenKind::RParen, "expected ')' to close parenthesized expression")?;
                expression.span =
                    Self::union_spans(&span, &Self::span_from_token(&closing));
                Ok(expression)
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_dict(),
            TokenKind::Eof | TokenKind::VariableEnd | TokenKind::BlockEnd => Err(Self::error_at(
                &token,
                format!("Expected an expression, got '{}'", token.kind.describe()),
            )),
            _ => Err(Self::error_at(&token, format!("unexpected '{}'", token.lexeme))),
        }
    }

    /// Comma-separated expressions; a single item without a comma is returned as is.
    fn parse_tuple(
        &mut self,
        simplified: bool,
        with_condexpr: bool,
        extra_end: &[&str],
        explicit_parentheses: bool,
    ) -> ParseResult<Expression> {
        let start = self.peek().clone();
        let mut items = Vec::new();
        let mut is_tuple = false;

        loop {
            if !items.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' in tuple")?;
            }
            if self.is_tuple_end(extra_end) {
                break;
            }
            let item = if simplified {
                self.parse_primary()?
            } else {
                self.parse_expression(with_condexpr)?
            };
            items.push(item);
            if matches!(self.peek_kind(), TokenKind::Comma) {
                is_tuple = true;
            } else {
                break;
            }
        }

        if !is_tuple {
            if let Some(item) = items.pop() {
                return Ok(item);
            }
            if !explicit_parentheses {
                let token = self.peek().clone();
                let found = if token.lexeme.is_empty() {
                    token.kind.describe().to_string()
                } else {
                    token.lexeme.clone()
                };
                return Err(Self::error_at(
                    &token,
                    format!("Expected an expression, got '{found}'"),
                ));
            }
        }

        let span = items.iter().fold(Self::span_from_token(&start), |span, item| {
            Self::union_spans(&span, &item.span)
        });
        Ok(Expression::new(ExpressionKind::Tuple(items), span))
    }

    fn is_tuple_end(&self, extra_end: &[&str]) -> bool {
        match self.peek_kind() {
            TokenKind::VariableEnd | TokenKind::BlockEnd | TokenKind::RParen | TokenKind::Eof => true,
            TokenKind::Name => extra_end.contains(&self.peek().lexeme.as_str()),
            _ => false,
        }
    }

    fn parse_list(&mut self) -> ParseResult<Expression> {
        let open = self.advance();
        let mut items = Vec::new();

        while !matches!(self.peek_kind(), TokenKind::RBracket) {
            if !items.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' between list items")?;
                if matches!(self.peek_kind(), TokenKind::RBracket) {
                    break;
                }
            }
            items.push(self.parse_expression(true)?);
        }
        let closing = self.expect_token(TokenKind::RBracket, "expected ']' to close list literal")?;

        Ok(Expression::new(
            ExpressionKind::List(items),
            Self::union_spans(
                &Self::span_from_token(&open),
                &Self::span_from_token(&closing),
            ),
        ))
    }

    fn parse_dict(&mut self) -> ParseResult<Expression> {
        let open = self.advance();
        let mut entries = Vec::new();

        while !matches!(self.peek_kind(), TokenKind::RBrace) {
            if !entries.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' between dict entries")?;
                if matches!(self.peek_kind(), TokenKind::RBrace) {
                    break;
                }
            }
            let key = self.parse_expression(true)?;
            self.expect_token(TokenKind::Colon, "expected ':' after dict key")?;
            let value = self.parse_expression(true)?;
            entries.push((key, value));
        }
        let closing = self.expect_token(TokenKind::RBrace, "expected '}' to close dict literal")?;

        Ok(Expression::new(
            ExpressionKind::Dict(entries),
            Self::union_spans(
                &Self::span_from_token(&open),
                &Self::span_from_token(&closing),
            ),
        ))
    }

    fn parse_postfix(&mut self, mut expression: Expression) -> ParseResult<Expression> {
        loop {
            expression = match self.peek_kind() {
                TokenKind::Dot => self.finish_member(expression)?,
                TokenKind::LBracket => self.finish_index(expression)?,
                TokenKind::LParen => self.finish_call(expression)?,
                _ => return Ok(expression),
            };
        }
    }

    fn parse_filter_expr(&mut self, mut expression: Expression) -> ParseResult<Expression> {
        loop {
            expression = match self.peek_kind() {
                TokenKind::Pipe => {
                    self.advance();
                    self.finish_filter(Some(expression))?
                }
                TokenKind::Name if self.check_name("is") => self.finish_test(expression)?,
                TokenKind::LParen => self.finish_call(expression)?,
                _ => return Ok(expression),
            };
        }
    }

    /// `name(args) | name(args) ...` with no input node, as in filter blocks.
    fn parse_filter_chain(&mut self, input: Option<Expression>) -> ParseResult<Expression> {
        let mut filter = self.finish_filter(input)?;
        while matches!(self.peek_kind(), TokenKind::Pipe) {
            self.advance();
            filter = self.finish_filter(Some(filter))?;
        }
        Ok(filter)
    }

    fn finish_member(&mut self, object: Expression) -> ParseResult<Expression> {
        self.expect_token(TokenKind::Dot, "expected '.' for attribute access")?;
        let token = self.advance();
        let attr_span = Self::span_from_token(&token);
        let span = Self::union_spans(&object.span, &attr_span);

        match token.kind {
            TokenKind::Name => Ok(Expression::new(
                ExpressionKind::Getattr {
                    node: Box::new(object),
                    attr: token.lexeme,
                    attr_span,
                },
                span,
            )),
            TokenKind::Integer(value) => Ok(Expression::new(
                ExpressionKind::Getitem {
                    node: Box::new(object),
                    index: Box::new(Expression::new(
                        ExpressionKind::Const(Literal::Int(value)),
                        attr_span,
                    )),
                },
                span,
            )),
            _ => Err(Self::error_at(
                &token,
                format!("expected name or number after '.', found '{}'", token.lexeme),
            )),
        }
    }

    fn finish_index(&mut self, object: Expression) -> ParseResult<Expression> {
        let open = self.advance();
        let mut items = Vec::new();

        while !matches!(self.peek_kind(), TokenKind::RBracket) {
            if !items.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' in subscript")?;
            }
            items.push(self.parse_subscribed()?);
        }
        let closing = self.expect_token(TokenKind::RBracket, "expected ']' after subscript")?;

        let index = if items.len() == 1 {
            items.remove(0)
        } else {
            let span = items.iter().fold(Self::span_from_token(&open), |span, item| {
                Self::union_spans(&span, &item.span)
            });
            Expression::new(ExpressionKind::Tuple(items), span)
        };
        let span = Self::union_spans(&object.span, &Self::span_from_token(&closing));

        Ok(Expression::new(
            ExpressionKind::Getitem {
                node: Box::new(object),
                index: Box::new(index),
            },
            span,
        ))
    }

    fn parse_subscribed(&mut self) -> ParseResult<Expression> {
        let start_span = Self::span_from_token(self.peek());

        let start = if matches!(self.peek_kind(), TokenKind::Colon) {
            None
        } else {
            let expression = self.parse_expression(true)?;
            if !matches!(self.peek_kind(), TokenKind::Colon) {
                return Ok(expression);
            }
            Some(Box::new(expression))
        };
        self.advance();

        let stop = if self.is_subscript_part_end() {
            None
        } else {
            Some(Box::new(self.parse_expression(true)?))
        };
        let step = if matches!(self.peek_kind(), TokenKind::Colon) {
            self.advance();
            if self.is_subscript_part_end() {
                None
            } else {
                Some(Box::new(self.parse_expression(true)?))
            }
        } else {
            None
        };

        Ok(Expression::new(
            ExpressionKind::Slice { start, stop, step },
            start_span,
        ))
    }

    fn is_subscript_part_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::RBracket | TokenKind::Comma | TokenKind::Colon
        )
    }

    fn finish_call(&mut self, callee: Expression) -> ParseResult<Expression> {
        let (arguments, closing_span) = self.parse_call_args()?;
        let span = Self::union_spans(&callee.span, &closing_span);
        Ok(Expression::new(
            ExpressionKind::Call {
                node: Box::new(callee),
                arguments,
            },
            span,
        ))
    }

    fn finish_filter(&mut self, input: Option<Expression>) -> ParseResult<Expression> {
        let (name, name_span) = self.parse_dotted_name("expected filter name")?;
        let (arguments, end_span) = if matches!(self.peek_kind(), TokenKind::LParen) {
            self.parse_call_args()?
        } else {
            (CallArguments::default(), name_span)
        };

        let span = match &input {
            Some(input) => Self::union_spans(&input.span, &end_span),
            None => Self::union_spans(&name_span, &end_span),
        };
        Ok(Expression::new(
            ExpressionKind::Filter {
                node: input.map(Box::new),
                name,
                name_span,
                arguments,
            },
            span,
        ))
    }

    fn finish_test(&mut self, subject: Expression) -> ParseResult<Expression> {
        self.advance();
        let negated = self.skip_name("not");
        let (name, name_span) = self.parse_dotted_name("expected test name")?;

        let mut end_span = name_span;
        let arguments = match self.peek_kind() {
            TokenKind::LParen => {
                let (arguments, closing_span) = self.parse_call_args()?;
                end_span = closing_span;
                arguments
            }
            TokenKind::Name | TokenKind::Str(_) | TokenKind::Integer(_) | TokenKind::Float(_)
            | TokenKind::LBracket | TokenKind::LBrace
                if !(self.check_name("else") || self.check_name("or") || self.check_name("and")) =>
            {
                if self.check_name("is") {
                    let token = self.peek().clone();
                    return Err(Self::error_at(
                        &token,
                        "You cannot chain multiple tests with is".to_string(),
                    ));
                }
                let argument = self.parse_primary()?;
                let argument = self.parse_postfix(argument)?;
                end_span = argument.span;
                CallArguments {
                    args: vec![argument],
                    ..CallArguments::default()
                }
            }
            _ => CallArguments::default(),
        };

        let span = Self::union_spans(&subject.span, &end_span);
        Ok(Expression::new(
            ExpressionKind::Test {
                node: Box::new(subject),
                name,
                arguments,
                negated,
            },
            span,
        ))
    }

    fn parse_dotted_name(&mut self, message: &str) -> ParseResult<(String, SourceSpan)> {
        let token = self.expect_token(TokenKind::Name, message)?;
        let mut name = token.lexeme.clone();
        let mut span = Self::span_from_token(&token);
        while matches!(self.peek_kind(), TokenKind::Dot)
            && matches!(self.peek_kind_at(1), Some(TokenKind::Name))
        {
            self.advance();
            let part = self.advance();
            name.push('.');
            name.push_str(&part.lexeme);
            span = Self::union_spans(&span, &Self::span_from_token(&part));
        }
        Ok((name, span))
    }

    /// Parses `( ... )` call arguments, returning them with the span of `)`.
    fn parse_call_args(&mut self) -> ParseResult<(CallArguments, SourceSpan)> {
        let open = self.expect_token(TokenKind::LParen, "expected '(' to start argument list")?;
        let mut arguments = CallArguments::default();
        let mut require_comma = false;
        let invalid = |token: &Token| {
            Self::error_at(token, "invalid syntax for function call expression".to_string())
        };

        while !matches!(self.peek_kind(), TokenKind::RParen) {
            if require_comma {
                self.expect_token(TokenKind::Comma, "expected ',' or ')' in argument list")?;
                if matches!(self.peek_kind(), TokenKind::RParen) {
                    break;
                }
            }

            let token = self.peek().clone();
            match token.kind {
                TokenKind::Mul => {
                    if arguments.dyn_args.is_some() || arguments.dyn_kwargs.is_some() {
                        return Err(invalid(&token));
                    }
                    self.advance();
                    arguments.dyn_args = Some(Box::new(self.parse_expression(true)?));
                }
                TokenKind::Pow => {
                    if arguments.dyn_kwargs.is_some() {
                        return Err(invalid(&token));
                    }
                    self.advance();
                    arguments.dyn_kwargs = Some(Box::new(self.parse_expression(true)?));
                }
                TokenKind::Name if matches!(self.peek_kind_at(1), Some(TokenKind::Assign)) => {
                    if arguments.dyn_kwargs.is_some() {
                        return Err(invalid(&token));
                    }
                    self.advance();
                    self.advance();
                    let value = self.parse_expression(true)?;
                    arguments.kwargs.push(Keyword {
                        key_span: Self::span_from_token(&token),
                        key: token.lexeme,
                        value,
                    });
                }
                _ => {
                    if arguments.dyn_args.is_some()
                        || arguments.dyn_kwargs.is_some()
                        || !arguments.kwargs.is_empty()
                    {
                        return Err(invalid(&token));
                    }
                    arguments.args.push(self.parse_expression(true)?);
                }
            }
            require_comma = true;
        }

        let closing = self.expect_token(TokenKind::RParen, "expected ')' to close argument list")?;
        Ok((
            arguments,
            Self::union_spans(
                &Self::span_from_token(&open),
                &Self::span_from_token(&closing),
            ),
        ))
    }

    fn expect_block_end(&mut self) -> ParseResult<()> {
        self.expect_token(TokenKind::BlockEnd, "expected end of statement block")
            .map(|_| ())
    }

    /// Consumes an `end…` tag name and its `%}`.
    fn finish_end_tag(&mut self) -> ParseResult<()> {
        self.advance();
        self.expect_block_end()
    }

    fn expect_name(&mut self, name: &str, message: &str) -> ParseResult<()> {
        if self.skip_name(name) {
            Ok(())
        } else {
            let token = self.peek().clone();
            Err(Self::error_at(
                &token,
                format!("{message} (found '{}')", token.lexeme),
            ))
        }
    }

    fn expect_token(&mut self, expected: TokenKind, message: &str) -> ParseResult<Token> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&expected) {
            Ok(self.advance())
        } else {
            let token = self.peek().clone();
            let found = if token.lexeme.is_empty() {
                token.kind.describe().to_string()
            } else {
                token.lexeme.clone()
            };
            Err(Self::error_at(&token, format!("{message} (found '{found}')")))
        }
    }

    fn skip_name(&mut self, name: &str) -> bool {
        if self.check_name(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_name(&self, name: &str) -> bool {
        self.check_name_at(0, name)
    }

    fn check_name_at(&self, offset: usize, name: &str) -> bool {
        self.tokens
            .get(self.current + offset)
            .is_some_and(|token| token.kind == TokenKind::Name && token.lexeme == name)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len().saturating_sub(1))]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens
            .get(self.current + offset)
            .map(|token| token.kind.clone())
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }
}

fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    let span = SourceSpan::union(&left.span, &right.span);
    Expression::new(
        ExpressionKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

/// Marks every name of an assignment target as a store.
fn into_store(mut target: Expression) -> ParseResult<Expression> {
    match &mut target.kind {
        ExpressionKind::Name { ctx, .. } => {
            *ctx = NameContext::Store;
        }
        ExpressionKind::Tuple(items) | ExpressionKind::List(items) => {
            let stored = std::mem::take(items)
                .into_iter()
                .map(into_store)
                .collect::<ParseResult<Vec<_>>>()?;
            *items = stored;
        }
        _ => {
            return Err(TemplateSyntaxError::new(
                "can't assign to expression",
                target.span.line,
                target.span.column,
            ));
        }
    }
    Ok(target)
}

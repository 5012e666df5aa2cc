#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl SourceSpan {
    pub fn new(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    pub fn single_point(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }

    pub fn union(a: &Self, b: &Self) -> Self {
        if a.line == 0 {
            return *b;
        }
        if b.line == 0 {
            return *a;
        }

        let (line, column) = if (a.line, a.column) <= (b.line, b.column) {
            (a.line, a.column)
        } else {
            (b.line, b.column)
        };
        let (end_line, end_column) = if (a.end_line, a.end_column) >= (b.end_line, b.end_column) {
            (a.end_line, a.end_column)
        } else {
            (b.end_line, b.end_column)
        };

        Self::new(line, column, end_line, end_column)
    }
}

impl Default for SourceSpan {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Template {
    pub body: Vec<Node>,
}

impl Template {
    pub fn new(body: Vec<Node>) -> Self {
        Self { body }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Data(String),
    Output(Expression),
    For(ForNode),
    If(IfNode),
    Macro(MacroNode),
    CallBlock(CallBlockNode),
    FilterBlock(FilterBlockNode),
    Set(SetNode),
    SetBlock(SetBlockNode),
    Block(BlockNode),
    Extends(Expression),
    Include(IncludeNode),
    Import(ImportNode),
    FromImport(FromImportNode),
    With(WithNode),
    AutoEscape(AutoEscapeNode),
    Do(Expression),
    Break(SourceSpan),
    Continue(SourceSpan),
}

#[derive(Debug, Clone)]
pub struct ForNode {
    pub target: Expression,
    pub iter: Expression,
    pub condition: Option<Expression>,
    pub recursive: bool,
    pub body: Vec<Node>,
    pub else_body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct IfBranch {
    pub condition: Expression,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct IfNode {
    pub branches: Vec<IfBranch>,
    pub else_body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expression>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct MacroNode {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct CallBlockNode {
    pub call: Expression,
    pub params: Vec<MacroParam>,
    pub body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct FilterBlockNode {
    /// Filter chain applied to the body; the innermost filter has no input node.
    pub filter: Expression,
    pub body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct SetNode {
    pub target: Expression,
    pub value: Expression,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct SetBlockNode {
    pub target: Expression,
    pub filter: Option<Expression>,
    pub body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub name: String,
    pub scoped: bool,
    pub required: bool,
    pub body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct IncludeNode {
    pub template: Expression,
    pub ignore_missing: bool,
    pub with_context: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ImportNode {
    pub template: Expression,
    pub target: String,
    pub target_span: SourceSpan,
    pub with_context: bool,
}

#[derive(Debug, Clone)]
pub struct ImportedMacro {
    pub name: String,
    pub alias: Option<String>,
    pub span: SourceSpan,
}

impl ImportedMacro {
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct FromImportNode {
    pub template: Expression,
    pub names: Vec<ImportedMacro>,
    pub with_context: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct WithNode {
    pub targets: Vec<Expression>,
    pub values: Vec<Expression>,
    pub body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct AutoEscapeNode {
    pub value: Expression,
    pub body: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub span: SourceSpan,
    pub kind: ExpressionKind,
}

impl Expression {
    pub fn new(kind: ExpressionKind, span: SourceSpan) -> Self {
        Self { span, kind }
    }

    /// Name of a plain variable reference, if this is one.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Name { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Variable names bound by an assignment target (`x` or `a, b`).
    pub fn target_names(&self) -> Vec<&str> {
        match &self.kind {
            ExpressionKind::Name { name, .. } => vec![name.as_str()],
            ExpressionKind::Tuple(items) | ExpressionKind::List(items) => {
                items.iter().flat_map(Expression::target_names).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameContext {
    Load,
    Store,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Eq,
    Ne,
    Lt,
    Lteq,
    Gt,
    Gteq,
    In,
    NotIn,
}

#[derive(Debug, Clone)]
pub struct Keyword {
    pub key: String,
    pub key_span: SourceSpan,
    pub value: Expression,
}

#[derive(Debug, Clone, Default)]
pub struct CallArguments {
    pub args: Vec<Expression>,
    pub kwargs: Vec<Keyword>,
    pub dyn_args: Option<Box<Expression>>,
    pub dyn_kwargs: Option<Box<Expression>>,
}

impl CallArguments {
    pub fn has_dynamic(&self) -> bool {
        self.dyn_args.is_some() || self.dyn_kwargs.is_some()
    }

    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.args
            .iter()
            .chain(self.kwargs.iter().map(|keyword| &keyword.value))
            .chain(self.dyn_args.as_deref())
            .chain(self.dyn_kwargs.as_deref())
    }
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Name {
        name: String,
        ctx: NameContext,
    },
    Const(Literal),
    Tuple(Vec<Expression>),
    List(Vec<Expression>),
    Dict(Vec<(Expression, Expression)>),
    Getattr {
        node: Box<Expression>,
        attr: String,
        attr_span: SourceSpan,
    },
    Getitem {
        node: Box<Expression>,
        index: Box<Expression>,
    },
    Slice {
        start: Option<Box<Expression>>,
        stop: Option<Box<Expression>>,
        step: Option<Box<Expression>>,
    },
    Call {
        node: Box<Expression>,
        arguments: CallArguments,
    },
    /// `node | name(args)`; `node` is absent for the head of a filter block.
    Filter {
        node: Option<Box<Expression>>,
        name: String,
        name_span: SourceSpan,
        arguments: CallArguments,
    },
    Test {
        node: Box<Expression>,
        name: String,
        arguments: CallArguments,
        negated: bool,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Compare {
        left: Box<Expression>,
        ops: Vec<(CompareOperator, Expression)>,
    },
    Concat(Vec<Expression>),
    CondExpr {
        test: Box<Expression>,
        then: Box<Expression>,
        otherwise: Option<Box<Expression>>,
    },
}

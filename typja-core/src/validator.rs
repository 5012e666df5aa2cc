use std::collections::{HashMap, HashSet};

use crate::analyzer::AnalyzerOptions;
use crate::annotation::TypeAnnotation;
use crate::builtins::{is_mapping_type, is_template_global};
use crate::diagnostics::Diagnostics;
use crate::directives::{FilterDeclaration, MacroDeclaration, VariableDeclaration};
use crate::lookup::TypeLookup;
use crate::registry::ImportScope;
use crate::template::{
    CallArguments, Expression, ExpressionKind, ForNode, Literal, MacroParam, NameContext, Node,
    SourceSpan, Template,
};

/// Names bound implicitly inside a macro body.
const MACRO_LOCALS: &[&str] = &["varargs", "kwargs", "caller"];

/// A `var` directive and whether its type resolved against the registry.
#[derive(Debug, Clone)]
pub struct DeclaredVariable {
    pub declaration: VariableDeclaration,
    pub resolved: bool,
}

/// Everything the directive comments of one template declared.
#[derive(Debug, Default)]
pub struct TemplateDeclarations {
    pub variables: HashMap<String, DeclaredVariable>,
    pub filters: HashMap<String, FilterDeclaration>,
    pub macros: HashMap<String, MacroDeclaration>,
    pub ignored_lines: HashSet<usize>,
}

impl TemplateDeclarations {
    /// Declared type of a variable, `None` when it failed to resolve.
    fn variable_type(&self, name: &str) -> Option<&TypeAnnotation> {
        self.variables
            .get(name)
            .filter(|variable| variable.resolved)
            .map(|variable| &variable.declaration.type_annotation)
    }
}

/// Names bound by one template scope, with an inferred type when known.
type Frame = HashMap<String, Option<TypeAnnotation>>;

/// Walks a parsed template checking every name, attribute, index, filter
/// and macro use against the declarations.
pub struct TemplateValidator<'a> {
    filename: &'a str,
    declarations: &'a TemplateDeclarations,
    scope: &'a ImportScope<'a>,
    lookup: &'a dyn TypeLookup,
    options: &'a AnalyzerOptions,
    frames: Vec<Frame>,
    diagnostics: Diagnostics,
}

impl<'a> TemplateValidator<'a> {
    pub fn new(
        filename: &'a str,
        declarations: &'a TemplateDeclarations,
        scope: &'a ImportScope<'a>,
        lookup: &'a dyn TypeLookup,
        options: &'a AnalyzerOptions,
    ) -> Self {
        Self {
            filename,
            declarations,
            scope,
            lookup,
            options,
            frames: vec![Frame::new()],
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn validate(mut self, template: &Template) -> Diagnostics {
        self.visit_nodes(&template.body);
        self.diagnostics
    }

    fn is_ignored(&self, line: usize) -> bool {
        self.declarations.ignored_lines.contains(&line)
    }

    fn push_frame(&mut self) {
        self.frames.push(Frame::new());
    }

    fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn bind(&mut self, name: &str, type_annotation: Option<TypeAnnotation>) {
        if self.frames.len() == 1 && self.declarations.variables.contains_key(name) {
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), type_annotation);
        }
    }

    fn bind_target(&mut self, target: &Expression) {
        for name in target.target_names() {
            self.bind(name, None);
        }
    }

    fn frame_binding(&self, name: &str) -> Option<&Option<TypeAnnotation>> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    fn is_bound(&self, name: &str) -> bool {
        self.frame_binding(name).is_some()
            || self.declarations.variables.contains_key(name)
            || self.declarations.macros.contains_key(name)
            || is_template_global(name)
    }

    fn visit_nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.visit_node(node);
        }
    }

    fn visit_node(&mut self, node: &Node) {
        match node {
            Node::Data(_) | Node::Break(_) | Node::Continue(_) => {}
            Node::Output(expression) | Node::Do(expression) | Node::Extends(expression) => {
                self.visit_expression(expression)
            }
            Node::For(for_node) => self.visit_for(for_node),
            Node::If(if_node) => {
                for branch in &if_node.branches {
                    self.visit_expression(&branch.condition);
                    self.visit_nodes(&branch.body);
                }
                self.visit_nodes(&if_node.else_body);
            }
            Node::Macro(macro_node) => {
                self.bind(&macro_node.name, None);
                self.visit_callable_body(&macro_node.params, &macro_node.body);
            }
            Node::CallBlock(call_block) => {
                self.visit_expression(&call_block.call);
                self.visit_callable_body(&call_block.params, &call_block.body);
            }
            Node::FilterBlock(filter_block) => {
                self.visit_expression(&filter_block.filter);
                self.visit_nodes(&filter_block.body);
            }
            Node::Set(set) => {
                self.visit_expression(&set.value);
                if set.target.target_names().is_empty() {
                    self.visit_expression(&set.target);
                } else {
                    self.bind_target(&set.target);
                }
            }
            Node::SetBlock(set_block) => {
                if let Some(filter) = &set_block.filter {
                    self.visit_expression(filter);
                }
                self.visit_nodes(&set_block.body);
                if set_block.target.target_names().is_empty() {
                    self.visit_expression(&set_block.target);
                } else {
                    self.bind_target(&set_block.target);
                }
            }
            Node::Block(block) => {
                self.push_frame();
                self.visit_nodes(&block.body);
                self.pop_frame();
            }
            Node::Include(include) => self.visit_expression(&include.template),
            Node::Import(import) => {
                self.visit_expression(&import.template);
                self.bind(&import.target, None);
            }
            Node::FromImport(from_import) => {
                self.visit_expression(&from_import.template);
                for imported in &from_import.names {
                    self.bind(imported.bound_name(), None);
                }
            }
            Node::With(with) => {
                for value in &with.values {
                    self.visit_expression(value);
                }
                let bindings = with
                    .targets
                    .iter()
                    .zip(&with.values)
                    .map(|(target, value)| (target, self.static_type(value)))
                    .collect::<Vec<_>>();
                self.push_frame();
                for (target, inferred) in bindings {
                    match target.as_name() {
                        Some(name) => self.bind(name, inferred),
                        None => self.bind_target(target),
                    }
                }
                self.visit_nodes(&with.body);
                self.pop_frame();
            }
            Node::AutoEscape(auto_escape) => {
                self.visit_expression(&auto_escape.value);
                self.visit_nodes(&auto_escape.body);
            }
        }
    }

    fn visit_callable_body(&mut self, params: &[MacroParam], body: &[Node]) {
        for param in params {
            if let Some(default) = &param.default {
                self.visit_expression(default);
            }
        }
        self.push_frame();
        for local in MACRO_LOCALS {
            self.bind(local, None);
        }
        for param in params {
            self.bind(&param.name, None);
        }
        self.visit_nodes(body);
        self.pop_frame();
    }

    /// The loop binding lives only in the body frame; `else` runs outside it.
    fn visit_for(&mut self, for_node: &ForNode) {
        self.visit_expression(&for_node.iter);
        let element_type = self
            .static_type(&for_node.iter)
            .and_then(|iterable| loop_element_type(&iterable));

        self.push_frame();
        self.bind("loop", None);
        match for_node.target.as_name() {
            Some(name) => self.bind(name, element_type),
            None => self.bind_target(&for_node.target),
        }
        if let Some(condition) = &for_node.condition {
            self.visit_expression(condition);
        }
        self.visit_nodes(&for_node.body);
        self.pop_frame();

        self.visit_nodes(&for_node.else_body);
    }

    fn visit_expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExpressionKind::Name { name, ctx } => {
                if *ctx == NameContext::Load {
                    self.check_name(name, expression.span);
                }
            }
            ExpressionKind::Const(_) => {}
            ExpressionKind::Tuple(items) | ExpressionKind::List(items) | ExpressionKind::Concat(items) => {
                for item in items {
                    self.visit_expression(item);
                }
            }
            ExpressionKind::Dict(pairs) => {
                for (key, value) in pairs {
                    self.visit_expression(key);
                    self.visit_expression(value);
                }
            }
            ExpressionKind::Getattr {
                node,
                attr,
                attr_span,
            } => {
                self.check_attribute(node, attr, *attr_span);
                self.visit_expression(node);
            }
            ExpressionKind::Getitem { node, index } => {
                if let ExpressionKind::Const(Literal::Str(key)) = &index.kind {
                    self.check_attribute(node, key, index.span);
                }
                self.visit_expression(node);
                self.visit_expression(index);
            }
            ExpressionKind::Slice { start, stop, step } => {
                for part in [start, stop, step].into_iter().flatten() {
                    self.visit_expression(part);
                }
            }
            ExpressionKind::Call { node, arguments } => {
                self.check_macro_call(node, arguments, expression.span);
                self.visit_expression(node);
                self.visit_arguments(arguments);
            }
            ExpressionKind::Filter {
                node,
                name,
                name_span,
                arguments,
            } => {
                self.check_filter(name, arguments, *name_span);
                if let Some(node) = node {
                    self.visit_expression(node);
                }
                self.visit_arguments(arguments);
            }
            ExpressionKind::Test { node, arguments, .. } => {
                self.visit_expression(node);
                self.visit_arguments(arguments);
            }
            ExpressionKind::Unary { operand, .. } => self.visit_expression(operand),
            ExpressionKind::Binary { left, right, .. } => {
                self.visit_expression(left);
                self.visit_expression(right);
            }
            ExpressionKind::Compare { left, ops } => {
                self.visit_expression(left);
                for (_, operand) in ops {
                    self.visit_expression(operand);
                }
            }
            ExpressionKind::CondExpr {
                test,
                then,
                otherwise,
            } => {
                self.visit_expression(test);
                self.visit_expression(then);
                if let Some(otherwise) = otherwise {
                    self.visit_expression(otherwise);
                }
            }
        }
    }

    fn visit_arguments(&mut self, arguments: &CallArguments) {
        for argument in arguments.expressions() {
            self.visit_expression(argument);
        }
    }

    fn check_name(&mut self, name: &str, span: SourceSpan) {
        if !self.options.warn_undefined_variables || self.is_ignored(span.line) || self.is_bound(name) {
            return;
        }
        self.diagnostics.push_warning_with_span(
            format!("Variable '{name}' is not declared"),
            self.filename,
            span,
            Some(format!("Add declaration: {{# typja:var {name}: <type> #}}")),
        );
    }

    fn check_attribute(&mut self, base: &Expression, attribute: &str, span: SourceSpan) {
        if !self.options.validate_variables || self.is_ignored(span.line) {
            return;
        }
        let Some(type_name) = self.static_type(base).and_then(|base| self.type_name_of(&base)) else {
            return;
        };
        if !self.lookup.type_exists(&type_name) {
            return;
        }
        if let Err(message) = self.lookup.validate_attribute(&type_name, attribute) {
            let shown = self
                .lookup
                .qualified_name(&type_name)
                .unwrap_or(type_name);
            self.diagnostics.push_error_with_span(
                message,
                self.filename,
                span,
                Some(format!("Check the definition of '{shown}' for available attributes")),
            );
        }
    }

    fn check_filter(&mut self, name: &str, arguments: &CallArguments, span: SourceSpan) {
        if !self.options.validate_filters || self.is_ignored(span.line) {
            return;
        }
        let Some(declaration) = self.declarations.filters.get(name) else {
            return;
        };
        let callable = &declaration.type_annotation;
        if !callable.is_callable() || callable.args.len() < 2 || arguments.has_dynamic() {
            return;
        }
        let Some(first) = callable.args.first() else {
            return;
        };
        if first.name == "..." {
            return;
        }

        // The first argument's own arity is the count, the piped value alone otherwise.
        let expected = if first.args.is_empty() { 1 } else { first.args.len() };
        let actual = 1 + arguments.args.len() + arguments.kwargs.len();
        if actual != expected {
            self.diagnostics.push_error_with_span(
                format!("Filter '{name}' expects {expected} argument(s) but got {actual}"),
                self.filename,
                span,
                None,
            );
        }
    }

    fn check_macro_call(&mut self, callee: &Expression, arguments: &CallArguments, span: SourceSpan) {
        if !self.options.validate_macros || self.is_ignored(span.line) || arguments.has_dynamic() {
            return;
        }
        let Some(name) = callee.as_name() else {
            return;
        };
        let Some(declaration) = self.declarations.macros.get(name) else {
            return;
        };

        let required = declaration
            .required_params()
            .map(|param| param.name.as_str())
            .collect::<Vec<_>>();
        let min_params = required.len();
        let max_params = declaration.params.len();
        let actual = arguments.args.len() + arguments.kwargs.len();

        if actual < min_params {
            self.diagnostics.push_error_with_span(
                format!("Macro '{name}' requires at least {min_params} argument(s) but got {actual}"),
                self.filename,
                span,
                Some(format!("Required parameters: {}", required.join(", "))),
            );
        } else if actual > max_params {
            self.diagnostics.push_error_with_span(
                format!("Macro '{name}' accepts at most {max_params} argument(s) but got {actual}"),
                self.filename,
                span,
                None,
            );
        }

        for keyword in &arguments.kwargs {
            if declaration.param(&keyword.key).is_none() {
                let valid = declaration
                    .params
                    .iter()
                    .map(|param| param.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.diagnostics.push_error_with_span(
                    format!("Macro '{name}' has no parameter named '{}'", keyword.key),
                    self.filename,
                    keyword.key_span,
                    Some(format!("Valid parameters: {valid}")),
                );
            }
        }
    }

    /// Static type of an expression, when it can be derived from declarations.
    fn static_type(&self, expression: &Expression) -> Option<TypeAnnotation> {
        match &expression.kind {
            ExpressionKind::Name { name, .. } => match self.frame_binding(name) {
                Some(binding) => binding.clone(),
                None => self.declarations.variable_type(name).cloned(),
            },
            ExpressionKind::Getattr { node, attr, .. } => {
                let type_name = self.type_name_of(&self.static_type(node)?)?;
                self.lookup.attribute_type(&type_name, attr)
            }
            ExpressionKind::Getitem { node, index } => {
                let base = self.static_type(node)?;
                if let ExpressionKind::Const(Literal::Str(key)) = &index.kind {
                    if let Some(field_type) = self
                        .type_name_of(&base)
                        .and_then(|type_name| self.lookup.attribute_type(&type_name, key))
                    {
                        return Some(field_type);
                    }
                }
                item_type(&base)
            }
            _ => None,
        }
    }

    /// Name to check attributes against: the non-`None` branch of an
    /// optional, with imported aliases replaced by their origin.
    fn type_name_of(&self, annotation: &TypeAnnotation) -> Option<String> {
        let inner = annotation.without_none()?;
        if inner.is_union || inner.is_callable() {
            return None;
        }
        if inner.module.is_some() {
            return Some(inner.qualified_name());
        }
        match self.scope.imported(&inner.name) {
            Some(imported) if imported.definition.is_some() && !imported.module.is_empty() => {
                Some(imported.origin())
            }
            _ => Some(inner.name.clone()),
        }
    }
}

/// `list[User]` iterates as `User`.
fn loop_element_type(iterable: &TypeAnnotation) -> Option<TypeAnnotation> {
    iterable.without_none()?.args.first().cloned()
}

/// `list[T][i]` is `T`; `dict[K, V][k]` is `V`.
fn item_type(container: &TypeAnnotation) -> Option<TypeAnnotation> {
    let inner = container.without_none()?;
    if is_mapping_type(&inner.name) && inner.args.len() >= 2 {
        return inner.args.last().cloned();
    }
    inner.args.first().cloned()
}

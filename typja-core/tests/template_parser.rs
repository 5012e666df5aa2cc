use typja_core::template::{
    parse_template, CompareOperator, Expression, ExpressionKind, Literal, NameContext, Node, SourceSpan,
    Template,
};

fn parse(source: &str) -> Template {
    parse_template(source).unwrap_or_else(|err| panic!("failed to parse {source:?}: {err}"))
}

fn only_output(source: &str) -> Expression {
    let template = parse(source);
    let mut outputs: Vec<_> = template
        .body
        .into_iter()
        .filter_map(|node| match node {
            Node::Output(expression) => Some(expression),
            _ => None,
        })
        .collect();
    assert_eq!(outputs.len(), 1, "expected one output in {source:?}");
    outputs.remove(0)
}

#[test]
fn data_and_output_nodes_keep_order() {
    let template = parse("<h1>{{ title }}</h1>");
    assert_eq!(template.body.len(), 3);
    assert!(matches!(&template.body[0], Node::Data(text) if text == "<h1>"));
    assert!(matches!(&template.body[1], Node::Output(expr) if expr.as_name() == Some("title")));
    assert!(matches!(&template.body[2], Node::Data(text) if text == "</h1>"));
}

#[test]
fn attribute_spans_point_at_the_attribute() {
    let expression = only_output("<p>\n  {{ user.email }}");
    let ExpressionKind::Getattr { node, attr, attr_span } = &expression.kind else {
        panic!("expected attribute access, got {expression:?}");
    };
    assert_eq!(attr, "email");
    assert_eq!(*attr_span, SourceSpan::new(2, 11, 2, 15));
    assert_eq!(node.span, SourceSpan::new(2, 6, 2, 9));
    assert_eq!(expression.span, SourceSpan::new(2, 6, 2, 15));
}

#[test]
fn filters_chain_with_arguments() {
    let expression = only_output("{{ post.body | striptags | truncate(80, end='...') }}");
    let ExpressionKind::Filter {
        node: Some(inner),
        name,
        name_span,
        arguments,
    } = &expression.kind
    else {
        panic!("expected filter, got {expression:?}");
    };
    assert_eq!(name, "truncate");
    assert_eq!(name_span.column, 28);
    assert_eq!(arguments.args.len(), 1);
    assert_eq!(arguments.kwargs[0].key, "end");
    assert!(matches!(&inner.kind, ExpressionKind::Filter { name, arguments, .. }
        if name == "striptags" && arguments.args.is_empty()));
}

#[test]
fn subscripts_and_calls() {
    let expression = only_output("{{ data['items'][0] }}");
    let ExpressionKind::Getitem { node, index } = &expression.kind else {
        panic!("expected subscript");
    };
    assert!(matches!(index.kind, ExpressionKind::Const(Literal::Int(0))));
    assert!(matches!(&node.kind, ExpressionKind::Getitem { index, .. }
        if matches!(&index.kind, ExpressionKind::Const(Literal::Str(key)) if key == "items")));

    let expression = only_output("{{ render(*args, title=page.title, **extra) }}");
    let ExpressionKind::Call { node, arguments } = &expression.kind else {
        panic!("expected call");
    };
    assert_eq!(node.as_name(), Some("render"));
    assert!(arguments.args.is_empty());
    assert_eq!(arguments.kwargs.len(), 1);
    assert!(arguments.has_dynamic());
    assert_eq!(arguments.expressions().count(), 3);
}

#[test]
fn literals_tests_and_conditionals() {
    assert!(matches!(only_output("{{ none }}").kind, ExpressionKind::Const(Literal::None)));
    assert!(matches!(only_output("{{ True }}").kind, ExpressionKind::Const(Literal::Bool(true))));

    let expression = only_output("{{ user is not defined }}");
    assert!(matches!(&expression.kind, ExpressionKind::Test { name, negated: true, .. } if name == "defined"));

    let expression = only_output("{{ n is divisibleby 3 }}");
    assert!(matches!(&expression.kind, ExpressionKind::Test { arguments, .. } if arguments.args.len() == 1));

    let expression = only_output("{{ tag not in tags }}");
    assert!(matches!(&expression.kind, ExpressionKind::Compare { ops, .. }
        if ops.len() == 1 && ops[0].0 == CompareOperator::NotIn));

    let expression = only_output("{{ 'on' if active else 'off' }}");
    assert!(matches!(&expression.kind, ExpressionKind::CondExpr { otherwise: Some(_), .. }));
}

#[test]
fn for_loops_capture_targets_condition_and_else() {
    let template = parse("{% for key, value in mapping.items() if value recursive %}{{ key }}{% else %}empty{% endfor %}");
    let Node::For(for_node) = &template.body[0] else {
        panic!("expected for loop");
    };
    assert_eq!(for_node.target.target_names(), ["key", "value"]);
    assert!(matches!(&for_node.target.kind, ExpressionKind::Tuple(items)
        if items.iter().all(|item| matches!(item.kind, ExpressionKind::Name { ctx: NameContext::Store, .. }))));
    assert!(matches!(for_node.iter.kind, ExpressionKind::Call { .. }));
    assert!(for_node.condition.is_some());
    assert!(for_node.recursive);
    assert_eq!(for_node.body.len(), 1);
    assert!(matches!(&for_node.else_body[..], [Node::Data(text)] if text == "empty"));
}

#[test]
fn if_branches_and_else() {
    let template = parse("{% if a %}1{% elif b %}2{% else %}3{% endif %}");
    let Node::If(if_node) = &template.body[0] else {
        panic!("expected if");
    };
    assert_eq!(if_node.branches.len(), 2);
    assert_eq!(if_node.branches[1].condition.as_name(), Some("b"));
    assert_eq!(if_node.else_body.len(), 1);
}

#[test]
fn macros_and_call_blocks() {
    let template = parse(
        "{% macro card(title, body='', size=2) %}{{ title }}{% endmacro %}\
         {% call(item) listing(items) %}{{ item }}{% endcall %}",
    );
    let Node::Macro(macro_node) = &template.body[0] else {
        panic!("expected macro");
    };
    assert_eq!(macro_node.name, "card");
    let names: Vec<_> = macro_node.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["title", "body", "size"]);
    assert!(macro_node.params[0].default.is_none());
    assert!(macro_node.params[2].default.is_some());

    let Node::CallBlock(call) = &template.body[1] else {
        panic!("expected call block");
    };
    assert_eq!(call.params[0].name, "item");
    assert!(matches!(&call.call.kind, ExpressionKind::Call { node, .. } if node.as_name() == Some("listing")));
}

#[test]
fn set_forms() {
    let template = parse(
        "{% set ns = namespace(count=0) %}{% set ns.count = ns.count + 1 %}\
         {% set a, b = 1, 2 %}{% set html | upper %}hi{% endset %}",
    );
    assert_eq!(template.body.len(), 4);

    let Node::Set(set) = &template.body[1] else {
        panic!("expected set");
    };
    assert!(matches!(&set.target.kind, ExpressionKind::Getattr { attr, .. } if attr == "count"));
    assert!(set.target.target_names().is_empty());

    let Node::Set(pair) = &template.body[2] else {
        panic!("expected tuple set");
    };
    assert_eq!(pair.target.target_names(), ["a", "b"]);

    let Node::SetBlock(block) = &template.body[3] else {
        panic!("expected set block");
    };
    assert!(block.filter.is_some());
}

#[test]
fn inheritance_and_imports() {
    let template = parse(
        "{% extends 'base.html' %}\
         {% import 'forms.html' as forms %}\
         {% from 'macros.html' import button as btn, card with context %}\
         {% include 'footer.html' ignore missing without context %}\
         {% block content scoped %}x{% endblock content %}",
    );

    assert!(matches!(&template.body[0], Node::Extends(expr)
        if matches!(&expr.kind, ExpressionKind::Const(Literal::Str(name)) if name == "base.html")));

    let Node::Import(import) = &template.body[1] else {
        panic!("expected import");
    };
    assert_eq!(import.target, "forms");
    assert!(!import.with_context);

    let Node::FromImport(from) = &template.body[2] else {
        panic!("expected from-import");
    };
    let bound: Vec<_> = from.names.iter().map(|name| name.bound_name()).collect();
    assert_eq!(bound, ["btn", "card"]);
    assert!(from.with_context);

    let Node::Include(include) = &template.body[3] else {
        panic!("expected include");
    };
    assert!(include.ignore_missing);
    assert!(!include.with_context);

    let Node::Block(block) = &template.body[4] else {
        panic!("expected block");
    };
    assert_eq!(block.name, "content");
    assert!(block.scoped);
}

#[test]
fn raw_blocks_and_comments_produce_data_only() {
    let template = parse("{# note #}{% raw %}{{ not_parsed }}{% endraw %}");
    assert!(matches!(&template.body[..], [Node::Data(text)] if text == "{{ not_parsed }}"));
}

#[test]
fn whitespace_control_trims_neighbouring_data() {
    let template = parse("<ul>\n  {%- for x in xs -%}\n    <li>{{ x }}</li>\n  {%- endfor %}\n</ul>");
    assert!(matches!(&template.body[0], Node::Data(text) if text == "<ul>"));
    let Node::For(for_node) = &template.body[1] else {
        panic!("expected for loop");
    };
    assert!(matches!(&for_node.body[0], Node::Data(text) if text == "<li>"));
}

#[test]
fn unclosed_blocks_report_expected_tags() {
    let err = parse_template("{% for x in items %}{{ x }}").expect_err("unclosed for");
    assert_eq!(
        err.message,
        "Unexpected end of template. Expected one of the following tags: 'endfor' or 'else'."
    );
}

#[test]
fn unknown_tags_report_position() {
    let err = parse_template("line\n{% frobnicate %}").expect_err("unknown tag");
    assert_eq!(err.message, "Encountered unknown tag 'frobnicate'.");
    assert_eq!((err.line, err.column), (2, 4));
}

#[test]
fn lexer_errors_surface_as_syntax_errors() {
    let err = parse_template("{# open comment").expect_err("unterminated comment");
    assert_eq!(err.message, "Missing end of comment tag");

    let err = parse_template("{{ 'open }}").expect_err("unterminated string");
    assert_eq!(err.message, "unexpected end of string");

    assert!(parse_template("{{ user. }}").is_err());
    assert!(parse_template("{% set 1 = x %}").is_err());
    assert!(parse_template("{% block a %}{% endblock b %}").is_err());
}

#[test]
fn empty_expressions_name_the_token_found() {
    let err = parse_template("<p>\n{{ }}</p>").expect_err("empty print statement");
    assert!(
        err.message.starts_with("Expected an expression, got '"),
        "unexpected message: {}",
        err.message
    );
    assert_eq!(err.line, 2);

    let err = parse_template("{% if %}yes{% endif %}").expect_err("empty condition");
    assert!(err.message.starts_with("Expected an expression"), "unexpected message: {}", err.message);
}

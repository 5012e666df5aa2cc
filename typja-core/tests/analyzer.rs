use std::collections::BTreeMap;
use std::fs;

use anyhow::Result;
use tempfile::tempdir;

use typja_core::{
    AnalyzerOptions, Severity, TemplateAnalyzer, TypeDefinition, TypeRegistry, TypeResolver, ValidationIssue,
};

fn registry() -> TypeRegistry {
    let mut types = BTreeMap::new();
    types.insert(
        "User".to_string(),
        TypeDefinition::new("User")
            .with_field("id", "int")
            .with_field("name", "str")
            .with_field("profile", "Profile")
            .with_method("greet", "def greet(self) -> str"),
    );
    types.insert(
        "Profile".to_string(),
        TypeDefinition::new("Profile").with_field("bio", "str"),
    );
    types.insert(
        "Post".to_string(),
        TypeDefinition::new("Post")
            .with_field("title", "str")
            .with_field("tags", "list[str]"),
    );
    let mut registry = TypeRegistry::new();
    registry.register_module_types("models", types);
    registry
}

fn analyze(content: &str) -> Vec<ValidationIssue> {
    let registry = registry();
    TemplateAnalyzer::new(&registry).analyze_template(content, "page.html")
}

fn messages(issues: &[ValidationIssue]) -> Vec<&str> {
    issues.iter().map(|issue| issue.message.as_str()).collect()
}

#[test]
fn declared_and_used_variables_are_clean() {
    let issues = analyze(
        "{# typja:from models import User #}\n\
         {# typja:var user: User #}\n\
         <p>{{ user.name }} {{ user.greet() }} {{ user.profile.bio }} {{ user.__class__ }}</p>",
    );
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn undeclared_variable_is_a_warning() {
    let issues = analyze("<p>{{ missing }}</p>");
    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.severity, Severity::Warning);
    assert_eq!(issue.message, "Variable 'missing' is not declared");
    assert_eq!(issue.hint.as_deref(), Some("Add declaration: {# typja:var missing: <type> #}"));
    assert_eq!((issue.line, issue.col, issue.end_col), (1, 7, Some(13)));
}

#[test]
fn missing_attribute_points_at_the_attribute() {
    let issues = analyze(
        "{# typja:from models import User #}\n\
         {# typja:var user: User #}\n\
         <p>{{ user.email }}</p>",
    );
    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.severity, Severity::Error);
    assert_eq!(issue.message, "Attribute 'email' not found on type 'models.User'");
    assert_eq!((issue.line, issue.col, issue.end_col), (3, 12, Some(16)));
    assert_eq!(
        issue.hint.as_deref(),
        Some("Check the definition of 'models.User' for available attributes")
    );
}

#[test]
fn qualified_declaration_reports_exactly_once() {
    let issues = analyze(
        "{# typja:import models #}\n\
         {# typja:var user: models.User #}\n\
         {{ user.email }}",
    );
    assert_eq!(messages(&issues), ["Attribute 'email' not found on type 'models.User'"]);
}

#[test]
fn string_subscripts_are_attribute_checks() {
    let issues = analyze(
        "{# typja:from models import User #}\n\
         {# typja:var user: User #}\n\
         {{ user['name'] }}{{ user['phone'] }}",
    );
    assert_eq!(messages(&issues), ["Attribute 'phone' not found on type 'models.User'"]);
    assert_eq!(issues[0].col, 27);
}

#[test]
fn mapping_values_and_list_items_keep_their_type() {
    let issues = analyze(
        "{# typja:from models import User, Post #}\n\
         {# typja:var users: dict[str, User], posts: list[Post] | None #}\n\
         {{ users['ada'].name }}{{ users['ada'].email }}{{ posts[0].title }}{{ posts[0].body }}",
    );
    assert_eq!(
        messages(&issues),
        [
            "Attribute 'email' not found on type 'models.User'",
            "Attribute 'body' not found on type 'models.Post'",
        ]
    );
}

#[test]
fn nested_loops_shadow_and_restore_the_outer_binding() {
    let issues = analyze(
        "{# typja:from models import User, Post #}\n\
         {# typja:var users: list[User], posts: list[Post] #}\n\
         {% for u in users %}{% for u in posts %}{{ u.title }}{% endfor %}{{ u.name }}{{ u.bogus }}{% endfor %}{{ u }}",
    );
    assert_eq!(
        messages(&issues),
        [
            "Attribute 'bogus' not found on type 'models.User'",
            "Variable 'u' is not declared",
        ]
    );
    assert_eq!(issues[0].severity, Severity::Error);
    assert_eq!(issues[1].severity, Severity::Warning);
}

#[test]
fn builtin_generics_do_not_check_their_arguments() {
    let issues = analyze(
        "{# typja:var d: dict[str, Any], tags: list[Tag] #}\n\
         {{ d }}{{ tags }}",
    );
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn attribute_hints_name_the_qualified_type() {
    let issues = analyze(
        "{# typja:from models import User #}\n\
         {# typja:var user: User #}\n\
         {{ user.profile.nope }}",
    );
    assert_eq!(messages(&issues), ["Attribute 'nope' not found on type 'models.Profile'"]);
    assert_eq!(
        issues[0].hint.as_deref(),
        Some("Check the definition of 'models.Profile' for available attributes")
    );
}

#[test]
fn loop_variables_are_typed_and_scoped_to_the_loop() {
    let issues = analyze(
        "{# typja:from models import Post #}\n\
         {# typja:var posts: list[Post] #}\n\
         {% for post in posts %}{{ post.title }} {{ loop.index }} {{ post.slug }}{% else %}{{ post }}{% endfor %}\n\
         {{ post }}",
    );
    assert_eq!(issues.len(), 3, "issues: {issues:?}");
    assert_eq!(issues[0].message, "Attribute 'slug' not found on type 'models.Post'");
    assert_eq!(issues[1].message, "Variable 'post' is not declared");
    assert_eq!(issues[1].line, 3);
    assert_eq!(issues[2].message, "Variable 'post' is not declared");
    assert_eq!(issues[2].line, 4);
}

#[test]
fn set_with_and_macro_scopes() {
    let issues = analyze(
        "{% set total = 3 %}{{ total }}\n\
         {% with label = 'x' %}{{ label }}{% endwith %}{{ label }}\n\
         {% macro row(cells) %}{{ cells }}{{ caller() }}{{ varargs }}{% endmacro %}{{ row([]) }}{{ cells }}\n\
         {% set ns = namespace(count=0) %}{% set ns.count = ns.count + 1 %}{{ range(3) }}",
    );
    let undeclared: Vec<_> = issues.iter().map(|issue| (issue.line, issue.message.as_str())).collect();
    assert_eq!(
        undeclared,
        [
            (2, "Variable 'label' is not declared"),
            (3, "Variable 'cells' is not declared"),
        ]
    );
}

#[test]
fn macro_call_reports_arity_and_unknown_keywords_together() {
    let issues = analyze(
        "{# typja:macro card(title: str, body: str, footer: str = '') -> str #}\n\
         {{ card(colour='red') }}",
    );
    assert_eq!(
        messages(&issues),
        [
            "Macro 'card' requires at least 2 argument(s) but got 1",
            "Macro 'card' has no parameter named 'colour'",
        ]
    );
    assert_eq!(issues[0].hint.as_deref(), Some("Required parameters: title, body"));
    assert_eq!(issues[1].hint.as_deref(), Some("Valid parameters: title, body, footer"));
    assert_eq!(issues[1].col, 9);
}

#[test]
fn macro_call_with_too_many_arguments() {
    let issues = analyze(
        "{# typja:macro badge(text: str) -> str #}\n\
         {{ badge('a', 'b') }}{{ badge('ok') }}{{ badge(*parts) }}",
    );
    let errors: Vec<_> = issues
        .iter()
        .filter(|issue| issue.is_error())
        .map(|issue| issue.message.as_str())
        .collect();
    assert_eq!(errors, ["Macro 'badge' accepts at most 1 argument(s) but got 2"]);
}

#[test]
fn filter_arity_counts_the_piped_value() {
    let issues = analyze(
        "{# typja:var text: str #}\n\
         {# typja:filter shorten: Callable[[str, int], str] #}\n\
         {# typja:filter anything: Callable[..., str] #}\n\
         {{ text | shorten }}{{ text | shorten(5) }}{{ text | anything(1, 2, 3) }}{{ text | upper }}",
    );
    assert_eq!(messages(&issues), ["Filter 'shorten' expects 1 argument(s) but got 2"]);
    assert_eq!(issues[0].line, 4);
}

#[test]
fn filter_arity_follows_a_nested_argument_list() {
    let issues = analyze(
        "{# typja:var text: str #}\n\
         {# typja:filter pad: Callable[[tuple[str, int, str]], str] #}\n\
         {{ text | pad(4, '-') }}{{ text | pad(4) }}{{ text | pad(width=4, fill='-') }}",
    );
    assert_eq!(messages(&issues), ["Filter 'pad' expects 3 argument(s) but got 2"]);
}

#[test]
fn filter_declarations_must_be_callable() {
    let issues = analyze("{# typja:filter shout: str #}");
    assert_eq!(messages(&issues), ["Filter 'shout' must have Callable type"]);
}

#[test]
fn macro_declaration_types_are_resolved() {
    let issues = analyze("{# typja:macro panel(user: Ghost) -> Markup #}");
    assert_eq!(issues.len(), 2);
    assert!(issues[0].message.starts_with("Invalid type for parameter 'user': "));
    assert!(issues[1].message.starts_with("Invalid return type: "));
}

#[test]
fn ignore_comment_silences_its_line() {
    let issues = analyze(
        "{{ ghost }} {# typja:ignore #}\n\
         {{ ghost }}",
    );
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].line, 2);
}

#[test]
fn import_errors_respect_options() {
    let content = "{# typja:from models import Order #}\n{# typja:import billing #}";
    let issues = analyze(content);
    assert_eq!(issues.len(), 2);
    assert!(issues[0].message.contains("Available types: Post, Profile, User"));
    assert_eq!(issues[0].line, 1);

    let registry = registry();
    let options = AnalyzerOptions {
        validate_imports: false,
        ..AnalyzerOptions::default()
    };
    let issues = TemplateAnalyzer::new(&registry)
        .with_options(options)
        .analyze_template(content, "page.html");
    assert!(issues.is_empty());
}

#[test]
fn disabled_rules_stay_quiet() {
    let registry = registry();
    let options = AnalyzerOptions {
        warn_undefined_variables: false,
        validate_variables: false,
        ..AnalyzerOptions::default()
    };
    let analyzer = TemplateAnalyzer::new(&registry).with_options(options);
    assert!(!analyzer.options().validate_variables);
    let issues = analyzer.analyze_template(
        "{# typja:var user: Ghost #}{{ user.anything }}{{ stranger }}",
        "page.html",
    );
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn imports_do_not_leak_between_templates() {
    let registry = registry();
    let analyzer = TemplateAnalyzer::new(&registry);

    let first = analyzer.analyze_template(
        "{# typja:from models import User #}{# typja:var user: User #}{{ user.name }}",
        "first.html",
    );
    assert!(first.is_empty());

    let second = analyzer.analyze_template("{# typja:var user: User #}{{ user.name }}", "second.html");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].filename, "second.html");
    assert!(second[0].hint.as_deref().is_some_and(|hint| hint.contains("import User")));
}

#[test]
fn directive_errors_do_not_stop_template_checks() {
    let issues = analyze("{# typja:bogus #}\n{{ stray }}");
    assert_eq!(issues.len(), 2);
    assert!(issues[0].message.starts_with("Unknown typja directive"));
    assert_eq!(issues[1].severity, Severity::Warning);
}

#[test]
fn syntax_errors_are_reported_with_position() {
    let issues = analyze("line one\n{% if user %}never closed");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.starts_with("Template syntax error: Unexpected end of template"));
    assert_eq!(issues[0].line, 2);
}

#[test]
fn resolver_backed_analysis_disambiguates_conflicts() -> Result<()> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("user.py"),
        "class User:\n    def __init__(self, id: int, name: str, email: str):\n        self.id = id\n",
    )?;
    fs::write(
        dir.path().join("other_user.py"),
        "class User:\n    user_id: str\n    full_name: str\n",
    )?;

    let mut resolver = TypeResolver::new(dir.path());
    resolver.resolve_paths(&[dir.path()]);
    let mut registry = TypeRegistry::new();
    resolver.populate_registry(&mut registry);
    let analyzer = TemplateAnalyzer::new(&registry).with_resolver(&resolver);

    let ambiguous = analyzer.analyze_template("{# typja:var user: User #}\n{{ user.name }}", "a.html");
    assert_eq!(ambiguous.len(), 1, "issues: {ambiguous:?}");
    assert_eq!(ambiguous[0].hint.as_deref(), Some("Candidates: other_user.User, user.User"));

    let qualified = analyzer.analyze_template("{# typja:var user: user.User #}\n{{ user.email }}", "b.html");
    assert!(qualified.is_empty(), "issues: {qualified:?}");

    let wrong = analyzer.analyze_template("{# typja:var user: other_user.User #}\n{{ user.email }}", "c.html");
    assert_eq!(
        messages(&wrong),
        ["Attribute 'email' not found on type 'other_user.User'"]
    );
    Ok(())
}

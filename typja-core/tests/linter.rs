use typja_core::{LintOptions, Linter, Severity, UnionStyle, ValidationIssue};

fn lint(content: &str) -> Vec<ValidationIssue> {
    Linter::new().lint_template(content, "page.html", &LintOptions::default())
}

fn lint_with(content: &str, options: LintOptions) -> Vec<ValidationIssue> {
    Linter::new().lint_template(content, "page.html", &options)
}

#[test]
fn optional_is_flagged_with_replacement() {
    let issues = lint("{# typja:var user: Optional[User] #}");
    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.severity, Severity::Warning);
    assert_eq!(
        issue.message,
        "Use PEP 604 union syntax (X | Y) instead of Optional[User]"
    );
    assert_eq!(issue.hint.as_deref(), Some("Use: User | None"));
    assert_eq!((issue.line, issue.col), (1, 20));
}

#[test]
fn union_with_nested_generics_is_flagged() {
    let issues = lint("\n{# typja:var counts: Union[dict[str, int], None] #}");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].line, 2);
    assert_eq!(issues[0].hint.as_deref(), Some("Use: dict[str, int] | None"));
}

#[test]
fn modern_unions_and_lookalikes_pass() {
    assert!(lint("{# typja:var user: User | None #}").is_empty());
    assert!(lint("{# typja:var user: MyOptional[User] #}").is_empty());
}

#[test]
fn union_style_controls_severity() {
    let content = "{# typja:var x: Optional[int] #}";

    let issues = lint_with(
        content,
        LintOptions {
            union_style: UnionStyle::Error,
            ..LintOptions::default()
        },
    );
    assert_eq!(issues[0].severity, Severity::Error);

    for options in [
        LintOptions {
            union_style: UnionStyle::Ignore,
            ..LintOptions::default()
        },
        LintOptions {
            prefer_pep604_unions: false,
            ..LintOptions::default()
        },
    ] {
        assert!(lint_with(content, options).is_empty());
    }

    assert_eq!("error".parse::<UnionStyle>(), Ok(UnionStyle::Error));
    assert!("loud".parse::<UnionStyle>().is_err());
}

#[test]
fn auto_fix_rewrites_every_legacy_union_on_flagged_lines() {
    let content = "{# typja:from typing import Optional, Union #}\n\
                   {# typja:var a: typing.Optional[List[str]], b: Union[int, Optional[str]] #}\n\
                   <p>{{ a }}</p>\n";
    let linter = Linter::new();
    let issues = linter.lint_template(content, "page.html", &LintOptions::default());
    let fixed = linter.auto_fix(content, &issues);

    assert_eq!(
        fixed,
        "{# typja:from typing import Optional, Union #}\n\
         {# typja:var a: List[str] | None, b: int | str | None #}\n\
         <p>{{ a }}</p>\n"
    );
}

#[test]
fn auto_fix_leaves_unflagged_content_alone() {
    let content = "{# typja:var a: Optional[int] #}";
    let linter = Linter::new();
    assert_eq!(linter.auto_fix(content, &[]), content);
}

#[test]
fn unused_imports_are_reported() {
    let issues = lint(
        "{# typja:import models #}\n\
         {# typja:from typing import List, Dict as D #}\n\
         {# typja:var items: List[str] #}",
    );
    let messages: Vec<_> = issues.iter().map(|issue| issue.message.as_str()).collect();
    assert_eq!(
        messages,
        ["Import 'models' is unused", "Import 'Dict' from 'typing' is unused"]
    );
    assert_eq!(issues[1].line, 2);
    assert_eq!(issues[1].hint.as_deref(), Some("Remove unused import 'Dict'"));
}

#[test]
fn qualified_use_counts_as_module_use() {
    let issues = lint("{# typja:import models #}\n{# typja:var user: models.User #}");
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn duplicate_declarations_are_errors() {
    let issues = lint(
        "{# typja:var user: User #}\n\
         {# typja:macro user(x: int) -> str #}\n\
         {# typja:var user: int #}",
    );
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Error);
    assert_eq!(issues[0].message, "Duplicate declaration of 'user'");
    assert_eq!(issues[0].line, 3);
    assert_eq!(issues[0].hint.as_deref(), Some("'user' was already declared at line 1"));
}

#[test]
fn import_blocks_must_be_sorted() {
    let options = LintOptions {
        warn_unused_imports: false,
        ..LintOptions::default()
    };

    let issues = lint_with(
        "{# typja:from models import User #}\n{# typja:import typing #}",
        options.clone(),
    );
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].message, "Imports should be sorted alphabetically");
    assert_eq!(issues[0].line, 1);

    let separate_blocks = "{# typja:from models import User #}\n\n\n\n{# typja:import typing #}";
    assert!(lint_with(separate_blocks, options.clone()).is_empty());

    let disabled = LintOptions {
        sort_imports: false,
        ..options
    };
    assert!(lint_with("{# typja:from b import X #}\n{# typja:from a import Y #}", disabled).is_empty());
}

#[test]
fn redundant_none_is_reported() {
    let issues = lint("{# typja:var x: int | None | None #}");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].message, "Redundant None in union type");
}

#[test]
fn malformed_directives_only_get_line_checks() {
    let issues = lint("{# typja:macro broken(x) -> Optional[str] #}");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.starts_with("Use PEP 604 union syntax"));
}

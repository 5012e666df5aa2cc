use proptest::prelude::*;

use typja_core::{split_top_level, TypeAnnotation, TypeParser, TYPING_MODULE};

fn parse(text: &str) -> TypeAnnotation {
    TypeParser::new()
        .parse(text, 1, 1)
        .unwrap_or_else(|err| panic!("failed to parse {text:?}: {err}"))
}

#[test]
fn parses_simple_generic() {
    let annotation = parse("List[str]");
    assert_eq!(annotation.name, "List");
    assert_eq!(annotation.args.len(), 1);
    assert_eq!(annotation.args[0].name, "str");
    assert!(!annotation.is_union);
}

#[test]
fn parses_optional_as_union_with_none() {
    let annotation = parse("Optional[str]");
    assert!(annotation.is_union);
    assert_eq!(annotation.module.as_deref(), Some(TYPING_MODULE));
    let names: Vec<_> = annotation.union_types.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["str", "None"]);
}

#[test]
fn parses_pipe_union_in_order() {
    let annotation = parse("int | str | None");
    assert!(annotation.is_union);
    assert_eq!(annotation.name, "Union");
    assert_eq!(annotation.module, None);
    let names: Vec<_> = annotation.union_types.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["int", "str", "None"]);
}

#[test]
fn parses_legacy_union_with_nested_generics() {
    let annotation = parse("Union[dict[str, int], list[str]]");
    assert!(annotation.is_union);
    assert_eq!(annotation.union_types.len(), 2);
    assert_eq!(annotation.union_types[0].name, "dict");
    assert_eq!(annotation.union_types[0].args.len(), 2);
    assert_eq!(annotation.union_types[1].to_string(), "list[str]");
}

#[test]
fn parses_callable_with_flattened_arguments() {
    let annotation = parse("Callable[[str, int], bool]");
    assert_eq!(annotation.name, "Callable");
    assert_eq!(annotation.args.len(), 3);
    assert_eq!(annotation.callable_params().len(), 2);
    assert_eq!(annotation.callable_return().map(|t| t.name.as_str()), Some("bool"));
    assert_eq!(annotation.to_string(), "Callable[[str, int], bool]");
}

#[test]
fn parses_callable_with_ellipsis() {
    let annotation = parse("Callable[..., str]");
    assert_eq!(annotation.args.len(), 2);
    assert_eq!(annotation.args[0].name, "...");
    assert_eq!(annotation.to_string(), "Callable[..., str]");
}

#[test]
fn parses_qualified_names() {
    let annotation = parse("pkg.models.User");
    assert_eq!(annotation.name, "User");
    assert_eq!(annotation.module.as_deref(), Some("pkg.models"));
    assert_eq!(annotation.qualified_name(), "pkg.models.User");

    let generic = parse("models.Page[models.User]");
    assert_eq!(generic.name, "Page");
    assert_eq!(generic.module.as_deref(), Some("models"));
    assert_eq!(generic.args[0].module.as_deref(), Some("models"));
}

#[test]
fn bare_names_have_no_module_or_args() {
    let annotation = parse("User");
    assert_eq!(annotation.name, "User");
    assert_eq!(annotation.module, None);
    assert!(annotation.args.is_empty());
    assert!(!annotation.is_generic());
}

#[test]
fn without_none_unwraps_optional() {
    let annotation = parse("User | None");
    assert_eq!(annotation.without_none().map(|t| t.name.as_str()), Some("User"));
    assert_eq!(parse("None").without_none(), None);
}

#[test]
fn rejects_unbalanced_generic_with_location() {
    let err = TypeParser::new()
        .parse("List[str", 7, 12)
        .expect_err("unbalanced brackets must fail");
    assert_eq!(err.line, 7);
    assert_eq!(err.col, 12);
}

#[test]
fn rejects_malformed_callable() {
    let parser = TypeParser::new();
    assert!(parser.parse("Callable[str, int, bool]", 1, 1).is_err());
    assert!(parser.parse("Callable[[str]]", 1, 1).is_err());
    assert!(parser.parse("Optional[]", 1, 1).is_err());
    assert!(parser.parse("int | ", 1, 1).is_err());
}

#[test]
fn legacy_forms_display_as_pipe_unions() {
    assert_eq!(parse("Optional[User]").to_string(), "User | None");
    assert_eq!(parse("Union[int, str]").to_string(), "int | str");
}

#[test]
fn split_respects_nesting() {
    assert_eq!(
        split_top_level("dict[str, int], Callable[[a, b], c], x", ','),
        vec!["dict[str, int]", "Callable[[a, b], c]", "x"]
    );
    assert!(split_top_level("", ',').is_empty());
}

fn identifier() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("int".to_string()),
        Just("str".to_string()),
        Just("User".to_string()),
        Just("Post".to_string()),
        "[A-Z][a-z]{1,6}".prop_filter("legacy union spellings", |name| name != "Union"),
    ]
}

fn canonical_leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        identifier(),
        (identifier(), identifier()).prop_map(|(module, name)| format!("{}.{name}", module.to_lowercase())),
    ]
}

fn canonical_type() -> impl Strategy<Value = String> {
    canonical_leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            (identifier(), prop::collection::vec(inner.clone(), 1..3))
                .prop_map(|(base, args)| format!("{base}[{}]", args.join(", "))),
            (prop::collection::vec(inner.clone(), 0..3), inner)
                .prop_map(|(params, ret)| format!("Callable[[{}], {ret}]", params.join(", "))),
        ]
    })
}

proptest! {
    #[test]
    fn canonical_forms_round_trip(text in canonical_type()) {
        let annotation = TypeParser::new().parse(&text, 1, 1).expect("canonical form parses");
        prop_assert_eq!(annotation.to_string(), text);
    }

    #[test]
    fn pipe_unions_round_trip(branches in prop::collection::vec(canonical_type(), 2..4)) {
        let text = branches.join(" | ");
        let annotation = TypeParser::new().parse(&text, 1, 1).expect("union parses");
        prop_assert!(annotation.is_union);
        prop_assert_eq!(annotation.union_types.len(), branches.len());
        prop_assert_eq!(annotation.to_string(), text);
    }

    #[test]
    fn split_top_level_rejoins_to_input(parts in prop::collection::vec(canonical_type(), 1..5)) {
        let text = parts.join(", ");
        prop_assert_eq!(split_top_level(&text, ','), parts);
    }

    #[test]
    fn unbalanced_input_is_rejected(text in canonical_type()) {
        let truncated = format!("List[{text}");
        prop_assert!(TypeParser::new().parse(&truncated, 3, 4).is_err());
    }
}

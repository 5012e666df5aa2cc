use std::fs;
use std::path::Path;

use anyhow::Result;
use tempfile::tempdir;

use typja_core::{scan_python_source, TypeLookup, TypeParser, TypeRegistry, TypeResolver};

const CLASSES: &str = r#"from typing import List


class Post:
    title: str
    content: str
    tags: List[str]

    def __init__(self, title: str, content: str):
        self.title = title
        self.content = content
        self.tags = []

    def add_tag(self, tag: str) -> None:
        self.tags.append(tag)


class User:
    """A site member."""

    def __init__(self, id: int, name: str, email: str, nickname=None):
        self.id = id
        self.name = name
        self.email = email
        self.active = True

    def greet(self) -> str:
        return f"Hello, {self.name}"

    @property
    def display(self) -> str:
        return self.name
"#;

const ENUMS: &str = r#"from enum import Enum, IntEnum


class Status(str, Enum):

    ACTIVE = "active"
    INACTIVE = "inactive"
    _hidden = "x"


class Priority(IntEnum):
    LOW = 1
    HIGH = 3
"#;

const DATACLASSES: &str = r#"from dataclasses import dataclass, field


@dataclass(frozen=True)
class Product:
    id: int
    name: str
    price: float = 0.0
    tags: list[str] = field(
        default_factory=list,
    )

    def discount(self, percent: float) -> float:
        return self.price * (1 - percent / 100)

    class Meta:
        ordering: str
"#;

const OTHER_USER: &str = r#"class User:
    def __init__(self, user_id: str, full_name: str):
        self.user_id = user_id
        self.full_name = full_name
"#;

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

#[test]
fn scanner_extracts_fields_and_methods() {
    let module = scan_python_source(CLASSES);
    let user = module
        .classes
        .iter()
        .find(|class| class.name == "User")
        .expect("User scanned");

    assert_eq!(user.fields.get("id").map(String::as_str), Some("int"));
    assert_eq!(user.fields.get("email").map(String::as_str), Some("str"));
    assert_eq!(user.fields.get("nickname").map(String::as_str), Some("Any"));
    assert_eq!(user.fields.get("active").map(String::as_str), Some("Any"));
    assert_eq!(
        user.methods.get("greet").map(String::as_str),
        Some("def greet(self) -> str")
    );
    assert!(user.methods.contains_key("display"));
    assert!(user.methods.contains_key("__init__"));

    let post = module
        .classes
        .iter()
        .find(|class| class.name == "Post")
        .expect("Post scanned");
    assert_eq!(post.fields.get("tags").map(String::as_str), Some("List[str]"));
    assert_eq!(
        post.methods.get("add_tag").map(String::as_str),
        Some("def add_tag(self, tag: str) -> None")
    );
}

#[test]
fn scanner_reads_enum_members_as_fields() {
    let module = scan_python_source(ENUMS);
    let status = &module.classes[0];
    assert_eq!(status.name, "Status");
    assert_eq!(status.bases, ["str", "Enum"]);
    assert_eq!(status.fields.get("ACTIVE").map(String::as_str), Some("\"active\""));
    assert!(!status.fields.contains_key("_hidden"));

    let priority = &module.classes[1];
    assert_eq!(priority.fields.get("HIGH").map(String::as_str), Some("3"));
}

#[test]
fn scanner_handles_defaults_continuations_and_nesting() {
    let module = scan_python_source(DATACLASSES);
    let product = module
        .classes
        .iter()
        .find(|class| class.name == "Product")
        .expect("Product scanned");
    assert_eq!(product.fields.get("price").map(String::as_str), Some("float"));
    assert_eq!(product.fields.get("tags").map(String::as_str), Some("list[str]"));
    assert!(product.methods.contains_key("discount"));
    assert!(!product.fields.contains_key("ordering"));

    let meta = module
        .classes
        .iter()
        .find(|class| class.name == "Meta")
        .expect("nested class scanned");
    assert!(meta.fields.contains_key("ordering"));
}

#[test]
fn scanner_collects_package_re_exports() {
    let module = scan_python_source("from .user import User, Admin as Staff\nfrom .post import *\nfrom . import helpers\n");
    assert_eq!(module.re_exports.len(), 2);
    assert_eq!(module.re_exports[0].level, 1);
    assert_eq!(module.re_exports[0].names, ["User", "Admin"]);
    assert!(module.re_exports[1].is_star());
    assert_eq!(module.re_exports[1].source_module("models"), "models.post");
}

#[test]
fn resolves_directories_with_module_paths() -> Result<()> {
    let dir = tempdir()?;
    write(&dir.path().join("types/classes_types.py"), CLASSES)?;
    write(&dir.path().join("types/enums.py"), ENUMS)?;
    write(&dir.path().join("types/nested/deep.py"), "class NestedClass:\n    value: int\n")?;

    let mut resolver = TypeResolver::new(dir.path());
    let resolved = resolver.resolve_paths(&[dir.path().join("types")]);

    assert!(resolved.contains_key("User"));
    assert!(resolved.contains_key("Status"));
    let nested = resolved.get("types.nested.deep.NestedClass").expect("qualified key");
    assert_eq!(nested.module_path, "types.nested.deep");
    assert_eq!(nested.qualified_name, "deep.NestedClass");
    assert!(resolver.get_type_conflicts().is_empty());
    Ok(())
}

#[test]
fn field_types_are_parsed_once() -> Result<()> {
    let dir = tempdir()?;
    write(&dir.path().join("blog.py"), CLASSES)?;

    let mut resolver = TypeResolver::new(dir.path());
    resolver.resolve_paths(&[dir.path().join("blog.py")]);

    let post = resolver.get("Post").expect("Post resolved");
    let tags = post.field_types.get("tags").expect("tags parsed");
    assert_eq!(tags, &TypeParser::new().parse("List[str]", 0, 0)?);

    assert_eq!(resolver.get_attribute_type("Post", "title"), Some("str"));
    assert_eq!(resolver.get_attribute_type("Post", "missing"), None);
    assert_eq!(resolver.get_attribute_type("Nope", "title"), None);
    assert_eq!(
        resolver.attribute_type("blog.Post", "tags").map(|t| t.name),
        Some("List".to_string())
    );
    Ok(())
}

#[test]
fn exclude_patterns_skip_files() -> Result<()> {
    let dir = tempdir()?;
    write(&dir.path().join("types/user.py"), CLASSES)?;
    write(&dir.path().join("types/legacy/old.py"), "class Old:\n    x: int\n")?;

    let mut resolver = TypeResolver::new(dir.path()).with_exclude_patterns(&["**/legacy/**"]);
    resolver.resolve_paths(&[dir.path().join("types")]);

    assert!(resolver.get("User").is_some());
    assert!(resolver.get("Old").is_none());
    assert!(resolver.should_skip_file(&dir.path().join("types/legacy/old.py")));
    Ok(())
}

#[test]
fn missing_paths_and_unparseable_files_are_skipped() -> Result<()> {
    let dir = tempdir()?;
    write(&dir.path().join("notes.py"), "def helper():\n    return 1\n")?;

    let mut resolver = TypeResolver::new(dir.path());
    let resolved = resolver.resolve_paths(&[dir.path().join("nowhere"), dir.path().join("notes.py")]);
    assert!(resolved.is_empty());
    Ok(())
}

#[test]
fn attribute_validation_reports_missing_members() -> Result<()> {
    let dir = tempdir()?;
    write(&dir.path().join("user.py"), CLASSES)?;

    let mut resolver = TypeResolver::new(dir.path());
    resolver.resolve_paths(&[dir.path()]);

    assert!(resolver.type_exists("User"));
    assert!(resolver.type_exists("user.User"));
    assert!(resolver.type_exists("Optional"));
    assert!(!resolver.type_exists("Ghost"));

    assert!(resolver.validate_attribute("User", "email").is_ok());
    assert!(resolver.validate_attribute("User", "greet").is_ok());
    assert!(resolver.validate_attribute("User", "__dict__").is_ok());
    assert!(resolver.validate_attribute("list", "append").is_ok());
    assert_eq!(
        resolver.validate_attribute("User", "phone"),
        Err("Attribute 'phone' not found on type 'user.User'".to_string())
    );
    assert_eq!(
        resolver.validate_attribute("Ghost", "x"),
        Err("Type 'Ghost' not found".to_string())
    );
    Ok(())
}

#[test]
fn same_name_in_two_files_is_a_conflict() -> Result<()> {
    let dir = tempdir()?;
    write(&dir.path().join("user.py"), CLASSES)?;
    write(&dir.path().join("other_user.py"), OTHER_USER)?;

    let mut resolver = TypeResolver::new(dir.path());
    resolver.resolve_paths(&[dir.path()]);

    let conflicts = resolver.get_type_conflicts();
    assert_eq!(
        conflicts.get("User"),
        Some(&vec!["other_user.User".to_string(), "user.User".to_string()])
    );

    let message = resolver
        .validate_attribute("User", "name")
        .expect_err("bare name is ambiguous");
    assert!(message.starts_with("Ambiguous type 'User' found in multiple files"));
    assert!(message.contains("other_user.User, user.User"));
    assert!(resolver.validate_attribute("other_user.User", "full_name").is_ok());
    Ok(())
}

#[test]
fn populate_registry_indexes_by_stem_and_publishes_conflicts() -> Result<()> {
    let dir = tempdir()?;
    write(&dir.path().join("user.py"), CLASSES)?;
    write(&dir.path().join("other_user.py"), OTHER_USER)?;

    let mut resolver = TypeResolver::new(dir.path());
    resolver.resolve_paths(&[dir.path()]);
    let mut registry = TypeRegistry::new();
    resolver.populate_registry(&mut registry);

    assert!(registry.has_module("user"));
    assert!(registry.has_module("other_user"));
    assert_eq!(registry.type_conflicts().get("User").map(Vec::len), Some(2));
    assert_eq!(registry.auto_imported_names().count(), 0);

    let mut scope = registry.begin_template();
    scope.import_from_module("user", &[("Post".to_string(), None)])?;
    assert!(scope.is_imported("Post"));
    Ok(())
}

#[test]
fn package_re_exports_become_auto_imports() -> Result<()> {
    let dir = tempdir()?;
    let models = dir.path().join("models");
    write(&models.join("user.py"), "class User:\n    id: int\n    name: str\n")?;
    write(&models.join("post.py"), "class Post:\n    title: str\n")?;
    write(&models.join("__init__.py"), "from .user import User\nfrom .post import *\n")?;

    let mut resolver = TypeResolver::new(dir.path());
    resolver.resolve_paths(&[&models]);

    let exported = resolver.get("models.User").expect("re-exported at package level");
    assert_eq!(exported.module_path, "models");
    assert!(resolver.get("models.user.User").is_some());
    assert!(resolver.get("models.Post").is_some());
    assert!(resolver.get_type_conflicts().is_empty());

    let mut registry = TypeRegistry::new();
    resolver.populate_registry(&mut registry);
    assert_eq!(registry.auto_imported_names().collect::<Vec<_>>(), ["Post", "User"]);

    let mut scope = registry.begin_template();
    assert!(scope.is_imported("User"));
    scope.import_from_module("models", &[("User".to_string(), None)])?;
    assert_eq!(scope.origin("User").as_deref(), Some("models.User"));
    Ok(())
}

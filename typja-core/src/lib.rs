mod analyzer;
mod annotation;
mod builtins;
mod diagnostics;
mod directives;
mod errors;
mod linter;
mod lookup;
mod registry;
mod resolver;
mod scanner;
mod source;
mod validator;

pub mod template;

pub use crate::analyzer::{AnalyzerOptions, TemplateAnalyzer};
pub use crate::annotation::{brackets_balanced, split_top_level, TypeAnnotation, TypeParser};
pub use crate::builtins::{
    is_builtin_container, is_builtin_type, is_common_attribute, is_typing_name, BUILTINS_MODULE,
    TYPING_MODULE,
};
pub use crate::diagnostics::{Diagnostics, Severity, ValidationIssue};
pub use crate::directives::{
    CommentParser, Declaration, DirectiveKind, FilterDeclaration, FromImportStatement,
    ImportStatement, MacroDeclaration, MacroParameter, TypjaComment, VariableDeclaration,
};
pub use crate::errors::{ParseError, RegistryError, RegistryErrorKind, TemplateSyntaxError};
pub use crate::linter::{LintOptions, Linter, UnionStyle};
pub use crate::lookup::TypeLookup;
pub use crate::registry::{ImportScope, ImportedName, TypeDefinition, TypeRegistry};
pub use crate::resolver::{ResolvedType, TypeResolver};
pub use crate::scanner::{scan_python_source, ReExport, ScannedClass, ScannedModule};
pub use crate::source::SourceFile;
pub use crate::validator::{DeclaredVariable, TemplateDeclarations, TemplateValidator};

use tracing::debug;

use crate::diagnostics::{Diagnostics, ValidationIssue};
use crate::directives::{CommentParser, Declaration, DirectiveKind, TypjaComment};
use crate::errors::RegistryError;
use crate::lookup::TypeLookup;
use crate::registry::{ImportScope, TypeRegistry};
use crate::resolver::TypeResolver;
use crate::template::parse_template;
use crate::validator::{DeclaredVariable, TemplateDeclarations, TemplateValidator};

/// Rule families that can be switched off from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerOptions {
    pub warn_undefined_variables: bool,
    pub validate_variables: bool,
    pub validate_filters: bool,
    pub validate_macros: bool,
    pub validate_imports: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            warn_undefined_variables: true,
            validate_variables: true,
            validate_filters: true,
            validate_macros: true,
            validate_imports: true,
        }
    }
}

/// Checks templates against a shared registry.
///
/// Holds no per-template state: every [`TemplateAnalyzer::analyze_template`]
/// call opens a fresh import scope, so explicit imports never leak between
/// templates.
pub struct TemplateAnalyzer<'r> {
    registry: &'r TypeRegistry,
    resolver: Option<&'r TypeResolver>,
    comment_parser: CommentParser,
    options: AnalyzerOptions,
}

impl<'r> TemplateAnalyzer<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            resolver: None,
            comment_parser: CommentParser::new(),
            options: AnalyzerOptions::default(),
        }
    }

    /// Attribute checks go through `resolver` instead of the registry.
    pub fn with_resolver(mut self, resolver: &'r TypeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_options(mut self, options: AnalyzerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn analyze_template(&self, content: &str, filename: &str) -> Vec<ValidationIssue> {
        let mut scope = self.registry.begin_template();
        let mut declarations = TemplateDeclarations::default();
        let mut diagnostics = Diagnostics::new();

        match self.comment_parser.parse(content, filename) {
            Ok(comments) => {
                for comment in &comments {
                    self.process_comment(comment, filename, &mut scope, &mut declarations, &mut diagnostics);
                }
            }
            Err(error) => {
                diagnostics.push(ValidationIssue::error(error.message, filename, error.line).at_col(error.col));
            }
        }

        match parse_template(content) {
            Ok(template) => {
                let lookup: &dyn TypeLookup = match self.resolver {
                    Some(resolver) => resolver,
                    None => &scope,
                };
                let validator = TemplateValidator::new(filename, &declarations, &scope, lookup, &self.options);
                diagnostics.extend(validator.validate(&template).into_entries());
            }
            Err(error) => {
                diagnostics.push(
                    ValidationIssue::error(format!("Template syntax error: {}", error.message), filename, error.line)
                        .at_col(error.column),
                );
            }
        }

        let issues = diagnostics.into_entries();
        debug!(filename, issues = issues.len(), "analyzed template");
        issues
    }

    fn process_comment(
        &self,
        comment: &TypjaComment,
        filename: &str,
        scope: &mut ImportScope<'r>,
        declarations: &mut TemplateDeclarations,
        diagnostics: &mut Diagnostics,
    ) {
        if comment.kind == DirectiveKind::Ignore {
            declarations.ignored_lines.insert(comment.line);
            return;
        }

        for declaration in &comment.declarations {
            match declaration {
                Declaration::Import(statement) => {
                    if let Err(error) = scope.import_module(&statement.module) {
                        if self.options.validate_imports {
                            diagnostics.push(registry_issue(&error, None, filename, statement.line, statement.col));
                        }
                    }
                }
                Declaration::FromImport(statement) => {
                    if let Err(error) = scope.import_from_module(&statement.module, &statement.names) {
                        if self.options.validate_imports {
                            diagnostics.push(registry_issue(&error, None, filename, statement.line, statement.col));
                        }
                    }
                }
                Declaration::Variable(variable) => {
                    let resolution = scope.resolve_type(&variable.type_annotation);
                    if let Err(error) = &resolution {
                        if self.options.validate_variables {
                            diagnostics.push(registry_issue(error, None, filename, variable.line, variable.col));
                        }
                    }
                    declarations.variables.insert(
                        variable.name.clone(),
                        DeclaredVariable {
                            declaration: variable.clone(),
                            resolved: resolution.is_ok(),
                        },
                    );
                }
                Declaration::Filter(filter) => {
                    if self.options.validate_filters && !filter.type_annotation.is_callable() {
                        diagnostics.push(
                            ValidationIssue::error(
                                format!("Filter '{}' must have Callable type", filter.name),
                                filename,
                                filter.line,
                            )
                            .at_col(filter.col),
                        );
                    }
                    declarations.filters.insert(filter.name.clone(), filter.clone());
                }
                Declaration::Macro(macro_declaration) => {
                    if self.options.validate_macros {
                        for param in &macro_declaration.params {
                            if let Err(error) = scope.resolve_type(&param.type_annotation) {
                                let prefix = format!("Invalid type for parameter '{}'", param.name);
                                diagnostics.push(registry_issue(
                                    &error,
                                    Some(&prefix),
                                    filename,
                                    macro_declaration.line,
                                    macro_declaration.col,
                                ));
                            }
                        }
                        if let Err(error) = scope.resolve_type(&macro_declaration.return_type) {
                            diagnostics.push(registry_issue(
                                &error,
                                Some("Invalid return type"),
                                filename,
                                macro_declaration.line,
                                macro_declaration.col,
                            ));
                        }
                    }
                    declarations
                        .macros
                        .insert(macro_declaration.name.clone(), macro_declaration.clone());
                }
            }
        }
    }
}

fn registry_issue(
    error: &RegistryError,
    prefix: Option<&str>,
    filename: &str,
    line: usize,
    col: usize,
) -> ValidationIssue {
    let message = match prefix {
        Some(prefix) => format!("{prefix}: {}", error.message),
        None => error.message.clone(),
    };
    ValidationIssue::error(message, filename, line)
        .at_col(col)
        .with_optional_hint(error.hint.clone())
}

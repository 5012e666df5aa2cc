use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use path_clean::PathClean;
use pathdiff::diff_paths;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::annotation::TypeAnnotation;
use crate::builtins::{is_builtin_type, is_typing_name};
use crate::lookup::{check_attribute, parse_field_type, TypeLookup};
use crate::registry::{TypeDefinition, TypeRegistry};
use crate::scanner::{scan_python_source, ScannedClass};

/// A class discovered in a scanned source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub name: String,
    /// Dotted path of the defining module relative to the scan root
    /// (`models.user`), or of the package that re-exports it.
    pub module_path: String,
    pub file_path: PathBuf,
    pub fields: BTreeMap<String, String>,
    pub methods: BTreeMap<String, String>,
    pub bases: Vec<String>,
    /// File stem plus name, e.g. `user.User`.
    pub qualified_name: String,
    /// Field types that parsed as annotations.
    pub field_types: BTreeMap<String, TypeAnnotation>,
    /// Made visible at package level by an `__init__.py` import.
    pub re_exported: bool,
}

impl ResolvedType {
    fn from_scanned(class: ScannedClass, module_path: &str, file_path: &Path) -> Self {
        let stem = file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let field_types = class
            .fields
            .iter()
            .filter_map(|(name, text)| parse_field_type(text).map(|parsed| (name.clone(), parsed)))
            .collect();

        Self {
            qualified_name: format!("{stem}.{}", class.name),
            name: class.name,
            module_path: module_path.to_string(),
            file_path: file_path.to_path_buf(),
            fields: class.fields,
            methods: class.methods,
            bases: class.bases,
            field_types,
            re_exported: false,
        }
    }

    fn re_exported_from(&self, package: &str) -> Self {
        Self {
            module_path: package.to_string(),
            re_exported: true,
            ..self.clone()
        }
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.fields.contains_key(attribute) || self.methods.contains_key(attribute)
    }

    pub fn to_definition(&self) -> TypeDefinition {
        TypeDefinition {
            name: self.name.clone(),
            fields: self.fields.clone(),
            methods: Some(self.methods.clone()),
            module: (!self.module_path.is_empty()).then(|| self.module_path.clone()),
        }
    }
}

/// Discovers class shapes under a project root and answers attribute
/// queries about them.
#[derive(Debug)]
pub struct TypeResolver {
    root: PathBuf,
    exclude_patterns: Vec<Pattern>,
    /// Keyed by bare name and by `module_path.Name`.
    resolved_types: BTreeMap<String, ResolvedType>,
    type_conflicts: BTreeMap<String, Vec<String>>,
}

struct InitModule {
    package: String,
    re_exports: Vec<crate::scanner::ReExport>,
}

impl TypeResolver {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into().clean(),
            exclude_patterns: Vec::new(),
            resolved_types: BTreeMap::new(),
            type_conflicts: BTreeMap::new(),
        }
    }

    /// Invalid glob patterns are logged and skipped.
    pub fn with_exclude_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        for pattern in patterns {
            let cleaned = pattern.as_ref().trim_start_matches("./");
            match Pattern::new(cleaned) {
                Ok(compiled) => self.exclude_patterns.push(compiled),
                Err(error) => warn!(pattern = cleaned, %error, "ignoring invalid exclude pattern"),
            }
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolved_types(&self) -> &BTreeMap<String, ResolvedType> {
        &self.resolved_types
    }

    pub fn get(&self, key: &str) -> Option<&ResolvedType> {
        self.resolved_types.get(key)
    }

    /// Scans every `.py` file under `paths` (files or directories), replacing
    /// whatever an earlier call found. Missing paths and unreadable files are
    /// skipped.
    pub fn resolve_paths<P: AsRef<Path>>(&mut self, paths: &[P]) -> &BTreeMap<String, ResolvedType> {
        self.resolved_types.clear();
        self.type_conflicts.clear();
        let mut init_modules = Vec::new();

        for path in paths {
            let path = path.as_ref().clean();
            if path.is_file() {
                if path.extension().is_some_and(|ext| ext == "py") {
                    self.resolve_file(&path, &mut init_modules);
                }
            } else if path.is_dir() {
                for file in self.python_files(&path) {
                    self.resolve_file(&file, &mut init_modules);
                }
            } else {
                debug!(path = %path.display(), "type path does not exist");
            }
        }

        for init in init_modules {
            self.apply_re_exports(&init);
        }
        self.detect_type_conflicts();

        debug!(
            types = self.resolved_types.len(),
            conflicts = self.type_conflicts.len(),
            "resolved source types"
        );
        &self.resolved_types
    }

    fn python_files(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if entry.file_type().is_file()
                        && path.extension().is_some_and(|ext| ext == "py")
                        && !self.should_skip_file(path)
                    {
                        files.push(path.to_path_buf());
                    }
                }
                Err(error) => warn!(dir = %dir.display(), %error, "walk failed"),
            }
        }
        files.sort();
        files
    }

    /// Matches exclude globs against the path relative to the root.
    pub fn should_skip_file(&self, path: &Path) -> bool {
        if self.exclude_patterns.is_empty() {
            return false;
        }
        let relative = self.relative_path(path);
        let text = relative.to_string_lossy().replace('\\', "/");
        let normalized = text.trim_start_matches("./");
        self.exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(&text) || pattern.matches(normalized))
    }

    fn relative_path(&self, path: &Path) -> PathBuf {
        let cleaned = path.clean();
        match diff_paths(&cleaned, &self.root) {
            Some(relative) if !relative.components().any(|c| c == Component::ParentDir) => relative,
            _ => cleaned
                .file_name()
                .map(PathBuf::from)
                .unwrap_or(cleaned),
        }
    }

    fn module_path_for(&self, file: &Path) -> String {
        let relative = self.relative_path(file);
        let is_init = relative.file_name().is_some_and(|name| name == "__init__.py");

        let mut parts = relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .filter_map(|component| match component {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if !is_init {
            if let Some(stem) = relative.file_stem() {
                parts.push(stem.to_string_lossy().into_owned());
            }
        }
        parts.join(".")
    }

    fn resolve_file(&mut self, file: &Path, init_modules: &mut Vec<InitModule>) {
        let source = match fs::read_to_string(file) {
            Ok(source) => source,
            Err(error) => {
                warn!(file = %file.display(), %error, "skipping unreadable source file");
                return;
            }
        };

        let module_path = self.module_path_for(file);
        let scanned = scan_python_source(&source);
        trace!(
            file = %file.display(),
            module = %module_path,
            classes = scanned.classes.len(),
            "scanned source file"
        );

        for class in scanned.classes {
            let resolved = ResolvedType::from_scanned(class, &module_path, file);
            if !module_path.is_empty() {
                self.resolved_types
                    .insert(format!("{module_path}.{}", resolved.name), resolved.clone());
            }
            self.resolved_types.insert(resolved.name.clone(), resolved);
        }

        let is_init = file.file_name().is_some_and(|name| name == "__init__.py");
        if is_init && !module_path.is_empty() && !scanned.re_exports.is_empty() {
            init_modules.push(InitModule {
                package: module_path,
                re_exports: scanned.re_exports,
            });
        }
    }

    fn apply_re_exports(&mut self, init: &InitModule) {
        let package = init.package.as_str();

        for re_export in &init.re_exports {
            let source_module = re_export.source_module(package);

            if re_export.is_star() {
                let exported = self
                    .resolved_types
                    .iter()
                    .filter(|(key, resolved)| resolved.module_path == source_module && !key.contains('.'))
                    .map(|(_, resolved)| resolved.re_exported_from(package))
                    .collect::<Vec<_>>();
                for resolved in exported {
                    self.insert_re_export(package, resolved);
                }
                continue;
            }

            for name in &re_export.names {
                let found = self
                    .resolved_types
                    .get(&format!("{source_module}.{name}"))
                    .or_else(|| self.resolved_types.get(name))
                    .map(|resolved| resolved.re_exported_from(package));
                match found {
                    Some(resolved) => self.insert_re_export(package, resolved),
                    None => trace!(package, name = %name, "re-export target not found"),
                }
            }
        }
    }

    fn insert_re_export(&mut self, package: &str, resolved: ResolvedType) {
        let key = format!("{package}.{}", resolved.name);
        if self.resolved_types.contains_key(&key) {
            return;
        }
        self.resolved_types
            .entry(resolved.name.clone())
            .or_insert_with(|| resolved.clone());
        self.resolved_types.insert(key, resolved);
    }

    /// Groups discoveries by short name; a name defined in more than one file
    /// is a conflict.
    fn detect_type_conflicts(&mut self) {
        let mut by_name: BTreeMap<&str, (BTreeSet<&Path>, BTreeSet<&str>)> = BTreeMap::new();
        for resolved in self.resolved_types.values() {
            let (files, candidates) = by_name.entry(resolved.name.as_str()).or_default();
            files.insert(resolved.file_path.as_path());
            candidates.insert(resolved.qualified_name.as_str());
        }

        self.type_conflicts = by_name
            .into_iter()
            .filter(|(_, (files, _))| files.len() > 1)
            .map(|(name, (_, candidates))| {
                (
                    name.to_string(),
                    candidates.into_iter().map(str::to_string).collect(),
                )
            })
            .collect();
    }

    pub fn get_type_conflicts(&self) -> &BTreeMap<String, Vec<String>> {
        &self.type_conflicts
    }

    /// Registers every discovered type, indexes modules by file stem and by
    /// top-level module path, auto-imports package re-exports and publishes
    /// the conflicts.
    pub fn populate_registry(&self, registry: &mut TypeRegistry) {
        let mut modules: BTreeMap<String, BTreeMap<String, TypeDefinition>> = BTreeMap::new();

        for resolved in self.resolved_types.values() {
            let definition = resolved.to_definition();
            registry.register_type(definition.clone());

            if let Some(stem) = resolved.file_path.file_stem() {
                if !resolved.re_exported {
                    modules
                        .entry(stem.to_string_lossy().into_owned())
                        .or_default()
                        .insert(resolved.name.clone(), definition.clone());
                }
            }
            if !resolved.module_path.is_empty() && !resolved.module_path.contains('.') {
                modules
                    .entry(resolved.module_path.clone())
                    .or_default()
                    .insert(resolved.name.clone(), definition);
            }
        }

        for (module, types) in modules {
            registry.register_module_types(module, types);
        }

        for (key, resolved) in &self.resolved_types {
            let top_level = !resolved.module_path.is_empty() && !resolved.module_path.contains('.');
            if resolved.re_exported && top_level && *key == format!("{}.{}", resolved.module_path, resolved.name) {
                registry.add_auto_import(resolved.to_definition());
            }
        }

        registry.set_type_conflicts(self.type_conflicts.clone());
        debug!(
            types = registry.type_count(),
            modules = registry.module_count(),
            "populated type registry"
        );
    }

    /// Exact key first (`Name`, `pkg.mod.Name`), then the `stem.Name` form.
    fn find(&self, type_name: &str) -> Option<&ResolvedType> {
        if let Some(resolved) = self.resolved_types.get(type_name) {
            return Some(resolved);
        }
        if type_name.contains('.') {
            return self
                .resolved_types
                .values()
                .find(|resolved| resolved.qualified_name == type_name);
        }
        None
    }

    fn ambiguity_message(&self, type_name: &str) -> Option<String> {
        if type_name.contains('.') {
            return None;
        }
        let candidates = self.type_conflicts.get(type_name)?;
        Some(format!(
            "Ambiguous type '{type_name}' found in multiple files. Use qualified name: {} or import explicitly with {{# typja:from <module> import {type_name} #}}",
            candidates.join(", ")
        ))
    }

    pub fn get_attribute_type(&self, type_name: &str, attribute: &str) -> Option<&str> {
        self.find(type_name)?.fields.get(attribute).map(String::as_str)
    }
}

impl TypeLookup for TypeResolver {
    fn type_exists(&self, type_name: &str) -> bool {
        is_builtin_type(type_name) || is_typing_name(type_name) || self.find(type_name).is_some()
    }

    fn validate_attribute(&self, type_name: &str, attribute: &str) -> Result<(), String> {
        check_attribute(type_name, attribute, || {
            if let Some(message) = self.ambiguity_message(type_name) {
                return Err(message);
            }
            self.find(type_name)
                .map(|resolved| (resolved.qualified_name.clone(), resolved.has_attribute(attribute)))
                .ok_or_else(|| format!("Type '{type_name}' not found"))
        })
    }

    fn attribute_type(&self, type_name: &str, attribute: &str) -> Option<TypeAnnotation> {
        self.find(type_name)?.field_types.get(attribute).cloned()
    }

    fn qualified_name(&self, type_name: &str) -> Option<String> {
        self.find(type_name).map(|resolved| resolved.qualified_name.clone())
    }
}

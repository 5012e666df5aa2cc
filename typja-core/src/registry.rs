use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::annotation::TypeAnnotation;
use crate::builtins::{is_builtin_type, is_typing_name, BUILTINS_MODULE, TYPING_MODULE};
use crate::errors::{RegistryError, RegistryErrorKind};
use crate::lookup::TypeLookup;

/// Shape of a user type: its fields (name to type text) and methods (name
/// to signature text).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub fields: BTreeMap<String, String>,
    pub methods: Option<BTreeMap<String, String>>,
    pub module: Option<String>,
}

impl TypeDefinition {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_field<N: Into<String>, T: Into<String>>(mut self, name: N, type_text: T) -> Self {
        self.fields.insert(name.into(), type_text.into());
        self
    }

    pub fn with_method<N: Into<String>, S: Into<String>>(mut self, name: N, signature: S) -> Self {
        self.methods
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), signature.into());
        self
    }

    pub fn with_module<S: Into<String>>(mut self, module: S) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_type(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods
            .as_ref()
            .is_some_and(|methods| methods.contains_key(name))
    }

    pub fn method_signature(&self, name: &str) -> Option<&str> {
        self.methods.as_ref()?.get(name).map(String::as_str)
    }

    pub fn qualified_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{module}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Every known type for one check run, by name and by module.
///
/// The registry itself is never mutated by template analysis; each template
/// gets its own [`ImportScope`] from [`TypeRegistry::begin_template`].
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDefinition>,
    modules: BTreeMap<String, BTreeMap<String, TypeDefinition>>,
    auto_imported: BTreeMap<String, TypeDefinition>,
    conflicts: BTreeMap<String, Vec<String>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts by name; a later definition with the same name replaces the
    /// earlier one in the flat table.
    pub fn register_type(&mut self, definition: TypeDefinition) {
        if let Some(module) = &definition.module {
            self.modules
                .entry(module.clone())
                .or_default()
                .insert(definition.name.clone(), definition.clone());
        }
        self.types.insert(definition.name.clone(), definition);
    }

    /// Replaces the index of `module` and stamps the module on every definition.
    pub fn register_module_types<S: Into<String>>(
        &mut self,
        module: S,
        types: BTreeMap<String, TypeDefinition>,
    ) {
        let module = module.into();
        let mut stamped = BTreeMap::new();
        for (name, mut definition) in types {
            definition.module = Some(module.clone());
            self.types.insert(definition.name.clone(), definition.clone());
            stamped.insert(name, definition);
        }
        trace!(module = %module, count = stamped.len(), "registered module types");
        self.modules.insert(module, stamped);
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn get_module_types(&self, module: &str) -> Option<&BTreeMap<String, TypeDefinition>> {
        self.modules.get(module)
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        is_builtin_type(name)
    }

    /// Makes `definition` visible in every template without an import.
    pub fn add_auto_import(&mut self, definition: TypeDefinition) {
        self.auto_imported.insert(definition.name.clone(), definition);
    }

    pub fn auto_imported_names(&self) -> impl Iterator<Item = &str> {
        self.auto_imported.keys().map(String::as_str)
    }

    /// Short names defined in more than one source file, with their
    /// qualified candidates.
    pub fn set_type_conflicts(&mut self, conflicts: BTreeMap<String, Vec<String>>) {
        self.conflicts = conflicts;
    }

    pub fn type_conflicts(&self) -> &BTreeMap<String, Vec<String>> {
        &self.conflicts
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Fresh import state for one template, seeded with the auto-imports.
    pub fn begin_template(&self) -> ImportScope<'_> {
        let mut scope = ImportScope {
            registry: self,
            imported_names: HashMap::new(),
            imported_modules: HashSet::new(),
        };
        scope.clear_imports();
        scope
    }

    fn is_conflict_candidate(&self, qualified: &str) -> bool {
        self.conflicts
            .values()
            .any(|candidates| candidates.iter().any(|candidate| candidate == qualified))
    }
}

/// A name bound by an import directive (or an auto-import).
#[derive(Debug, Clone)]
pub struct ImportedName<'r> {
    pub module: String,
    pub name: String,
    pub definition: Option<&'r TypeDefinition>,
}

impl ImportedName<'_> {
    pub fn origin(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }
}

/// Per-template import state layered over a shared [`TypeRegistry`].
#[derive(Debug)]
pub struct ImportScope<'r> {
    registry: &'r TypeRegistry,
    imported_names: HashMap<String, ImportedName<'r>>,
    imported_modules: HashSet<String>,
}

impl<'r> ImportScope<'r> {
    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    /// Drops every explicit import and reseeds the auto-imported names.
    pub fn clear_imports(&mut self) {
        self.imported_names.clear();
        self.imported_modules.clear();

        let registry = self.registry;
        for (name, definition) in &registry.auto_imported {
            self.imported_names.insert(
                name.clone(),
                ImportedName {
                    module: definition.module.clone().unwrap_or_default(),
                    name: definition.name.clone(),
                    definition: Some(definition),
                },
            );
        }
    }

    pub fn import_module(&mut self, module: &str) -> Result<(), RegistryError> {
        if !self.registry.has_module(module) && module != TYPING_MODULE && module != BUILTINS_MODULE {
            return Err(RegistryError::new(
                RegistryErrorKind::ModuleNotFound,
                format!("Module '{module}' not found"),
            ));
        }
        debug!(module, "imported module");
        self.imported_modules.insert(module.to_string());
        Ok(())
    }

    pub fn import_from_module(
        &mut self,
        module: &str,
        names: &[(String, Option<String>)],
    ) -> Result<(), RegistryError> {
        if module == TYPING_MODULE {
            for (name, alias) in names {
                if !is_typing_name(name) {
                    return Err(RegistryError::new(
                        RegistryErrorKind::UnknownTypingName,
                        format!("'{name}' is not available in typing module"),
                    ));
                }
                self.bind(module, name, alias.as_deref(), None);
            }
            return Ok(());
        }

        let registry = self.registry;
        let module_types = registry.get_module_types(module).ok_or_else(|| {
            RegistryError::new(
                RegistryErrorKind::ModuleNotFound,
                format!("Module '{module}' not found"),
            )
        })?;

        for (name, alias) in names {
            let Some(definition) = module_types.get(name) else {
                let available = module_types.keys().cloned().collect::<Vec<_>>().join(", ");
                return Err(RegistryError::new(
                    RegistryErrorKind::ModuleMissingType,
                    format!("Module '{module}' has no type '{name}'. Available types: {available}"),
                ));
            };
            self.bind(module, name, alias.as_deref(), Some(definition));
        }
        debug!(module, count = names.len(), "imported names");
        Ok(())
    }

    fn bind(&mut self, module: &str, name: &str, alias: Option<&str>, definition: Option<&'r TypeDefinition>) {
        self.imported_names.insert(
            alias.unwrap_or(name).to_string(),
            ImportedName {
                module: module.to_string(),
                name: name.to_string(),
                definition,
            },
        );
    }

    pub fn is_imported(&self, name: &str) -> bool {
        self.imported_names.contains_key(name)
    }

    pub fn is_module_imported(&self, module: &str) -> bool {
        self.imported_modules.contains(module)
    }

    pub fn imported(&self, name: &str) -> Option<&ImportedName<'r>> {
        self.imported_names.get(name)
    }

    /// `module.Name` an imported alias stands for.
    pub fn origin(&self, alias: &str) -> Option<String> {
        self.imported_names.get(alias).map(ImportedName::origin)
    }

    /// Checks that the base name of `annotation` (every branch of a union)
    /// is defined for this template. Generic arguments are not inspected.
    ///
    /// Returns the definition for a single user type, `None` for builtins,
    /// typing constructs and unions.
    pub fn resolve_type(&self, annotation: &TypeAnnotation) -> Result<Option<&'r TypeDefinition>, RegistryError> {
        if annotation.is_union {
            for branch in &annotation.union_types {
                self.resolve_type(branch)?;
            }
            return Ok(None);
        }

        self.resolve_name(annotation)
    }

    fn resolve_name(&self, annotation: &TypeAnnotation) -> Result<Option<&'r TypeDefinition>, RegistryError> {
        let name = annotation.name.as_str();

        if is_builtin_type(name) && matches!(annotation.module.as_deref(), None | Some(BUILTINS_MODULE)) {
            return Ok(None);
        }

        if is_typing_name(name) && matches!(annotation.module.as_deref(), None | Some(TYPING_MODULE)) {
            if annotation.module.is_some() || self.imported_names.contains_key(name) {
                return Ok(None);
            }
            return Err(RegistryError::new(
                RegistryErrorKind::MissingTypingImport,
                format!("'{name}' is not defined. Did you mean to import it from typing?"),
            )
            .with_hint(format!("{{# typja:from typing import {name} #}}")));
        }

        if let Some(module) = &annotation.module {
            return self.resolve_qualified(module, name);
        }

        if let Some(imported) = self.imported_names.get(name) {
            return Ok(imported.definition);
        }

        if let Some(candidates) = self.registry.conflicts.get(name) {
            let listed = candidates.join(", ");
            return Err(RegistryError::new(
                RegistryErrorKind::AmbiguousType,
                format!(
                    "Ambiguous type '{name}' found in multiple files. Use qualified name: {listed} or import explicitly with {{# typja:from <module> import {name} #}}"
                ),
            )
            .with_hint(format!("Candidates: {listed}")));
        }

        Err(RegistryError::new(
            RegistryErrorKind::UnknownName,
            format!("'{name}' is not defined."),
        )
        .with_hint(format!("Import it with {{# typja:from <module> import {name} #}}")))
    }

    fn resolve_qualified(&self, module: &str, name: &str) -> Result<Option<&'r TypeDefinition>, RegistryError> {
        let registry = self.registry;
        let qualified = format!("{module}.{name}");
        let disambiguates = registry.is_conflict_candidate(&qualified);

        if !disambiguates && !self.imported_modules.contains(module) {
            return Err(RegistryError::new(
                RegistryErrorKind::ModuleNotImported,
                format!("Module '{module}' is not imported."),
            )
            .with_hint(format!("{{# typja:import {module} #}}")));
        }

        let module_types = registry.get_module_types(module).ok_or_else(|| {
            RegistryError::new(
                RegistryErrorKind::ModuleNotFound,
                format!("Module '{module}' not found"),
            )
        })?;

        module_types.get(name).map(Some).ok_or_else(|| {
            RegistryError::new(
                RegistryErrorKind::ModuleMissingType,
                format!("Module '{module}' has no type '{name}'"),
            )
        })
    }

    fn definition_for(&self, type_name: &str) -> Option<&'r TypeDefinition> {
        if let Some(imported) = self.imported_names.get(type_name) {
            return imported.definition;
        }
        if let Some((module, name)) = type_name.rsplit_once('.') {
            if let Some(definition) = self
                .registry
                .get_module_types(module)
                .and_then(|types| types.get(name))
            {
                return Some(definition);
            }
        }
        self.registry.get_type(type_name)
    }
}

impl TypeLookup for ImportScope<'_> {
    fn type_exists(&self, type_name: &str) -> bool {
        is_builtin_type(type_name) || is_typing_name(type_name) || self.definition_for(type_name).is_some()
    }

    fn validate_attribute(&self, type_name: &str, attribute: &str) -> Result<(), String> {
        crate::lookup::check_attribute(type_name, attribute, || {
            self.definition_for(type_name)
                .map(|definition| {
                    (
                        definition.qualified_name(),
                        definition.has_field(attribute) || definition.has_method(attribute),
                    )
                })
                .ok_or_else(|| format!("Type '{type_name}' not found"))
        })
    }

    fn attribute_type(&self, type_name: &str, attribute: &str) -> Option<TypeAnnotation> {
        let definition = self.definition_for(type_name)?;
        crate::lookup::parse_field_type(definition.field_type(attribute)?)
    }

    fn qualified_name(&self, type_name: &str) -> Option<String> {
        self.definition_for(type_name).map(TypeDefinition::qualified_name)
    }
}

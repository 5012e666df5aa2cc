use crate::annotation::{TypeAnnotation, TypeParser};
use crate::builtins::{is_builtin_container, is_builtin_type, is_common_attribute, is_typing_name};

/// Read surface the validator uses to check attribute chains.
pub trait TypeLookup {
    /// Always true for builtins and typing constructs.
    fn type_exists(&self, type_name: &str) -> bool;

    /// `Err` carries the diagnostic message.
    fn validate_attribute(&self, type_name: &str, attribute: &str) -> Result<(), String>;

    /// Declared type of a field (methods have none).
    fn attribute_type(&self, type_name: &str, attribute: &str) -> Option<TypeAnnotation>;

    /// Name a user type is reported under, e.g. `models.User`.
    fn qualified_name(&self, type_name: &str) -> Option<String>;
}

/// Shared attribute rule: builtin and typing types accept anything, user
/// types need a field, a method or a universal object attribute.
///
/// `find` yields the type's qualified name and whether it has `attribute`.
pub(crate) fn check_attribute<F>(type_name: &str, attribute: &str, find: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(String, bool), String>,
{
    if is_builtin_container(type_name) || is_builtin_type(type_name) || is_typing_name(type_name) {
        return Ok(());
    }

    let (qualified_name, found) = find()?;
    if found || is_common_attribute(attribute) {
        return Ok(());
    }

    Err(format!(
        "Attribute '{attribute}' not found on type '{qualified_name}'"
    ))
}

pub(crate) fn parse_field_type(type_text: &str) -> Option<TypeAnnotation> {
    TypeParser::new().parse(type_text, 0, 0).ok()
}

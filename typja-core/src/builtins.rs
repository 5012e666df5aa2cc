//! Fixed vocabularies of names that never need a definition.

/// Builtin type names that resolve without any import.
pub const BUILTIN_TYPES: &[&str] = &[
    "None",
    "NoneType",
    "bool",
    "bytearray",
    "bytes",
    "complex",
    "dict",
    "float",
    "frozenset",
    "int",
    "list",
    "memoryview",
    "object",
    "range",
    "set",
    "slice",
    "str",
    "tuple",
    "type",
];

/// Constructs that must be imported from the `typing` pseudo-module.
pub const TYPING_NAMES: &[&str] = &[
    "AbstractSet",
    "Annotated",
    "Any",
    "AnyStr",
    "Awaitable",
    "BinaryIO",
    "Callable",
    "ChainMap",
    "ClassVar",
    "Collection",
    "Container",
    "Coroutine",
    "Counter",
    "DefaultDict",
    "Deque",
    "Dict",
    "Final",
    "FrozenSet",
    "Generator",
    "Generic",
    "Hashable",
    "IO",
    "Iterable",
    "Iterator",
    "List",
    "Literal",
    "LiteralString",
    "Mapping",
    "MutableMapping",
    "MutableSequence",
    "MutableSet",
    "NamedTuple",
    "Never",
    "NoReturn",
    "NotRequired",
    "Optional",
    "OrderedDict",
    "Protocol",
    "Required",
    "Reversible",
    "Self",
    "Sequence",
    "Set",
    "Sized",
    "Text",
    "TextIO",
    "Tuple",
    "Type",
    "TypeAlias",
    "TypeGuard",
    "TypeVar",
    "TypedDict",
    "Union",
];

/// Builtin containers whose attributes are never checked.
pub const BUILTIN_CONTAINERS: &[&str] = &[
    "str", "int", "float", "bool", "list", "dict", "set", "tuple",
];

/// Attributes every object carries.
pub const COMMON_ATTRIBUTES: &[&str] = &[
    "__class__",
    "__dict__",
    "__doc__",
    "__module__",
    "__str__",
    "__repr__",
    "__hash__",
];

/// Names the template engine provides to every template.
pub const TEMPLATE_GLOBALS: &[&str] = &[
    "range", "lipsum", "dict", "cycler", "joiner", "namespace", "self", "super",
];

/// Generic containers indexed by key, whose second argument is the value type.
pub const MAPPING_TYPES: &[&str] = &[
    "dict",
    "Dict",
    "DefaultDict",
    "OrderedDict",
    "Mapping",
    "MutableMapping",
    "ChainMap",
];

pub const TYPING_MODULE: &str = "typing";
pub const BUILTINS_MODULE: &str = "builtins";

pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name)
}

pub fn is_typing_name(name: &str) -> bool {
    TYPING_NAMES.contains(&name)
}

pub fn is_builtin_container(name: &str) -> bool {
    BUILTIN_CONTAINERS.contains(&name)
}

pub fn is_common_attribute(name: &str) -> bool {
    COMMON_ATTRIBUTES.contains(&name)
}

pub fn is_template_global(name: &str) -> bool {
    TEMPLATE_GLOBALS.contains(&name)
}

pub fn is_mapping_type(name: &str) -> bool {
    MAPPING_TYPES.contains(&name)
}

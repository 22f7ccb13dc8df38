//! The dependency value object.
//!
//! A dependency is a named code body plus a table of imports, each binding a
//! local identifier to the name of another dependency. Dependencies are
//! validated on construction and on deserialization, and are immutable
//! afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of imports a dependency may declare.
pub const MAX_IMPORTS: usize = 1024;

/// Maximum number of arguments a single execution may pass.
pub const MAX_ARGUMENTS: usize = 1024;

/// Identifier reserved for the enclosure-scoped event caster inside a code body.
pub const EVENTS_BINDING: &str = "events";

/// Words that cannot be used as a binding in a code body.
const RESERVED_WORDS: &[&str] = &[
    "arguments",
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "eval",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "null",
    "package",
    "private",
    "protected",
    "public",
    "return",
    "static",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

/// Check that `s` can be used as a binding in a code body.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let start_ok = first == '_' || first == '$' || unicode_ident::is_xid_start(first);
    start_ok
        && chars.all(|c| c == '$' || unicode_ident::is_xid_continue(c))
        && !RESERVED_WORDS.contains(&s)
}

/// A validated `(name, code, imports)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedDependency")]
pub struct Dependency {
    name: String,
    code: String,
    #[serde(rename = "dependencies")]
    imports: BTreeMap<String, String>,
}

/// The wire shape of a [`Dependency`] before validation.
///
/// Decoders that need the typed validation error, rather than the generic
/// one serde reports, deserialize this and call [`validate`](Self::validate).
#[derive(Debug, Clone, Deserialize)]
pub struct UncheckedDependency {
    pub name: String,
    pub code: String,
    #[serde(default, rename = "dependencies")]
    pub imports: BTreeMap<String, String>,
}

impl UncheckedDependency {
    pub fn validate(self) -> Result<Dependency> {
        Dependency::new(self.name, self.code, self.imports)
    }
}

impl TryFrom<UncheckedDependency> for Dependency {
    type Error = Error;

    fn try_from(raw: UncheckedDependency) -> Result<Self> {
        raw.validate()
    }
}

impl Dependency {
    /// Validate and build a dependency.
    ///
    /// `imports` maps the identifier bound inside `code` to the name of the
    /// dependency it resolves to.
    pub fn new(
        name: impl Into<String>,
        code: impl Into<String>,
        imports: BTreeMap<String, String>,
    ) -> Result<Self> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(Error::InvalidDependency(format!(
                "name {:?} is not an identifier",
                name
            )));
        }
        if imports.len() > MAX_IMPORTS {
            return Err(Error::TooManyImports {
                count: imports.len(),
                limit: MAX_IMPORTS,
            });
        }
        for (binding, target) in &imports {
            if binding == EVENTS_BINDING {
                return Err(Error::ShadowedArgument(vec![binding.clone()]));
            }
            if !is_identifier(binding) {
                return Err(Error::InvalidDependency(format!(
                    "{}: import binding {:?} is not an identifier",
                    name, binding
                )));
            }
            if !is_identifier(target) {
                return Err(Error::InvalidDependency(format!(
                    "{}: import target {:?} is not an identifier",
                    name, target
                )));
            }
        }
        Ok(Self {
            name,
            code: code.into(),
            imports,
        })
    }

    /// A dependency with no imports.
    pub fn leaf(name: impl Into<String>, code: impl Into<String>) -> Result<Self> {
        Self::new(name, code, BTreeMap::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Bound identifier → dependency name.
    pub fn imports(&self) -> &BTreeMap<String, String> {
        &self.imports
    }

    /// Names of the dependencies this one imports, deduplicated and sorted.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.imports.values().map(String::as_str).collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_literals::btree;

    #[test]
    fn identifiers() {
        assert!(is_identifier("x"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("$el"));
        assert!(is_identifier("größe"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("return"));
    }

    #[test]
    fn new_validates_name() {
        let err = Dependency::leaf("not valid", "return 1;").unwrap_err();
        assert!(matches!(err, Error::InvalidDependency(_)));
    }

    #[test]
    fn new_rejects_reserved_binding() {
        let imports = btree! { "events".to_string() => "other".to_string() };
        let err = Dependency::new("dep", "", imports).unwrap_err();
        assert!(matches!(err, Error::ShadowedArgument(_)));
    }

    #[test]
    fn new_caps_imports() {
        let imports: BTreeMap<String, String> = (0..=MAX_IMPORTS)
            .map(|i| (format!("b{i}"), format!("d{i}")))
            .collect();
        let err = Dependency::new("dep", "", imports).unwrap_err();
        assert_eq!(
            err,
            Error::TooManyImports {
                count: MAX_IMPORTS + 1,
                limit: MAX_IMPORTS
            }
        );
    }

    #[test]
    fn targets_are_deduplicated() {
        let imports = btree! {
            "a".to_string() => "math".to_string(),
            "b".to_string() => "math".to_string(),
            "c".to_string() => "io".to_string(),
        };
        let dep = Dependency::new("dep", "", imports).unwrap();
        assert_eq!(dep.targets(), vec!["io", "math"]);
    }

    #[test]
    fn wire_form_uses_dependencies_field() {
        let dep = Dependency::new(
            "sum",
            "return a + 1;",
            btree! { "a".to_string() => "one".to_string() },
        )
        .unwrap();
        let json = serde_json::to_value(&dep).unwrap();
        assert_eq!(json["dependencies"]["a"], "one");

        let back: Dependency = serde_json::from_value(json).unwrap();
        assert_eq!(back, dep);
    }

    #[test]
    fn deserialize_validates() {
        let json = serde_json::json!({ "name": "1bad", "code": "" });
        assert!(serde_json::from_value::<Dependency>(json).is_err());

        let json = serde_json::json!({ "name": "ok", "code": "return 1;" });
        let dep: Dependency = serde_json::from_value(json).unwrap();
        assert!(dep.imports().is_empty());
    }
}

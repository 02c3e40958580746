//! Process-wide registry of project types.
//!
//! Types are code, not data: the shipping set is registered once at first
//! use, and registering the same name twice is a programming bug that
//! panics. Tests build isolated registries instead of touching the global.

use crate::dsl::ProjectTypeConfig;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Default)]
pub struct TypeRegistry {
    configs: BTreeMap<String, Arc<ProjectTypeConfig>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Double registration of one name is fatal.
    pub fn register(&mut self, config: ProjectTypeConfig) {
        let name = config.name().to_string();
        assert!(
            !self.configs.contains_key(&name),
            "project type {name:?} registered twice"
        );
        self.configs.insert(name, Arc::new(config));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProjectTypeConfig>> {
        self.configs.get(name)
    }

    /// Sole reader for runtime lookups.
    pub fn lookup(&self, name: &str) -> Result<&Arc<ProjectTypeConfig>> {
        self.get(name)
            .ok_or_else(|| Error::NotFound(format!("project type {name:?}")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }
}

/// The registry populated with the shipping types.
pub fn builtin() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(crate::types::standard::config());
    registry.register(crate::types::exploration::config());
    registry.register(crate::types::design::config());
    registry.register(crate::types::breakdown::config());
    registry
}

/// Process-wide instance, built on first use.
pub fn global() -> &'static TypeRegistry {
    static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();
    GLOBAL.get_or_init(builtin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_contains_the_shipping_types() {
        let registry = builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["breakdown", "design", "exploration", "standard"]);
    }

    #[test]
    fn lookup_unknown_type_is_not_found() {
        let registry = builtin();
        assert!(registry.lookup("standard").is_ok());
        assert!(matches!(
            registry.lookup("mystery"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn double_registration_panics() {
        let mut registry = TypeRegistry::new();
        registry.register(crate::types::standard::config());
        registry.register(crate::types::standard::config());
    }

    #[test]
    fn global_is_stable() {
        let a = global();
        let b = global();
        assert!(std::ptr::eq(a, b));
        assert!(a.get("standard").is_some());
    }
}

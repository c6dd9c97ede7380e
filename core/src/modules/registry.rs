//! Module registry with copy-on-write isolation
//!
//! A registry is a handle onto an immutable snapshot. `clone()` copies the
//! handle only; the first mutating call on a handle whose snapshot is shared
//! copies the snapshot (`Arc::make_mut`), so a child execution context can
//! alias, disable or remove modules without its parent seeing the change.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::Module;
use crate::suggest::{did_you_mean, suggestion_suffix};

/// Builds a fresh module instance per lookup
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("module '{name}' is not registered{}", suggestion_suffix(.suggestion))]
    NotRegistered {
        name: String,
        suggestion: Option<String>,
    },

    #[error("module '{name}' has been removed")]
    Removed { name: String },

    #[error("module '{name}' is disabled")]
    Disabled { name: String },
}

impl RegistryError {
    pub fn key(&self) -> &'static str {
        match self {
            RegistryError::NotRegistered { .. } => "ModuleNotRegistered",
            RegistryError::Removed { .. } => "ModuleRemoved",
            RegistryError::Disabled { .. } => "ModuleDisabled",
        }
    }
}

#[derive(Clone, Default)]
struct RegistryState {
    modules: HashMap<String, ModuleFactory>,
    /// Injected replacements: module name → implementation name
    aliases: HashMap<String, String>,
    disabled: HashSet<String>,
    removed: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    state: Arc<RegistryState>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .field("aliases", &self.state.aliases)
            .field("disabled", &self.state.disabled)
            .field("removed", &self.state.removed)
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in modules registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &str, factory: ModuleFactory) {
        let key = name.to_lowercase();
        let state = self.state_mut();
        state.removed.remove(&key);
        state.modules.insert(key, factory);
    }

    /// Register a module type constructed with `Default`
    pub fn register_default<M>(&mut self, name: &str)
    where
        M: Module + Default + 'static,
    {
        self.register(name, Arc::new(|| Box::new(M::default()) as Box<dyn Module>));
    }

    /// Resolve `name` to `implementation` until the alias is cleared
    pub fn alias(&mut self, name: &str, implementation: &str) {
        self.state_mut()
            .aliases
            .insert(name.to_lowercase(), implementation.to_lowercase());
    }

    pub fn clear_alias(&mut self, name: &str) {
        self.state_mut().aliases.remove(&name.to_lowercase());
    }

    pub fn disable(&mut self, name: &str) {
        self.state_mut().disabled.insert(name.to_lowercase());
    }

    pub fn enable(&mut self, name: &str) {
        self.state_mut().disabled.remove(&name.to_lowercase());
    }

    pub fn remove(&mut self, name: &str) {
        let key = name.to_lowercase();
        let state = self.state_mut();
        state.modules.remove(&key);
        state.removed.insert(key);
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.state.disabled.contains(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.modules.contains_key(&self.resolve_name(name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether both handles still point at the same snapshot
    pub fn shares_state_with(&self, other: &ModuleRegistry) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Fresh instance of the module registered under `name`
    pub fn get(&self, name: &str) -> Result<Box<dyn Module>, RegistryError> {
        let requested = name.to_lowercase();
        if self.state.disabled.contains(&requested) {
            return Err(RegistryError::Disabled {
                name: name.to_string(),
            });
        }

        let key = self.resolve_name(name);
        if let Some(factory) = self.state.modules.get(&key) {
            return Ok(factory());
        }
        if self.state.removed.contains(&key) {
            return Err(RegistryError::Removed {
                name: name.to_string(),
            });
        }
        Err(RegistryError::NotRegistered {
            name: name.to_string(),
            suggestion: did_you_mean(name, self.state.modules.keys().map(String::as_str)),
        })
    }

    fn resolve_name(&self, name: &str) -> String {
        let key = name.to_lowercase();
        self.state.aliases.get(&key).cloned().unwrap_or(key)
    }

    fn state_mut(&mut self) -> &mut RegistryState {
        Arc::make_mut(&mut self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::builtin::{TimeModule, VariableModule};

    #[test]
    fn test_clone_shares_until_first_write() {
        let parent = ModuleRegistry::with_builtins();
        let mut child = parent.clone();
        assert!(child.shares_state_with(&parent));

        child.disable("variable");
        assert!(!child.shares_state_with(&parent));
        assert!(child.is_disabled("variable"));
        assert!(!parent.is_disabled("variable"));
        assert!(parent.get("variable").is_ok());
    }

    #[test]
    fn test_distinct_lookup_errors() {
        let mut registry = ModuleRegistry::with_builtins();
        registry.disable("time");
        registry.remove("user");

        assert!(matches!(registry.get("time"), Err(RegistryError::Disabled { .. })));
        assert!(matches!(registry.get("user"), Err(RegistryError::Removed { .. })));
        assert_eq!(
            registry.get("varaible").err(),
            Some(RegistryError::NotRegistered {
                name: "varaible".into(),
                suggestion: Some("variable".into()),
            })
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ModuleRegistry::with_builtins();
        let module = registry.get("Variable").expect("variable module");
        assert_eq!(module.name(), "variable");
    }

    #[test]
    fn test_alias_swaps_implementation() {
        let mut registry = ModuleRegistry::new();
        registry.register_default::<VariableModule>("variable");
        registry.register_default::<TimeModule>("clock");

        registry.alias("variable", "clock");
        assert_eq!(registry.get("variable").map(|m| m.name().to_string()).ok(), Some("time".into()));

        registry.clear_alias("variable");
        assert_eq!(
            registry.get("variable").map(|m| m.name().to_string()).ok(),
            Some("variable".into())
        );
    }

    #[test]
    fn test_register_after_remove_restores() {
        let mut registry = ModuleRegistry::new();
        registry.register_default::<TimeModule>("time");
        registry.remove("time");
        assert!(!registry.contains("time"));

        registry.register_default::<TimeModule>("time");
        assert!(registry.get("time").is_ok());
    }
}

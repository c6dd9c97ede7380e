//! Settings contract
//!
//! Settings persistence lives outside the core. The engine needs it for two
//! things: the run-once ledger, and `%Settings.Key%` lookups from variable
//! expressions. [`InMemorySettings`] is the default store.

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::RwLock;

/// Owner used for `%Settings.*%` lookups
pub const APP_OWNER: &str = "app";

/// Owner of the run-once completion ledger
pub const RUN_ONCE_OWNER: &str = "run_once";

/// Key/value settings store scoped by owner
pub trait Settings: Send + Sync {
    fn get(&self, owner: &str, key: &str) -> Option<JsonValue>;

    fn set(&self, owner: &str, key: &str, value: JsonValue);

    fn remove(&self, owner: &str, key: &str);
}

impl dyn Settings {
    /// Typed lookup; missing or mistyped values yield `default`
    pub fn get_or_default<T: DeserializeOwned>(&self, owner: &str, key: &str, default: T) -> T {
        self.get(owner, key)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(default)
    }
}

/// Settings held in process memory
///
/// Writes are last-writer-wins, which the run-once ledger tolerates since its
/// entries are idempotent keys.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: RwLock<HashMap<(String, String), JsonValue>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed settings for the app owner
    pub fn with_app_values(values: HashMap<String, JsonValue>) -> Self {
        let settings = Self::new();
        for (key, value) in values {
            settings.set(APP_OWNER, &key, value);
        }
        settings
    }
}

fn settings_key(owner: &str, key: &str) -> (String, String) {
    (owner.to_lowercase(), key.to_lowercase())
}

impl Settings for InMemorySettings {
    fn get(&self, owner: &str, key: &str) -> Option<JsonValue> {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(&settings_key(owner, key)).cloned())
    }

    fn set(&self, owner: &str, key: &str, value: JsonValue) {
        if let Ok(mut values) = self.values.write() {
            values.insert(settings_key(owner, key), value);
        }
    }

    fn remove(&self, owner: &str, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(&settings_key(owner, key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_owner_and_key_are_case_insensitive() {
        let settings = InMemorySettings::new();
        settings.set("App", "ApiKey", json!("secret"));
        assert_eq!(settings.get("app", "apikey"), Some(json!("secret")));
    }

    #[test]
    fn test_get_or_default() {
        let settings: Arc<dyn Settings> = Arc::new(InMemorySettings::new());
        settings.set(APP_OWNER, "retries", json!(3));

        assert_eq!(settings.get_or_default(APP_OWNER, "retries", 0u32), 3);
        assert_eq!(settings.get_or_default(APP_OWNER, "missing", 7u32), 7);
        assert_eq!(
            settings.get_or_default(APP_OWNER, "retries", "n/a".to_string()),
            "n/a"
        );
    }
}

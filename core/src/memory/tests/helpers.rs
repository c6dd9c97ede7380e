//! Test helpers for memory tests

use crate::memory::{MemoryStack, ProcessScope};
use crate::settings::{InMemorySettings, Settings};
use crate::types::{json_to_val, Val};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Empty stack over fresh settings and a private process scope
pub fn stack() -> MemoryStack {
    MemoryStack::new(ProcessScope::new(), Arc::new(InMemorySettings::new()))
}

/// Stack whose app settings are seeded with `values`
pub fn stack_with_settings(values: HashMap<String, JsonValue>) -> MemoryStack {
    let settings: Arc<dyn Settings> = Arc::new(InMemorySettings::with_app_values(values));
    MemoryStack::new(ProcessScope::new(), settings)
}

/// Stack preloaded with `name = json`
pub fn stack_with(name: &str, json: JsonValue) -> MemoryStack {
    let mut memory = stack();
    memory
        .put(name, json_to_val(&json))
        .expect("seed variable should be written");
    memory
}

pub fn s(text: &str) -> Val {
    Val::Str(text.to_string())
}

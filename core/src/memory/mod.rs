//! MemoryStack: the variable store goals read and write through
//!
//! Variables live in two scopes:
//! - instance scope, owned by one engine and reset when the engine returns
//!   to its pool
//! - process scope ([`ProcessScope`]), a handle shared by every engine the
//!   pool service creates for an app
//!
//! Lookups are case-insensitive and check the instance scope first.
//! Expressions (`%user.items[2].name%`, `%count+1%`) are parsed into an
//! [`ExecutionPlan`] and executed by `resolve.rs`; writes navigate the same
//! plans in `write.rs`. Writes never call event goals directly. They queue
//! [`PendingEvent`]s which the engine drains once the write has returned.

pub mod error;
pub mod jsonpath;
pub mod methods;
pub mod object_value;
pub mod plan;
mod resolve;
mod write;

#[cfg(test)]
mod tests;

pub use error::MemoryError;
pub use object_value::{goal_hash, ObjectValue, PendingEvent, VariableEvent};
pub use plan::{ExecutionPlan, ESCAPED_CLOSE, ESCAPED_DOT, ESCAPED_OPEN};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::settings::Settings;

/* ===================== Process Scope ===================== */

/// Variables shared across engines (`put_static`)
#[derive(Debug, Clone, Default)]
pub struct ProcessScope {
    vars: Arc<RwLock<HashMap<String, ObjectValue>>>,
}

impl ProcessScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<ObjectValue> {
        self.vars
            .read()
            .ok()
            .and_then(|vars| vars.get(key).cloned())
    }

    fn insert(&self, key: String, value: ObjectValue) {
        if let Ok(mut vars) = self.vars.write() {
            vars.insert(key, value);
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.vars
            .read()
            .map(|vars| vars.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.vars.read().map(|vars| vars.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/* ===================== Memory Stack ===================== */

pub struct MemoryStack {
    variables: HashMap<String, ObjectValue>,
    process: ProcessScope,
    settings: Arc<dyn Settings>,

    /// Tolerate unresolvable names (authoring/build mode)
    build_mode: bool,

    /// Raised while an event goal runs; writes queue no events
    in_event: bool,

    pending: Vec<PendingEvent>,
}

impl std::fmt::Debug for MemoryStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStack")
            .field("variables", &self.variables.len())
            .field("build_mode", &self.build_mode)
            .field("in_event", &self.in_event)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl MemoryStack {
    pub fn new(process: ProcessScope, settings: Arc<dyn Settings>) -> Self {
        Self {
            variables: HashMap::new(),
            process,
            settings,
            build_mode: false,
            in_event: false,
            pending: Vec::new(),
        }
    }

    pub fn with_build_mode(mut self, build_mode: bool) -> Self {
        self.build_mode = build_mode;
        self
    }

    pub fn build_mode(&self) -> bool {
        self.build_mode
    }

    pub fn settings(&self) -> &Arc<dyn Settings> {
        &self.settings
    }

    pub fn process_scope(&self) -> &ProcessScope {
        &self.process
    }

    pub fn in_event(&self) -> bool {
        self.in_event
    }

    /// Raise or clear the event recursion guard, returning the previous value
    pub fn set_in_event(&mut self, in_event: bool) -> bool {
        std::mem::replace(&mut self.in_event, in_event)
    }

    /// Events queued by writes since the last call
    pub fn take_pending_events(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Whether a variable is currently set (in either scope)
    pub fn contains(&self, name: &str) -> bool {
        let key = variable_key(name);
        self.lookup(&key).map(|v| v.initiated).unwrap_or(false)
    }

    /// Names of instance-scope variables that are set
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .variables
            .values()
            .filter(|v| v.initiated)
            .map(|v| v.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Drop instance state so the stack can serve another run
    pub fn reset(&mut self) {
        self.variables.clear();
        self.pending.clear();
        self.in_event = false;
    }

    fn lookup(&self, key: &str) -> Option<ObjectValue> {
        self.variables
            .get(key)
            .cloned()
            .or_else(|| self.process.get(key))
    }
}

/// Storage key of a variable name
pub(crate) fn variable_key(name: &str) -> String {
    plan::translate_escapes(&plan::strip_decorations(name)).to_lowercase()
}

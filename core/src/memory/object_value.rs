//! Typed variable wrapper and variable events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::types::{EventType, Val};

/// A variable's current value plus its lineage and subscribed events.
///
/// `initiated == false` means the variable is known to be absent, which is
/// distinct from a variable explicitly set to `Val::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    pub name: String,
    pub value: Val,
    pub type_name: String,
    pub initiated: bool,

    /// Expression of the value this one was navigated from (`user.address`
    /// for `user.address.city`)
    pub parent: Option<String>,

    pub events: Vec<VariableEvent>,
    pub updated: DateTime<Utc>,
}

impl ObjectValue {
    pub fn new(name: impl Into<String>, value: Val) -> Self {
        Self {
            name: name.into(),
            type_name: value.type_name().to_string(),
            value,
            initiated: true,
            parent: None,
            events: Vec::new(),
            updated: Utc::now(),
        }
    }

    /// A variable that has never been set (or was removed)
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Val::Null,
            type_name: Val::Null.type_name().to_string(),
            initiated: false,
            parent: None,
            events: Vec::new(),
            updated: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    /// Replacement carrying this value's subscriptions forward
    pub fn replaced_by(&self, value: Val) -> Self {
        let mut next = ObjectValue::new(self.name.clone(), value);
        next.events = self.events.clone();
        next
    }

    /// Events subscribed for a given type
    pub fn events_of(&self, event_type: EventType) -> impl Iterator<Item = &VariableEvent> {
        self.events
            .iter()
            .filter(move |event| event.event_type == event_type)
    }
}

/// A goal subscribed to a variable's create/change/remove
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEvent {
    pub event_type: EventType,
    pub goal_name: String,

    #[serde(default)]
    pub parameters: HashMap<String, JsonValue>,

    /// Await the callback before the triggering write returns
    #[serde(default = "default_wait")]
    pub wait_for_response: bool,

    /// Identifies the goal that registered the subscription
    #[serde(default)]
    pub calling_goal_hash: String,
}

fn default_wait() -> bool {
    true
}

impl VariableEvent {
    pub fn new(event_type: EventType, goal_name: impl Into<String>) -> Self {
        Self {
            event_type,
            goal_name: goal_name.into(),
            parameters: HashMap::new(),
            wait_for_response: true,
            calling_goal_hash: String::new(),
        }
    }

    pub fn no_wait(mut self) -> Self {
        self.wait_for_response = false;
        self
    }

    pub fn from_goal(mut self, goal_name: &str, goal_path: &str) -> Self {
        self.calling_goal_hash = goal_hash(goal_name, goal_path);
        self
    }

    fn same_subscription(&self, other: &VariableEvent) -> bool {
        self.event_type == other.event_type
            && self.goal_name.eq_ignore_ascii_case(&other.goal_name)
            && self.calling_goal_hash == other.calling_goal_hash
    }

    /// Add to a subscription list, replacing an identical subscription
    pub fn subscribe_into(self, events: &mut Vec<VariableEvent>) {
        events.retain(|existing| !existing.same_subscription(&self));
        events.push(self);
    }
}

/// Stable hash identifying a goal by name and path
pub fn goal_hash(goal_name: &str, goal_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(goal_path.as_bytes());
    hasher.update(b"\n");
    hasher.update(goal_name.to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// An event queued by a write, drained by the engine after the write returns
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub variable: String,
    pub value: Val,
    pub event: VariableEvent,
}

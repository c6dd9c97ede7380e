//! Event hook types
//!
//! Bindings attach callback goals to fixed points of a run: the start and end
//! of the app, before/after a goal or step, and goal- or step-level errors.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::goal::GoalCall;

/// Where an event is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    StartOfApp,
    EndOfApp,
    Goal,
    Step,
    Variable,
    GoalError,
    StepError,
}

/// When, relative to its target, an event fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Before,
    After,
    OnCreate,
    OnChange,
    OnRemove,
    OnError,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Before => write!(f, "before"),
            EventType::After => write!(f, "after"),
            EventType::OnCreate => write!(f, "on_create"),
            EventType::OnChange => write!(f, "on_change"),
            EventType::OnRemove => write!(f, "on_remove"),
            EventType::OnError => write!(f, "on_error"),
        }
    }
}

/// A callback goal bound to an event point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBinding {
    pub scope: EventScope,
    pub event_type: EventType,
    pub goal_to_call: GoalCall,

    /// Goal name the binding applies to: exact (case-insensitive), `*`, or
    /// a `prefix*` pattern. `None` matches every goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_filter: Option<String>,

    /// Case-insensitive substring of the step text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_filter: Option<String>,

    /// Error key an error binding is restricted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_filter: Option<String>,
}

impl EventBinding {
    pub fn new(scope: EventScope, event_type: EventType, goal_to_call: GoalCall) -> Self {
        Self {
            scope,
            event_type,
            goal_to_call,
            goal_filter: None,
            step_filter: None,
            key_filter: None,
        }
    }

    pub fn for_goal(mut self, pattern: impl Into<String>) -> Self {
        self.goal_filter = Some(pattern.into());
        self
    }

    pub fn for_step(mut self, text: impl Into<String>) -> Self {
        self.step_filter = Some(text.into());
        self
    }

    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        self.key_filter = Some(key.into());
        self
    }

    pub fn matches_goal(&self, goal_name: &str) -> bool {
        match &self.goal_filter {
            None => true,
            Some(pattern) if pattern == "*" => true,
            Some(pattern) => match pattern.strip_suffix('*') {
                Some(prefix) => goal_name
                    .to_lowercase()
                    .starts_with(&prefix.to_lowercase()),
                None => pattern.eq_ignore_ascii_case(goal_name),
            },
        }
    }

    pub fn matches_step(&self, step_text: &str) -> bool {
        match &self.step_filter {
            None => true,
            Some(text) => step_text.to_lowercase().contains(&text.to_lowercase()),
        }
    }

    pub fn matches_key(&self, key: &str) -> bool {
        match &self.key_filter {
            None => true,
            Some(filter) => filter == "*" || filter.eq_ignore_ascii_case(key),
        }
    }
}

//! Parsed goal graph
//!
//! Goals arrive already parsed and are read-only from then on: a library's
//! `Arc<Goal>`s are shared by every engine of a pool. Per-run bookkeeping
//! (which conditional blocks are open) lives in the engine's call stack,
//! run-once completion in the settings ledger.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use super::events::EventBinding;

/* ===================== Goal ===================== */

/// A named, ordered sequence of steps
#[derive(Debug, Serialize, Deserialize)]
pub struct Goal {
    pub name: String,

    #[serde(default)]
    pub steps: Vec<GoalStep>,

    /// Name of the goal this one was declared under (nested/pseudo goals)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_goal: Option<String>,

    /// Free-text annotation; may carry a log-level tag such as `[debug]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Path identifier of the goal source, relative to the app root
    #[serde(default)]
    pub path: String,

    /// Setup goals run before any requested goal
    #[serde(default)]
    pub is_setup: bool,

    /// Module implementations this goal swaps in for the duration of its run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub injections: Vec<Injection>,
}

impl Goal {
    pub fn new(name: impl Into<String>, steps: Vec<GoalStep>) -> Self {
        let name = name.into();
        let mut steps = steps;
        for (idx, step) in steps.iter_mut().enumerate() {
            step.index = idx;
        }
        Self {
            path: format!("/{}.goal", name),
            name,
            steps,
            parent_goal: None,
            comment: None,
            is_setup: false,
            injections: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn setup(mut self) -> Self {
        self.is_setup = true;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_goal = Some(parent.into());
        self
    }

    pub fn with_injection(mut self, module_type: &str, implementation: &str) -> Self {
        self.injections.push(Injection {
            module_type: module_type.to_string(),
            implementation: implementation.to_string(),
        });
        self
    }
}

/// A module swap declared by a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Injection {
    pub module_type: String,
    pub implementation: String,
}

/* ===================== Step ===================== */

/// One module-function invocation plus its retry/cancellation/conditional policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalStep {
    #[serde(default)]
    pub index: usize,

    /// Free-text description as written by the author
    #[serde(default)]
    pub text: String,

    /// Short name of the module implementing this step
    pub module_type: String,

    pub instruction: Instruction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default)]
    pub run_once: bool,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_handlers: Vec<ErrorHandler>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationHandler>,

    #[serde(default)]
    pub indent: usize,
}

impl GoalStep {
    pub fn new(module_type: impl Into<String>, instruction: Instruction) -> Self {
        let module_type = module_type.into();
        Self {
            index: 0,
            text: format!("{}.{}", module_type, instruction.function),
            module_type,
            instruction,
            comment: None,
            run_once: false,
            disabled: false,
            error_handlers: Vec::new(),
            cancellation: None,
            indent: 0,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handlers.push(handler);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationHandler) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// The function a step calls and its parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub function: String,

    /// Parameter values may reference variables (`"%user.name%"`)
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Variable the function's return value is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_variable: Option<String>,
}

impl Instruction {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            parameters: Vec::new(),
            return_variable: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            value,
        });
        self
    }

    pub fn returns(mut self, variable: impl Into<String>) -> Self {
        self.return_variable = Some(variable.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: JsonValue,
}

/* ===================== Policies ===================== */

/// Invocation of another goal, with parameters that may reference variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalCall {
    pub name: String,

    #[serde(default)]
    pub parameters: HashMap<String, JsonValue>,
}

impl GoalCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Declared recovery for a failing step
///
/// A handler with no `message`, `key` or `status_code` catches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandler {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default)]
    pub ignore_error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_to_call: Option<GoalCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Retry until the budget runs out before calling `goal_to_call`
    #[serde(default)]
    pub retry_before_goal: bool,
}

impl ErrorHandler {
    pub fn catch_all() -> Self {
        Self::default()
    }

    pub fn on_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn on_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn on_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::default()
        }
    }

    pub fn retry(mut self, count: u32, delay_ms: u64) -> Self {
        self.retry = Some(RetryPolicy { count, delay_ms });
        self
    }

    pub fn retry_first(mut self) -> Self {
        self.retry_before_goal = true;
        self
    }

    pub fn call(mut self, goal: GoalCall) -> Self {
        self.goal_to_call = Some(goal);
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignore_error = true;
        self
    }

    pub fn is_catch_all(&self) -> bool {
        self.message.is_none() && self.key.is_none() && self.status_code.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub count: u32,

    #[serde(default)]
    pub delay_ms: u64,
}

/// Per-step timeout and the goal to run instead when it fires
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancellationHandler {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_to_call: Option<GoalCall>,
}

/* ===================== Library ===================== */

/// On-disk shape of a parsed goal set
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GoalLibraryFile {
    #[serde(default)]
    pub goals: Vec<Goal>,

    #[serde(default)]
    pub events: Vec<EventBinding>,

    #[serde(default)]
    pub default_goal: Option<String>,
}

/// The immutable goal set every engine of an app runs against
#[derive(Debug, Default)]
pub struct GoalLibrary {
    goals: HashMap<String, Arc<Goal>>,
    setup: Vec<String>,
    events: Vec<EventBinding>,
    default_goal: Option<String>,
}

impl GoalLibrary {
    pub fn new(goals: Vec<Goal>, events: Vec<EventBinding>) -> Self {
        let mut library = GoalLibrary {
            events,
            ..Default::default()
        };
        for goal in goals {
            library.insert(goal);
        }
        library
    }

    pub fn from_file(file: GoalLibraryFile) -> Self {
        let mut library = Self::new(file.goals, file.events);
        library.default_goal = file.default_goal;
        library
    }

    fn insert(&mut self, mut goal: Goal) {
        for (idx, step) in goal.steps.iter_mut().enumerate() {
            step.index = idx;
        }
        if goal.is_setup {
            self.setup.push(goal.name.clone());
        }
        self.goals.insert(goal.name.to_lowercase(), Arc::new(goal));
    }

    /// Goal lookup is case-insensitive
    pub fn get(&self, name: &str) -> Option<Arc<Goal>> {
        self.goals.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.goals.values().map(|g| g.name.as_str())
    }

    pub fn setup_goals(&self) -> Vec<Arc<Goal>> {
        self.setup.iter().filter_map(|name| self.get(name)).collect()
    }

    pub fn events(&self) -> &[EventBinding] {
        &self.events
    }

    pub fn default_goal(&self) -> Option<&str> {
        self.default_goal.as_deref()
    }
}

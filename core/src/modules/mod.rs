//! Modules: the units a step's function call is dispatched to
//!
//! A module is looked up by short name in the [`ModuleRegistry`]; the step
//! names one of its functions. Modules never call back into the engine.
//! Anything that needs the engine (calling a goal, ending a goal, marking a
//! conditional branch) is returned as a [`ModuleOutput`] and carried out by
//! the engine once the call has returned.

pub mod builtin;
pub mod registry;

pub use registry::{ModuleFactory, ModuleRegistry, RegistryError};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::context::ExecutionContext;
use crate::engine::errors::EngineError;
use crate::engine::interactive::InteractiveError;
use crate::memory::MemoryStack;
use crate::settings::Settings;
use crate::types::{Goal, GoalCall, GoalStep, Instruction, Val};

/* ===================== Module Trait ===================== */

#[async_trait]
pub trait Module: Send {
    fn name(&self) -> &str;

    /// Functions this module answers to (matched case-insensitively)
    fn functions(&self) -> &'static [&'static str];

    async fn call(&mut self, function: &str, ctx: &mut StepContext<'_>) -> anyhow::Result<ModuleOutput>;
}

/// What a module function asks the engine to do next
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOutput {
    /// Plain result, stored in the step's return variable if it has one
    Value(Val),
    None,
    /// Run another goal; its return value becomes this step's result
    CallGoal(GoalCall),
    /// Stop `levels` enclosing goal iterations
    Exit { levels: usize },
    /// End the current goal with a value
    Return(Option<Val>),
    /// Outcome of a condition: raise or lower the next indented block
    Branch(bool),
}

/* ===================== Step Context ===================== */

/// Everything a module function is bound to for one call
pub struct StepContext<'a> {
    pub goal: &'a Arc<Goal>,
    pub step: &'a GoalStep,
    pub instruction: &'a Instruction,
    pub memory: &'a mut MemoryStack,
    pub context: &'a mut ExecutionContext,

    /// Cancelled when the step times out
    pub cancel: CancellationToken,
}

impl<'a> StepContext<'a> {
    pub fn settings(&self) -> Arc<dyn Settings> {
        self.memory.settings().clone()
    }

    /// Resolved parameter value, `None` when the instruction lacks it
    pub fn param_opt(&self, name: &str) -> Result<Option<Val>, EngineError> {
        match self
            .instruction
            .parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
        {
            Some(param) => Ok(Some(self.memory.resolve_json(&param.value)?)),
            None => Ok(None),
        }
    }

    /// Resolved parameter value; a missing parameter is a step error
    pub fn param(&self, name: &str) -> Result<Val, EngineError> {
        self.param_opt(name)?.ok_or_else(|| {
            EngineError::Step(
                crate::engine::errors::StepError::new(format!(
                    "{}.{} requires parameter '{}'",
                    self.step.module_type, self.instruction.function, name
                ))
                .with_key("MissingParameter"),
            )
        })
    }

    /// Parameter as text, without resolving `%...%` references
    ///
    /// Used for parameters that name a variable rather than read one.
    pub fn raw_param(&self, name: &str) -> Result<String, EngineError> {
        let raw = self
            .instruction
            .parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| match &p.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        match raw {
            Some(raw) => Ok(raw),
            None => self.param(name).map(|v| v.to_string()),
        }
    }

    /// Fail with an interactive request unless `path` has been granted
    pub fn require_file_access(&self, path: &str) -> Result<(), EngineError> {
        if self.context.has_file_grant(path) {
            Ok(())
        } else {
            Err(EngineError::Interactive(InteractiveError::FileAccess {
                path: path.to_string(),
            }))
        }
    }
}

/// Case-insensitive membership in a module's function list
pub fn has_function(module: &dyn Module, function: &str) -> bool {
    module
        .functions()
        .iter()
        .any(|f| f.eq_ignore_ascii_case(function))
}

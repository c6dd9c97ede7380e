//! Step execution: skip rules, dispatch to a module, output handling

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::errors::EngineError;
use super::Engine;
use crate::modules::{has_function, ModuleOutput, RegistryError, StepContext};
use crate::settings::RUN_ONCE_OWNER;
use crate::suggest::did_you_mean;
use crate::types::{Control, EventType, Goal, GoalStep, Val};

/// Ledger key recording that a run-once step completed
pub fn run_once_key(goal: &Goal, step: &GoalStep) -> String {
    let mut hasher = Sha256::new();
    hasher.update(goal.path.as_bytes());
    hasher.update(step.index.to_le_bytes());
    hasher.update(step.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Engine {
    /// Run the step at `idx` of `goal`
    pub(crate) async fn run_step(&mut self, goal: &Arc<Goal>, idx: usize) -> Result<Control, EngineError> {
        let step = &goal.steps[idx];
        if step.disabled {
            debug!(goal = %goal.name, step = idx, "step disabled, skipped");
            return Ok(Control::None);
        }
        if step.indent > 0 && !self.call_stack.is_open(idx) {
            trace!(goal = %goal.name, step = idx, "conditional block not taken");
            return Ok(Control::None);
        }

        let ledger_key = step.run_once.then(|| run_once_key(goal, step));
        if let Some(key) = &ledger_key {
            if self.memory.settings().get(RUN_ONCE_OWNER, key).is_some() {
                debug!(goal = %goal.name, step = idx, "run-once step already done");
                return Ok(Control::None);
            }
        }

        let previous_level = self.context.enter_log_scope(step.comment.as_deref());
        self.call_stack.enter_step(idx);
        let result = self.run_step_scoped(goal, idx, ledger_key).await;
        self.call_stack.leave_step();
        self.context.restore_log_level(previous_level);
        result
    }

    async fn run_step_scoped(
        &mut self,
        goal: &Arc<Goal>,
        idx: usize,
        ledger_key: Option<String>,
    ) -> Result<Control, EngineError> {
        let step = &goal.steps[idx];
        self.run_step_events(goal, step, EventType::Before).await?;
        crate::report!(self.context.log_level(), goal = %goal.name, step = idx, text = %step.text, "step started");

        let result = self.run_with_recovery(goal, idx).await;
        if step.indent > 0 {
            self.call_stack.set_open([idx], false);
        }
        let control = result?;

        if let Some(key) = ledger_key {
            self.memory
                .settings()
                .set(RUN_ONCE_OWNER, &key, json!(Utc::now().to_rfc3339()));
        }

        self.run_step_events(goal, step, EventType::After).await?;
        self.run_deferred_events().await;
        Ok(control)
    }

    /// One attempt: look up the module, call it under the step timeout and
    /// carry out its output
    pub(crate) async fn dispatch(&mut self, goal: &Arc<Goal>, idx: usize) -> Result<Control, EngineError> {
        let step = &goal.steps[idx];
        let mut module = match self.registry.get(&step.module_type) {
            Ok(module) => module,
            Err(RegistryError::Disabled { name }) => {
                debug!(module = %name, "module disabled, step skipped");
                return Ok(Control::None);
            }
            Err(err) => return Err(err.into()),
        };

        let function = step.instruction.function.as_str();
        if !has_function(module.as_ref(), function) {
            return Err(EngineError::FunctionNotFound {
                module: step.module_type.clone(),
                function: function.to_string(),
                suggestion: did_you_mean(function, module.functions().iter().copied()),
            });
        }

        let timeout_ms = step
            .cancellation
            .as_ref()
            .and_then(|c| c.timeout_ms)
            .unwrap_or(self.config.step_timeout_ms);
        let cancel = CancellationToken::new();

        let outcome = {
            let mut ctx = StepContext {
                goal,
                step,
                instruction: &step.instruction,
                memory: &mut self.memory,
                context: &mut self.context,
                cancel: cancel.clone(),
            };
            tokio::time::timeout(Duration::from_millis(timeout_ms), module.call(function, &mut ctx)).await
        };

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                let err = EngineError::from_module(err);
                if let Err(event_err) = self.fire_variable_events().await {
                    warn!(error = %event_err, "variable event failed after step error");
                }
                return Err(err);
            }
            Err(_) => {
                cancel.cancel();
                warn!(goal = %goal.name, step = idx, timeout_ms, "step timed out");
                self.fire_variable_events().await?;
                return match step.cancellation.as_ref().and_then(|c| c.goal_to_call.as_ref()) {
                    Some(fallback) => match self.call_goal(fallback, HashMap::new()).await? {
                        exit @ Control::Exit { .. } => Ok(exit),
                        _ => Ok(Control::None),
                    },
                    None => Err(EngineError::Timeout {
                        step: step.text.clone(),
                        timeout_ms,
                    }),
                };
            }
        };

        self.fire_variable_events().await?;
        self.apply_output(goal, idx, output).await
    }

    async fn apply_output(
        &mut self,
        goal: &Arc<Goal>,
        idx: usize,
        output: ModuleOutput,
    ) -> Result<Control, EngineError> {
        let step = &goal.steps[idx];
        match output {
            ModuleOutput::Value(value) => {
                self.store_return(step, value).await?;
                Ok(Control::None)
            }
            ModuleOutput::None => Ok(Control::None),
            ModuleOutput::CallGoal(call) => match self.call_goal(&call, HashMap::new()).await? {
                Control::Return(value) => {
                    if let Some(value) = value {
                        self.store_return(step, value).await?;
                    }
                    Ok(Control::None)
                }
                other => Ok(other),
            },
            ModuleOutput::Exit { levels } => Ok(Control::Exit {
                levels: levels.max(1),
            }),
            ModuleOutput::Return(value) => Ok(Control::Return(value)),
            ModuleOutput::Branch(taken) => {
                self.call_stack.set_open(branch_block(goal, idx), taken);
                Ok(Control::None)
            }
        }
    }

    async fn store_return(&mut self, step: &GoalStep, value: Val) -> Result<(), EngineError> {
        if let Some(variable) = &step.instruction.return_variable {
            self.memory.put(variable, value)?;
            self.fire_variable_events().await?;
        }
        Ok(())
    }
}

/// Steps guarded by the condition step at `idx`
///
/// The block is every following step one level deeper, up to the first
/// step at the condition's own level or shallower.
fn branch_block(goal: &Goal, idx: usize) -> Vec<usize> {
    let indent = goal.steps[idx].indent;
    goal.steps
        .iter()
        .enumerate()
        .skip(idx + 1)
        .take_while(|(_, step)| step.indent > indent)
        .filter(|(_, step)| step.indent == indent + 1)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instruction;

    fn step(indent: usize) -> GoalStep {
        GoalStep::new("variable", Instruction::new("set")).with_indent(indent)
    }

    #[test]
    fn test_branch_block_stops_at_sibling() {
        let goal = Goal::new(
            "Main",
            vec![step(0), step(1), step(2), step(1), step(0), step(1)],
        );
        assert_eq!(branch_block(&goal, 0), vec![1, 3]);
        assert_eq!(branch_block(&goal, 1), vec![2]);
        assert!(branch_block(&goal, 5).is_empty());
    }

    #[test]
    fn test_run_once_key_depends_on_position() {
        let goal = Goal::new("Main", vec![step(0), step(0)]);
        assert_ne!(run_once_key(&goal, &goal.steps[0]), run_once_key(&goal, &goal.steps[1]));
        assert_eq!(run_once_key(&goal, &goal.steps[0]).len(), 64);
    }
}

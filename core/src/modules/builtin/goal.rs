use async_trait::async_trait;

use super::unknown_function;
use crate::engine::errors::StepError;
use crate::modules::{Module, ModuleOutput, StepContext};
use crate::types::GoalCall;

/// Goal calls and goal-level control flow
#[derive(Debug, Default)]
pub struct GoalModule;

#[async_trait]
impl Module for GoalModule {
    fn name(&self) -> &str {
        "goal"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["call", "end", "return", "throw"]
    }

    async fn call(&mut self, function: &str, ctx: &mut StepContext<'_>) -> anyhow::Result<ModuleOutput> {
        match function.to_lowercase().as_str() {
            "call" => {
                let name = ctx.param("name")?.to_string();
                let mut call = GoalCall::new(name);
                if let Some(params) = ctx
                    .instruction
                    .parameters
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case("parameters"))
                    .and_then(|p| p.value.as_object())
                {
                    for (key, value) in params {
                        call = call.param(key.clone(), value.clone());
                    }
                }
                Ok(ModuleOutput::CallGoal(call))
            }
            "end" => {
                let levels = ctx
                    .param_opt("levels")?
                    .and_then(|v| v.as_num())
                    .map(|n| n.max(1.0) as usize)
                    .unwrap_or(1);
                Ok(ModuleOutput::Exit { levels })
            }
            "return" => Ok(ModuleOutput::Return(ctx.param_opt("value")?)),
            "throw" => {
                let message = ctx.param("message")?.to_string();
                let mut error = StepError::new(message);
                if let Some(key) = ctx.param_opt("key")?.filter(|k| !k.is_null()) {
                    error = error.with_key(key.to_string());
                }
                if let Some(code) = ctx.param_opt("status_code")?.and_then(|c| c.as_num()) {
                    error = error.with_status(code as u16);
                }
                Err(error.into())
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

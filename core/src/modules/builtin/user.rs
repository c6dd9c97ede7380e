use async_trait::async_trait;

use super::{unknown_function, variable_name};
use crate::engine::interactive::InteractiveError;
use crate::engine::errors::EngineError;
use crate::modules::{Module, ModuleOutput, StepContext};

/// Questions for the user, answered through the interactive handler
#[derive(Debug, Default)]
pub struct UserModule;

#[async_trait]
impl Module for UserModule {
    fn name(&self) -> &str {
        "user"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["ask"]
    }

    async fn call(&mut self, function: &str, ctx: &mut StepContext<'_>) -> anyhow::Result<ModuleOutput> {
        match function.to_lowercase().as_str() {
            "ask" => {
                let question = ctx.param("question")?.to_string();
                let answer_variable = variable_name(&ctx.raw_param("answer")?);

                let answer = ctx.memory.get_value(&answer_variable)?;
                if !answer.is_null() {
                    return Ok(ModuleOutput::Value(answer));
                }
                Err(EngineError::Interactive(InteractiveError::Ask {
                    question,
                    answer_variable,
                })
                .into())
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

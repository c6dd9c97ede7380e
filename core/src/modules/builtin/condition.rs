use async_trait::async_trait;

use super::unknown_function;
use crate::modules::{Module, ModuleOutput, StepContext};

/// Conditional blocks: `if` raises the following indented steps
#[derive(Debug, Default)]
pub struct ConditionModule;

#[async_trait]
impl Module for ConditionModule {
    fn name(&self) -> &str {
        "condition"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["if"]
    }

    async fn call(&mut self, function: &str, ctx: &mut StepContext<'_>) -> anyhow::Result<ModuleOutput> {
        match function.to_lowercase().as_str() {
            "if" => {
                let value = ctx.param("value")?;
                Ok(ModuleOutput::Branch(value.is_truthy()))
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

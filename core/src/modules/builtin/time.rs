use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::unknown_function;
use crate::modules::{Module, ModuleOutput, StepContext};
use crate::types::Val;

#[derive(Debug, Default)]
pub struct TimeModule;

#[async_trait]
impl Module for TimeModule {
    fn name(&self) -> &str {
        "time"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["sleep", "now"]
    }

    async fn call(&mut self, function: &str, ctx: &mut StepContext<'_>) -> anyhow::Result<ModuleOutput> {
        match function.to_lowercase().as_str() {
            "sleep" => {
                let ms = ctx.param("ms")?.as_num().unwrap_or_default().max(0.0) as u64;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    _ = ctx.cancel.cancelled() => {}
                }
                Ok(ModuleOutput::None)
            }
            "now" => Ok(ModuleOutput::Value(Val::Date(Utc::now()))),
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

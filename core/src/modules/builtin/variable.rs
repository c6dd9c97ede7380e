use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use super::{unknown_function, variable_name};
use crate::memory::VariableEvent;
use crate::modules::{Module, ModuleOutput, StepContext};
use crate::engine::errors::{EngineError, StepError};
use crate::types::{EventType, Val};

/// Variable reads, writes and change subscriptions
#[derive(Debug, Default)]
pub struct VariableModule;

#[async_trait]
impl Module for VariableModule {
    fn name(&self) -> &str {
        "variable"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["set", "set_static", "get", "remove", "append", "subscribe"]
    }

    async fn call(&mut self, function: &str, ctx: &mut StepContext<'_>) -> anyhow::Result<ModuleOutput> {
        match function.to_lowercase().as_str() {
            "set" => {
                let name = variable_name(&ctx.raw_param("name")?);
                let value = ctx.param_opt("value")?.unwrap_or_default();
                ctx.memory.put(&name, value)?;
                Ok(ModuleOutput::None)
            }
            "set_static" => {
                let name = variable_name(&ctx.raw_param("name")?);
                let value = ctx.param_opt("value")?.unwrap_or_default();
                ctx.memory.put_static(&name, value)?;
                Ok(ModuleOutput::None)
            }
            "get" => {
                let name = variable_name(&ctx.raw_param("name")?);
                Ok(ModuleOutput::Value(ctx.memory.get_value(&name)?))
            }
            "remove" => {
                let name = variable_name(&ctx.raw_param("name")?);
                ctx.memory.remove(&name)?;
                Ok(ModuleOutput::None)
            }
            "append" => {
                let name = variable_name(&ctx.raw_param("name")?);
                let value = ctx.param("value")?;
                let appended = match ctx.memory.get_value(&name)? {
                    Val::Null => Val::List(vec![value]),
                    Val::List(mut items) => {
                        items.push(value);
                        Val::List(items)
                    }
                    Val::Str(text) => Val::Str(format!("{}{}", text, value)),
                    other => Val::List(vec![other, value]),
                };
                ctx.memory.put(&name, appended)?;
                Ok(ModuleOutput::None)
            }
            "subscribe" => {
                let name = variable_name(&ctx.raw_param("name")?);
                let event_type = parse_event_type(&ctx.param("event")?.to_string())?;
                let goal = ctx.param("goal")?.to_string();
                let wait = ctx.param_opt("wait")?.map(|v| v.is_truthy()).unwrap_or(true);

                let mut event = VariableEvent::new(event_type, goal)
                    .from_goal(&ctx.goal.name, &ctx.goal.path);
                event.wait_for_response = wait;
                event.parameters = raw_parameters(ctx);
                ctx.memory.subscribe(&name, event);
                Ok(ModuleOutput::None)
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

fn parse_event_type(text: &str) -> Result<EventType, EngineError> {
    let normalized = text.to_lowercase().replace(['_', ' '], "");
    match normalized.trim_start_matches("on") {
        "create" | "created" => Ok(EventType::OnCreate),
        "change" | "changed" => Ok(EventType::OnChange),
        "remove" | "removed" | "delete" | "deleted" => Ok(EventType::OnRemove),
        _ => Err(EngineError::Step(
            StepError::new(format!("unknown variable event '{}'", text)).with_key("InvalidEvent"),
        )),
    }
}

/// Callback parameters, passed through unresolved
fn raw_parameters(ctx: &StepContext<'_>) -> HashMap<String, JsonValue> {
    ctx.instruction
        .parameters
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case("parameters"))
        .and_then(|p| p.value.as_object())
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

//! Test helpers for engine tests
//!
//! `Probe` is a recording module registered as `probe`: every call appends
//! to a shared log so tests can assert what ran, in which order.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::engine::errors::StepError;
use crate::engine::interactive::{InteractiveError, InteractiveHandler};
use crate::engine::Engine;
use crate::modules::{Module, ModuleOutput, ModuleRegistry, StepContext};
use crate::types::{EventBinding, Goal, GoalLibrary, GoalStep, Instruction, Val};

/* ===================== Probe Module ===================== */

#[derive(Clone, Default)]
pub struct Probe {
    log: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    /// Builtins plus `probe` and `altprobe` (entries prefixed `alt:`)
    pub fn registry(&self) -> ModuleRegistry {
        let mut registry = ModuleRegistry::with_builtins();
        for (name, prefix) in [("probe", ""), ("altprobe", "alt:")] {
            let probe = self.clone();
            registry.register(
                name,
                Arc::new(move || {
                    Box::new(ProbeModule {
                        probe: probe.clone(),
                        prefix,
                    }) as Box<dyn Module>
                }),
            );
        }
        registry
    }
}

struct ProbeModule {
    probe: Probe,
    prefix: &'static str,
}

#[async_trait]
impl Module for ProbeModule {
    fn name(&self) -> &str {
        "probe"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["record", "fail", "flaky", "slow", "file", "memo"]
    }

    async fn call(&mut self, function: &str, ctx: &mut StepContext<'_>) -> anyhow::Result<ModuleOutput> {
        match function {
            "record" => {
                let label = ctx.param("label")?.to_string();
                self.probe.push(format!("{}{}", self.prefix, label));
                Ok(ModuleOutput::Value(Val::Str(label)))
            }
            "fail" => {
                let message = ctx.param("message")?.to_string();
                let key = ctx.param("key")?.to_string();
                self.probe.push(message.clone());
                Err(StepError::new(message).with_key(key).into())
            }
            // Fails until it has been called `times` times before
            "flaky" => {
                let label = ctx.param("label")?.to_string();
                let times = ctx.param("times")?.as_num().unwrap_or_default() as usize;
                let before = self.probe.count(&label);
                self.probe.push(label.clone());
                if before < times {
                    Err(StepError::new(format!("{} not ready", label)).into())
                } else {
                    Ok(ModuleOutput::Value(Val::Str(label)))
                }
            }
            "slow" => {
                let ms = ctx.param("ms")?.as_num().unwrap_or_default() as u64;
                self.probe.push("slow:start".into());
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.probe.push("slow:end".into());
                Ok(ModuleOutput::None)
            }
            "file" => {
                let path = ctx.param("path")?.to_string();
                self.probe.push("attempt".into());
                ctx.require_file_access(&path)?;
                self.probe.push(format!("read:{}", path));
                Ok(ModuleOutput::None)
            }
            "memo" => {
                let label = ctx.param("label")?.to_string();
                if let Some(cached) = ctx.context.cache_get(&label) {
                    return Ok(ModuleOutput::Value(cached.clone()));
                }
                self.probe.push(format!("computed:{}", label));
                ctx.context.cache_put(label.clone(), Val::Str(label.clone()));
                Ok(ModuleOutput::Value(Val::Str(label)))
            }
            other => anyhow::bail!("unexpected probe function {}", other),
        }
    }
}

/* ===================== Interactive Handlers ===================== */

/// Answers every request with the same value, or fails every request
pub struct ScriptedAnswers {
    answer: Result<Option<Val>, String>,
    pub seen: Mutex<Vec<InteractiveError>>,
}

impl ScriptedAnswers {
    pub fn answering(answer: Val) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(Some(answer)),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(reason.to_string()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl InteractiveHandler for ScriptedAnswers {
    async fn handle(&self, request: &InteractiveError) -> anyhow::Result<Option<Val>> {
        self.seen.lock().unwrap().push(request.clone());
        match &self.answer {
            Ok(answer) => Ok(answer.clone()),
            Err(reason) => anyhow::bail!("{}", reason),
        }
    }
}

/* ===================== Builders ===================== */

pub fn test_config() -> EngineConfig {
    EngineConfig {
        step_timeout_ms: 1_000,
        event_delay_ms: 0,
        build_mode: false,
        max_call_depth: 16,
    }
}

pub fn engine(goals: Vec<Goal>, events: Vec<EventBinding>, probe: &Probe) -> Engine {
    Engine::builder(Arc::new(GoalLibrary::new(goals, events)))
        .registry(probe.registry())
        .config(test_config())
        .build()
}

fn probe_step(function: &str, params: &[(&str, JsonValue)]) -> GoalStep {
    let mut instruction = Instruction::new(function);
    for (name, value) in params {
        instruction = instruction.param(*name, value.clone());
    }
    GoalStep::new("probe", instruction).with_text(format!("probe {}", function))
}

pub fn record(label: &str) -> GoalStep {
    probe_step("record", &[("label", json!(label))]).with_text(format!("record {}", label))
}

pub fn fail(message: &str, key: &str) -> GoalStep {
    probe_step("fail", &[("message", json!(message)), ("key", json!(key))])
}

pub fn flaky(label: &str, times: usize) -> GoalStep {
    probe_step("flaky", &[("label", json!(label)), ("times", json!(times))])
}

pub fn slow(ms: u64) -> GoalStep {
    probe_step("slow", &[("ms", json!(ms))])
}

pub fn call(goal: &str) -> GoalStep {
    GoalStep::new("goal", Instruction::new("call").param("name", json!(goal)))
        .with_text(format!("call {}", goal))
}

pub fn end(levels: usize) -> GoalStep {
    GoalStep::new("goal", Instruction::new("end").param("levels", json!(levels)))
}

pub fn set(name: &str, value: JsonValue) -> GoalStep {
    GoalStep::new(
        "variable",
        Instruction::new("set")
            .param("name", json!(name))
            .param("value", value),
    )
    .with_text(format!("set {}", name))
}

pub fn condition(value: JsonValue) -> GoalStep {
    GoalStep::new("condition", Instruction::new("if").param("value", value))
}

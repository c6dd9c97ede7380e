//! Goal engine
//!
//! One [`Engine`] executes goals against its own memory stack, call stack
//! and execution context. Engines are cheap to reset and are normally
//! rented from an [`crate::pool::EnginePool`].
//!
//! Control flow:
//! - `run` → setup goals, start events, the requested goals, end events
//! - `run_goal` → Before events, each step (see `step.rs`), After events
//! - step failures go through the recovery loop in `retry.rs`
//! - hooks are fired from `events.rs`
//!
//! Goal calls recurse through boxed futures (`EngineFuture`).

pub mod context;
pub mod errors;
mod events;
pub mod interactive;
mod retry;
mod step;

#[cfg(test)]
mod tests;

pub use events::EventRegistry;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::callstack::{CallStack, EventOrigin};
use crate::config::EngineConfig;
use crate::memory::{MemoryStack, ProcessScope};
use crate::modules::ModuleRegistry;
use crate::settings::{InMemorySettings, Settings};
use crate::suggest::did_you_mean;
use crate::types::{Control, EventScope, EventType, Goal, GoalCall, GoalLibrary, Val};

use context::ExecutionContext;
use errors::{EngineError, ErrorKind};
use interactive::{InteractiveHandler, NoInteraction};

pub(crate) type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/* ===================== Engine ===================== */

pub struct Engine {
    id: Uuid,
    library: Arc<GoalLibrary>,
    events: Arc<EventRegistry>,
    /// Registry restored on reset
    base_registry: ModuleRegistry,
    registry: ModuleRegistry,
    memory: MemoryStack,
    call_stack: CallStack,
    context: ExecutionContext,
    interactive: Arc<dyn InteractiveHandler>,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("memory", &self.memory)
            .field("depth", &self.call_stack.depth())
            .finish()
    }
}

impl Engine {
    pub fn builder(library: Arc<GoalLibrary>) -> EngineBuilder {
        EngineBuilder::new(library)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn library(&self) -> &Arc<GoalLibrary> {
        &self.library
    }

    pub fn memory(&self) -> &MemoryStack {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryStack {
        &mut self.memory
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// Swap in another registry handle (e.g. a parent's, copy-on-write)
    /// until the next reset
    pub fn set_registry(&mut self, registry: ModuleRegistry) {
        self.registry = registry;
    }

    /// Make `registry` the one restored on reset as well
    pub fn rebase_registry(&mut self, registry: ModuleRegistry) {
        self.base_registry = registry.clone();
        self.registry = registry;
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clear per-run state so the engine can serve another request
    ///
    /// The process scope, settings and library are shared and survive.
    pub fn reset(&mut self) {
        self.registry = self.base_registry.clone();
        self.memory.reset();
        self.call_stack.clear();
        self.context.reset();
    }

    /* ===================== Run ===================== */

    /// Run the named goals, or the library's default goal when none are given
    ///
    /// Setup goals run first, then start-of-app events, the goals in order
    /// and end-of-app events. Returns the last goal's return value.
    pub async fn run(&mut self, goal_names: &[&str]) -> Result<Option<Val>, EngineError> {
        let span = tracing::info_span!("run", engine = %self.id);
        self.run_inner(goal_names).instrument(span).await
    }

    async fn run_inner(&mut self, goal_names: &[&str]) -> Result<Option<Val>, EngineError> {
        let mut goals = Vec::with_capacity(goal_names.len());
        let names: Vec<String> = if goal_names.is_empty() {
            self.library.default_goal().map(str::to_string).into_iter().collect()
        } else {
            goal_names.iter().map(|n| n.to_string()).collect()
        };
        for name in &names {
            goals.push(self.find_goal(name)?);
        }

        for goal in self.library.setup_goals() {
            debug!(goal = %goal.name, "setup goal");
            self.run_goal(goal, None).await?;
        }

        self.run_start_end_events(EventScope::StartOfApp).await?;

        let mut result = None;
        for goal in goals {
            result = match self.run_goal(goal, None).await? {
                Control::Return(value) => value,
                _ => None,
            };
        }

        self.run_start_end_events(EventScope::EndOfApp).await?;
        self.run_deferred_events().await;

        info!(goals = ?names, "run finished");
        Ok(result)
    }

    fn find_goal(&self, name: &str) -> Result<Arc<Goal>, EngineError> {
        self.library.get(name).ok_or_else(|| EngineError::GoalNotFound {
            name: name.to_string(),
            suggestion: did_you_mean(name, self.library.names()),
        })
    }

    /* ===================== Goals ===================== */

    /// Resolve a goal call's parameters, bind them, and run the goal
    pub fn call_goal<'a>(
        &'a mut self,
        call: &'a GoalCall,
        extra: HashMap<String, Val>,
    ) -> EngineFuture<'a, Control> {
        self.call_goal_from(call, extra, None)
    }

    pub(crate) fn call_goal_from<'a>(
        &'a mut self,
        call: &'a GoalCall,
        extra: HashMap<String, Val>,
        origin: Option<EventOrigin>,
    ) -> EngineFuture<'a, Control> {
        Box::pin(async move {
            let goal = self.find_goal(&call.name)?;

            let mut bound = extra;
            for (name, raw) in &call.parameters {
                bound.insert(name.clone(), self.memory.resolve_json(raw)?);
            }
            for (name, value) in &bound {
                self.memory.put(name, value.clone())?;
            }
            self.fire_variable_events().await?;

            self.run_goal_bound(goal, origin, bound).await
        })
    }

    /// Run one goal in a new call-stack frame
    pub fn run_goal(&mut self, goal: Arc<Goal>, origin: Option<EventOrigin>) -> EngineFuture<'_, Control> {
        self.run_goal_bound(goal, origin, HashMap::new())
    }

    fn run_goal_bound(
        &mut self,
        goal: Arc<Goal>,
        origin: Option<EventOrigin>,
        locals: HashMap<String, Val>,
    ) -> EngineFuture<'_, Control> {
        let span = tracing::debug_span!("goal", name = %goal.name);
        Box::pin(
            async move {
                if self.call_stack.depth() >= self.config.max_call_depth {
                    return Err(EngineError::StackOverflow {
                        depth: self.config.max_call_depth,
                        trace: self.call_stack.stack_trace(),
                    });
                }

                let previous_level = self.context.enter_log_scope(goal.comment.as_deref());
                let saved_registry = self.apply_injections(&goal);
                self.call_stack.push(goal.clone(), origin);
                if let Some(frame) = self.call_stack.current_mut() {
                    frame.locals = locals;
                }

                let result = self.run_goal_body(&goal).await;

                self.call_stack.pop();
                if let Some(registry) = saved_registry {
                    self.registry = registry;
                }
                self.context.restore_log_level(previous_level);
                result
            }
            .instrument(span),
        )
    }

    async fn run_goal_body(&mut self, goal: &Arc<Goal>) -> Result<Control, EngineError> {
        self.run_goal_events(goal, EventType::Before).await?;
        crate::report!(self.context.log_level(), goal = %goal.name, steps = goal.steps.len(), "goal started");

        let mut control = Control::None;
        for idx in 0..goal.steps.len() {
            match self.run_step(goal, idx).await {
                Ok(Control::None) => {}
                Ok(stop) => {
                    control = stop;
                    break;
                }
                // Recovered by an error event, or already handled: the goal ends here
                Err(err) => match self.run_goal_error_events(goal, err).await {
                    Ok(()) => break,
                    Err(err) if err.kind() == ErrorKind::AlreadyHandled => {
                        warn!(goal = %goal.name, error = %err, "goal ended by a handled error");
                        break;
                    }
                    Err(err) => return Err(err),
                },
            }
        }

        self.run_goal_events(goal, EventType::After).await?;
        crate::report!(self.context.log_level(), goal = %goal.name, "goal finished");
        Ok(control.unwind())
    }

    /// Alias injected modules for the goal's run; returns the registry to restore
    fn apply_injections(&mut self, goal: &Goal) -> Option<ModuleRegistry> {
        if goal.injections.is_empty() {
            return None;
        }
        let saved = self.registry.clone();
        for injection in &goal.injections {
            debug!(module = %injection.module_type, implementation = %injection.implementation, "injecting module");
            self.registry.alias(&injection.module_type, &injection.implementation);
        }
        Some(saved)
    }
}

/* ===================== Builder ===================== */

pub struct EngineBuilder {
    library: Arc<GoalLibrary>,
    registry: Option<ModuleRegistry>,
    process: Option<ProcessScope>,
    settings: Option<Arc<dyn Settings>>,
    interactive: Option<Arc<dyn InteractiveHandler>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(library: Arc<GoalLibrary>) -> Self {
        Self {
            library,
            registry: None,
            process: None,
            settings: None,
            interactive: None,
            config: EngineConfig::default(),
        }
    }

    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share a process scope (static variables) with other engines
    pub fn process_scope(mut self, process: ProcessScope) -> Self {
        self.process = Some(process);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn interactive(mut self, handler: Arc<dyn InteractiveHandler>) -> Self {
        self.interactive = Some(handler);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine {
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(InMemorySettings::new()));
        let memory = MemoryStack::new(self.process.unwrap_or_default(), settings)
            .with_build_mode(self.config.build_mode);
        let events = Arc::new(EventRegistry::new(self.library.events().to_vec()));
        let registry = self.registry.unwrap_or_else(ModuleRegistry::with_builtins);

        Engine {
            id: Uuid::new_v4(),
            events,
            library: self.library,
            base_registry: registry.clone(),
            registry,
            memory,
            call_stack: CallStack::new(),
            context: ExecutionContext::new(),
            interactive: self.interactive.unwrap_or_else(|| Arc::new(NoInteraction)),
            config: self.config,
        }
    }
}

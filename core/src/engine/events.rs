//! Event hooks: bindings, matching and the engine's fixed call points
//!
//! Call points:
//! - `run_start_end_events`: around a whole `Engine::run`
//! - `run_goal_events`: Before/After every goal
//! - `run_step_events`: Before/After every step (once per step, not per retry)
//! - `run_on_error_step_events`: a step error no handler matched
//! - `run_goal_error_events`: a step error that escaped its step
//!
//! Event goals run with the re-entrancy flag raised and never trigger
//! events themselves.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::errors::{EngineError, ErrorKind};
use super::Engine;
use crate::callstack::EventOrigin;
use crate::memory::PendingEvent;
use crate::types::{EventBinding, EventScope, EventType, Goal, GoalCall, GoalStep, Val};

/* ===================== Registry ===================== */

/// Event bindings of a goal library
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    bindings: Vec<EventBinding>,
}

impl EventRegistry {
    pub fn new(bindings: Vec<EventBinding>) -> Self {
        Self { bindings }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings for a scope, in declaration order
    ///
    /// `event_type: None` matches any type (app start/end). Filters a
    /// binding declares must all match; absent context (`None`) fails a
    /// declared filter.
    pub fn matching(
        &self,
        scope: EventScope,
        event_type: Option<EventType>,
        goal_name: Option<&str>,
        step_text: Option<&str>,
        key: Option<&str>,
    ) -> Vec<EventBinding> {
        self.bindings
            .iter()
            .filter(|b| b.scope == scope)
            .filter(|b| event_type.map(|t| t == b.event_type).unwrap_or(true))
            .filter(|b| b.goal_filter.is_none() || goal_name.is_some_and(|g| b.matches_goal(g)))
            .filter(|b| b.step_filter.is_none() || step_text.is_some_and(|s| b.matches_step(s)))
            .filter(|b| b.key_filter.is_none() || key.is_some_and(|k| b.matches_key(k)))
            .cloned()
            .collect()
    }
}

/// Parameters describing an error for an error-event or handler goal
pub(crate) fn error_parameters(err: &EngineError) -> HashMap<String, Val> {
    let mut detail = HashMap::new();
    detail.insert("message".to_string(), Val::Str(err.to_string()));
    detail.insert("key".to_string(), Val::Str(err.key().to_string()));
    detail.insert(
        "status_code".to_string(),
        err.status_code().map(|c| Val::Num(c as f64)).unwrap_or(Val::Null),
    );
    HashMap::from([("error".to_string(), Val::Obj(detail))])
}

/* ===================== Engine Call Points ===================== */

impl Engine {
    pub async fn run_start_end_events(&mut self, scope: EventScope) -> Result<(), EngineError> {
        if self.context.in_event() {
            return Ok(());
        }
        let bindings = self.events.matching(scope, None, None, None, None);
        for binding in bindings {
            let origin = EventOrigin {
                scope,
                event_type: binding.event_type,
            };
            self.run_event_goal(&binding.goal_to_call, origin, HashMap::new())
                .await?;
        }
        Ok(())
    }

    pub async fn run_goal_events(&mut self, goal: &Goal, event_type: EventType) -> Result<(), EngineError> {
        if self.context.in_event() {
            return Ok(());
        }
        let bindings = self
            .events
            .matching(EventScope::Goal, Some(event_type), Some(&goal.name), None, None);
        for binding in bindings {
            let params = HashMap::from([("goal".to_string(), Val::Str(goal.name.clone()))]);
            let origin = EventOrigin {
                scope: EventScope::Goal,
                event_type,
            };
            self.run_event_goal(&binding.goal_to_call, origin, params)
                .await?;
        }
        Ok(())
    }

    pub async fn run_step_events(
        &mut self,
        goal: &Goal,
        step: &GoalStep,
        event_type: EventType,
    ) -> Result<(), EngineError> {
        if self.context.in_event() {
            return Ok(());
        }
        let bindings = self.events.matching(
            EventScope::Step,
            Some(event_type),
            Some(&goal.name),
            Some(&step.text),
            None,
        );
        for binding in bindings {
            let params = HashMap::from([
                ("goal".to_string(), Val::Str(goal.name.clone())),
                ("step".to_string(), Val::Str(step.text.clone())),
            ]);
            let origin = EventOrigin {
                scope: EventScope::Step,
                event_type,
            };
            self.run_event_goal(&binding.goal_to_call, origin, params)
                .await?;
        }
        Ok(())
    }

    /// Step-level error events; `Ok` means the error was handled
    pub async fn run_on_error_step_events(
        &mut self,
        goal: &Goal,
        step: &GoalStep,
        err: EngineError,
    ) -> Result<(), EngineError> {
        if self.context.in_event() || err.kind() == ErrorKind::AlreadyHandled {
            return Err(err);
        }
        let bindings = self.events.matching(
            EventScope::StepError,
            Some(EventType::OnError),
            Some(&goal.name),
            Some(&step.text),
            Some(err.key()),
        );
        self.run_error_bindings(bindings, EventScope::StepError, err).await
    }

    /// Goal-level error events; `Ok` means the error was handled
    pub async fn run_goal_error_events(&mut self, goal: &Goal, err: EngineError) -> Result<(), EngineError> {
        if self.context.in_event() || err.kind() == ErrorKind::AlreadyHandled {
            return Err(err);
        }
        let bindings = self.events.matching(
            EventScope::GoalError,
            Some(EventType::OnError),
            Some(&goal.name),
            None,
            Some(err.key()),
        );
        self.run_error_bindings(bindings, EventScope::GoalError, err).await
    }

    async fn run_error_bindings(
        &mut self,
        bindings: Vec<EventBinding>,
        scope: EventScope,
        err: EngineError,
    ) -> Result<(), EngineError> {
        if bindings.is_empty() {
            return Err(err);
        }
        let origin = EventOrigin {
            scope,
            event_type: EventType::OnError,
        };
        for binding in bindings {
            debug!(goal = %binding.goal_to_call.name, error = %err, "running error event");
            if let Err(handler_err) = self
                .run_event_goal(&binding.goal_to_call, origin, error_parameters(&err))
                .await
            {
                return Err(EngineError::aggregate(err, handler_err).handled());
            }
        }
        Ok(())
    }

    /// Run an event goal with the re-entrancy flag raised
    pub(crate) async fn run_event_goal(
        &mut self,
        call: &GoalCall,
        origin: EventOrigin,
        params: HashMap<String, Val>,
    ) -> Result<(), EngineError> {
        let previous_ctx = self.context.set_in_event(true);
        let previous_mem = self.memory.set_in_event(true);
        let result = self.call_goal_from(call, params, Some(origin)).await;
        self.memory.set_in_event(previous_mem);
        self.context.set_in_event(previous_ctx);
        result.map(|_| ())
    }

    /* ===================== Variable Events ===================== */

    /// Run awaited variable events queued by writes; defer the rest
    pub(crate) async fn fire_variable_events(&mut self) -> Result<(), EngineError> {
        for pending in self.memory.take_pending_events() {
            if pending.event.wait_for_response {
                self.run_variable_event(pending).await?;
            } else {
                self.context.defer(pending);
            }
        }
        Ok(())
    }

    /// Fire deferred variable events after the configured delay
    ///
    /// Failures are logged; nobody is waiting on these.
    pub(crate) async fn run_deferred_events(&mut self) {
        let deferred = self.context.take_deferred();
        if deferred.is_empty() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(self.config.event_delay_ms)).await;
        for pending in deferred {
            let goal = pending.event.goal_name.clone();
            if let Err(err) = self.run_variable_event(pending).await {
                warn!(goal = %goal, error = %err, "deferred variable event failed");
            }
        }
    }

    async fn run_variable_event(&mut self, pending: PendingEvent) -> Result<(), EngineError> {
        let PendingEvent {
            variable,
            value,
            event,
        } = pending;
        debug!(variable = %variable, goal = %event.goal_name, event = %event.event_type, "variable event");

        let call = GoalCall {
            name: event.goal_name.clone(),
            parameters: event.parameters.clone(),
        };
        let detail = HashMap::from([
            ("variable".to_string(), Val::Str(variable)),
            ("value".to_string(), value),
            ("type".to_string(), Val::Str(event.event_type.to_string())),
        ]);
        let params = HashMap::from([("event".to_string(), Val::Obj(detail))]);
        let origin = EventOrigin {
            scope: EventScope::Variable,
            event_type: event.event_type,
        };
        self.run_event_goal(&call, origin, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_respects_filters() {
        let registry = EventRegistry::new(vec![
            EventBinding::new(EventScope::Goal, EventType::Before, GoalCall::new("Audit")),
            EventBinding::new(EventScope::Goal, EventType::Before, GoalCall::new("AuditApi"))
                .for_goal("Api*"),
            EventBinding::new(EventScope::GoalError, EventType::OnError, GoalCall::new("OnTimeout"))
                .for_key("Timeout"),
        ]);

        let names = |bindings: Vec<EventBinding>| -> Vec<String> {
            bindings.into_iter().map(|b| b.goal_to_call.name).collect()
        };

        assert_eq!(
            names(registry.matching(EventScope::Goal, Some(EventType::Before), Some("Main"), None, None)),
            vec!["Audit"]
        );
        assert_eq!(
            names(registry.matching(EventScope::Goal, Some(EventType::Before), Some("ApiCall"), None, None)),
            vec!["Audit", "AuditApi"]
        );
        assert!(registry
            .matching(EventScope::Goal, Some(EventType::After), Some("Main"), None, None)
            .is_empty());
        assert_eq!(
            names(registry.matching(
                EventScope::GoalError,
                Some(EventType::OnError),
                Some("Main"),
                None,
                Some("Timeout")
            )),
            vec!["OnTimeout"]
        );
        assert!(registry
            .matching(EventScope::GoalError, Some(EventType::OnError), Some("Main"), None, Some("Other"))
            .is_empty());
    }
}

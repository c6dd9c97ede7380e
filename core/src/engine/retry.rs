//! Step recovery loop
//!
//! Order for a failed attempt:
//! 1. handled, aggregate and configuration errors leave unchanged
//! 2. interactive errors go to the interactive handler; an answer re-runs
//!    the step from scratch
//! 3. the first matching error handler decides between retrying, calling
//!    its goal and ignoring the error
//! 4. whatever survives goes to the step error events
//!
//! An exhausted retry budget always reports the first error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::errors::{EngineError, ErrorKind, StepError};
use super::events::error_parameters;
use super::interactive::InteractiveError;
use super::Engine;
use crate::settings::APP_OWNER;
use crate::types::{val_to_json, Control, ErrorHandler, Goal, Val};

/// First handler matching `err`
///
/// Handlers are tried in declaration order. For each one: catch-all, then a
/// case-insensitive message substring, then key (or `*`), then status code.
pub fn select_handler<'h>(handlers: &'h [ErrorHandler], err: &EngineError) -> Option<&'h ErrorHandler> {
    let message = err.to_string().to_lowercase();
    let key = err.key();
    let status = err.status_code();

    handlers.iter().find(|handler| {
        handler.is_catch_all()
            || handler
                .message
                .as_ref()
                .is_some_and(|m| message.contains(&m.to_lowercase()))
            || handler
                .key
                .as_ref()
                .is_some_and(|k| k == "*" || k.eq_ignore_ascii_case(key))
            || (handler.status_code.is_some() && handler.status_code == status)
    })
}

impl Engine {
    pub(crate) async fn run_with_recovery(&mut self, goal: &Arc<Goal>, idx: usize) -> Result<Control, EngineError> {
        let step = &goal.steps[idx];
        let mut retries: u32 = 0;
        let mut first_error: Option<EngineError> = None;

        loop {
            let err = match self.dispatch(goal, idx).await {
                Ok(control) => return Ok(control),
                Err(err) => err,
            };

            match err.kind() {
                ErrorKind::AlreadyHandled | ErrorKind::Aggregate | ErrorKind::Configuration => return Err(err),
                ErrorKind::Interactive => {
                    if let Some(request) = err.interactive() {
                        match self.interactive.handle(&request).await {
                            Ok(Some(answer)) => {
                                if self.apply_answer(&request, answer).await? {
                                    debug!(goal = %goal.name, step = idx, request = %request, "answered, re-running step");
                                    continue;
                                }
                            }
                            Ok(None) => {}
                            Err(cause) => {
                                return Err(EngineError::aggregate(
                                    err,
                                    EngineError::Step(StepError::from_cause(cause)),
                                ));
                            }
                        }
                    }
                }
                ErrorKind::Recoverable => {}
            }

            let Some(handler) = select_handler(&step.error_handlers, &err) else {
                return self.step_error_events(goal, idx, first_error.unwrap_or(err)).await;
            };

            let budget = handler.retry.map(|r| r.count).unwrap_or(0);
            let delay = Duration::from_millis(handler.retry.map(|r| r.delay_ms).unwrap_or(0));
            let can_retry = retries < budget;
            let params = error_parameters(&err);
            warn!(goal = %goal.name, step = idx, attempt = retries + 1, error = %err, "step failed");
            let err = first_error.take().unwrap_or(err);

            if can_retry && (handler.retry_before_goal || handler.goal_to_call.is_none()) {
                first_error = Some(err);
                retries += 1;
                tokio::time::sleep(delay).await;
                continue;
            }

            if let Some(call) = &handler.goal_to_call {
                info!(goal = %call.name, error = %err, "calling error handler goal");
                self.call_goal(call, params).await?;
                if can_retry {
                    first_error = Some(err);
                    retries += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                if handler.retry.is_none() {
                    return Ok(Control::None);
                }
            } else if handler.ignore_error && handler.retry.is_none() {
                debug!(goal = %goal.name, step = idx, "error ignored");
                return Ok(Control::None);
            }

            return self.step_error_events(goal, idx, err).await;
        }
    }

    /// Last stop inside the step: error events may still recover it
    async fn step_error_events(&mut self, goal: &Arc<Goal>, idx: usize, err: EngineError) -> Result<Control, EngineError> {
        self.run_on_error_step_events(goal, &goal.steps[idx], err)
            .await
            .map(|_| Control::None)
    }

    /// Apply an interactive answer; `false` when the answer declines
    async fn apply_answer(&mut self, request: &InteractiveError, answer: Val) -> Result<bool, EngineError> {
        match request {
            InteractiveError::Ask { answer_variable, .. } => {
                self.memory.put(answer_variable, answer)?;
                self.fire_variable_events().await?;
            }
            InteractiveError::MissingSetting { key } => {
                self.memory.settings().set(APP_OWNER, key, val_to_json(&answer));
            }
            InteractiveError::FileAccess { path } => {
                if !answer.is_truthy() {
                    return Ok(false);
                }
                self.context.grant_file(path);
            }
        }
        Ok(true)
    }
}

//! Interactive intervention
//!
//! Some step errors are requests for an answer rather than failures: a
//! question for the user, a missing setting, a file outside the sandbox.
//! The host answers them through an [`InteractiveHandler`]; the engine
//! applies the answer and runs the step again from the start.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Val;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InteractiveError {
    #[error("{question}")]
    Ask {
        question: String,
        answer_variable: String,
    },

    #[error("setting '{key}' is required")]
    MissingSetting { key: String },

    #[error("access to '{path}' requires permission")]
    FileAccess { path: String },
}

impl InteractiveError {
    pub fn key(&self) -> &'static str {
        match self {
            InteractiveError::Ask { .. } => "Ask",
            InteractiveError::MissingSetting { .. } => "MissingSetting",
            InteractiveError::FileAccess { .. } => "FileAccess",
        }
    }
}

/// Host-side answering of interactive errors
///
/// `Ok(Some(answer))` handles the request, `Ok(None)` declines it (the error
/// then goes through the step's error handlers), `Err` is a failure that is
/// aggregated with the original error.
#[async_trait]
pub trait InteractiveHandler: Send + Sync {
    async fn handle(&self, request: &InteractiveError) -> anyhow::Result<Option<Val>>;
}

/// Declines every request (headless runs)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInteraction;

#[async_trait]
impl InteractiveHandler for NoInteraction {
    async fn handle(&self, _request: &InteractiveError) -> anyhow::Result<Option<Val>> {
        Ok(None)
    }
}

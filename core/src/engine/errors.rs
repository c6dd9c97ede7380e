//! Engine error taxonomy
//!
//! Every failure surfacing from a step or goal is an [`EngineError`].
//! [`EngineError::kind`] decides how the step/goal loops treat it.
//! Early exits are not errors: they travel as `Control::Exit`.

use thiserror::Error;

use super::interactive::InteractiveError;
use crate::memory::MemoryError;
use crate::modules::RegistryError;
use crate::suggest::suggestion_suffix;

/// How the engine treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ordinary step error, eligible for handlers and retries
    Recoverable,
    /// Needs an out-of-band answer before the step can run
    Interactive,
    /// Already went through the error-event pipeline; passes through
    AlreadyHandled,
    /// An error plus the failure raised while handling it
    Aggregate,
    /// Unresolvable module, function or goal; never retried
    Configuration,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("module '{module}' has no function '{function}'{}", suggestion_suffix(.suggestion))]
    FunctionNotFound {
        module: String,
        function: String,
        suggestion: Option<String>,
    },

    #[error("goal '{name}' not found{}", suggestion_suffix(.suggestion))]
    GoalNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Interactive(#[from] InteractiveError),

    #[error("step '{step}' timed out after {timeout_ms} ms")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("goal call depth exceeded {depth}:\n{trace}")]
    StackOverflow { depth: usize, trace: String },

    #[error("{original}; while handling it: {handler}")]
    Aggregate {
        original: Box<EngineError>,
        handler: Box<EngineError>,
    },

    #[error("{0}")]
    AlreadyHandled(Box<EngineError>),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Memory(MemoryError::MissingSetting { .. }) => ErrorKind::Interactive,
            EngineError::Interactive(_) => ErrorKind::Interactive,
            EngineError::Memory(_)
            | EngineError::Step(_)
            | EngineError::Timeout { .. }
            | EngineError::StackOverflow { .. } => ErrorKind::Recoverable,
            EngineError::Registry(_)
            | EngineError::FunctionNotFound { .. }
            | EngineError::GoalNotFound { .. } => ErrorKind::Configuration,
            EngineError::Aggregate { .. } => ErrorKind::Aggregate,
            EngineError::AlreadyHandled(_) => ErrorKind::AlreadyHandled,
        }
    }

    /// Key error handlers and error events match on
    pub fn key(&self) -> &str {
        match self {
            EngineError::Memory(err) => err.key(),
            EngineError::Registry(err) => err.key(),
            EngineError::FunctionNotFound { .. } => "FunctionNotFound",
            EngineError::GoalNotFound { .. } => "GoalNotFound",
            EngineError::Step(err) => &err.key,
            EngineError::Interactive(err) => err.key(),
            EngineError::Timeout { .. } => "Timeout",
            EngineError::StackOverflow { .. } => "StackOverflow",
            EngineError::Aggregate { original, .. } => original.key(),
            EngineError::AlreadyHandled(inner) => inner.key(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            EngineError::Step(err) => err.status_code,
            EngineError::Aggregate { original, .. } => original.status_code(),
            EngineError::AlreadyHandled(inner) => inner.status_code(),
            _ => None,
        }
    }

    /// The out-of-band request this error is waiting on
    pub fn interactive(&self) -> Option<InteractiveError> {
        match self {
            EngineError::Interactive(err) => Some(err.clone()),
            EngineError::Memory(MemoryError::MissingSetting { key }) => {
                Some(InteractiveError::MissingSetting { key: key.clone() })
            }
            _ => None,
        }
    }

    pub fn aggregate(original: EngineError, handler: EngineError) -> Self {
        EngineError::Aggregate {
            original: Box::new(original),
            handler: Box::new(handler),
        }
    }

    /// Mark an error as having been through the error-event pipeline
    pub fn handled(self) -> Self {
        match self {
            EngineError::AlreadyHandled(_) => self,
            other => EngineError::AlreadyHandled(Box::new(other)),
        }
    }

    /// Convert an error raised by module code
    ///
    /// Engine and memory errors keep their identity; anything else becomes a
    /// [`StepError`] carrying the original as its cause.
    pub fn from_module(err: anyhow::Error) -> Self {
        match err.downcast::<EngineError>() {
            Ok(engine) => engine,
            Err(err) => match err.downcast::<MemoryError>() {
                Ok(memory) => EngineError::Memory(memory),
                Err(err) => match err.downcast::<StepError>() {
                    Ok(step) => EngineError::Step(step),
                    Err(err) => EngineError::Step(StepError::from_cause(err)),
                },
            },
        }
    }
}

/// A failure raised by a step's module function
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
    pub key: String,
    pub status_code: Option<u16>,

    #[source]
    pub cause: Option<anyhow::Error>,
}

impl StepError {
    pub const DEFAULT_KEY: &'static str = "StepError";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: Self::DEFAULT_KEY.to_string(),
            status_code: None,
            cause: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn from_cause(cause: anyhow::Error) -> Self {
        Self {
            message: format!("{:#}", cause),
            key: Self::DEFAULT_KEY.to_string(),
            status_code: None,
            cause: Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_errors_become_step_errors() {
        let err = EngineError::from_module(anyhow::anyhow!("disk full"));
        assert_eq!(err.kind(), ErrorKind::Recoverable);
        assert_eq!(err.key(), StepError::DEFAULT_KEY);
        let EngineError::Step(step) = &err else {
            unreachable!("Expected a step error, got {:?}", err);
        };
        assert!(step.cause.is_some());
        assert_eq!(step.message, "disk full");
    }

    #[test]
    fn test_engine_errors_keep_identity_through_anyhow() {
        let original = EngineError::Step(StepError::new("nope").with_key("Denied").with_status(403));
        let err = EngineError::from_module(anyhow::Error::new(original));
        assert_eq!(err.key(), "Denied");
        assert_eq!(err.status_code(), Some(403));
    }

    #[test]
    fn test_missing_setting_is_interactive() {
        let err = EngineError::from_module(anyhow::Error::new(MemoryError::MissingSetting {
            key: "ApiKey".into(),
        }));
        assert_eq!(err.kind(), ErrorKind::Interactive);
        assert_eq!(
            err.interactive(),
            Some(InteractiveError::MissingSetting { key: "ApiKey".into() })
        );
    }

    #[test]
    fn test_handled_is_idempotent() {
        let err = EngineError::Step(StepError::new("x")).handled().handled();
        let EngineError::AlreadyHandled(inner) = &err else {
            unreachable!("Expected AlreadyHandled");
        };
        assert!(matches!(**inner, EngineError::Step(_)));
        assert_eq!(err.kind(), ErrorKind::AlreadyHandled);
    }
}

//! Execution core for goal-oriented scripts
//!
//! - [`engine`]: goal/step execution, error recovery, events
//! - [`memory`]: variable store and `%...%` resolution
//! - [`modules`]: module registry and built-in modules
//! - [`pool`]: engine pooling for concurrent runs
//! - [`callstack`]: active goal frames

/// Emit a progress event at a level chosen at runtime
#[macro_export]
macro_rules! report {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            tracing::Level::TRACE => tracing::trace!($($arg)+),
            tracing::Level::DEBUG => tracing::debug!($($arg)+),
            tracing::Level::INFO => tracing::info!($($arg)+),
            tracing::Level::WARN => tracing::warn!($($arg)+),
            _ => tracing::error!($($arg)+),
        }
    };
}

pub mod callstack;
pub mod cli;
pub mod config;
pub mod engine;
pub mod memory;
pub mod modules;
pub mod pool;
pub mod settings;
pub mod suggest;
pub mod types;

// Re-export main types
pub use config::Config;
pub use engine::errors::{EngineError, ErrorKind};
pub use engine::Engine;
pub use memory::MemoryStack;
pub use modules::{Module, ModuleOutput, ModuleRegistry};
pub use pool::{EnginePool, EnginePoolService, PooledEngine};
pub use types::*;

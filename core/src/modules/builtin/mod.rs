//! Built-in modules registered in every registry
//!
//! Each module is a capability map: a fixed list of function names and a
//! `call` that dispatches on the (lowercased) name.

mod condition;
mod goal;
mod time;
mod user;
mod variable;

pub use condition::ConditionModule;
pub use goal::GoalModule;
pub use time::TimeModule;
pub use user::UserModule;
pub use variable::VariableModule;

use super::ModuleRegistry;
use crate::engine::errors::{EngineError, StepError};

pub fn register_all(registry: &mut ModuleRegistry) {
    registry.register_default::<VariableModule>("variable");
    registry.register_default::<GoalModule>("goal");
    registry.register_default::<ConditionModule>("condition");
    registry.register_default::<TimeModule>("time");
    registry.register_default::<UserModule>("user");
}

/// Error for a function name the module does not implement
///
/// The engine checks function names before dispatch, so this is only
/// reached when a module is called directly.
fn unknown_function(module: &str, function: &str) -> anyhow::Error {
    EngineError::Step(
        StepError::new(format!("module '{}' has no function '{}'", module, function))
            .with_key("FunctionNotFound"),
    )
    .into()
}

/// Strip `%` delimiters from a parameter that names a variable
fn variable_name(raw: &str) -> String {
    raw.trim().trim_matches('%').to_string()
}

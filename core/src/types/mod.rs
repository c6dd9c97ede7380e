//! Type definitions shared by the engine
//!
//! - Goal graph (Goal, GoalStep, Instruction, policies)
//! - Step/goal control flow (Control)
//! - Event bindings
//! - Runtime values (Val)

pub mod control;
pub mod events;
pub mod goal;
pub mod values;

pub use control::Control;
pub use events::{EventBinding, EventScope, EventType};
pub use goal::{
    CancellationHandler, ErrorHandler, Goal, GoalCall, GoalLibrary, GoalLibraryFile, GoalStep,
    Injection, Instruction, Parameter, RetryPolicy,
};
pub use values::{format_num, json_to_val, val_to_json, Val};

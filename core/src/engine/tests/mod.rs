//! Tests for the goal engine
//!
//! Organized by concern: execution, recovery, events

mod helpers;
mod run_tests;

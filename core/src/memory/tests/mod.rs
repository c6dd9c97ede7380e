//! Tests for the memory stack
//!
//! Organized by concern: reads, writes, events

mod event_tests;
mod helpers;
mod resolve_tests;

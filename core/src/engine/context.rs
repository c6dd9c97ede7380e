//! Per-engine execution context
//!
//! State that would otherwise be ambient: the event re-entrancy flag, the
//! scoped log level, file-access grants and a small value cache. Threaded
//! explicitly through the engine and into module calls.

use std::collections::{HashMap, HashSet};

use tracing::Level;
use uuid::Uuid;

use crate::memory::PendingEvent;
use crate::types::Val;

#[derive(Debug)]
pub struct ExecutionContext {
    pub id: Uuid,
    in_event: bool,
    log_level: Option<Level>,
    file_grants: HashSet<String>,
    cache: HashMap<String, Val>,

    /// Variable events fired after a delay instead of awaited
    deferred: Vec<PendingEvent>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            in_event: false,
            log_level: None,
            file_grants: HashSet::new(),
            cache: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn in_event(&self) -> bool {
        self.in_event
    }

    /// Set the re-entrancy flag, returning the previous value
    pub fn set_in_event(&mut self, in_event: bool) -> bool {
        std::mem::replace(&mut self.in_event, in_event)
    }

    /* ===================== Log Level Scope ===================== */

    /// Level progress is reported at: the scoped override, else DEBUG
    pub fn log_level(&self) -> Level {
        self.log_level.unwrap_or(Level::DEBUG)
    }

    /// Enter a scope whose level comes from a `[level]` tag in `comment`
    ///
    /// Returns the previous override; hand it to [`Self::restore_log_level`]
    /// when the scope ends. Without a tag the current level is kept.
    pub fn enter_log_scope(&mut self, comment: Option<&str>) -> Option<Level> {
        let previous = self.log_level;
        if let Some(level) = comment.and_then(parse_level_tag) {
            self.log_level = Some(level);
        }
        previous
    }

    pub fn restore_log_level(&mut self, previous: Option<Level>) {
        self.log_level = previous;
    }

    /* ===================== File Grants ===================== */

    pub fn grant_file(&mut self, path: &str) {
        self.file_grants.insert(path.to_string());
    }

    pub fn has_file_grant(&self, path: &str) -> bool {
        self.file_grants.contains(path)
    }

    /* ===================== Cache ===================== */

    pub fn cache_get(&self, key: &str) -> Option<&Val> {
        self.cache.get(key)
    }

    pub fn cache_put(&mut self, key: impl Into<String>, value: Val) {
        self.cache.insert(key.into(), value);
    }

    /* ===================== Deferred Events ===================== */

    pub fn defer(&mut self, event: PendingEvent) {
        self.deferred.push(event);
    }

    pub fn take_deferred(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.deferred)
    }

    /// Clear everything for the next run
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// `[debug]`, `[Info]`, ... anywhere in a comment
pub fn parse_level_tag(comment: &str) -> Option<Level> {
    let lowered = comment.to_lowercase();
    [
        ("[trace]", Level::TRACE),
        ("[debug]", Level::DEBUG),
        ("[info]", Level::INFO),
        ("[warn]", Level::WARN),
        ("[error]", Level::ERROR),
    ]
    .into_iter()
    .find(|(tag, _)| lowered.contains(tag))
    .map(|(_, level)| level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_scope_restores_previous_level() {
        let mut ctx = ExecutionContext::new();
        let outer = ctx.enter_log_scope(Some("load users [info]"));
        assert_eq!(ctx.log_level(), Level::INFO);

        let inner = ctx.enter_log_scope(Some("no tag here"));
        assert_eq!(ctx.log_level(), Level::INFO);
        ctx.restore_log_level(inner);

        let inner = ctx.enter_log_scope(Some("[Trace] noisy"));
        assert_eq!(ctx.log_level(), Level::TRACE);
        ctx.restore_log_level(inner);
        assert_eq!(ctx.log_level(), Level::INFO);

        ctx.restore_log_level(outer);
        assert_eq!(ctx.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_reset_clears_grants() {
        let mut ctx = ExecutionContext::new();
        ctx.grant_file("/tmp/a.txt");
        ctx.set_in_event(true);
        ctx.reset();
        assert!(!ctx.has_file_grant("/tmp/a.txt"));
        assert!(!ctx.in_event());
    }
}

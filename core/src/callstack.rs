//! Call stack of active goal invocations
//!
//! One frame per goal being run. Frames are pushed on goal entry and popped
//! on exit (LIFO). The current step pointer is only set while the frame is
//! in [`ExecutionPhase::ExecutingStep`].
//!
//! A frame also records which conditional steps a condition has opened in
//! that invocation of the goal, so goals shared between engines (and
//! between recursive invocations) are never written to.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use uuid::Uuid;

use crate::types::{EventScope, EventType, Goal, GoalStep, Val};

/* ===================== Frames ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionPhase {
    #[default]
    None,
    ExecutingGoal,
    ExecutingStep,
}

/// The event hook a frame was entered through, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOrigin {
    pub scope: EventScope,
    pub event_type: EventType,
}

#[derive(Debug, Clone)]
pub struct CallStackFrame {
    pub id: Uuid,
    pub goal: Arc<Goal>,
    current_step: Option<usize>,
    pub phase: ExecutionPhase,
    pub event: Option<EventOrigin>,
    pub locals: HashMap<String, Val>,
    /// Indices of conditional steps currently allowed to run
    open_steps: HashSet<usize>,
}

impl CallStackFrame {
    fn new(goal: Arc<Goal>, event: Option<EventOrigin>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal,
            current_step: None,
            phase: ExecutionPhase::ExecutingGoal,
            event,
            locals: HashMap::new(),
            open_steps: HashSet::new(),
        }
    }

    /// Step being executed, only while in the step phase
    pub fn current_step(&self) -> Option<&GoalStep> {
        match self.phase {
            ExecutionPhase::ExecutingStep => self.current_step.and_then(|idx| self.goal.steps.get(idx)),
            _ => None,
        }
    }

    /// Index of the step last entered (kept after the step finishes)
    pub fn step_index(&self) -> Option<usize> {
        self.current_step
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.open_steps.contains(&index)
    }
}

/* ===================== Call Stack ===================== */

#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<CallStackFrame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, goal: Arc<Goal>, event: Option<EventOrigin>) -> Uuid {
        let frame = CallStackFrame::new(goal, event);
        let id = frame.id;
        self.frames.push(frame);
        id
    }

    pub fn pop(&mut self) -> Option<CallStackFrame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn current(&self) -> Option<&CallStackFrame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut CallStackFrame> {
        self.frames.last_mut()
    }

    pub fn current_goal(&self) -> Option<&Arc<Goal>> {
        self.current().map(|frame| &frame.goal)
    }

    pub fn current_step(&self) -> Option<&GoalStep> {
        self.current().and_then(|frame| frame.current_step())
    }

    /// Enter a step of the current goal
    pub fn enter_step(&mut self, index: usize) {
        if let Some(frame) = self.current_mut() {
            frame.current_step = Some(index);
            frame.phase = ExecutionPhase::ExecutingStep;
        }
    }

    /// Leave the current step, returning to the goal phase
    pub fn leave_step(&mut self) {
        if let Some(frame) = self.current_mut() {
            frame.phase = ExecutionPhase::ExecutingGoal;
        }
    }

    /// Open or close conditional steps of the current goal
    pub fn set_open(&mut self, indices: impl IntoIterator<Item = usize>, open: bool) {
        if let Some(frame) = self.current_mut() {
            for index in indices {
                if open {
                    frame.open_steps.insert(index);
                } else {
                    frame.open_steps.remove(&index);
                }
            }
        }
    }

    /// Whether a conditional step of the current goal may run
    pub fn is_open(&self, index: usize) -> bool {
        self.current().is_some_and(|frame| frame.is_open(index))
    }

    /// Names of the goals on the stack, innermost first
    pub fn goal_hierarchy(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| frame.goal.name.clone())
            .collect()
    }

    /// Whether `goal_name` is already running further down the stack
    pub fn contains_goal(&self, goal_name: &str) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.goal.name.eq_ignore_ascii_case(goal_name))
    }

    /// Human-readable trace, innermost frame first
    pub fn stack_trace(&self) -> String {
        let mut out = String::new();
        for frame in self.frames.iter().rev() {
            let _ = write!(out, "  at {} ({})", frame.goal.name, frame.goal.path);
            if let Some(idx) = frame.step_index() {
                let text = frame
                    .goal
                    .steps
                    .get(idx)
                    .map(|step| step.text.as_str())
                    .unwrap_or_default();
                let _ = write!(out, " step {}: {}", idx + 1, text);
            }
            if let Some(event) = frame.event {
                let _ = write!(out, " [{:?} {}]", event.scope, event.event_type);
            }
            out.push('\n');
        }
        out
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

//! Tests for variable event queueing

use super::helpers::{s, stack};
use crate::memory::VariableEvent;
use crate::types::{EventType, Val};

fn goal_names(memory: &mut crate::memory::MemoryStack) -> Vec<String> {
    memory
        .take_pending_events()
        .into_iter()
        .map(|pending| pending.event.goal_name)
        .collect()
}

#[test]
fn test_create_then_change() {
    let mut memory = stack();
    memory.subscribe("x", VariableEvent::new(EventType::OnCreate, "Created"));
    memory.subscribe("x", VariableEvent::new(EventType::OnChange, "Changed"));

    memory.put("x", Val::Num(1.0)).unwrap();
    assert_eq!(goal_names(&mut memory), vec!["Created"]);

    memory.put("x", Val::Num(2.0)).unwrap();
    assert_eq!(goal_names(&mut memory), vec!["Changed"]);
}

#[test]
fn test_nested_write_fires_for_root() {
    let mut memory = stack();
    memory.put("user", s(r#"{"name": "Ada"}"#)).unwrap();
    memory.subscribe("user", VariableEvent::new(EventType::OnChange, "UserChanged"));

    memory.put("user.name", s("Grace")).unwrap();
    let pending = memory.take_pending_events();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].variable, "user");
    assert_eq!(pending[0].event.goal_name, "UserChanged");
}

#[test]
fn test_in_event_flag_suppresses_events() {
    let mut memory = stack();
    memory.put("x", Val::Num(1.0)).unwrap();
    memory.subscribe("x", VariableEvent::new(EventType::OnChange, "Changed"));

    let previous = memory.set_in_event(true);
    assert!(!previous);
    memory.put("x", Val::Num(2.0)).unwrap();
    assert!(memory.take_pending_events().is_empty());

    memory.set_in_event(false);
    memory.put("x", Val::Num(3.0)).unwrap();
    assert_eq!(goal_names(&mut memory), vec!["Changed"]);
}

#[test]
fn test_remove_fires_and_keeps_subscriptions() {
    let mut memory = stack();
    memory.subscribe("x", VariableEvent::new(EventType::OnRemove, "Gone"));
    memory.subscribe("x", VariableEvent::new(EventType::OnCreate, "Back"));

    memory.put("x", Val::Num(1.0)).unwrap();
    assert_eq!(goal_names(&mut memory), vec!["Back"]);

    memory.remove("x").unwrap();
    assert_eq!(goal_names(&mut memory), vec!["Gone"]);

    memory.put("x", Val::Num(2.0)).unwrap();
    assert_eq!(goal_names(&mut memory), vec!["Back"]);
}

#[test]
fn test_duplicate_subscription_is_replaced() {
    let mut memory = stack();
    memory.subscribe("x", VariableEvent::new(EventType::OnCreate, "Created"));
    memory.subscribe("x", VariableEvent::new(EventType::OnCreate, "created").no_wait());

    memory.put("x", Val::Num(1.0)).unwrap();
    let pending = memory.take_pending_events();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].event.wait_for_response);
}

#[test]
fn test_unsubscribe() {
    let mut memory = stack();
    memory.subscribe("x", VariableEvent::new(EventType::OnCreate, "Created"));
    memory.unsubscribe("x", "created", None);

    memory.put("x", Val::Num(1.0)).unwrap();
    assert!(memory.take_pending_events().is_empty());
}

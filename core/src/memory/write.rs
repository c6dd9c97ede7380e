//! Writes, removals and event subscriptions

use std::collections::HashMap;

use tracing::debug;

use super::error::MemoryError;
use super::object_value::{ObjectValue, PendingEvent, VariableEvent};
use super::plan::{ExecutionPlan, IndexSpec, Segment};
use super::{variable_key, MemoryStack};
use crate::settings::APP_OWNER;
use crate::types::{val_to_json, EventType, Val};

/// One resolved step of a write path
#[derive(Debug, Clone, PartialEq)]
enum PathKey {
    Key(String),
    Position(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scope {
    Instance,
    Process,
}

impl MemoryStack {
    /// Set a variable (or a nested member of one) in instance scope
    ///
    /// A string holding a JSON object or array is stored as structured data.
    /// Fires OnCreate or OnChange for the root variable.
    pub fn put(&mut self, key: &str, value: Val) -> Result<(), MemoryError> {
        let scope = self.scope_for(key);
        self.write(key, value, scope)
    }

    /// Set a variable in the process scope shared across engines
    pub fn put_static(&mut self, key: &str, value: Val) -> Result<(), MemoryError> {
        self.write(key, value, Scope::Process)
    }

    /// Remove a variable or a nested member
    ///
    /// Removing a root variable keeps its subscriptions so a later write
    /// fires OnCreate for them.
    pub fn remove(&mut self, key: &str) -> Result<(), MemoryError> {
        let plan = ExecutionPlan::parse(key)?;
        let root_key = plan.root.to_lowercase();
        let scope = self.scope_for(key);
        let Some(existing) = self.read_scope(&root_key, scope) else {
            return Ok(());
        };
        if !existing.initiated {
            return Ok(());
        }

        if plan.segments.is_empty() {
            let mut removed = ObjectValue::absent(existing.name.clone());
            removed.events = existing.events.clone();
            self.queue_events(&existing, EventType::OnRemove, Val::Null);
            self.write_scope(root_key, removed, scope);
            debug!(variable = %existing.name, "variable removed");
            return Ok(());
        }

        let path = self.resolve_path(&plan)?;
        let mut root = existing.value.clone();
        let (last, parents) = match path.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        if let Some(container) = navigate(&mut root, parents) {
            match (container, last) {
                (Val::Obj(map), PathKey::Key(k)) => {
                    if let Some(actual) = actual_key(map, k) {
                        map.remove(&actual);
                    }
                }
                (Val::Obj(map), PathKey::Position(p)) => {
                    map.remove(&p.to_string());
                }
                (Val::List(items), PathKey::Position(p)) if *p >= 1 && *p <= items.len() => {
                    items.remove(p - 1);
                }
                _ => {}
            }
        }
        let replaced = existing.replaced_by(root.clone());
        self.queue_events(&existing, EventType::OnChange, root);
        self.write_scope(root_key, replaced, scope);
        Ok(())
    }

    /// Subscribe a goal to a variable's create/change/remove events
    pub fn subscribe(&mut self, variable: &str, event: VariableEvent) {
        let (name, key) = root_of(variable);
        let scope = self.scope_for(variable);
        let mut entry = self
            .read_scope(&key, scope)
            .unwrap_or_else(|| ObjectValue::absent(name));
        event.subscribe_into(&mut entry.events);
        self.write_scope(key, entry, scope);
    }

    /// Drop every subscription of `goal_name` on `variable`
    pub fn unsubscribe(&mut self, variable: &str, goal_name: &str, event_type: Option<EventType>) {
        let (_, key) = root_of(variable);
        let scope = self.scope_for(variable);
        if let Some(mut entry) = self.read_scope(&key, scope) {
            entry.events.retain(|e| {
                !(e.goal_name.eq_ignore_ascii_case(goal_name)
                    && event_type.map(|t| t == e.event_type).unwrap_or(true))
            });
            self.write_scope(key, entry, scope);
        }
    }

    /* ===================== Internals ===================== */

    fn write(&mut self, key: &str, value: Val, scope: Scope) -> Result<(), MemoryError> {
        let value = match value {
            Val::Str(s) => Val::parse_json_literal(&s).unwrap_or(Val::Str(s)),
            other => other,
        };

        let plan = ExecutionPlan::parse(key)?;
        if plan.arithmetic.is_some() {
            return Err(MemoryError::InvalidExpression {
                expr: plan.expr.clone(),
                reason: "cannot assign to an arithmetic expression".into(),
            });
        }

        let root_key = plan.root.to_lowercase();
        if root_key == "settings" {
            return self.write_setting(&plan, value);
        }
        if root_key == "now" || root_key == "nowutc" {
            return Err(MemoryError::InvalidExpression {
                expr: plan.expr.clone(),
                reason: format!("'{}' is read-only", plan.root),
            });
        }

        let existing = self.read_scope(&root_key, scope);
        let was_set = existing.as_ref().map(|e| e.initiated).unwrap_or(false);

        let new_value = if plan.segments.is_empty() {
            value
        } else {
            let path = self.resolve_path(&plan)?;
            let mut root = existing
                .as_ref()
                .filter(|e| e.initiated)
                .map(|e| e.value.clone())
                .unwrap_or(Val::Null);
            assign(&plan.expr, &mut root, &path, value)?;
            root
        };

        let replaced = match &existing {
            Some(prev) => {
                let mut next = prev.replaced_by(new_value.clone());
                next.name = plan.root.clone();
                next
            }
            None => ObjectValue::new(plan.root.clone(), new_value.clone()),
        };

        let event_type = if was_set {
            EventType::OnChange
        } else {
            EventType::OnCreate
        };
        self.queue_events(&replaced, event_type, new_value);
        self.write_scope(root_key, replaced, scope);
        Ok(())
    }

    fn write_setting(&mut self, plan: &ExecutionPlan, value: Val) -> Result<(), MemoryError> {
        match plan.segments.as_slice() {
            [Segment::Property(name)] | [Segment::Index(IndexSpec::Key(name))] => {
                self.settings.set(APP_OWNER, name, val_to_json(&value));
                Ok(())
            }
            _ => Err(MemoryError::InvalidExpression {
                expr: plan.expr.clone(),
                reason: "expected Settings.<key>".into(),
            }),
        }
    }

    /// Turn plan segments into concrete keys, resolving `[var]` lookups
    fn resolve_path(&self, plan: &ExecutionPlan) -> Result<Vec<PathKey>, MemoryError> {
        plan.segments
            .iter()
            .map(|segment| match segment {
                Segment::Property(name) => Ok(PathKey::Key(name.clone())),
                Segment::Index(IndexSpec::Position(p)) => Ok(PathKey::Position(*p)),
                Segment::Index(IndexSpec::Key(k)) => Ok(PathKey::Key(k.clone())),
                Segment::Index(IndexSpec::Lookup(word)) => match self.get_value(word)? {
                    Val::Null => Ok(PathKey::Key(word.clone())),
                    Val::Num(n) if n >= 1.0 && n.fract() == 0.0 => Ok(PathKey::Position(n as usize)),
                    other => Ok(PathKey::Key(other.to_string())),
                },
                Segment::Method { .. } | Segment::JsonPath(_) => Err(MemoryError::InvalidExpression {
                    expr: plan.expr.clone(),
                    reason: "cannot assign through a method call or JSON path".into(),
                }),
            })
            .collect()
    }

    fn queue_events(&mut self, target: &ObjectValue, event_type: EventType, value: Val) {
        if self.in_event {
            return;
        }
        for event in target.events_of(event_type) {
            self.pending.push(PendingEvent {
                variable: target.name.clone(),
                value: value.clone(),
                event: event.clone(),
            });
        }
    }

    /// Instance scope unless the variable only exists in process scope
    fn scope_for(&self, key: &str) -> Scope {
        let (_, root) = root_of(key);
        if !self.variables.contains_key(&root) && self.process.contains(&root) {
            Scope::Process
        } else {
            Scope::Instance
        }
    }

    fn read_scope(&self, key: &str, scope: Scope) -> Option<ObjectValue> {
        match scope {
            Scope::Instance => self.variables.get(key).cloned(),
            Scope::Process => self.process.get(key),
        }
    }

    fn write_scope(&mut self, key: String, value: ObjectValue, scope: Scope) {
        match scope {
            Scope::Instance => {
                self.variables.insert(key, value);
            }
            Scope::Process => self.process.insert(key, value),
        }
    }
}

/// Set `value` at `path` inside `target`, creating containers on the way
fn assign(expr: &str, target: &mut Val, path: &[PathKey], value: Val) -> Result<(), MemoryError> {
    let Some((first, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };

    if target.is_null() {
        *target = empty_container(first);
    }

    let slot = match (target, first) {
        (Val::Obj(map), PathKey::Key(k)) => {
            let actual = actual_key(map, k).unwrap_or_else(|| k.clone());
            map.entry(actual).or_insert(Val::Null)
        }
        (Val::Obj(map), PathKey::Position(p)) => map.entry(p.to_string()).or_insert(Val::Null),
        (Val::List(items), PathKey::Position(p)) => {
            let len = items.len();
            if *p == len + 1 {
                items.push(Val::Null);
            } else if *p == 0 || *p > len {
                return Err(MemoryError::IndexOutOfRange {
                    expr: expr.to_string(),
                    index: *p,
                    len,
                });
            }
            &mut items[*p - 1]
        }
        (other, _) => {
            return Err(MemoryError::NotIndexable {
                expr: expr.to_string(),
                type_name: other.type_name().to_string(),
            })
        }
    };
    assign(expr, slot, rest, value)
}

fn navigate<'a>(target: &'a mut Val, path: &[PathKey]) -> Option<&'a mut Val> {
    let Some((first, rest)) = path.split_first() else {
        return Some(target);
    };
    let next = match (target, first) {
        (Val::Obj(map), PathKey::Key(k)) => {
            let actual = actual_key(map, k)?;
            map.get_mut(&actual)?
        }
        (Val::Obj(map), PathKey::Position(p)) => map.get_mut(&p.to_string())?,
        (Val::List(items), PathKey::Position(p)) if *p >= 1 => items.get_mut(*p - 1)?,
        _ => return None,
    };
    navigate(next, rest)
}

fn empty_container(key: &PathKey) -> Val {
    match key {
        PathKey::Position(_) => Val::List(Vec::new()),
        PathKey::Key(_) => Val::Obj(HashMap::new()),
    }
}

/// Existing key matching `key` case-insensitively
fn actual_key(map: &HashMap<String, Val>, key: &str) -> Option<String> {
    if map.contains_key(key) {
        return Some(key.to_string());
    }
    map.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned()
}

/// Display name and storage key of the root variable of `expr`
fn root_of(expr: &str) -> (String, String) {
    match ExecutionPlan::parse(expr) {
        Ok(plan) => {
            let key = plan.root.to_lowercase();
            (plan.root, key)
        }
        Err(_) => (expr.trim_matches('%').to_string(), variable_key(expr)),
    }
}

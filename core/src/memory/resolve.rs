//! Executing plans against the stack

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::trace;

use super::error::MemoryError;
use super::jsonpath;
use super::methods;
use super::object_value::ObjectValue;
use super::plan::{Arg, Arithmetic, ExecutionPlan, IndexSpec, Operand, Segment};
use super::MemoryStack;
use crate::settings::APP_OWNER;
use crate::types::{json_to_val, Val};

impl MemoryStack {
    /// Resolve an expression into an object value
    ///
    /// An unset root yields an absent value (`initiated == false`); arithmetic
    /// on an unset root treats it as zero.
    pub fn get(&self, expr: &str) -> Result<ObjectValue, MemoryError> {
        let plan = ExecutionPlan::parse(expr)?;
        trace!(expr = %plan.expr, segments = plan.segments.len(), "resolve");

        let root_key = plan.root.to_lowercase();
        let mut segments = plan.segments.as_slice();

        let base = match root_key.as_str() {
            "now" | "nowutc" => ObjectValue::new(plan.root.clone(), Val::Date(Utc::now())),
            "settings" => match segments.first() {
                Some(Segment::Property(key)) | Some(Segment::Index(IndexSpec::Key(key))) => {
                    let key = key.clone();
                    segments = &segments[1..];
                    self.setting(&key)?
                }
                _ => return Err(invalid(&plan.expr, "expected Settings.<key>")),
            },
            _ => match self.lookup(&root_key) {
                Some(obj) if obj.initiated => obj,
                _ => return self.absent_root(&plan),
            },
        };

        // Materialized root, nothing to navigate
        if segments.is_empty() && plan.arithmetic.is_none() {
            return Ok(base);
        }

        let mut value = base.value;
        for segment in segments {
            value = match self.apply_segment(&plan.expr, value, segment) {
                Ok(next) => next,
                Err(err) if self.build_mode && tolerated_in_build(&err) => {
                    return Ok(placeholder(&plan.expr));
                }
                Err(err) => return Err(err),
            };
        }

        if let Some(arithmetic) = &plan.arithmetic {
            value = self.apply_arithmetic(value, arithmetic)?;
        }

        Ok(ObjectValue::new(plan.expr.clone(), value).with_parent(plan.parent_expr()))
    }

    /// Resolve an expression to its plain value
    pub fn get_value(&self, expr: &str) -> Result<Val, MemoryError> {
        self.get(expr).map(|obj| obj.value)
    }

    /// Replace every `%...%` reference in `text`
    ///
    /// A string that is exactly one reference resolves to the typed value;
    /// otherwise references are rendered into the surrounding text.
    pub fn resolve_text(&self, text: &str) -> Result<Val, MemoryError> {
        let references = find_references(text);
        if references.is_empty() {
            return Ok(Val::Str(text.to_string()));
        }

        let trimmed = text.trim();
        if references.len() == 1 {
            let (start, end) = references[0];
            if &text[start..end] == trimmed {
                return self.get_value(trimmed);
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end) in references {
            out.push_str(&text[last..start]);
            out.push_str(&self.get_value(&text[start..end])?.to_string());
            last = end;
        }
        out.push_str(&text[last..]);
        Ok(Val::Str(out))
    }

    /// Resolve references inside a JSON parameter value, recursively
    pub fn resolve_json(&self, value: &JsonValue) -> Result<Val, MemoryError> {
        match value {
            JsonValue::String(s) => self.resolve_text(s),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.resolve_json(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Val::List),
            JsonValue::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_json(v)?)))
                .collect::<Result<_, MemoryError>>()
                .map(Val::Obj),
            other => Ok(json_to_val(other)),
        }
    }

    /* ===================== Root Handling ===================== */

    fn setting(&self, key: &str) -> Result<ObjectValue, MemoryError> {
        match self.settings.get(APP_OWNER, key) {
            Some(value) => Ok(ObjectValue::new(format!("Settings.{}", key), json_to_val(&value))),
            None if self.build_mode => Ok(placeholder(&format!("Settings.{}", key))),
            None => Err(MemoryError::MissingSetting {
                key: key.to_string(),
            }),
        }
    }

    fn absent_root(&self, plan: &ExecutionPlan) -> Result<ObjectValue, MemoryError> {
        match &plan.arithmetic {
            // `%count+1%` on an unset counter starts from zero
            Some(arithmetic) if plan.segments.is_empty() && !is_duration(arithmetic) => {
                let value = self.apply_arithmetic(Val::Num(0.0), arithmetic)?;
                Ok(ObjectValue::new(plan.expr.clone(), value))
            }
            _ if self.build_mode && !plan.segments.is_empty() => Ok(placeholder(&plan.expr)),
            _ => Ok(ObjectValue::absent(plan.expr.clone()).with_parent(plan.parent_expr())),
        }
    }

    /* ===================== Navigation ===================== */

    fn apply_segment(&self, expr: &str, value: Val, segment: &Segment) -> Result<Val, MemoryError> {
        match segment {
            Segment::Property(name) => property(value, name),
            Segment::Index(spec) => self.index(expr, value, spec),
            Segment::Method { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Literal(v) => Ok(v.clone()),
                        Arg::Variable(name) => self.get_value(name),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                methods::invoke(&value, name, &args, false)
            }
            Segment::JsonPath(path) => match &value {
                Val::Null => Ok(Val::Null),
                v if v.is_structured() => jsonpath::select(v, path),
                other => Err(MemoryError::JsonPath {
                    path: path.clone(),
                    reason: format!("{} is not a structured value", other.type_name()),
                }),
            },
        }
    }

    fn index(&self, expr: &str, value: Val, spec: &IndexSpec) -> Result<Val, MemoryError> {
        match spec {
            IndexSpec::Position(position) => position_of(expr, value, *position),
            IndexSpec::Key(key) => key_of(expr, value, key),
            IndexSpec::Lookup(word) => {
                // An existing key wins over a variable of the same name
                if let Val::Obj(map) = &value {
                    if let Some(found) = find_key(map, word) {
                        return Ok(found.clone());
                    }
                }
                match self.get_value(word)? {
                    Val::Null => key_of(expr, value, word),
                    Val::Num(n) if matches!(value, Val::List(_)) && n >= 1.0 => {
                        position_of(expr, value, n as usize)
                    }
                    other => key_of(expr, value, &other.to_string()),
                }
            }
        }
    }

    /* ===================== Arithmetic ===================== */

    fn apply_arithmetic(&self, left: Val, arithmetic: &Arithmetic) -> Result<Val, MemoryError> {
        let op = arithmetic.op;
        let right = match &arithmetic.operand {
            Operand::Number(n) => Val::Num(*n),
            Operand::Duration(duration) => {
                let shifted = match (&left, op) {
                    (Val::Date(d), '+') => d.checked_add_signed(*duration),
                    (Val::Date(d), '-') => d.checked_sub_signed(*duration),
                    _ => None,
                };
                return shifted.map(Val::Date).ok_or_else(|| arithmetic_error(op, &left, "duration"));
            }
            Operand::Variable(name) => self.get_value(name)?,
        };

        let left = if left.is_null() { Val::Num(0.0) } else { left };
        let right = if right.is_null() { Val::Num(0.0) } else { right };

        if let (Some(a), Some(b)) = (left.as_num(), right.as_num()) {
            return match op {
                '+' => Ok(Val::Num(a + b)),
                '-' => Ok(Val::Num(a - b)),
                '*' => Ok(Val::Num(a * b)),
                '/' if b == 0.0 => Err(arithmetic_error(op, &left, "zero")),
                '/' => Ok(Val::Num(a / b)),
                _ => Err(arithmetic_error(op, &left, right.type_name())),
            };
        }

        match (&left, op) {
            (Val::Str(s), '+') => Ok(Val::Str(format!("{}{}", s, right))),
            _ => Err(arithmetic_error(op, &left, right.type_name())),
        }
    }
}

/* ===================== Helpers ===================== */

fn property(value: Val, name: &str) -> Result<Val, MemoryError> {
    match value {
        Val::Obj(map) => match find_key(&map, name) {
            Some(found) => Ok(found.clone()),
            None if methods::has_property(&Val::Obj(Default::default()), name) => {
                methods::invoke(&Val::Obj(map), name, &[], true)
            }
            None => Ok(Val::Null),
        },
        Val::List(items) => {
            let list = Val::List(items);
            if methods::has_property(&list, name) {
                methods::invoke(&list, name, &[], true)
            } else {
                // Undeclared property on a list projects over its elements
                jsonpath::query(&list, &format!("$[*]['{}']", name)).map(Val::List)
            }
        }
        Val::Null if !methods::has_property(&Val::Null, name) => Ok(Val::Null),
        other => methods::invoke(&other, name, &[], true),
    }
}

fn find_key<'a>(map: &'a std::collections::HashMap<String, Val>, key: &str) -> Option<&'a Val> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn position_of(expr: &str, value: Val, position: usize) -> Result<Val, MemoryError> {
    match value {
        Val::List(mut items) => {
            let len = items.len();
            if position == 0 || position > len {
                return Err(MemoryError::IndexOutOfRange {
                    expr: expr.to_string(),
                    index: position,
                    len,
                });
            }
            Ok(items.swap_remove(position - 1))
        }
        Val::Obj(map) => Ok(find_key(&map, &position.to_string()).cloned().unwrap_or(Val::Null)),
        Val::Null => Ok(Val::Null),
        other => Err(MemoryError::NotIndexable {
            expr: expr.to_string(),
            type_name: other.type_name().to_string(),
        }),
    }
}

fn key_of(expr: &str, value: Val, key: &str) -> Result<Val, MemoryError> {
    match value {
        Val::Obj(map) => Ok(find_key(&map, key).cloned().unwrap_or(Val::Null)),
        Val::Null => Ok(Val::Null),
        other => Err(MemoryError::NotIndexable {
            expr: expr.to_string(),
            type_name: other.type_name().to_string(),
        }),
    }
}

fn is_duration(arithmetic: &Arithmetic) -> bool {
    matches!(arithmetic.operand, Operand::Duration(_))
}

fn arithmetic_error(op: char, left: &Val, right: &str) -> MemoryError {
    MemoryError::Arithmetic {
        op,
        left: left.type_name().to_string(),
        right: right.to_string(),
    }
}

fn invalid(expr: &str, reason: &str) -> MemoryError {
    MemoryError::InvalidExpression {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

fn tolerated_in_build(err: &MemoryError) -> bool {
    matches!(
        err,
        MemoryError::PropertyNotFound { .. }
            | MemoryError::MethodNotFound { .. }
            | MemoryError::JsonPath { .. }
            | MemoryError::NotIndexable { .. }
    )
}

/// Unresolved reference kept verbatim (build mode)
fn placeholder(expr: &str) -> ObjectValue {
    let mut obj = ObjectValue::new(expr.to_string(), Val::Str(format!("%{}%", expr)));
    obj.initiated = false;
    obj
}

/// Byte ranges of `%...%` references, delimiters included
///
/// A reference starts with a letter, `_` or `!` and never spans a line.
fn find_references(text: &str) -> Vec<(usize, usize)> {
    let mut refs = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        let starts_name = text[i + 1..]
            .chars()
            .next()
            .map(|c| c.is_alphabetic() || c == '_' || c == '!')
            .unwrap_or(false);
        let close = text[i + 1..]
            .find(|c| c == '%' || c == '\n')
            .map(|p| p + i + 1);
        match close {
            Some(end) if starts_name && bytes[end] == b'%' => {
                refs.push((i, end + 1));
                i = end + 1;
            }
            _ => i += 1,
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::find_references;

    #[test]
    fn test_find_references() {
        let text = "Hello %user.name%, you are 50% done with %task%";
        let refs: Vec<&str> = find_references(text)
            .into_iter()
            .map(|(s, e)| &text[s..e])
            .collect();
        assert_eq!(refs, vec!["%user.name%", "%task%"]);
    }

    #[test]
    fn test_percent_without_name_is_literal() {
        assert!(find_references("100% sure").is_empty());
        assert!(find_references("%%").is_empty());
    }
}

//! Built-in properties and methods on runtime values
//!
//! Each value kind has a capability map: method name → overloads. Lookup is
//! case-insensitive; an overload is chosen by arity first, then by whether
//! every argument converts to the declared parameter kind. Extension helpers
//! apply to every kind after the kind-specific map.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use super::error::MemoryError;
use crate::suggest::did_you_mean;
use crate::types::{val_to_json, Val};

type MethodFn = fn(&Val, &[Val]) -> Result<Val, MemoryError>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Param {
    Any,
    Num,
    Text,
}

struct Overload {
    params: &'static [Param],
    call: MethodFn,
}

struct Method {
    name: &'static str,
    overloads: &'static [Overload],
}

macro_rules! method {
    ($name:literal, $( [$($param:ident),*] => $call:expr ),+ $(,)?) => {
        Method {
            name: $name,
            overloads: &[ $( Overload { params: &[$(Param::$param),*], call: $call } ),+ ],
        }
    };
}

/* ===================== Capability Maps ===================== */

static TEXT_METHODS: &[Method] = &[
    method!("Length", [] => |v, _| Ok(Val::Num(text(v).chars().count() as f64))),
    method!("ToUpper", [] => |v, _| Ok(Val::Str(text(v).to_uppercase()))),
    method!("ToLower", [] => |v, _| Ok(Val::Str(text(v).to_lowercase()))),
    method!("Trim", [] => |v, _| Ok(Val::Str(text(v).trim().to_string()))),
    method!("Contains", [Text] => |v, a| Ok(Val::Bool(text(v).contains(&text(&a[0]))))),
    method!("StartsWith", [Text] => |v, a| Ok(Val::Bool(text(v).starts_with(&text(&a[0]))))),
    method!("EndsWith", [Text] => |v, a| Ok(Val::Bool(text(v).ends_with(&text(&a[0]))))),
    method!("Replace", [Text, Text] => |v, a| Ok(Val::Str(text(v).replace(&text(&a[0]), &text(&a[1]))))),
    method!("Split", [Text] => |v, a| {
        let sep = text(&a[0]);
        Ok(Val::List(text(v).split(sep.as_str()).map(|s| Val::Str(s.to_string())).collect()))
    }),
    method!("Substring",
        [Num] => |v, a| Ok(Val::Str(substring(&text(v), num(&a[0]), None))),
        [Num, Num] => |v, a| Ok(Val::Str(substring(&text(v), num(&a[0]), Some(num(&a[1]))))),
    ),
    method!("IndexOf", [Text] => |v, a| {
        let haystack = text(v);
        let needle = text(&a[0]);
        Ok(Val::Num(match haystack.find(&needle) {
            Some(byte) => haystack[..byte].chars().count() as f64,
            None => -1.0,
        }))
    }),
];

static LIST_METHODS: &[Method] = &[
    method!("Count", [] => |v, _| Ok(Val::Num(list(v).len() as f64))),
    method!("First", [] => |v, _| Ok(list(v).first().cloned().unwrap_or(Val::Null))),
    method!("Last", [] => |v, _| Ok(list(v).last().cloned().unwrap_or(Val::Null))),
    method!("Contains", [Any] => |v, a| Ok(Val::Bool(list(v).iter().any(|item| loosely_equal(item, &a[0]))))),
    method!("Join",
        [] => |v, _| Ok(Val::Str(join(list(v), ","))),
        [Text] => |v, a| Ok(Val::Str(join(list(v), &text(&a[0])))),
    ),
    method!("Reverse", [] => |v, _| Ok(Val::List(list(v).iter().rev().cloned().collect()))),
    method!("Skip", [Num] => |v, a| Ok(Val::List(list(v).iter().skip(count(&a[0])).cloned().collect()))),
    method!("Take", [Num] => |v, a| Ok(Val::List(list(v).iter().take(count(&a[0])).cloned().collect()))),
    method!("Sum", [] => |v, _| Ok(Val::Num(list(v).iter().filter_map(Val::as_num).sum()))),
];

static MAP_METHODS: &[Method] = &[
    method!("Count", [] => |v, _| Ok(Val::Num(map_keys(v).len() as f64))),
    method!("Keys", [] => |v, _| Ok(Val::List(map_keys(v).into_iter().map(Val::Str).collect()))),
    method!("Values", [] => |v, _| {
        let Val::Obj(map) = v else { return Ok(Val::List(Vec::new())) };
        Ok(Val::List(map_keys(v).iter().map(|k| map[k].clone()).collect()))
    }),
    method!("ContainsKey", [Text] => |v, a| {
        let key = text(&a[0]);
        Ok(Val::Bool(map_keys(v).iter().any(|k| k.eq_ignore_ascii_case(&key))))
    }),
];

static NUMBER_METHODS: &[Method] = &[
    method!("Abs", [] => |v, _| Ok(Val::Num(num(v).abs()))),
    method!("Round",
        [] => |v, _| Ok(Val::Num(num(v).round())),
        [Num] => |v, a| {
            let factor = 10f64.powi(num(&a[0]) as i32);
            Ok(Val::Num((num(v) * factor).round() / factor))
        },
    ),
    method!("Floor", [] => |v, _| Ok(Val::Num(num(v).floor()))),
    method!("Ceiling", [] => |v, _| Ok(Val::Num(num(v).ceil()))),
];

static DATE_METHODS: &[Method] = &[
    method!("Year", [] => |v, _| date_part(v, |d| d.year() as f64)),
    method!("Month", [] => |v, _| date_part(v, |d| d.month() as f64)),
    method!("Day", [] => |v, _| date_part(v, |d| d.day() as f64)),
    method!("Hour", [] => |v, _| date_part(v, |d| d.hour() as f64)),
    method!("Minute", [] => |v, _| date_part(v, |d| d.minute() as f64)),
    method!("AddDays", [Num] => |v, a| add_to_date(v, num(&a[0]), 86_400_000.0)),
    method!("AddHours", [Num] => |v, a| add_to_date(v, num(&a[0]), 3_600_000.0)),
    method!("AddMinutes", [Num] => |v, a| add_to_date(v, num(&a[0]), 60_000.0)),
    method!("ToString",
        [] => |v, _| Ok(Val::Str(v.to_string())),
        [Text] => |v, a| match v {
            Val::Date(d) => format_date(d, &text(&a[0])),
            other => Ok(Val::Str(other.to_string())),
        },
    ),
];

static EXTENSIONS: &[Method] = &[
    method!("ToJson", [] => |v, _| Ok(Val::Str(val_to_json(v).to_string()))),
    method!("IsEmpty", [] => |v, _| Ok(Val::Bool(match v {
        Val::Null => true,
        Val::Str(s) => s.is_empty(),
        Val::List(items) => items.is_empty(),
        Val::Obj(map) => map.is_empty(),
        _ => false,
    }))),
    method!("ToString", [] => |v, _| Ok(Val::Str(v.to_string()))),
    method!("Type", [] => |v, _| Ok(Val::Str(v.type_name().to_string()))),
];

fn methods_for(value: &Val) -> &'static [Method] {
    match value {
        Val::Str(_) => TEXT_METHODS,
        Val::List(_) => LIST_METHODS,
        Val::Obj(_) => MAP_METHODS,
        Val::Num(_) => NUMBER_METHODS,
        Val::Date(_) => DATE_METHODS,
        Val::Null | Val::Bool(_) => &[],
    }
}

/* ===================== Lookup & Invocation ===================== */

/// Whether `name` is a zero-argument capability of `value` (usable as a
/// property without parentheses)
pub fn has_property(value: &Val, name: &str) -> bool {
    find(value, name)
        .map(|method| method.overloads.iter().any(|o| o.params.is_empty()))
        .unwrap_or(false)
}

/// Invoke `name` on `value`
///
/// `as_property` marks access without parentheses, which reports a missing
/// name as a property rather than a method.
pub fn invoke(value: &Val, name: &str, args: &[Val], as_property: bool) -> Result<Val, MemoryError> {
    let Some(method) = find(value, name) else {
        let suggestion = did_you_mean(name, candidate_names(value));
        return Err(if as_property {
            MemoryError::PropertyNotFound {
                property: name.to_string(),
                type_name: value.type_name().to_string(),
                suggestion,
            }
        } else {
            MemoryError::MethodNotFound {
                method: name.to_string(),
                type_name: value.type_name().to_string(),
                suggestion,
            }
        });
    };

    let overload = method
        .overloads
        .iter()
        .filter(|o| o.params.len() == args.len())
        .find(|o| o.params.iter().zip(args).all(|(p, a)| converts(*p, a)));

    match overload {
        Some(overload) => (overload.call)(value, args),
        None => Err(MemoryError::InvalidArguments {
            method: method.name.to_string(),
            given: args.len(),
            expected: method
                .overloads
                .iter()
                .map(|o| o.params.len().to_string())
                .collect::<Vec<_>>()
                .join(" or "),
        }),
    }
}

/// Kind-specific methods take precedence over extensions
fn find(value: &Val, name: &str) -> Option<&'static Method> {
    methods_for(value)
        .iter()
        .chain(EXTENSIONS.iter())
        .find(|m| m.name.eq_ignore_ascii_case(name))
}

fn candidate_names(value: &Val) -> impl Iterator<Item = &'static str> {
    methods_for(value)
        .iter()
        .chain(EXTENSIONS.iter())
        .map(|m| m.name)
}

fn converts(param: Param, arg: &Val) -> bool {
    match param {
        Param::Any => true,
        Param::Num => arg.as_num().is_some(),
        Param::Text => !matches!(arg, Val::List(_) | Val::Obj(_)),
    }
}

/* ===================== Argument Helpers ===================== */

fn text(v: &Val) -> String {
    v.to_string()
}

fn num(v: &Val) -> f64 {
    v.as_num().unwrap_or_default()
}

fn count(v: &Val) -> usize {
    num(v).max(0.0) as usize
}

fn list(v: &Val) -> &[Val] {
    match v {
        Val::List(items) => items,
        _ => &[],
    }
}

fn map_keys(v: &Val) -> Vec<String> {
    match v {
        Val::Obj(map) => {
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            keys
        }
        _ => Vec::new(),
    }
}

fn join(items: &[Val], sep: &str) -> String {
    items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(sep)
}

fn substring(s: &str, start: f64, len: Option<f64>) -> String {
    let start = start.max(0.0) as usize;
    let chars = s.chars().skip(start);
    match len {
        Some(len) => chars.take(len.max(0.0) as usize).collect(),
        None => chars.collect(),
    }
}

fn loosely_equal(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Num(x), other) | (other, Val::Num(x)) => other.as_num() == Some(*x),
        (Val::Str(x), Val::Str(y)) => x.eq_ignore_ascii_case(y),
        _ => a == b,
    }
}

fn date_part(v: &Val, part: fn(&DateTime<Utc>) -> f64) -> Result<Val, MemoryError> {
    match v {
        Val::Date(d) => Ok(Val::Num(part(d))),
        _ => Ok(Val::Null),
    }
}

fn add_to_date(v: &Val, amount: f64, unit_ms: f64) -> Result<Val, MemoryError> {
    let Val::Date(d) = v else {
        return Ok(v.clone());
    };
    let ms = (amount * unit_ms).round();
    ms.is_finite()
        .then(|| Duration::try_milliseconds(ms as i64))
        .flatten()
        .and_then(|delta| d.checked_add_signed(delta))
        .map(Val::Date)
        .ok_or_else(|| MemoryError::Arithmetic {
            op: '+',
            left: v.type_name().to_string(),
            right: format!("{} ms", ms),
        })
}

/// strftime-style formatting; an unknown specifier is an argument error
fn format_date(d: &DateTime<Utc>, fmt: &str) -> Result<Val, MemoryError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(MemoryError::InvalidArguments {
            method: "ToString".to_string(),
            given: 1,
            expected: format!("a valid date format, got '{}'", fmt),
        });
    }
    Ok(Val::Str(d.format_with_items(items.iter()).to_string()))
}

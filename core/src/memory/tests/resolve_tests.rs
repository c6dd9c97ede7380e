//! Tests for expression resolution

use super::helpers::{s, stack, stack_with, stack_with_settings};
use crate::memory::MemoryError;
use crate::types::Val;
use chrono::{Duration, TimeZone, Utc};
use maplit::hashmap;
use serde_json::json;

#[test]
fn test_nested_property_and_one_based_index() {
    let memory = stack_with(
        "user",
        json!({"name": "Ada", "items": [{"name": "first"}, {"name": "second"}]}),
    );

    assert_eq!(memory.get_value("%user.items[2].name%").unwrap(), s("second"));
    assert_eq!(memory.get_value("%user.items.1.name%").unwrap(), s("first"));
    assert_eq!(memory.get_value("%user.Name%").unwrap(), s("Ada"));
}

#[test]
fn test_absent_is_distinct_from_null() {
    let mut memory = stack();
    let missing = memory.get("%missing%").unwrap();
    assert!(!missing.initiated);
    assert_eq!(missing.value, Val::Null);

    memory.put("empty", Val::Null).unwrap();
    let empty = memory.get("%empty%").unwrap();
    assert!(empty.initiated);
    assert_eq!(empty.value, Val::Null);
}

#[test]
fn test_variable_names_are_case_insensitive() {
    let mut memory = stack();
    memory.put("UserName", s("ada")).unwrap();
    assert_eq!(memory.get_value("%username%").unwrap(), s("ada"));
    assert!(memory.contains("USERNAME"));
}

#[test]
fn test_arithmetic_on_numbers() {
    let mut memory = stack();
    memory.put("count", Val::Num(2.0)).unwrap();
    memory.put("step", Val::Num(5.0)).unwrap();

    assert_eq!(memory.get_value("%count+1%").unwrap(), Val::Num(3.0));
    assert_eq!(memory.get_value("%count*3%").unwrap(), Val::Num(6.0));
    assert_eq!(memory.get_value("%step - count%").unwrap(), Val::Num(3.0));
}

#[test]
fn test_absent_numeric_variable_starts_at_zero() {
    let memory = stack();
    assert_eq!(memory.get_value("%counter+1%").unwrap(), Val::Num(1.0));
}

#[test]
fn test_division_by_zero_is_an_error() {
    let mut memory = stack();
    memory.put("n", Val::Num(4.0)).unwrap();
    assert!(matches!(
        memory.get("%n/0%"),
        Err(MemoryError::Arithmetic { op: '/', .. })
    ));
}

#[test]
fn test_now_with_duration() {
    let memory = stack();
    let before = Utc::now();
    let Val::Date(later) = memory.get_value("%Now+3 days%").unwrap() else {
        unreachable!("Now should resolve to a date");
    };
    assert!(later >= before + Duration::days(3));
    assert!(later <= Utc::now() + Duration::days(3));
}

#[test]
fn test_date_overflow_is_an_error() {
    let memory = stack();
    let err = memory.get_value("%Now+100000000 days%").unwrap_err();
    assert!(matches!(err, MemoryError::Arithmetic { op: '+', .. }));

    let err = memory.get_value("%now.AddDays(100000000)%").unwrap_err();
    assert!(matches!(err, MemoryError::Arithmetic { .. }));
}

#[test]
fn test_date_variable_arithmetic() {
    let mut memory = stack();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    memory.put("start", Val::Date(start)).unwrap();

    assert_eq!(
        memory.get_value("%start-2 hours%").unwrap(),
        Val::Date(start - Duration::hours(2))
    );
    assert_eq!(memory.get_value("%start.Month%").unwrap(), Val::Num(5.0));
}

#[test]
fn test_settings_lookup() {
    let memory = stack_with_settings(hashmap! {
        "ApiKey".to_string() => json!("secret"),
    });
    assert_eq!(memory.get_value("%Settings.ApiKey%").unwrap(), s("secret"));

    let err = memory.get("%Settings.Missing%").unwrap_err();
    assert_eq!(
        err,
        MemoryError::MissingSetting {
            key: "Missing".to_string()
        }
    );
}

#[test]
fn test_methods_and_properties() {
    let mut memory = stack();
    memory.put("name", s("stepwise")).unwrap();
    memory.put("n", Val::Num(4.0)).unwrap();

    assert_eq!(memory.get_value("%name.ToUpper()%").unwrap(), s("STEPWISE"));
    assert_eq!(memory.get_value("%name.Length%").unwrap(), Val::Num(8.0));
    assert_eq!(
        memory.get_value("%name.Substring(0, 4)%").unwrap(),
        s("step")
    );
    assert_eq!(
        memory.get_value("%name.Substring(%n%)%").unwrap(),
        s("wise")
    );
}

#[test]
fn test_unknown_property_suggests_closest_name() {
    let mut memory = stack();
    memory.put("name", s("stepwise")).unwrap();

    let err = memory.get("%name.Lenght%").unwrap_err();
    let MemoryError::PropertyNotFound { suggestion, .. } = &err else {
        unreachable!("Expected PropertyNotFound, got {:?}", err);
    };
    assert_eq!(suggestion.as_deref(), Some("Length"));
}

#[test]
fn test_build_mode_keeps_placeholder() {
    let mut memory = stack().with_build_mode(true);
    memory.put("name", s("stepwise")).unwrap();

    let obj = memory.get("%name.Lenght%").unwrap();
    assert!(!obj.initiated);
    assert_eq!(obj.value, s("%name.Lenght%"));
}

#[test]
fn test_json_path_queries() {
    let memory = stack_with("data", json!({"users": [{"id": 1}, {"id": 2}]}));

    let ids = Val::List(vec![Val::Num(1.0), Val::Num(2.0)]);
    assert_eq!(memory.get_value("%data.users[*].id%").unwrap(), ids);
    assert_eq!(memory.get_value("%data..id%").unwrap(), ids);
    assert_eq!(memory.get_value("%data.$.users[0].id%").unwrap(), Val::Num(1.0));
}

#[test]
fn test_undeclared_property_on_list_projects() {
    let memory = stack_with("users", json!([{"id": 1}, {"id": 2}]));
    assert_eq!(
        memory.get_value("%users.id%").unwrap(),
        Val::List(vec![Val::Num(1.0), Val::Num(2.0)])
    );
    assert_eq!(memory.get_value("%users.Count%").unwrap(), Val::Num(2.0));
}

#[test]
fn test_dictionary_key_through_variable() {
    let mut memory = stack_with("config", json!({"a": "x", "b": "y"}));
    memory.put("which", s("b")).unwrap();

    assert_eq!(memory.get_value("%config[which]%").unwrap(), s("y"));
    assert_eq!(memory.get_value("%config['a']%").unwrap(), s("x"));
    assert_eq!(memory.get_value("%config.missing%").unwrap(), Val::Null);
}

#[test]
fn test_index_out_of_range() {
    let memory = stack_with("list", json!([1, 2]));
    assert!(matches!(
        memory.get("%list[3]%"),
        Err(MemoryError::IndexOutOfRange { index: 3, len: 2, .. })
    ));
}

#[test]
fn test_escaped_dot_in_name() {
    let mut memory = stack();
    memory.put("file&dot;name", s("report.pdf")).unwrap();
    assert_eq!(memory.get_value("%file&dot;name%").unwrap(), s("report.pdf"));
}

#[test]
fn test_parent_lineage() {
    let memory = stack_with("user", json!({"address": {"city": "Metropolis"}}));
    let city = memory.get("%user.address.city%").unwrap();
    assert_eq!(city.parent.as_deref(), Some("user.address"));
}

#[test]
fn test_resolve_text_interpolates_and_keeps_types() {
    let mut memory = stack();
    memory.put("name", s("Ada")).unwrap();
    memory.put("count", Val::Num(3.0)).unwrap();

    assert_eq!(
        memory.resolve_text("Hello %name%, 100% ready").unwrap(),
        s("Hello Ada, 100% ready")
    );
    assert_eq!(memory.resolve_text("%count%").unwrap(), Val::Num(3.0));
    assert_eq!(memory.resolve_text("no references").unwrap(), s("no references"));
}

#[test]
fn test_resolve_json_walks_parameters() {
    let mut memory = stack();
    memory.put("name", s("Ada")).unwrap();

    let resolved = memory
        .resolve_json(&json!({"greeting": "Hi %name%", "tags": ["%name%", 2]}))
        .unwrap();
    let Val::Obj(map) = resolved else {
        unreachable!("Expected an object");
    };
    assert_eq!(map["greeting"], s("Hi Ada"));
    assert_eq!(map["tags"], Val::List(vec![s("Ada"), Val::Num(2.0)]));
}

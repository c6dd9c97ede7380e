//! JSON-path queries over structured values
//!
//! Supported subset: `$`, `.key`, `['key']`, `[n]` (0-based, negative from
//! the end), `[*]`, `.*`, and `..key` / `..*` recursive descent.

use super::error::MemoryError;
use crate::types::Val;

#[derive(Debug, Clone, PartialEq)]
enum PathToken {
    Child(String),
    Index(i64),
    Wildcard,
    Descend(Option<String>),
}

/// Run a query and collect every match
pub fn query(target: &Val, path: &str) -> Result<Vec<Val>, MemoryError> {
    let tokens = tokenize(path)?;
    let mut current = vec![target.clone()];

    for token in &tokens {
        let mut next = Vec::new();
        for value in &current {
            match token {
                PathToken::Child(name) => {
                    if let Some(child) = child(value, name) {
                        next.push(child);
                    }
                }
                PathToken::Index(idx) => {
                    if let Val::List(items) = value {
                        let len = items.len() as i64;
                        let pos = if *idx < 0 { len + idx } else { *idx };
                        if pos >= 0 && pos < len {
                            next.push(items[pos as usize].clone());
                        }
                    }
                }
                PathToken::Wildcard => next.extend(children(value)),
                PathToken::Descend(name) => {
                    let mut all = Vec::new();
                    descendants(value, &mut all);
                    match name {
                        Some(name) => {
                            next.extend(all.iter().filter_map(|v| child(v, name)));
                        }
                        None => next.extend(all.into_iter().skip(1)),
                    }
                }
            }
        }
        current = next;
    }

    Ok(current)
}

/// Run a query, shaping the result: a definite path yields its single match
/// (or `Null`), a path with wildcards or descent yields a list.
pub fn select(target: &Val, path: &str) -> Result<Val, MemoryError> {
    let tokens = tokenize(path)?;
    let definite = tokens
        .iter()
        .all(|t| matches!(t, PathToken::Child(_) | PathToken::Index(_)));
    let mut matches = query(target, path)?;
    if definite {
        Ok(if matches.is_empty() {
            Val::Null
        } else {
            matches.swap_remove(0)
        })
    } else {
        Ok(Val::List(matches))
    }
}

fn child(value: &Val, name: &str) -> Option<Val> {
    match value {
        Val::Obj(map) => map.get(name).cloned().or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        }),
        _ => None,
    }
}

fn children(value: &Val) -> Vec<Val> {
    match value {
        Val::List(items) => items.clone(),
        Val::Obj(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter().map(|k| map[k].clone()).collect()
        }
        _ => Vec::new(),
    }
}

/// The value itself followed by every nested value, depth-first
fn descendants(value: &Val, out: &mut Vec<Val>) {
    out.push(value.clone());
    for child in children(value) {
        descendants(&child, out);
    }
}

fn tokenize(path: &str) -> Result<Vec<PathToken>, MemoryError> {
    let err = |reason: &str| MemoryError::JsonPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let chars: Vec<char> = path.trim().chars().collect();
    let mut i = 0;
    if chars.first() == Some(&'$') {
        i = 1;
    }

    let mut tokens = Vec::new();
    while i < chars.len() {
        match chars[i] {
            '.' => {
                let descend = chars.get(i + 1) == Some(&'.');
                i += if descend { 2 } else { 1 };
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let token = if descend {
                    if name.is_empty() || name == "*" {
                        PathToken::Descend(None)
                    } else {
                        PathToken::Descend(Some(name))
                    }
                } else if name == "*" {
                    PathToken::Wildcard
                } else if name.is_empty() {
                    return Err(err("empty member name"));
                } else {
                    PathToken::Child(name)
                };
                tokens.push(token);
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| err("missing closing bracket"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                if inner == "*" {
                    tokens.push(PathToken::Wildcard);
                } else if let Ok(idx) = inner.parse::<i64>() {
                    tokens.push(PathToken::Index(idx));
                } else if inner.len() >= 2
                    && ((inner.starts_with('\'') && inner.ends_with('\''))
                        || (inner.starts_with('"') && inner.ends_with('"')))
                {
                    tokens.push(PathToken::Child(inner[1..inner.len() - 1].to_string()));
                } else {
                    return Err(err("unsupported bracket expression"));
                }
                i = close + 1;
            }
            _ => {
                // bare leading member (`items[0]` without `$.`)
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                tokens.push(PathToken::Child(chars[start..i].iter().collect()));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::json_to_val;
    use serde_json::json;

    fn doc() -> Val {
        json_to_val(&json!({
            "store": {
                "books": [
                    {"title": "Dune", "price": 9},
                    {"title": "Emma", "price": 12}
                ],
                "owner": {"name": "Ada"}
            }
        }))
    }

    #[test]
    fn test_definite_path() {
        assert_eq!(
            select(&doc(), "$.store.owner.name").unwrap(),
            Val::Str("Ada".into())
        );
        assert_eq!(
            select(&doc(), "$.store.books[1].title").unwrap(),
            Val::Str("Emma".into())
        );
        assert_eq!(
            select(&doc(), "$.store.books[-1].price").unwrap(),
            Val::Num(12.0)
        );
        assert_eq!(select(&doc(), "$.store.missing").unwrap(), Val::Null);
    }

    #[test]
    fn test_wildcard_projection() {
        assert_eq!(
            select(&doc(), "$.store.books[*].title").unwrap(),
            Val::List(vec![Val::Str("Dune".into()), Val::Str("Emma".into())])
        );
    }

    #[test]
    fn test_recursive_descent() {
        assert_eq!(
            select(&doc(), "$..price").unwrap(),
            Val::List(vec![Val::Num(9.0), Val::Num(12.0)])
        );
        assert_eq!(
            select(&doc(), "$..name").unwrap(),
            Val::List(vec![Val::Str("Ada".into())])
        );
    }

    #[test]
    fn test_quoted_member() {
        assert_eq!(
            select(&doc(), "$['store']['owner']['name']").unwrap(),
            Val::Str("Ada".into())
        );
    }

    #[test]
    fn test_invalid_bracket() {
        assert!(matches!(
            select(&doc(), "$.store.books[?(@.price > 10)]"),
            Err(MemoryError::JsonPath { .. })
        ));
    }
}

//! Execution plans for variable expressions
//!
//! A `%...%` reference is parsed once into an [`ExecutionPlan`]: a root
//! variable, a chain of segments (property, index, method call, JSON-path
//! query) and an optional trailing arithmetic operation.
//!
//! ```text
//! user.items[2].name      root=user, [Property(items), Index(2), Property(name)]
//! name.Substring(0, 3)    root=name, [Method(Substring, [0, 3])]
//! data.$..id              root=data, [JsonPath($..id)]
//! count+1                 root=count, arithmetic=(+, 1)
//! Now+3 days              root=Now, arithmetic=(+, 3 days)
//! ```

use chrono::Duration;

use super::error::MemoryError;
use crate::types::Val;

/// Placeholders a goal author (or parser) uses for literal `.`, `[` and `]`
/// inside a variable name or key.
pub const ESCAPED_DOT: &str = "&dot;";
pub const ESCAPED_OPEN: &str = "&lb;";
pub const ESCAPED_CLOSE: &str = "&rb;";

/* ===================== Plan Types ===================== */

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Expression with decorations stripped
    pub expr: String,
    pub root: String,
    pub segments: Vec<Segment>,
    pub arithmetic: Option<Arithmetic>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Property(String),
    Index(IndexSpec),
    Method { name: String, args: Vec<Arg> },
    JsonPath(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexSpec {
    /// Numeric index, 1-based for sequences
    Position(usize),
    /// Quoted dictionary key
    Key(String),
    /// Bare word: an exact key, otherwise resolved through a variable
    Lookup(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(Val),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arithmetic {
    pub op: char,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Duration(Duration),
    Variable(String),
}

/* ===================== Parsing ===================== */

impl ExecutionPlan {
    pub fn parse(raw: &str) -> Result<ExecutionPlan, MemoryError> {
        let expr = strip_decorations(raw);
        if expr.is_empty() {
            return Err(invalid(raw, "empty expression"));
        }

        let (path, arithmetic) = match find_arithmetic(&expr) {
            Some((pos, op, operand)) => (
                expr[..pos].trim().to_string(),
                Some(Arithmetic { op, operand }),
            ),
            None => (expr.clone(), None),
        };

        let tokens = split_top_level(&path, '.');
        let Some((_, first)) = tokens.first() else {
            return Err(invalid(raw, "missing variable name"));
        };

        let mut segments = Vec::new();

        // Root: name plus optional brackets
        let (root_name, root_rest) = split_name(first);
        if root_name.is_empty() {
            return Err(invalid(raw, "missing variable name"));
        }
        let root = translate_escapes(root_name);
        if is_json_path_token(root_rest) {
            segments.push(Segment::JsonPath(format!("${}", &path[root_name.len()..])));
            return Ok(ExecutionPlan {
                expr,
                root,
                segments,
                arithmetic,
            });
        }
        parse_brackets(raw, root_rest, &mut segments)?;

        for (offset, token) in tokens.iter().skip(1) {
            if token.is_empty() {
                // `a..b` - recursive descent from here on
                segments.push(Segment::JsonPath(format!("${}", &path[offset - 1..])));
                break;
            }
            if token.starts_with('$') {
                segments.push(Segment::JsonPath(path[*offset..].to_string()));
                break;
            }
            if is_json_path_token(token) {
                segments.push(Segment::JsonPath(format!("$.{}", &path[*offset..])));
                break;
            }
            parse_token(raw, token, &mut segments)?;
        }

        Ok(ExecutionPlan {
            expr,
            root,
            segments,
            arithmetic,
        })
    }

    /// Expression of the parent value (everything but the last segment)
    pub fn parent_expr(&self) -> Option<String> {
        if self.segments.is_empty() {
            return None;
        }
        let tokens = split_top_level(&self.expr, '.');
        if tokens.len() > 1 {
            let (offset, _) = tokens[tokens.len() - 1];
            return Some(self.expr[..offset.saturating_sub(1)].to_string());
        }
        Some(self.root.clone())
    }
}

/// Strip `%` delimiters, whitespace and a dangling trailing operator
pub fn strip_decorations(raw: &str) -> String {
    let mut s = raw.trim();
    s = s.strip_prefix('%').unwrap_or(s);
    s = s.strip_suffix('%').unwrap_or(s);
    let mut out = s.trim().to_string();
    while let Some(last) = out.chars().last() {
        let dangling = matches!(last, '+' | '-' | '/')
            || (last == '*' && !out.ends_with(".*") && !out.ends_with("[*"));
        if !dangling {
            break;
        }
        out.pop();
        out = out.trim_end().to_string();
    }
    out
}

/// Replace escape placeholders with the characters they stand for
pub fn translate_escapes(s: &str) -> String {
    s.replace(ESCAPED_DOT, ".")
        .replace(ESCAPED_OPEN, "[")
        .replace(ESCAPED_CLOSE, "]")
}

fn invalid(expr: &str, reason: impl Into<String>) -> MemoryError {
    MemoryError::InvalidExpression {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn is_json_path_token(token: &str) -> bool {
    token.contains("[*]") || token.contains("[?")
}

/// Split `s` on `sep` outside brackets, parentheses and quotes.
///
/// Returns each piece with its byte offset in `s`.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<(usize, &str)> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth -= 1,
                c if c == sep && depth == 0 => {
                    pieces.push((start, &s[start..idx]));
                    start = idx + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    pieces.push((start, &s[start..]));
    pieces
}

/// Locate a trailing arithmetic operation at the top level of `expr`
fn find_arithmetic(expr: &str) -> Option<(usize, char, Operand)> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut candidate: Option<(usize, char)> = None;
    let mut prev: Option<char> = None;

    for (idx, c) in expr.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth -= 1,
                '+' | '-' | '*' | '/' if depth == 0 && idx > 0 => {
                    if !(c == '*' && prev == Some('.')) {
                        candidate = Some((idx, c));
                    }
                }
                _ => {}
            },
        }
        prev = Some(c);
    }

    let (pos, op) = candidate?;
    let left = &expr[..pos];
    let right = expr[pos + op.len_utf8()..].trim();
    if left.trim().is_empty() || right.is_empty() {
        return None;
    }
    let spaced = left.ends_with(' ') && expr[pos + 1..].starts_with(' ');
    parse_operand(right, op, spaced).map(|operand| (pos, op, operand))
}

fn parse_operand(right: &str, op: char, spaced: bool) -> Option<Operand> {
    if let Ok(n) = right.parse::<f64>() {
        return Some(Operand::Number(n));
    }
    if let Some(duration) = parse_duration(right) {
        return Some(Operand::Duration(duration));
    }
    let name = right.trim_matches('%');
    let identifier = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '!'));
    // `first-name` is a variable name, `first - name` is a subtraction
    if identifier && (op != '-' || spaced || right.starts_with('%')) {
        return Some(Operand::Variable(name.to_string()));
    }
    None
}

/// Parse `3 days`, `1 hour`, `90 seconds`
///
/// `None` when the text is not a duration or the amount is out of range.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let mut parts = text.split_whitespace();
    let amount: f64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_lowercase();
    if parts.next().is_some() {
        return None;
    }
    let seconds_per_unit = match unit.trim_end_matches('s') {
        "second" | "sec" => 1.0,
        "minute" | "min" => 60.0,
        "hour" => 3_600.0,
        "day" => 86_400.0,
        "week" => 604_800.0,
        _ => return None,
    };
    let ms = (amount * seconds_per_unit * 1000.0).round();
    if !ms.is_finite() {
        return None;
    }
    Duration::try_milliseconds(ms as i64)
}

/// Split `name[1]['x']` into (`name`, `[1]['x']`)
fn split_name(token: &str) -> (&str, &str) {
    match token.find('[') {
        Some(pos) => (&token[..pos], &token[pos..]),
        None => (token, ""),
    }
}

fn parse_token(raw: &str, token: &str, segments: &mut Vec<Segment>) -> Result<(), MemoryError> {
    if let Some(open) = token.find('(') {
        let close = matching_close(token, open)
            .ok_or_else(|| invalid(raw, format!("unbalanced parentheses in '{}'", token)))?;
        let name = token[..open].trim().to_string();
        let args = parse_args(&token[open + 1..close]);
        segments.push(Segment::Method { name, args });
        return parse_brackets(raw, &token[close + 1..], segments);
    }

    if token.chars().all(|c| c.is_ascii_digit()) {
        let position = parse_position(raw, token)?;
        segments.push(Segment::Index(IndexSpec::Position(position)));
        return Ok(());
    }

    let (name, rest) = split_name(token);
    if !name.is_empty() {
        segments.push(Segment::Property(translate_escapes(name.trim())));
    }
    parse_brackets(raw, rest, segments)
}

fn matching_close(token: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (idx, c) in token[open..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + idx);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Parse a run of `[...]` groups into index segments
fn parse_brackets(raw: &str, mut rest: &str, segments: &mut Vec<Segment>) -> Result<(), MemoryError> {
    rest = rest.trim();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(invalid(raw, format!("unexpected '{}'", rest)));
        }
        let close = rest
            .find(']')
            .ok_or_else(|| invalid(raw, "missing closing bracket"))?;
        let inner = rest[1..close].trim();
        segments.push(Segment::Index(parse_index(raw, inner)?));
        rest = rest[close + 1..].trim();
    }
    Ok(())
}

fn parse_index(raw: &str, inner: &str) -> Result<IndexSpec, MemoryError> {
    if inner.is_empty() {
        return Err(invalid(raw, "empty index"));
    }
    if inner.chars().all(|c| c.is_ascii_digit()) {
        return Ok(IndexSpec::Position(parse_position(raw, inner)?));
    }
    if let Some(key) = unquote(inner) {
        return Ok(IndexSpec::Key(translate_escapes(key)));
    }
    Ok(IndexSpec::Lookup(translate_escapes(inner.trim_matches('%'))))
}

fn parse_position(raw: &str, digits: &str) -> Result<usize, MemoryError> {
    match digits.parse::<usize>() {
        Ok(0) => Err(invalid(raw, "indexes start at 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid(raw, format!("invalid index '{}'", digits))),
    }
}

fn unquote(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

fn parse_args(inner: &str) -> Vec<Arg> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(inner, ',')
        .into_iter()
        .map(|(_, arg)| parse_arg(arg))
        .collect()
}

fn parse_arg(arg: &str) -> Arg {
    if let Some(text) = unquote(arg) {
        return Arg::Literal(Val::Str(text.to_string()));
    }
    let arg = arg.trim();
    if arg.len() > 2 && arg.starts_with('%') && arg.ends_with('%') {
        return Arg::Variable(arg[1..arg.len() - 1].to_string());
    }
    if let Ok(n) = arg.parse::<f64>() {
        return Arg::Literal(Val::Num(n));
    }
    match arg.to_lowercase().as_str() {
        "true" => Arg::Literal(Val::Bool(true)),
        "false" => Arg::Literal(Val::Bool(false)),
        "null" => Arg::Literal(Val::Null),
        _ => Arg::Literal(Val::Str(arg.to_string())),
    }
}

//! Turning a stored SQL template plus call arguments into driver-ready SQL.
//!
//! Templates are written with named `@name` tokens regardless of dialect.
//! Preparation rewrites them into the dialect's placeholder style and builds
//! the matching, fully ordered binding list.

use std::collections::HashMap;
use std::sync::LazyLock;

use quarry_core::{Dialect, Operation, ParamStyle};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// A `@name` token, or a quoted identifier or string literal whose contents
/// are never tokens. Only the former captures group 1.
static PARAM_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[(?:[^\]]|\]\])*\]|`(?:[^`]|``)*`|"(?:[^"]|"")*"|'(?:[^']|'')*'|@(\w+)"#)
        .expect("valid regex")
});
static WHERE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid regex"));
static CLAUSE_AFTER_WHERE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ORDER\s+BY|GROUP\s+BY|HAVING)\b").expect("valid regex")
});

pub const DEFAULT_LIMIT: i64 = 100;
pub const DEFAULT_OFFSET: i64 = 0;

fn token_name<'h>(caps: &Captures<'h>) -> Option<&'h str> {
    caps.get(1).map(|m| m.as_str())
}

/// Distinct `@name` tokens of `sql` in first-occurrence order.
pub fn scan_parameters(sql: &str) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    for name in PARAM_TOKEN.captures_iter(sql).filter_map(|c| token_name(&c)) {
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// SQL type used when binding a null, so drivers that type their
/// parameters see the same type the column comparison expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    fn from_schema(schema: &Value, name: &str) -> Self {
        let ty = &schema["properties"][name]["type"];
        let first = match ty {
            Value::String(s) => Some(s.as_str()),
            Value::Array(types) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
            _ => None,
        };
        match first {
            Some("integer") => ParamKind::Integer,
            Some("number") => ParamKind::Number,
            Some("boolean") => ParamKind::Boolean,
            _ => ParamKind::Text,
        }
    }
}

/// True when the schema types `name` as either a string or a number, as it
/// does for generated record ids.
fn accepts_string_or_number(schema: &Value, name: &str) -> bool {
    let Value::Array(types) = &schema["properties"][name]["type"] else {
        return false;
    };
    let has = |t: &str| types.iter().any(|v| v.as_str() == Some(t));
    has("string") && (has("number") || has("integer"))
}

/// One bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null(ParamKind),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl BindValue {
    fn from_json(value: &Value, kind: ParamKind) -> Self {
        match value {
            Value::Null => BindValue::Null(kind),
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::Int(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            BindValue::Int(f as i64)
                        }
                        Some(f) => BindValue::Float(f),
                        None => BindValue::Text(n.to_string()),
                    }
                }
            }
            Value::String(s) => BindValue::Text(s.clone()),
            // Arrays and objects travel as their JSON text.
            other => BindValue::Text(other.to_string()),
        }
    }

    /// Record keys may arrive as `5` or `"5"`. Integer-looking strings bind
    /// as integers so typed drivers compare them against integer keys.
    fn from_key(value: &Value, kind: ParamKind) -> Self {
        if let Value::String(s) = value
            && let Ok(i) = s.trim().parse::<i64>()
        {
            return BindValue::Int(i);
        }
        Self::from_json(value, kind)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BindValue::Null(_))
    }
}

/// SQL ready for a driver, with bindings in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub sql: String,
    pub bindings: Vec<BindValue>,
}

/// Rewrite `sql` for `dialect` and bind `args` to its parameters.
///
/// `params` is the persisted parameter list; when absent the template is
/// scanned. `limit` and `offset` default to 100 and 0. Every parameter is
/// bound, as null when no value was supplied.
///
/// SQL Server reads with no active filter have their `WHERE` clause removed
/// up to the next `ORDER BY`, `GROUP BY` or `HAVING`; some column types
/// (legacy `ntext`) cannot take part in the `@p IS NULL OR col = @p` form.
pub fn prepare_statement(
    dialect: Dialect,
    sql: &str,
    params: Option<&[String]>,
    args: &Map<String, Value>,
    operation: Operation,
    input_schema: &Value,
) -> PreparedStatement {
    let params: Vec<String> = match params {
        Some(p) => p.to_vec(),
        None => scan_parameters(sql),
    };

    let values: HashMap<&str, BindValue> = params
        .iter()
        .map(|name| {
            let kind = ParamKind::from_schema(input_schema, name);
            let supplied = args.get(name).filter(|v| !v.is_null());
            let value = match (name.as_str(), supplied) {
                (_, Some(v)) if accepts_string_or_number(input_schema, name) => {
                    BindValue::from_key(v, kind)
                }
                (_, Some(v)) => BindValue::from_json(v, kind),
                ("limit", None) => BindValue::Int(DEFAULT_LIMIT),
                ("offset", None) => BindValue::Int(DEFAULT_OFFSET),
                (_, None) => BindValue::Null(kind),
            };
            (name.as_str(), value)
        })
        .collect();

    match dialect.param_style() {
        ParamStyle::AtNamed => {
            let has_active_filter = params
                .iter()
                .filter(|p| !is_pagination(p))
                .any(|p| args.get(p.as_str()).is_some_and(|v| !v.is_null()));
            let sql = if operation == Operation::Select && !has_active_filter {
                strip_where(sql)
            } else {
                sql.to_string()
            };
            let index: HashMap<&str, usize> = params
                .iter()
                .enumerate()
                .map(|(i, p)| (p.as_str(), i + 1))
                .collect();
            let sql = PARAM_TOKEN
                .replace_all(&sql, |caps: &Captures| match token_name(caps).and_then(|n| index.get(n)) {
                    Some(i) => format!("@P{i}"),
                    None => caps[0].to_string(),
                })
                .into_owned();
            let bindings = params.iter().map(|p| values[p.as_str()].clone()).collect();
            PreparedStatement { sql, bindings }
        }
        ParamStyle::Dollar => {
            let mut order: Vec<String> = Vec::new();
            let sql = PARAM_TOKEN
                .replace_all(sql, |caps: &Captures| {
                    let Some(name) = token_name(caps).filter(|n| values.contains_key(n)) else {
                        return caps[0].to_string();
                    };
                    let pos = match order.iter().position(|n| n == name) {
                        Some(pos) => pos,
                        None => {
                            order.push(name.to_string());
                            order.len() - 1
                        }
                    };
                    format!("${}", pos + 1)
                })
                .into_owned();
            let bindings = order.iter().map(|n| values[n.as_str()].clone()).collect();
            PreparedStatement { sql, bindings }
        }
        ParamStyle::QuestionMark => {
            let mut bindings = Vec::new();
            let sql = PARAM_TOKEN
                .replace_all(sql, |caps: &Captures| match token_name(caps).and_then(|n| values.get(n)) {
                    Some(value) => {
                        bindings.push(value.clone());
                        "?".to_string()
                    }
                    None => caps[0].to_string(),
                })
                .into_owned();
            PreparedStatement { sql, bindings }
        }
    }
}

fn is_pagination(name: &str) -> bool {
    name == "limit" || name == "offset"
}

/// Remove every `WHERE ...` clause up to the next clause keyword or the end.
fn strip_where(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(m) = WHERE_KEYWORD.find(rest) {
        out.push_str(&rest[..m.start()]);
        let tail = &rest[m.end()..];
        rest = match CLAUSE_AFTER_WHERE.find(tail) {
            Some(next) => &tail[next.start()..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

//! Column inference from sample rows.
//!
//! Columns are taken from the first row, in key order. A column's type is the
//! JSON type of its first non-null value among the first ten rows; a column
//! is nullable if any row has it null or missing.

use serde_json::{Map, Value};

/// Rows sampled when the first row's value is null.
const TYPE_SAMPLE_ROWS: usize = 10;

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Number,
    Boolean,
    String,
}

impl ColumnType {
    /// JSON Schema type used in generated input schemas. Integers are
    /// advertised as `number` so clients may send `1.0`.
    pub fn schema_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Number)
    }

    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 => Some(ColumnType::Integer),
                _ => Some(ColumnType::Number),
            },
            _ => Some(ColumnType::String),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    /// Placeholder-safe form of the column name, used for `@` tokens and the
    /// matching input-schema properties.
    pub fn param_name(&self) -> String {
        param_ident(&self.name)
    }

    pub fn is_id(&self) -> bool {
        self.name.eq_ignore_ascii_case("id")
    }
}

pub fn analyze_columns(rows: &[Map<String, Value>]) -> Vec<Column> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };

    first
        .iter()
        .map(|(name, value)| {
            let column_type = ColumnType::of(value)
                .or_else(|| {
                    rows.iter()
                        .take(TYPE_SAMPLE_ROWS)
                        .skip(1)
                        .find_map(|row| row.get(name).and_then(ColumnType::of))
                })
                .unwrap_or(ColumnType::String);
            let nullable = rows
                .iter()
                .any(|row| row.get(name).is_none_or(Value::is_null));
            Column {
                name: name.clone(),
                column_type,
                nullable,
            }
        })
        .collect()
}

/// Lower-case, non-alphanumerics to `_`, runs collapsed, edges trimmed.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Replace anything outside `[A-Za-z0-9_]` with `_`, keeping case.
pub fn param_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

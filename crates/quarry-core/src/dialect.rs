//! SQL dialects supported by the generator and the executor.
//!
//! Every dialect-specific quirk (placeholder syntax, pagination, identifier
//! quoting, default port) is answered here so callers never compare type
//! strings themselves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A target SQL engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mssql,
    Mysql,
    #[serde(alias = "postgres")]
    Postgresql,
}

/// How the driver expects bound parameters to appear in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// Named `@name` placeholders (SQL Server).
    AtNamed,
    /// Positional `?`, one binding per occurrence (MySQL).
    QuestionMark,
    /// Numbered `$n`, reusable (PostgreSQL).
    Dollar,
}

/// How generated SQL quotes table and column identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierQuoting {
    /// `[name]` for every dialect. Matches the SQL already persisted by
    /// earlier releases.
    #[default]
    Bracket,
    /// The dialect's own quoting character.
    Native,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Mssql, Dialect::Mysql, Dialect::Postgresql];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Mssql => "mssql",
            Dialect::Mysql => "mysql",
            Dialect::Postgresql => "postgresql",
        }
    }

    pub fn param_style(&self) -> ParamStyle {
        match self {
            Dialect::Mssql => ParamStyle::AtNamed,
            Dialect::Mysql => ParamStyle::QuestionMark,
            Dialect::Postgresql => ParamStyle::Dollar,
        }
    }

    /// Trailing pagination clause, written with `@limit` / `@offset` tokens.
    pub fn pagination_clause(&self) -> &'static str {
        match self {
            Dialect::Mssql => "OFFSET @offset ROWS FETCH NEXT @limit ROWS ONLY",
            Dialect::Mysql | Dialect::Postgresql => "LIMIT @limit OFFSET @offset",
        }
    }

    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Dialect::Mssql => bracket(ident),
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgresql => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote an identifier according to the generator's quoting mode.
    pub fn quote_with(&self, ident: &str, quoting: IdentifierQuoting) -> String {
        match quoting {
            IdentifierQuoting::Bracket => bracket(ident),
            IdentifierQuoting::Native => self.quote_identifier(ident),
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::Mssql => 1433,
            Dialect::Mysql => 3306,
            Dialect::Postgresql => 5432,
        }
    }
}

fn bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            "mysql" => Ok(Dialect::Mysql),
            "postgresql" | "postgres" => Ok(Dialect::Postgresql),
            _ => Err(CoreError::UnsupportedDatabaseType {
                db_type: s.to_string(),
            }),
        }
    }
}

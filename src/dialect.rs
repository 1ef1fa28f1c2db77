//! SQL dialect differences that matter when generating copy statements.

use clap::ValueEnum;
use std::fmt;

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    #[default]
    Postgres,
    #[value(name = "mysql")]
    MySql,
    #[value(name = "sqlserver")]
    SqlServer,
    Spanner,
}

impl Dialect {
    /// Wraps an identifier in the dialect's quotes, doubling any embedded closing quote.
    ///
    /// - PostgreSQL: `"my_column"`
    /// - MySQL / Spanner: `` `my_column` ``
    /// - SQL Server: `[my_column]`
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::MySql | Dialect::Spanner => format!("`{}`", ident.replace('`', "``")),
            Dialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// Positional parameter marker for the zero-based `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index + 1),
            Dialect::MySql | Dialect::Spanner => "?".to_string(),
            Dialect::SqlServer => format!("@P{}", index + 1),
        }
    }

    /// Pagination query used when no template override is configured.
    pub fn default_select_template(&self) -> &'static str {
        match self {
            Dialect::SqlServer => {
                "SELECT $COLUMNS FROM $TABLE ORDER BY $PRIMARY_KEY OFFSET $OFFSET ROWS FETCH NEXT $BATCH_SIZE ROWS ONLY"
            }
            _ => "SELECT $COLUMNS FROM $TABLE ORDER BY $PRIMARY_KEY LIMIT $BATCH_SIZE OFFSET $OFFSET",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::MySql => "MySQL",
            Dialect::SqlServer => "SQL Server",
            Dialect::Spanner => "Spanner",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_and_escapes_identifiers() {
        assert_eq!(Dialect::Postgres.quote_identifier("my\"col"), "\"my\"\"col\"");
        assert_eq!(Dialect::MySql.quote_identifier("order"), "`order`");
        assert_eq!(Dialect::SqlServer.quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn placeholders_follow_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(0), "$1");
        assert_eq!(Dialect::Spanner.placeholder(4), "?");
        assert_eq!(Dialect::SqlServer.placeholder(1), "@P2");
    }
}

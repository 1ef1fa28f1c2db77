// src/table.rs
// Table identity and the column metadata discovered for it.

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::{CopyError, Result};
use crate::value::ColumnType;
use itertools::Itertools;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableDescriptor {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl FromStr for TableDescriptor {
    type Err = CopyError;
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(CopyError::Config(format!("invalid table reference '{s}'")));
        }
        match parts.as_slice() {
            [name] => Ok(TableDescriptor::new(None, None, name)),
            [schema, name] => Ok(TableDescriptor::new(None, Some(*schema), name)),
            [catalog, schema, name] => {
                Ok(TableDescriptor::new(Some(*catalog), Some(*schema), name))
            }
            _ => Err(CopyError::Config(format!("invalid table reference '{s}'"))),
        }
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts().join("."))
    }
}

impl TableDescriptor {
    /// Empty catalog or schema strings are treated as absent.
    pub fn new(catalog: Option<&str>, schema: Option<&str>, name: &str) -> Self {
        let non_empty = |part: Option<&str>| part.filter(|p| !p.is_empty()).map(str::to_string);
        Self {
            catalog: non_empty(catalog),
            schema: non_empty(schema),
            name: name.to_string(),
        }
    }

    /// Same table name, placed in another schema (or unqualified).
    pub fn in_schema(&self, schema: Option<&str>) -> Self {
        TableDescriptor::new(None, schema, &self.name)
    }

    /// Fully qualified reference with every part quoted for `dialect`.
    pub fn qualified(&self, dialect: Dialect) -> String {
        self.parts()
            .into_iter()
            .map(|part| dialect.quote_identifier(part))
            .join(".")
    }

    fn parts(&self) -> Vec<&str> {
        self.catalog
            .iter()
            .chain(self.schema.iter())
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

/// Columns of a table in source order plus its primary key in key order.
///
/// Column order is shared by the generated SELECT projection and the INSERT
/// parameter list, so values can be bound positionally.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ColumnSet {
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl ColumnSet {
    pub fn new(columns: Vec<Column>, primary_key: Vec<String>) -> Self {
        Self {
            columns,
            primary_key,
        }
    }

    /// Reads column and primary-key metadata for `table` from the source.
    pub fn discover(connection: &mut dyn Connection, table: &TableDescriptor) -> Result<Self> {
        let columns = connection.columns(table)?;
        let primary_key = connection.primary_key(table)?;
        debug!(
            table = %table,
            columns = columns.len(),
            primary_key = %primary_key.join(", "),
            "Discovered table metadata"
        );
        Ok(Self::new(columns, primary_key))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn types(&self) -> impl Iterator<Item = &ColumnType> {
        self.columns.iter().map(|c| &c.column_type)
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Offset pagination needs a stable total order, which only a primary key gives.
    pub fn is_copyable(&self) -> bool {
        !self.primary_key.is_empty() && !self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_references() {
        let table: TableDescriptor = "sales.public.orders".parse().unwrap();
        assert_eq!(table.catalog.as_deref(), Some("sales"));
        assert_eq!(table.schema.as_deref(), Some("public"));
        assert_eq!(table.name, "orders");
        assert_eq!(table.to_string(), "sales.public.orders");

        let table: TableDescriptor = "orders".parse().unwrap();
        assert_eq!(table, TableDescriptor::new(None, None, "orders"));
        assert!("a..b".parse::<TableDescriptor>().is_err());
        assert!("a.b.c.d".parse::<TableDescriptor>().is_err());
    }

    #[test]
    fn skips_empty_parts_when_qualifying() {
        let table = TableDescriptor::new(Some(""), Some("app"), "Users");
        assert_eq!(table.to_string(), "app.Users");
        assert_eq!(table.qualified(Dialect::Postgres), "\"app\".\"Users\"");
        assert_eq!(table.qualified(Dialect::MySql), "`app`.`Users`");
    }

    #[test]
    fn in_schema_drops_catalog() {
        let table = TableDescriptor::new(Some("src"), Some("public"), "orders");
        assert_eq!(table.in_schema(Some("archive")).to_string(), "archive.orders");
        assert_eq!(table.in_schema(None).to_string(), "orders");
    }

    #[test]
    fn table_without_primary_key_is_not_copyable() {
        let columns = vec![Column::new("id", ColumnType::BigInt)];
        assert!(!ColumnSet::new(columns.clone(), vec![]).is_copyable());
        assert!(ColumnSet::new(columns, vec!["id".into()]).is_copyable());
    }
}

//! Structured builders for the statements a copy unit runs.
//!
//! The pagination SELECT comes from a user-overridable template. The template
//! is parsed once; only the five known placeholders may appear and all of
//! them must. Identifiers are quoted for the source dialect before they are
//! substituted and numbers are rendered here, so nothing from the data itself
//! is ever spliced into SQL.

use crate::dialect::Dialect;
use crate::error::{CopyError, Result};
use crate::table::{ColumnSet, TableDescriptor};
use itertools::Itertools;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placeholder {
    Columns,
    Table,
    PrimaryKey,
    BatchSize,
    Offset,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::Columns,
        Placeholder::Table,
        Placeholder::PrimaryKey,
        Placeholder::BatchSize,
        Placeholder::Offset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::Columns => "COLUMNS",
            Placeholder::Table => "TABLE",
            Placeholder::PrimaryKey => "PRIMARY_KEY",
            Placeholder::BatchSize => "BATCH_SIZE",
            Placeholder::Offset => "OFFSET",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectTemplate {
    segments: Vec<Segment>,
}

impl FromStr for SelectTemplate {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = s;
        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let len = after
                .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
                .unwrap_or(after.len());
            if len == 0 {
                // `$1` style markers are not placeholders.
                literal.push('$');
                rest = after;
                continue;
            }
            let name = &after[..len];
            let placeholder = Placeholder::from_name(name)
                .ok_or_else(|| CopyError::Template(format!("unknown placeholder ${name}")))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Placeholder(placeholder));
            rest = &after[len..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let missing: Vec<String> = Placeholder::ALL
            .into_iter()
            .filter(|p| !segments.contains(&Segment::Placeholder(*p)))
            .map(|p| format!("${}", p.name()))
            .collect();
        if !missing.is_empty() {
            return Err(CopyError::Template(format!(
                "missing placeholder(s) {}",
                missing.join(", ")
            )));
        }
        Ok(SelectTemplate { segments })
    }
}

impl SelectTemplate {
    fn render(&self, columns: &str, table: &str, primary_key: &str, limit: u64, offset: u64) -> String {
        let mut sql = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => sql.push_str(text),
                Segment::Placeholder(Placeholder::Columns) => sql.push_str(columns),
                Segment::Placeholder(Placeholder::Table) => sql.push_str(table),
                Segment::Placeholder(Placeholder::PrimaryKey) => sql.push_str(primary_key),
                Segment::Placeholder(Placeholder::BatchSize) => sql.push_str(&limit.to_string()),
                Segment::Placeholder(Placeholder::Offset) => sql.push_str(&offset.to_string()),
            }
        }
        sql
    }
}

/// One page of a table, ordered by primary key.
#[derive(Debug, Clone)]
pub struct PageQuery<'a> {
    pub table: &'a TableDescriptor,
    pub columns: &'a ColumnSet,
    pub limit: u64,
    pub offset: u64,
    pub sql: String,
}

/// Parameterized INSERT for one destination table and column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: TableDescriptor,
    pub columns: Vec<String>,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    template: SelectTemplate,
    source: Dialect,
    destination: Dialect,
}

impl QueryBuilder {
    /// Uses the source dialect's default pagination when `template` is `None`.
    pub fn new(template: Option<&str>, source: Dialect, destination: Dialect) -> Result<Self> {
        let template = match template {
            Some(text) => text.parse()?,
            None => source.default_select_template().parse()?,
        };
        Ok(Self {
            template,
            source,
            destination,
        })
    }

    pub fn page<'a>(
        &self,
        table: &'a TableDescriptor,
        columns: &'a ColumnSet,
        limit: u64,
        offset: u64,
    ) -> PageQuery<'a> {
        let quote = |name: &str| self.source.quote_identifier(name);
        let projection = columns.names().map(quote).join(", ");
        let order = columns.primary_key().iter().map(|k| quote(k)).join(", ");
        let sql = self.template.render(
            &projection,
            &table.qualified(self.source),
            &order,
            limit,
            offset,
        );
        PageQuery {
            table,
            columns,
            limit,
            offset,
            sql,
        }
    }

    pub fn insert(&self, table: &TableDescriptor, columns: &ColumnSet) -> InsertStatement {
        let names: Vec<String> = columns.names().map(str::to_string).collect();
        let quoted = names
            .iter()
            .map(|n| self.destination.quote_identifier(n))
            .join(", ");
        let params = (0..names.len())
            .map(|i| self.destination.placeholder(i))
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.qualified(self.destination),
            quoted,
            params
        );
        InsertStatement {
            table: table.clone(),
            columns: names,
            sql,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use crate::value::ColumnType;

    fn orders() -> (TableDescriptor, ColumnSet) {
        let table = TableDescriptor::new(None, Some("public"), "orders");
        let columns = ColumnSet::new(
            vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("region", ColumnType::Varchar),
                Column::new("total", ColumnType::Numeric),
            ],
            vec!["region".into(), "id".into()],
        );
        (table, columns)
    }

    #[test]
    fn renders_default_postgres_page() {
        let (table, columns) = orders();
        let builder = QueryBuilder::new(None, Dialect::Postgres, Dialect::Postgres).unwrap();
        let page = builder.page(&table, &columns, 500, 1500);
        assert_eq!(
            page.sql,
            "SELECT \"id\", \"region\", \"total\" FROM \"public\".\"orders\" ORDER BY \"region\", \"id\" LIMIT 500 OFFSET 1500"
        );
    }

    #[test]
    fn renders_sql_server_pagination() {
        let (table, columns) = orders();
        let builder = QueryBuilder::new(None, Dialect::SqlServer, Dialect::Postgres).unwrap();
        let page = builder.page(&table, &columns, 10, 0);
        assert_eq!(
            page.sql,
            "SELECT [id], [region], [total] FROM [public].[orders] ORDER BY [region], [id] OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn custom_template_keeps_literal_dollar_markers() {
        let (table, columns) = orders();
        let template =
            "SELECT $COLUMNS FROM $TABLE WHERE note <> '$5' ORDER BY $PRIMARY_KEY LIMIT $BATCH_SIZE OFFSET $OFFSET";
        let builder =
            QueryBuilder::new(Some(template), Dialect::Postgres, Dialect::Postgres).unwrap();
        let page = builder.page(&table, &columns, 2, 4);
        assert!(page.sql.contains("WHERE note <> '$5'"));
        assert!(page.sql.ends_with("LIMIT 2 OFFSET 4"));
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let err = "SELECT $COLUMNS FROM $TABLE ORDER BY $PRIMARY_KEY LIMIT $BATCH_SIZE OFFSET $OFFSET $WHERE"
            .parse::<SelectTemplate>()
            .unwrap_err();
        assert!(err.to_string().contains("$WHERE"));
    }

    #[test]
    fn rejects_template_without_offset() {
        let err = "SELECT $COLUMNS FROM $TABLE ORDER BY $PRIMARY_KEY LIMIT $BATCH_SIZE"
            .parse::<SelectTemplate>()
            .unwrap_err();
        assert!(matches!(err, CopyError::Template(msg) if msg.contains("$OFFSET")));
    }

    #[test]
    fn insert_uses_destination_dialect() {
        let (_, columns) = orders();
        let target = TableDescriptor::new(None, None, "orders");
        let builder = QueryBuilder::new(None, Dialect::Postgres, Dialect::MySql).unwrap();
        let insert = builder.insert(&target, &columns);
        assert_eq!(
            insert.sql,
            "INSERT INTO `orders` (`id`, `region`, `total`) VALUES (?, ?, ?)"
        );
        assert_eq!(insert.columns, vec!["id", "region", "total"]);

        let builder = QueryBuilder::new(None, Dialect::Postgres, Dialect::Postgres).unwrap();
        let insert = builder.insert(&target, &columns);
        assert_eq!(
            insert.sql,
            "INSERT INTO \"orders\" (\"id\", \"region\", \"total\") VALUES ($1, $2, $3)"
        );
    }
}

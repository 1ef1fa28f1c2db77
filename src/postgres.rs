//! PostgreSQL implementation of [`Connection`] over pooled `postgres` clients.

use crate::connection::{Connection, ConnectionFactory};
use crate::dialect::Dialect;
use crate::error::{CopyError, Result};
use crate::query::{InsertStatement, PageQuery};
use crate::table::{Column, TableDescriptor};
use crate::value::{ColumnType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{FromSql, ToSql, Type};
use postgres::{Row, Statement};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::{PostgresConnectionManager, postgres::NoTls as R2d2NoTls};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::error::Error;
use tracing::warn;

pub type PgPool = Pool<PostgresConnectionManager<R2d2NoTls>>;

pub fn build_pool(uri: &str, max_size: u32) -> Result<PgPool> {
    let manager = PostgresConnectionManager::new(uri.parse()?, R2d2NoTls);
    Ok(Pool::builder().max_size(max_size).build(manager)?)
}

/// Source and destination pools. Every call checks out a separate connection.
pub struct PgConnectionFactory {
    source: PgPool,
    destination: PgPool,
}

impl PgConnectionFactory {
    /// Pools are sized for `workers` parallel units plus the table driver itself.
    pub fn new(source_uri: &str, destination_uri: &str, workers: usize) -> Result<Self> {
        let max_size = u32::try_from(workers + 1)
            .map_err(|_| CopyError::Config(format!("too many workers: {workers}")))?;
        Ok(Self {
            source: build_pool(source_uri, max_size)?,
            destination: build_pool(destination_uri, max_size)?,
        })
    }

}

impl ConnectionFactory for PgConnectionFactory {
    fn source(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(PgConnection::new(self.source.get()?)))
    }

    fn destination(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(PgConnection::new(self.destination.get()?)))
    }
}

/// Transactions are opened lazily with `BEGIN` on the first write when
/// auto-commit is off, and closed by [`Connection::commit`]. A transaction
/// still open on drop is rolled back before the client returns to its pool.
pub struct PgConnection {
    client: PooledConnection<PostgresConnectionManager<R2d2NoTls>>,
    statements: HashMap<String, Statement>,
    auto_commit: bool,
    in_transaction: bool,
}

impl PgConnection {
    pub fn new(client: PooledConnection<PostgresConnectionManager<R2d2NoTls>>) -> Self {
        Self {
            client,
            statements: HashMap::new(),
            auto_commit: true,
            in_transaction: false,
        }
    }

    fn begin_if_needed(&mut self) -> Result<()> {
        if !self.auto_commit && !self.in_transaction {
            self.client.batch_execute("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn prepared(&mut self, sql: &str) -> Result<Statement> {
        if let Some(statement) = self.statements.get(sql) {
            return Ok(statement.clone());
        }
        let statement = self.client.prepare(sql)?;
        self.statements.insert(sql.to_string(), statement.clone());
        Ok(statement)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.client.batch_execute("ROLLBACK") {
                warn!("Failed to roll back open transaction: {}", e);
            }
        }
    }
}

impl Connection for PgConnection {
    fn list_tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
    ) -> Result<Vec<TableDescriptor>> {
        let rows = self.client.query(
            "SELECT table_schema::text, table_name::text FROM information_schema.tables
             WHERE table_type = 'BASE TABLE'
               AND ($1::text IS NULL OR table_catalog = $1)
               AND ($2::text IS NULL OR table_schema = $2)
               AND table_schema NOT IN ('pg_catalog', 'information_schema')
             ORDER BY table_schema, table_name",
            &[&catalog, &schema],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let table_schema: String = row.get(0);
                let table_name: String = row.get(1);
                TableDescriptor::new(catalog, Some(&table_schema), &table_name)
            })
            .collect())
    }

    fn columns(&mut self, table: &TableDescriptor) -> Result<Vec<Column>> {
        let schema = table.schema.as_deref();
        let rows = self.client.query(
            "SELECT column_name::text, data_type::text FROM information_schema.columns
             WHERE table_schema = COALESCE($1::text, current_schema()) AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table.name],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let data_type: String = row.get(1);
                Column::new(&name, ColumnType::from_sql_name(&data_type))
            })
            .collect())
    }

    fn primary_key(&mut self, table: &TableDescriptor) -> Result<Vec<String>> {
        let regclass = TableDescriptor::new(None, table.schema.as_deref(), &table.name)
            .qualified(Dialect::Postgres);
        let rows = self.client.query(
            "SELECT a.attname::text
             FROM pg_index i
             CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, position)
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
             WHERE i.indrelid = ($1)::text::regclass AND i.indisprimary
             ORDER BY k.position",
            &[&regclass],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn count(&mut self, table: &TableDescriptor) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.qualified(Dialect::Postgres));
        let row = self.client.query_one(&sql, &[])?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    fn select(&mut self, query: &PageQuery<'_>) -> Result<Vec<Vec<Value>>> {
        let rows = self.client.query(&query.sql, &[])?;
        let types: Vec<&ColumnType> = query.columns.types().collect();
        rows.iter()
            .map(|row| {
                types
                    .iter()
                    .enumerate()
                    .map(|(idx, ty)| decode(row, idx, ty))
                    .collect::<Result<Vec<Value>>>()
            })
            .collect()
    }

    fn insert(&mut self, statement: &InsertStatement, row: &[Value]) -> Result<()> {
        let prepared = self.prepared(&statement.sql)?;
        for ((column, value), param) in statement.columns.iter().zip(row).zip(prepared.params()) {
            if let Value::Raw { type_name, .. } = value {
                if type_name != param.name() {
                    return Err(CopyError::UnsupportedType {
                        column: column.clone(),
                        type_name: format!("{type_name} (destination expects {})", param.name()),
                    });
                }
            }
        }
        self.begin_if_needed()?;
        let params: Vec<&(dyn ToSql + Sync)> =
            row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        self.client.execute(&prepared, &params)?;
        Ok(())
    }

    fn delete_all(&mut self, table: &TableDescriptor) -> Result<u64> {
        self.begin_if_needed()?;
        let sql = format!("DELETE FROM {}", table.qualified(Dialect::Postgres));
        Ok(self.client.execute(&sql, &[])?)
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.batch_execute("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.commit()?;
        }
        self.auto_commit = enabled;
        Ok(())
    }
}

/// A cell in its binary wire format, for types without a dedicated decoder.
struct RawCell {
    type_name: String,
    bytes: Vec<u8>,
}

impl<'a> FromSql<'a> for RawCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawCell {
            type_name: ty.name().to_string(),
            bytes: raw.to_vec(),
        })
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// `money` on the wire: a signed count of cents.
struct Cents(i64);

impl<'a> FromSql<'a> for Cents {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn Error + Sync + Send>> {
        let bytes: [u8; 8] = raw
            .try_into()
            .map_err(|_| format!("invalid {ty} value of {} bytes", raw.len()))?;
        Ok(Cents(i64::from_be_bytes(bytes)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MONEY
    }
}

fn raw(row: &Row, idx: usize) -> Result<Option<Value>> {
    Ok(row
        .try_get::<_, Option<RawCell>>(idx)?
        .map(|cell| Value::Raw {
            type_name: cell.type_name,
            bytes: cell.bytes,
        }))
}

/// Reads cell `idx` the way its recorded source type says it should be read.
/// Cells a dedicated decoder cannot represent, such as numerics wider than
/// 28 digits or NaN, are kept in wire format instead.
fn decode(row: &Row, idx: usize, ty: &ColumnType) -> Result<Value> {
    let value = match ty {
        ColumnType::Boolean => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        ColumnType::SmallInt => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Int(v.into())),
        ColumnType::Integer => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Int(v.into())),
        ColumnType::BigInt => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        ColumnType::Real => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into())),
        ColumnType::Double => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        ColumnType::Numeric => match row.try_get::<_, Option<Decimal>>(idx) {
            Ok(v) => v.map(Value::Numeric),
            Err(_) => raw(row, idx)?,
        },
        ColumnType::Money => row
            .try_get::<_, Option<Cents>>(idx)?
            .map(|Cents(cents)| Value::Numeric(Decimal::new(cents, 2))),
        ColumnType::Char | ColumnType::Varchar | ColumnType::Text => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
        }
        ColumnType::Bytes => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Bytes),
        ColumnType::Date => row.try_get::<_, Option<NaiveDate>>(idx)?.map(Value::Date),
        ColumnType::Time => row.try_get::<_, Option<NaiveTime>>(idx)?.map(Value::Time),
        ColumnType::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(Value::Timestamp),
        ColumnType::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(Value::TimestampTz),
        ColumnType::Uuid => row.try_get::<_, Option<uuid::Uuid>>(idx)?.map(Value::Uuid),
        ColumnType::Json => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::Json),
        ColumnType::Bit | ColumnType::Other(_) => raw(row, idx)?,
    };
    Ok(value.unwrap_or(Value::Null))
}

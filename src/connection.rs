use crate::error::Result;
use crate::query::{InsertStatement, PageQuery};
use crate::table::{Column, TableDescriptor};
use crate::value::Value;

/// The database capabilities a table copy needs from either side.
///
/// A connection is owned by exactly one execution unit at a time; parallel
/// workers each open their own through a [`ConnectionFactory`].
pub trait Connection: Send {
    /// Base tables in `catalog`/`schema`; `None` means "any".
    fn list_tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
    ) -> Result<Vec<TableDescriptor>>;

    /// Columns with their source type identifiers, in source order.
    fn columns(&mut self, table: &TableDescriptor) -> Result<Vec<Column>>;

    /// Primary-key column names in key order. Empty when the table has none.
    fn primary_key(&mut self, table: &TableDescriptor) -> Result<Vec<String>>;

    fn count(&mut self, table: &TableDescriptor) -> Result<u64>;

    /// Runs one page query, decoding every cell with its column's type.
    fn select(&mut self, query: &PageQuery<'_>) -> Result<Vec<Vec<Value>>>;

    /// Executes `statement` once with `row` bound positionally.
    fn insert(&mut self, statement: &InsertStatement, row: &[Value]) -> Result<()>;

    /// Removes every row of `table`. Not committed until [`Connection::commit`].
    fn delete_all(&mut self, table: &TableDescriptor) -> Result<u64>;

    /// Commits pending writes. A no-op when nothing is pending.
    fn commit(&mut self) -> Result<()>;

    /// Switching auto-commit on commits any open transaction first.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;
}

/// Opens independent source and destination connections on demand.
pub trait ConnectionFactory: Send + Sync {
    fn source(&self) -> Result<Box<dyn Connection>>;
    fn destination(&self) -> Result<Box<dyn Connection>>;
}

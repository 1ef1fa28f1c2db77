use crate::connection::Connection;
use crate::error::Result;
use crate::query::QueryBuilder;
use crate::table::{ColumnSet, TableDescriptor};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info};

/// A contiguous range of rows, under primary-key order, assigned to one copy unit.
#[derive(Debug, Clone)]
pub struct CopyWindow {
    pub source: TableDescriptor,
    pub destination: TableDescriptor,
    pub columns: Arc<ColumnSet>,
    pub start: u64,
    pub count: u64,
    pub batch_size: u64,
}

impl CopyWindow {
    pub fn range(&self) -> Range<u64> {
        self.start..self.start + self.count
    }
}

/// Copies `window` page by page, committing the destination after each page.
///
/// Reads never go past the end of the window, so units working on adjacent
/// windows of the same table never write the same row. Returns the number of
/// rows copied, which is smaller than `window.count` only when the source ran
/// out of rows. Batches committed before an error stay committed.
pub fn copy_window(
    source: &mut dyn Connection,
    destination: &mut dyn Connection,
    queries: &QueryBuilder,
    window: &CopyWindow,
) -> Result<u64> {
    let insert = queries.insert(&window.destination, &window.columns);
    let mut copied = 0;
    while copied < window.count {
        let limit = window.batch_size.min(window.count - copied);
        let page = queries.page(&window.source, &window.columns, limit, window.start + copied);
        debug!(sql = %page.sql, "Fetching page");
        let rows = source.select(&page)?;
        if rows.is_empty() {
            debug!(table = %window.source, offset = page.offset, "Source exhausted");
            break;
        }
        let fetched = rows.len() as u64;
        for row in &rows {
            destination.insert(&insert, row)?;
        }
        destination.commit()?;
        copied += fetched;
        info!(
            table = %window.source,
            window_start = window.start,
            "Records copied so far: {} of {}",
            copied,
            window.count
        );
        if fetched < limit {
            break;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::memory::MemoryDatabase;
    use crate::table::Column;
    use crate::value::{ColumnType, Value};

    fn setup(rows: i64) -> (MemoryDatabase, MemoryDatabase, CopyWindow) {
        let table = TableDescriptor::new(None, None, "items");
        let columns = vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("label", ColumnType::Text),
        ];
        let source = MemoryDatabase::new();
        source.create_table(&table, columns.clone(), &["id"]);
        source.insert_rows(
            &table,
            (0..rows)
                .rev()
                .map(|i| vec![Value::Int(i), Value::Text(format!("item-{i}"))])
                .collect(),
        )
        .unwrap();
        let destination = MemoryDatabase::new();
        destination.create_table(&table, columns.clone(), &["id"]);
        let window = CopyWindow {
            source: table.clone(),
            destination: table,
            columns: Arc::new(ColumnSet::new(columns, vec!["id".into()])),
            start: 0,
            count: rows as u64,
            batch_size: 4,
        };
        (source, destination, window)
    }

    fn queries() -> QueryBuilder {
        QueryBuilder::new(None, Dialect::Postgres, Dialect::Postgres).unwrap()
    }

    #[test]
    fn commits_once_per_batch() {
        let (source, destination, window) = setup(10);
        let mut src = source.connect();
        let mut dst = destination.connect();
        dst.set_auto_commit(false).unwrap();
        let copied = copy_window(&mut src, &mut dst, &queries(), &window).unwrap();
        assert_eq!(copied, 10);
        assert_eq!(destination.commit_count(), 3);
        assert_eq!(destination.rows(&window.destination), source.rows(&window.source));
    }

    #[test]
    fn stays_inside_its_window() {
        let (source, destination, mut window) = setup(20);
        window.start = 5;
        window.count = 6;
        let mut src = source.connect();
        let mut dst = destination.connect();
        let copied = copy_window(&mut src, &mut dst, &queries(), &window).unwrap();
        assert_eq!(copied, 6);
        let ids: Vec<Value> = destination
            .rows(&window.destination)
            .into_iter()
            .map(|row| row[0].clone())
            .collect();
        assert_eq!(ids, (5..11).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn stops_when_source_runs_out() {
        let (source, destination, mut window) = setup(7);
        window.count = 50;
        let mut src = source.connect();
        let mut dst = destination.connect();
        let copied = copy_window(&mut src, &mut dst, &queries(), &window).unwrap();
        assert_eq!(copied, 7);
        assert_eq!(destination.row_count(&window.destination), 7);
    }

    #[test]
    fn insert_failure_is_returned() {
        let (source, _, window) = setup(3);
        let empty = MemoryDatabase::new();
        let mut src = source.connect();
        let mut dst = empty.connect();
        assert!(copy_window(&mut src, &mut dst, &queries(), &window).is_err());
    }
}

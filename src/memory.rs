//! In-memory tables behind the [`Connection`] trait.
//!
//! Used to exercise the copy engine without a database server. Writes made
//! with auto-commit off stay private to their connection until `commit`, and
//! primary keys are enforced, so overlapping copy windows show up as errors.

use crate::connection::{Connection, ConnectionFactory};
use crate::error::{CopyError, Result};
use crate::query::{InsertStatement, PageQuery};
use crate::table::{Column, TableDescriptor};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<Column>,
    primary_key: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    fn index_of(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| CopyError::Memory(format!("column \"{column}\" does not exist")))
    }

    fn key_of(&self, row: &[Value], key: &[String]) -> Result<Vec<Value>> {
        key.iter()
            .map(|name| Ok(row[self.index_of(name)?].clone()))
            .collect()
    }

    fn sorted_rows(&self, key: &[String]) -> Result<Vec<&Vec<Value>>> {
        let indices = key
            .iter()
            .map(|name| self.index_of(name))
            .collect::<Result<Vec<_>>>()?;
        let mut rows: Vec<&Vec<Value>> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            indices
                .iter()
                .map(|&i| compare(&a[i], &b[i]))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(rows)
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<TableDescriptor, MemoryTable>,
    commits: usize,
}

impl State {
    fn table(&self, table: &TableDescriptor) -> Result<&MemoryTable> {
        self.tables
            .get(table)
            .ok_or_else(|| CopyError::Memory(format!("relation \"{table}\" does not exist")))
    }

    fn table_mut(&mut self, table: &TableDescriptor) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| CopyError::Memory(format!("relation \"{table}\" does not exist")))
    }

    fn apply(&mut self, op: Pending) -> Result<()> {
        match op {
            Pending::Insert(table, row) => self.table_mut(&table)?.rows.push(row),
            Pending::DeleteAll(table) => self.table_mut(&table)?.rows.clear(),
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Pending {
    Insert(TableDescriptor, Vec<Value>),
    DeleteAll(TableDescriptor),
}

/// A shared set of tables. Clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates (or replaces) an empty table.
    pub fn create_table(&self, table: &TableDescriptor, columns: Vec<Column>, primary_key: &[&str]) {
        self.lock().tables.insert(
            table.clone(),
            MemoryTable {
                columns,
                primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    /// Appends committed rows, bypassing key checks.
    pub fn insert_rows(&self, table: &TableDescriptor, rows: Vec<Vec<Value>>) -> Result<()> {
        self.lock().table_mut(table)?.rows.extend(rows);
        Ok(())
    }

    /// Committed rows, ordered by primary key (insertion order without one).
    pub fn rows(&self, table: &TableDescriptor) -> Vec<Vec<Value>> {
        let state = self.lock();
        let Ok(target) = state.table(table) else {
            return Vec::new();
        };
        match target.sorted_rows(&target.primary_key) {
            Ok(rows) => rows.into_iter().cloned().collect(),
            Err(_) => target.rows.clone(),
        }
    }

    pub fn row_count(&self, table: &TableDescriptor) -> u64 {
        self.lock()
            .table(table)
            .map_or(0, |t| t.rows.len() as u64)
    }

    /// Number of commits that made pending writes visible.
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            database: self.clone(),
            auto_commit: true,
            pending: Vec::new(),
        }
    }
}

/// A connection to a [`MemoryDatabase`]. Auto-commit is on by default.
/// Uncommitted writes are discarded on drop.
#[derive(Debug)]
pub struct MemoryConnection {
    database: MemoryDatabase,
    auto_commit: bool,
    pending: Vec<Pending>,
}

impl MemoryConnection {
    fn write(&mut self, op: Pending) -> Result<()> {
        if self.auto_commit {
            self.database.lock().apply(op)
        } else {
            self.pending.push(op);
            Ok(())
        }
    }

    fn pending_keys(&self, state: &State, table: &TableDescriptor) -> Result<Vec<Vec<Value>>> {
        let target = state.table(table)?;
        let mut keys = Vec::new();
        for op in &self.pending {
            match op {
                Pending::Insert(t, row) if t == table => {
                    keys.push(target.key_of(row, &target.primary_key)?)
                }
                Pending::DeleteAll(t) if t == table => keys.clear(),
                _ => {}
            }
        }
        Ok(keys)
    }
}

impl Connection for MemoryConnection {
    fn list_tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
    ) -> Result<Vec<TableDescriptor>> {
        let state = self.database.lock();
        Ok(state
            .tables
            .keys()
            .filter(|t| catalog.is_none() || t.catalog.as_deref() == catalog)
            .filter(|t| schema.is_none() || t.schema.as_deref() == schema)
            .cloned()
            .collect())
    }

    fn columns(&mut self, table: &TableDescriptor) -> Result<Vec<Column>> {
        Ok(self.database.lock().table(table)?.columns.clone())
    }

    fn primary_key(&mut self, table: &TableDescriptor) -> Result<Vec<String>> {
        Ok(self.database.lock().table(table)?.primary_key.clone())
    }

    fn count(&mut self, table: &TableDescriptor) -> Result<u64> {
        Ok(self.database.lock().table(table)?.rows.len() as u64)
    }

    fn select(&mut self, query: &PageQuery<'_>) -> Result<Vec<Vec<Value>>> {
        let state = self.database.lock();
        let target = state.table(query.table)?;
        let projection = query
            .columns
            .names()
            .map(|name| target.index_of(name))
            .collect::<Result<Vec<_>>>()?;
        let rows = target.sorted_rows(query.columns.primary_key())?;
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    fn insert(&mut self, statement: &InsertStatement, row: &[Value]) -> Result<()> {
        if row.len() != statement.columns.len() {
            return Err(CopyError::Memory(format!(
                "INSERT has {} target columns but {} values",
                statement.columns.len(),
                row.len()
            )));
        }
        let full_row = {
            let state = self.database.lock();
            let target = state.table(&statement.table)?;
            let mut full_row = vec![Value::Null; target.columns.len()];
            for (name, value) in statement.columns.iter().zip(row) {
                full_row[target.index_of(name)?] = value.clone();
            }
            if !target.primary_key.is_empty() {
                let key = target.key_of(&full_row, &target.primary_key)?;
                let committed = target
                    .rows
                    .iter()
                    .map(|r| target.key_of(r, &target.primary_key))
                    .collect::<Result<Vec<_>>>()?;
                if committed.contains(&key)
                    || self.pending_keys(&state, &statement.table)?.contains(&key)
                {
                    return Err(CopyError::Memory(format!(
                        "duplicate key {key:?} violates primary key of \"{}\"",
                        statement.table
                    )));
                }
            }
            full_row
        };
        self.write(Pending::Insert(statement.table.clone(), full_row))
    }

    fn delete_all(&mut self, table: &TableDescriptor) -> Result<u64> {
        let existing = self.database.lock().table(table)?.rows.len() as u64;
        self.write(Pending::DeleteAll(table.clone()))?;
        Ok(existing)
    }

    fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut state = self.database.lock();
        for op in self.pending.drain(..) {
            state.apply(op)?;
        }
        state.commits += 1;
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

/// Hands out connections to a source and a destination [`MemoryDatabase`].
#[derive(Debug, Default)]
pub struct MemoryConnectionFactory {
    pub source: MemoryDatabase,
    pub destination: MemoryDatabase,
    opened: AtomicUsize,
}

impl MemoryConnectionFactory {
    pub fn new(source: MemoryDatabase, destination: MemoryDatabase) -> Self {
        Self {
            source,
            destination,
            opened: AtomicUsize::new(0),
        }
    }

    /// Connections opened so far, both sides included.
    pub fn opened(&self) -> usize {
        self.opened.load(AtomicOrdering::SeqCst)
    }
}

impl ConnectionFactory for MemoryConnectionFactory {
    fn source(&self) -> Result<Box<dyn Connection>> {
        self.opened.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(self.source.connect()))
    }

    fn destination(&self) -> Result<Box<dyn Connection>> {
        self.opened.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(self.destination.connect()))
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Numeric(x), Value::Numeric(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Time(x), Value::Time(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::TimestampTz(x), Value::TimestampTz(y)) => x.cmp(y),
        (Value::Uuid(x), Value::Uuid(y)) => x.cmp(y),
        _ => format!("{a:?}").cmp(&format!("{b:?}")),
    }
}

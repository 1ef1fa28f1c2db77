//! Error types for table copying.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopyError {
    /// Destination already holds rows and the convert mode forbids touching them.
    #[error("Table {table} is not empty")]
    DestinationNotEmpty { table: String },

    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid select template: {0}")]
    Template(String),

    #[error("Column {column} has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    /// Raised by the in-memory backend.
    #[error("{0}")]
    Memory(String),

    #[error("Copy failed for table {table}: {source}")]
    Table {
        table: String,
        #[source]
        source: Box<CopyError>,
    },

    #[error("Worker {worker} failed copying table {table}: {source}")]
    Worker {
        table: String,
        worker: usize,
        #[source]
        source: Box<CopyError>,
    },

    #[error("Worker {worker} panicked while copying table {table}")]
    WorkerPanicked { table: String, worker: usize },

    #[error("Timed out after {timeout:?} waiting for workers copying table {table}")]
    Timeout { table: String, timeout: Duration },
}

impl CopyError {
    /// Attaches the table being processed, unless the error already names one.
    pub fn with_table(self, table: impl Into<String>) -> Self {
        match self {
            CopyError::DestinationNotEmpty { .. }
            | CopyError::Table { .. }
            | CopyError::Worker { .. }
            | CopyError::WorkerPanicked { .. }
            | CopyError::Timeout { .. } => self,
            other => CopyError::Table {
                table: table.into(),
                source: Box::new(other),
            },
        }
    }

    /// Walks through context wrappers to the error that triggered the failure.
    pub fn root_cause(&self) -> &CopyError {
        match self {
            CopyError::Table { source, .. } | CopyError::Worker { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_table_wraps_untagged_errors_once() {
        let err = CopyError::Memory("boom".into()).with_table("public.users");
        assert_eq!(err.to_string(), "Copy failed for table public.users: boom");
        let err = err.with_table("other");
        assert!(matches!(err, CopyError::Table { ref table, .. } if table == "public.users"));
    }

    #[test]
    fn with_table_keeps_policy_abort_untouched() {
        let err = CopyError::DestinationNotEmpty {
            table: "users".into(),
        }
        .with_table("users");
        assert!(matches!(err, CopyError::DestinationNotEmpty { .. }));
    }

    #[test]
    fn root_cause_unwraps_worker_context() {
        let err = CopyError::Worker {
            table: "orders".into(),
            worker: 3,
            source: Box::new(CopyError::Memory("no such table".into())),
        };
        assert!(matches!(err.root_cause(), CopyError::Memory(msg) if msg == "no such table"));
    }
}

use crate::backfill::{CopyWindow, copy_window};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::{CopyError, Result};
use crate::query::QueryBuilder;
use crate::table::{ColumnSet, TableDescriptor};
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Everything needed to copy one table, once its metadata and size are known.
#[derive(Debug, Clone)]
pub struct TableCopy {
    pub source: TableDescriptor,
    pub destination: TableDescriptor,
    pub columns: Arc<ColumnSet>,
    pub total: u64,
}

impl TableCopy {
    pub fn window(&self, range: Range<u64>, batch_size: u64) -> CopyWindow {
        CopyWindow {
            source: self.source.clone(),
            destination: self.destination.clone(),
            columns: Arc::clone(&self.columns),
            start: range.start,
            count: range.end - range.start,
            batch_size,
        }
    }
}

/// Splits `[0, total)` into at most `workers` contiguous ranges of
/// `ceil(total / workers)` rows; only the last range may be shorter.
/// No range is empty, so fewer than `workers` ranges come back when the
/// rounded-up share covers the table early.
pub fn partition(total: u64, workers: usize) -> Vec<Range<u64>> {
    if total == 0 || workers == 0 {
        return Vec::new();
    }
    let share = total.div_ceil(workers as u64);
    (0..workers as u64)
        .map(|n| n * share)
        .take_while(|&start| start < total)
        .map(|start| start..(start + share).min(total))
        .collect()
}

/// Copies a whole table with one unit on the caller's connections.
#[derive(Debug, Clone, Copy)]
pub struct SequentialCopy {
    pub batch_size: u64,
}

impl SequentialCopy {
    pub fn run(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
        queries: &QueryBuilder,
        job: &TableCopy,
    ) -> Result<u64> {
        info!(table = %job.source, "Records to be copied: {}", job.total);
        copy_window(source, destination, queries, &job.window(0..job.total, self.batch_size))
    }
}

/// Copies a table with one thread per window, each on its own connections.
pub struct ParallelCopy {
    pub factory: Arc<dyn ConnectionFactory>,
    pub queries: Arc<QueryBuilder>,
    pub workers: usize,
    pub batch_size: u64,
    pub auto_commit: bool,
    pub timeout: Duration,
}

struct WorkerReport {
    worker: usize,
    range: Range<u64>,
    result: Result<u64>,
}

impl ParallelCopy {
    pub fn windows(&self, job: &TableCopy) -> Vec<CopyWindow> {
        partition(job.total, self.workers)
            .into_iter()
            .map(|range| job.window(range, self.batch_size))
            .collect()
    }

    /// Runs every window to completion and returns the rows copied.
    ///
    /// Waits for all workers, up to `timeout` overall. Every failed worker is
    /// logged; the first one (by worker number) is returned. Workers still
    /// running when the deadline passes are left to finish on their own.
    pub fn run(&self, job: &TableCopy) -> Result<u64> {
        self.run_with(job, |name, work| thread::Builder::new().name(name).spawn(work))
    }

    /// Like [`ParallelCopy::run`], with `spawn` starting each worker thread.
    /// If a spawn fails, the workers already started are waited for before
    /// the error is returned.
    fn run_with<S>(&self, job: &TableCopy, mut spawn: S) -> Result<u64>
    where
        S: FnMut(String, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>,
    {
        let table = job.source.to_string();
        let windows = self.windows(job);
        info!(
            table = %table,
            workers = windows.len(),
            "Records to be copied: {}",
            job.total
        );

        let (tx, rx) = mpsc::channel::<WorkerReport>();
        let mut handles = Vec::with_capacity(windows.len());
        for (worker, window) in windows.into_iter().enumerate() {
            let tx = tx.clone();
            let factory = Arc::clone(&self.factory);
            let queries = Arc::clone(&self.queries);
            let auto_commit = self.auto_commit;
            let work: Box<dyn FnOnce() + Send> = Box::new(move || {
                let range = window.range();
                debug!(worker, start = range.start, end = range.end, "Worker started");
                let result = run_worker(factory.as_ref(), &queries, &window, auto_commit);
                // The receiver only goes away after a timeout, when nobody listens anymore.
                let _ = tx.send(WorkerReport {
                    worker,
                    range,
                    result,
                });
            });
            match spawn(format!("copy-worker-{worker}"), work) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(
                        table = %table,
                        worker,
                        "Failed to start worker, waiting for {} running workers",
                        handles.len()
                    );
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let mut reports = Vec::with_capacity(handles.len());
        while reports.len() < handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(report) => reports.push(report),
                Err(RecvTimeoutError::Timeout) => {
                    error!(table = %table, "Timed out waiting for workers to finish");
                    return Err(CopyError::Timeout {
                        table,
                        timeout: self.timeout,
                    });
                }
                // Every sender is gone: the missing workers panicked.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut failures: Vec<(usize, CopyError)> = Vec::new();
        for (worker, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(table = %table, worker, "Worker panicked");
                failures.push((
                    worker,
                    CopyError::WorkerPanicked {
                        table: table.clone(),
                        worker,
                    },
                ));
            }
        }

        let mut copied = 0;
        for report in reports {
            match report.result {
                Ok(rows) => {
                    debug!(worker = report.worker, rows, "Worker finished");
                    copied += rows;
                }
                Err(e) => {
                    error!(
                        table = %table,
                        worker = report.worker,
                        start = report.range.start,
                        end = report.range.end,
                        "Worker failed: {}",
                        e
                    );
                    failures.push((
                        report.worker,
                        CopyError::Worker {
                            table: table.clone(),
                            worker: report.worker,
                            source: Box::new(e),
                        },
                    ));
                }
            }
        }

        match failures.into_iter().min_by_key(|(worker, _)| *worker) {
            Some((_, err)) => Err(err),
            None => Ok(copied),
        }
    }
}

fn run_worker(
    factory: &dyn ConnectionFactory,
    queries: &QueryBuilder,
    window: &CopyWindow,
    auto_commit: bool,
) -> Result<u64> {
    let mut source = factory.source()?;
    let mut destination = factory.destination()?;
    destination.set_auto_commit(auto_commit)?;
    copy_window(source.as_mut(), destination.as_mut(), queries, window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::memory::{MemoryConnectionFactory, MemoryDatabase};
    use crate::query::{InsertStatement, PageQuery};
    use crate::table::Column;
    use crate::value::{ColumnType, Value};

    #[test]
    fn partition_covers_range_without_gaps_or_overlap() {
        for total in [1u64, 2, 9, 10, 11, 99, 100, 101, 1000, 1003] {
            for workers in [1usize, 2, 3, 4, 7, 10, 16] {
                let windows = partition(total, workers);
                let share = total.div_ceil(workers as u64);
                assert!(windows.len() <= workers);
                assert_eq!(windows.first().map(|w| w.start), Some(0));
                assert_eq!(windows.last().map(|w| w.end), Some(total));
                for pair in windows.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start, "gap or overlap at {total}/{workers}");
                }
                let (last, rest) = windows.split_last().unwrap();
                assert!(rest.iter().all(|w| w.end - w.start == share));
                assert!(last.end > last.start && last.end - last.start <= share);
                let sum: u64 = windows.iter().map(|w| w.end - w.start).sum();
                assert_eq!(sum, total);
            }
        }
    }

    #[test]
    fn partition_matches_worked_example() {
        assert_eq!(partition(10, 4), vec![0..3, 3..6, 6..9, 9..10]);
        assert_eq!(partition(10, 6), vec![0..2, 2..4, 4..6, 6..8, 8..10]);
        assert!(partition(0, 4).is_empty());
    }

    fn table(rows: i64) -> (MemoryDatabase, MemoryDatabase, TableCopy) {
        let descriptor = TableDescriptor::new(None, Some("app"), "events");
        let columns = vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("payload", ColumnType::Text),
        ];
        let source = MemoryDatabase::new();
        source.create_table(&descriptor, columns.clone(), &["id"]);
        source
            .insert_rows(
                &descriptor,
                (0..rows)
                    .map(|i| vec![Value::Int(i * 3), Value::Text(format!("event {i}"))])
                    .collect(),
            )
            .unwrap();
        let destination = MemoryDatabase::new();
        destination.create_table(&descriptor, columns.clone(), &["id"]);
        let job = TableCopy {
            source: descriptor.clone(),
            destination: descriptor,
            columns: Arc::new(ColumnSet::new(columns, vec!["id".into()])),
            total: rows as u64,
        };
        (source, destination, job)
    }

    fn parallel(factory: Arc<dyn ConnectionFactory>, timeout: Duration) -> ParallelCopy {
        ParallelCopy {
            factory,
            queries: Arc::new(QueryBuilder::new(None, Dialect::Postgres, Dialect::Postgres).unwrap()),
            workers: 4,
            batch_size: 5,
            auto_commit: false,
            timeout,
        }
    }

    #[test]
    fn parallel_copy_writes_every_row_once() {
        let (source, destination, job) = table(103);
        let factory = Arc::new(MemoryConnectionFactory::new(source.clone(), destination.clone()));
        let copy = parallel(factory.clone(), Duration::from_secs(30));
        assert_eq!(copy.run(&job).unwrap(), 103);
        assert_eq!(destination.rows(&job.destination), source.rows(&job.source));
        assert_eq!(factory.opened(), 8);
    }

    #[test]
    fn failed_worker_is_reported_with_table() {
        let (source, _, job) = table(40);
        let destination = MemoryDatabase::new();
        destination.create_table(
            &job.destination,
            vec![Column::new("id", ColumnType::BigInt)],
            &["id"],
        );
        let factory = Arc::new(MemoryConnectionFactory::new(source, destination));
        let err = parallel(factory, Duration::from_secs(30)).run(&job).unwrap_err();
        match err {
            CopyError::Worker { table, worker, .. } => {
                assert_eq!(table, "app.events");
                assert_eq!(worker, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Delegates to a memory connection, stalling or panicking on reads.
    struct Misbehaving {
        inner: crate::memory::MemoryConnection,
        delay: Duration,
        panic: bool,
    }

    impl Connection for Misbehaving {
        fn list_tables(
            &mut self,
            catalog: Option<&str>,
            schema: Option<&str>,
        ) -> Result<Vec<TableDescriptor>> {
            self.inner.list_tables(catalog, schema)
        }
        fn columns(&mut self, table: &TableDescriptor) -> Result<Vec<Column>> {
            self.inner.columns(table)
        }
        fn primary_key(&mut self, table: &TableDescriptor) -> Result<Vec<String>> {
            self.inner.primary_key(table)
        }
        fn count(&mut self, table: &TableDescriptor) -> Result<u64> {
            self.inner.count(table)
        }
        fn select(&mut self, query: &PageQuery<'_>) -> Result<Vec<Vec<Value>>> {
            if self.panic {
                panic!("connection lost");
            }
            thread::sleep(self.delay);
            self.inner.select(query)
        }
        fn insert(&mut self, statement: &InsertStatement, row: &[Value]) -> Result<()> {
            self.inner.insert(statement, row)
        }
        fn delete_all(&mut self, table: &TableDescriptor) -> Result<u64> {
            self.inner.delete_all(table)
        }
        fn commit(&mut self) -> Result<()> {
            self.inner.commit()
        }
        fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
            self.inner.set_auto_commit(enabled)
        }
    }

    struct MisbehavingFactory {
        source: MemoryDatabase,
        destination: MemoryDatabase,
        delay: Duration,
        panic: bool,
    }

    impl ConnectionFactory for MisbehavingFactory {
        fn source(&self) -> Result<Box<dyn Connection>> {
            Ok(Box::new(Misbehaving {
                inner: self.source.connect(),
                delay: self.delay,
                panic: self.panic,
            }))
        }
        fn destination(&self) -> Result<Box<dyn Connection>> {
            Ok(Box::new(self.destination.connect()))
        }
    }

    #[test]
    fn waiting_past_the_deadline_is_fatal() {
        let (source, destination, job) = table(20);
        let factory = Arc::new(MisbehavingFactory {
            source,
            destination,
            delay: Duration::from_millis(500),
            panic: false,
        });
        let err = parallel(factory, Duration::from_millis(50)).run(&job).unwrap_err();
        assert!(matches!(err, CopyError::Timeout { .. }));
    }

    #[test]
    fn panicking_worker_is_reported() {
        let (source, destination, job) = table(20);
        let factory = Arc::new(MisbehavingFactory {
            source,
            destination,
            delay: Duration::ZERO,
            panic: true,
        });
        let err = parallel(factory, Duration::from_secs(30)).run(&job).unwrap_err();
        assert!(matches!(err, CopyError::WorkerPanicked { worker: 0, .. }));
    }

    #[test]
    fn failed_spawn_waits_for_started_workers() {
        let (source, destination, job) = table(20);
        let factory = Arc::new(MisbehavingFactory {
            source,
            destination: destination.clone(),
            delay: Duration::from_millis(200),
            panic: false,
        });
        let copy = parallel(factory, Duration::from_secs(30));
        let mut started = 0;
        let err = copy
            .run_with(&job, |name, work| {
                started += 1;
                if started > 1 {
                    return Err(io::Error::other("thread limit reached"));
                }
                thread::Builder::new().name(name).spawn(work)
            })
            .unwrap_err();
        assert!(matches!(err, CopyError::Spawn(_)));
        // The first window finished before the error came back.
        assert_eq!(destination.row_count(&job.destination), 5);
    }

    #[test]
    fn sequential_copy_covers_whole_table() {
        let (source, destination, job) = table(9);
        let mut src = source.connect();
        let mut dst = destination.connect();
        let queries = QueryBuilder::new(None, Dialect::Postgres, Dialect::Postgres).unwrap();
        let copied = SequentialCopy { batch_size: 10 }
            .run(&mut src, &mut dst, &queries, &job)
            .unwrap();
        assert_eq!(copied, 9);
        assert_eq!(destination.row_count(&job.destination), 9);
    }
}

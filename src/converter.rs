use crate::config::{ConvertMode, CopyConfig};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::{CopyError, Result};
use crate::orchestrator::{ParallelCopy, SequentialCopy, TableCopy, partition};
use crate::policy::{Decision, decide};
use crate::query::QueryBuilder;
use crate::report::{ConversionReport, Route, TableOutcome, TablePlan, TableReport};
use crate::table::{ColumnSet, TableDescriptor};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Copies every table of the configured catalog/schema, one table at a time.
pub struct DataConverter {
    factory: Arc<dyn ConnectionFactory>,
    queries: Arc<QueryBuilder>,
    config: CopyConfig,
}

impl DataConverter {
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: CopyConfig) -> Result<Self> {
        config.validate()?;
        let queries = QueryBuilder::new(
            config.select_template.as_deref(),
            config.source_dialect,
            config.destination_dialect,
        )?;
        Ok(Self {
            factory,
            queries: Arc::new(queries),
            config,
        })
    }

    /// Runs the conversion. Stops at the first table that fails, keeping
    /// whatever earlier tables and batches already committed.
    pub fn convert(&self) -> Result<ConversionReport> {
        let mut source = self.factory.source()?;
        let mut destination = self.factory.destination()?;
        destination.set_auto_commit(self.config.auto_commit)?;

        let tables = self.tables(source.as_mut())?;
        let mut report = ConversionReport::default();
        for table in tables {
            let entry = self
                .convert_table(source.as_mut(), destination.as_mut(), &table)
                .map_err(|e| e.with_table(table.to_string()))?;
            report.tables.push(entry);
        }
        info!(
            tables = report.copied_tables(),
            rows = report.rows_copied(),
            "Data conversion finished"
        );
        Ok(report)
    }

    /// Walks the same tables as [`DataConverter::convert`] without writing anything.
    pub fn plan(&self) -> Result<Vec<TablePlan>> {
        let mut source = self.factory.source()?;
        let mut destination = self.factory.destination()?;
        self.tables(source.as_mut())?
            .iter()
            .map(|table| {
                self.plan_table(source.as_mut(), destination.as_mut(), table)
                    .map_err(|e| e.with_table(table.to_string()))
            })
            .collect()
    }

    fn tables(&self, source: &mut dyn Connection) -> Result<Vec<TableDescriptor>> {
        let tables =
            source.list_tables(self.config.catalog.as_deref(), self.config.schema.as_deref())?;
        info!("Found {} tables to convert", tables.len());
        Ok(tables)
    }

    fn destination_of(&self, table: &TableDescriptor) -> TableDescriptor {
        table.in_schema(self.config.destination_schema.as_deref())
    }

    fn convert_table(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
        table: &TableDescriptor,
    ) -> Result<TableReport> {
        let target = self.destination_of(table);
        let report = |outcome| TableReport {
            table: table.to_string(),
            destination: target.to_string(),
            outcome,
        };

        let existing = destination.count(&target)?;
        let mut cleared = 0;
        match decide(existing, self.config.mode) {
            Decision::Abort => {
                return Err(CopyError::DestinationNotEmpty {
                    table: target.to_string(),
                });
            }
            Decision::Skip => {
                if self.config.mode == ConvertMode::SkipExisting {
                    info!(table = %target, rows = existing, "Skipping table, destination is not empty");
                } else {
                    debug!(table = %target, rows = existing, "Destination is not empty, leaving it as is");
                }
                return Ok(report(TableOutcome::Skipped { existing }));
            }
            Decision::ClearThenCopy => {
                info!(table = %target, rows = existing, "Deleting existing rows");
                cleared = destination.delete_all(&target)?;
                destination.commit()?;
            }
            Decision::Copy => {}
        }

        let columns = ColumnSet::discover(source, table)?;
        if !columns.is_copyable() {
            warn!(table = %table, "Table has no primary key, skipping data copy");
            return Ok(report(TableOutcome::NoPrimaryKey));
        }

        let total = source.count(table)?;
        let job = TableCopy {
            source: table.clone(),
            destination: target.clone(),
            columns: Arc::new(columns),
            total,
        };
        let (route, rows) = if total > self.config.batch_size {
            (Route::Parallel, self.parallel().run(&job)?)
        } else {
            let sequential = SequentialCopy {
                batch_size: self.config.batch_size,
            };
            let rows = sequential.run(source, destination, &self.queries, &job)?;
            (Route::Sequential, rows)
        };
        info!(table = %table, rows, "Table copied");
        Ok(report(TableOutcome::Copied {
            rows,
            expected: total,
            cleared,
            route,
        }))
    }

    fn plan_table(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
        table: &TableDescriptor,
    ) -> Result<TablePlan> {
        let target = self.destination_of(table);
        let destination_rows = destination.count(&target)?;
        let decision = decide(destination_rows, self.config.mode);
        let mut plan = TablePlan {
            table: table.to_string(),
            destination: target.to_string(),
            destination_rows,
            decision,
            source_rows: None,
            primary_key: Vec::new(),
            route: None,
            windows: Vec::new(),
        };
        if matches!(decision, Decision::Skip | Decision::Abort) {
            return Ok(plan);
        }

        let columns = ColumnSet::discover(source, table)?;
        plan.primary_key = columns.primary_key().to_vec();
        if !columns.is_copyable() {
            return Ok(plan);
        }
        let total = source.count(table)?;
        plan.source_rows = Some(total);
        if total > self.config.batch_size {
            plan.route = Some(Route::Parallel);
            plan.windows = partition(total, self.config.workers);
        } else {
            plan.route = Some(Route::Sequential);
            plan.windows = partition(total, 1);
        }
        Ok(plan)
    }

    fn parallel(&self) -> ParallelCopy {
        ParallelCopy {
            factory: Arc::clone(&self.factory),
            queries: Arc::clone(&self.queries),
            workers: self.config.workers,
            batch_size: self.config.batch_size,
            auto_commit: self.config.auto_commit,
            timeout: self.config.worker_timeout,
        }
    }
}

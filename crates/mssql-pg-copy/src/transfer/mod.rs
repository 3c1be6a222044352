//! Resumable, ordered, paged row copy.
//!
//! Each table is copied page by page in primary key order. Before the first
//! page the destination row count decides where to continue: rows already
//! present are skipped by offset and the partially filled page is completed
//! before paging realigns to the batch size.
//!
//! Resuming assumes the destination rows were appended in source read order
//! by an earlier run of this tool. Rows written by anything else shift the
//! offset and the copy will duplicate or skip rows.

mod cursor;
mod order;

pub use cursor::{PagePlan, PageWindow, ResumeCursor};
pub use order::OrderBy;

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_INSERT_BATCH_SIZE};
use crate::error::{MigrateError, Result};
use crate::source::{SourcePool, Table};
use crate::target::TargetPool;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Transfer configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per source page.
    pub batch_size: usize,
    /// Rows per INSERT statement.
    pub insert_batch_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

/// Transfer job for a single table.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Source table metadata.
    pub table: Table,

    /// Target schema name. The target table keeps the source name.
    pub target_schema: String,
}

/// What a copy would do, without fetching any rows.
#[derive(Debug, Clone, Serialize)]
pub struct CopyPlan {
    pub table: String,
    pub existing_rows: i64,
    pub order_by: String,
    pub ordered_by_primary_key: bool,
    pub resume: Option<ResumeCursor>,
}

/// Statistics from a transfer job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    /// Destination rows found before copying.
    pub existing_rows: i64,

    /// Cursor used for the first page, if the copy resumed.
    pub resumed_from: Option<ResumeCursor>,

    /// Pages fetched, including a final empty one.
    pub pages: u64,

    /// Rows written during this run.
    pub rows: u64,

    /// Time spent fetching pages.
    #[serde(skip)]
    pub query_time: Duration,

    /// Time spent writing pages.
    #[serde(skip)]
    pub write_time: Duration,
}

/// Transfer engine for moving rows between databases.
pub struct TransferEngine {
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
    config: TransferConfig,
}

impl TransferEngine {
    /// Create a new transfer engine.
    pub fn new(
        source: Arc<dyn SourcePool>,
        target: Arc<dyn TargetPool>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    /// Derive order and resume cursor for a table without copying.
    ///
    /// With `target_recreated` the destination table is about to be dropped
    /// and created again, so its current row count is not consulted.
    pub async fn plan(&self, job: &TransferJob, target_recreated: bool) -> Result<CopyPlan> {
        let table = &job.table;
        let primary_key = self
            .source
            .load_primary_key_order(&table.schema, &table.name)
            .await?;
        let order_by = OrderBy::derive(table, primary_key)?;

        let existing_rows = if target_recreated {
            0
        } else {
            self.target
                .get_row_count(&job.target_schema, &table.name)
                .await
                .map_err(|e| MigrateError::copy(table.full_name(), e))?
        };

        Ok(CopyPlan {
            table: table.full_name(),
            existing_rows,
            order_by: order_by.to_mssql(),
            ordered_by_primary_key: order_by.is_primary_key(),
            resume: ResumeCursor::from_existing_rows(existing_rows, self.config.batch_size),
        })
    }

    /// Copy one table. Pages flushed before a failure stay at the destination.
    pub async fn execute(&self, job: &TransferJob) -> Result<TransferStats> {
        let mut stats = TransferStats::default();
        self.execute_into(job, &mut stats).await?;
        Ok(stats)
    }

    /// Copy one table, accumulating into `stats` as pages are written.
    ///
    /// On error `stats` still describes the pages flushed before the failure.
    pub async fn execute_into(&self, job: &TransferJob, stats: &mut TransferStats) -> Result<()> {
        let table = &job.table;
        let table_name = table.full_name();

        let primary_key = self
            .source
            .load_primary_key_order(&table.schema, &table.name)
            .await?;
        let order_by = OrderBy::derive(table, primary_key)?;

        let existing_rows = self
            .target
            .get_row_count(&job.target_schema, &table.name)
            .await
            .map_err(|e| MigrateError::copy(&table_name, e))?;
        let cursor = ResumeCursor::from_existing_rows(existing_rows, self.config.batch_size);

        match cursor {
            Some(c) => info!(
                "{}: resuming after {} existing rows (page {}, limit {})",
                table_name, c.offset, c.next_page_index, c.limit
            ),
            None => info!("{}: copying from the first row", table_name),
        }

        stats.existing_rows = existing_rows;
        stats.resumed_from = cursor;
        let mut plan = PagePlan::new(self.config.batch_size, cursor);

        while let Some(window) = plan.next_window() {
            let query_start = Instant::now();
            let batch = self
                .source
                .fetch_page(table, &order_by, window)
                .await
                .map_err(|e| MigrateError::copy(&table_name, e))?;
            stats.query_time += query_start.elapsed();
            stats.pages += 1;

            let fetched = batch.len();
            if fetched > 0 {
                let write_start = Instant::now();
                let written = match self
                    .target
                    .insert_rows(
                        &job.target_schema,
                        &table.name,
                        &batch,
                        self.config.insert_batch_size,
                    )
                    .await
                {
                    Ok(written) => written,
                    Err(e) => {
                        // Sub-batches before the failing one are committed.
                        if let Ok(count) = self
                            .target
                            .get_row_count(&job.target_schema, &table.name)
                            .await
                        {
                            stats.rows = u64::try_from(count - existing_rows).unwrap_or(0);
                        }
                        return Err(MigrateError::copy(&table_name, e));
                    }
                };
                stats.write_time += write_start.elapsed();
                stats.rows += written;
            }

            debug!(
                "{}: page {} (offset {}) copied {} rows",
                table_name, window.page_index, window.offset, fetched
            );
            plan.record(window, fetched);
        }

        info!(
            "{}: copied {} rows in {} pages (query {:?}, write {:?})",
            table_name, stats.rows, stats.pages, stats.query_time, stats.write_time
        );

        Ok(())
    }
}

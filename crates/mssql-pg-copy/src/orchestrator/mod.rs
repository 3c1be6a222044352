//! Migration orchestrator - runs the stage pipeline.

use crate::config::{Config, TasksConfig};
use crate::ddl::{self, DdlBatch};
use crate::error::{MigrateError, Result};
use crate::source::{ConstraintKind, MssqlPool, SourcePool, Table, TableFilter};
use crate::target::{PgPool, TargetPool};
use crate::transfer::{CopyPlan, TransferConfig, TransferEngine, TransferJob, TransferStats};
use crate::typemap::{ColumnTypePolicy, PostgresTypeMap};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One step of a run. Stages run in [`Stage::PIPELINE`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CreateSchema,
    CreateTables,
    CopyRows,
    CreatePrimaryKeys,
    CreateUniqueKeys,
    CreateForeignKeys,
    CreateIndexes,
    CreateRoles,
}

impl Stage {
    /// Rows are copied before any key or index exists; foreign keys come
    /// after the primary and unique keys they reference.
    ///
    /// Secondary indexes are created after foreign keys. A foreign key whose
    /// target is only a unique index, not a unique constraint, therefore
    /// fails to create and is reported as a failure of that stage.
    pub const PIPELINE: [Stage; 8] = [
        Stage::CreateSchema,
        Stage::CreateTables,
        Stage::CopyRows,
        Stage::CreatePrimaryKeys,
        Stage::CreateUniqueKeys,
        Stage::CreateForeignKeys,
        Stage::CreateIndexes,
        Stage::CreateRoles,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::CreateSchema => "create_schema",
            Stage::CreateTables => "create_tables",
            Stage::CopyRows => "copy_rows",
            Stage::CreatePrimaryKeys => "create_primary_keys",
            Stage::CreateUniqueKeys => "create_unique_keys",
            Stage::CreateForeignKeys => "create_foreign_keys",
            Stage::CreateIndexes => "create_indexes",
            Stage::CreateRoles => "create_roles",
        }
    }

    /// Whether the stage is switched on.
    pub fn enabled(&self, tasks: &TasksConfig) -> bool {
        match self {
            Stage::CreateSchema => tasks.create_schema,
            Stage::CreateTables => tasks.create_tables,
            Stage::CopyRows => tasks.copy_rows,
            Stage::CreatePrimaryKeys | Stage::CreateUniqueKeys | Stage::CreateForeignKeys => {
                tasks.create_constraints
            }
            Stage::CreateIndexes => tasks.create_indexes,
            Stage::CreateRoles => tasks.create_roles,
        }
    }

    /// Constraint kind handled by a constraint stage.
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            Stage::CreatePrimaryKeys => Some(ConstraintKind::PrimaryKey),
            Stage::CreateUniqueKeys => Some(ConstraintKind::Unique),
            Stage::CreateForeignKeys => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    CompletedWithErrors,
    /// Nothing to do: no tables, constraints, indexes or roles.
    NoOp,
    /// Disabled in the `tasks` section.
    Skipped,
    Cancelled,
}

/// A unit of work that failed while the run continued.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub object: String,
    pub error: String,
}

/// Summary of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    /// Objects created (schema, tables, constraints, indexes, roles) or tables copied.
    pub objects: usize,
    pub failures: Vec<Failure>,
    pub duration_seconds: f64,
}

/// Copy result for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableCopyReport {
    pub table: String,
    #[serde(flatten)]
    pub stats: TransferStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: "completed", "completed_with_errors" or "cancelled".
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Tables selected after filtering.
    pub tables_total: usize,

    /// Total rows written by the copy stage.
    pub rows_transferred: u64,

    /// Tables whose copy failed.
    pub failed_tables: Vec<String>,

    pub stages: Vec<StageReport>,

    pub tables: Vec<TableCopyReport>,
}

impl MigrationResult {
    /// Total failures across all stages.
    pub fn failure_count(&self) -> usize {
        self.stages.iter().map(|s| s.failures.len()).sum()
    }

    /// Error describing an unsuccessful run, if any.
    pub fn error(&self) -> Option<MigrateError> {
        if self.status == "cancelled" {
            return Some(MigrateError::Cancelled);
        }
        match self.failure_count() {
            0 => None,
            n => Some(MigrateError::Incomplete(n)),
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Everything a run would do, without writing anything.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub tables: Vec<String>,
    /// Scripts in execution order, grouped by stage.
    pub statements: Vec<PlannedDdl>,
    pub copies: Vec<CopyPlan>,
    pub failures: Vec<Failure>,
}

impl DryRunReport {
    fn push(&mut self, stage: Stage, result: Result<DdlBatch>) {
        match result {
            Ok(batch) => self.statements.push(PlannedDdl {
                stage,
                sql: batch.to_sql(),
                object: batch.object,
            }),
            Err(e) => self.failures.push(Failure {
                object: stage.name().to_string(),
                error: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedDdl {
    pub stage: Stage,
    pub object: String,
    pub sql: String,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Accumulates one stage's outcome.
struct StageRun {
    stage: Stage,
    started: Instant,
    objects: usize,
    failures: Vec<Failure>,
    cancelled: bool,
}

impl StageRun {
    fn new(stage: Stage) -> Self {
        info!("Stage {}", stage.name());
        Self {
            stage,
            started: Instant::now(),
            objects: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    fn fail(&mut self, object: impl Into<String>, err: &MigrateError) {
        let object = object.into();
        error!("{}: {} failed: {}", self.stage.name(), object, err);
        self.failures.push(Failure {
            object,
            error: err.to_string(),
        });
    }

    fn finish(self) -> StageReport {
        let outcome = if self.cancelled {
            StageOutcome::Cancelled
        } else if !self.failures.is_empty() {
            StageOutcome::CompletedWithErrors
        } else if self.objects == 0 {
            warn!("{}: nothing to do", self.stage.name());
            StageOutcome::NoOp
        } else {
            StageOutcome::Completed
        };

        let report = StageReport {
            stage: self.stage,
            outcome,
            objects: self.objects,
            failures: self.failures,
            duration_seconds: self.started.elapsed().as_secs_f64(),
        };
        info!(
            "Stage {} {:?}: {} objects, {} failures in {:.1}s",
            report.stage.name(),
            report.outcome,
            report.objects,
            report.failures.len(),
            report.duration_seconds
        );
        report
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
    policy: Arc<dyn ColumnTypePolicy>,
}

impl Orchestrator {
    /// Create the target database if configured, then connect both pools.
    pub async fn new(config: Config) -> Result<Self> {
        if config.target.create_database {
            PgPool::ensure_database(&config.target, config.migration.get_command_timeout()).await?;
        }
        Self::connect(config).await
    }

    /// Connect both pools without changing anything.
    pub async fn connect(config: Config) -> Result<Self> {
        let timeout = config.migration.get_command_timeout();
        let source = MssqlPool::new(
            &config.source,
            config.migration.get_max_source_connections(),
            timeout,
        )
        .await?;
        let target = PgPool::new(
            &config.target,
            config.migration.get_max_target_connections(),
            timeout,
        )
        .await?;

        Ok(Self::with_pools(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator over existing pools.
    pub fn with_pools(
        config: Config,
        source: Arc<dyn SourcePool>,
        target: Arc<dyn TargetPool>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            policy: Arc::new(PostgresTypeMap),
        }
    }

    /// Replace the column type policy used for `create table`.
    pub fn with_policy(mut self, policy: Arc<dyn ColumnTypePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Ping both databases.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.as_ref().err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.as_ref().err().map(|e| e.to_string()),
            healthy: source.is_ok() && target.is_ok(),
        })
    }

    fn source_schema(&self) -> &str {
        &self.config.source.schema
    }

    fn target_schema(&self) -> &str {
        &self.config.target.schema
    }

    fn transfer_engine(&self) -> TransferEngine {
        TransferEngine::new(
            self.source.clone(),
            self.target.clone(),
            TransferConfig {
                batch_size: self.config.migration.get_batch_size(),
                insert_batch_size: self.config.migration.get_insert_batch_size(),
            },
        )
    }

    /// Source tables selected by the include and exclude lists.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.source.list_tables(self.source_schema()).await?;
        let filter = TableFilter::new(
            &self.config.migration.include_tables,
            &self.config.migration.exclude_tables,
        );
        let selected = filter.apply(tables);
        if selected.is_empty() {
            warn!("No tables found in source schema {}", self.source_schema());
        } else {
            info!(
                "Found {} tables in source schema {}",
                selected.len(),
                self.source_schema()
            );
        }
        Ok(selected)
    }

    async fn describe<'a>(
        &self,
        cache: &'a mut HashMap<String, Table>,
        table: &str,
    ) -> Result<&'a Table> {
        if !cache.contains_key(table) {
            let descriptor = self.source.load_table(self.source_schema(), table).await?;
            cache.insert(table.to_string(), descriptor);
        }
        cache
            .get(table)
            .ok_or_else(|| MigrateError::introspection(table, "descriptor missing"))
    }

    /// Run every enabled stage in order.
    ///
    /// Per-object failures are recorded and the run continues. Cancellation
    /// is honored between stages and between tables.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting run {}", run_id);

        let tables = self.list_tables().await?;
        let mut cache = HashMap::new();
        let mut stages = Vec::new();
        let mut copies = Vec::new();
        let mut cancelled = false;

        for stage in Stage::PIPELINE {
            if cancel.is_cancelled() {
                warn!("Run cancelled before stage {}", stage.name());
                cancelled = true;
                break;
            }
            if !stage.enabled(&self.config.tasks) {
                debug!("Stage {} disabled", stage.name());
                stages.push(StageReport {
                    stage,
                    outcome: StageOutcome::Skipped,
                    objects: 0,
                    failures: Vec::new(),
                    duration_seconds: 0.0,
                });
                continue;
            }

            let mut run = StageRun::new(stage);
            match stage {
                Stage::CreateSchema => self.create_schema(&mut run).await,
                Stage::CreateTables => {
                    self.create_tables(&mut run, &tables, &mut cache, &cancel)
                        .await
                }
                Stage::CopyRows => {
                    self.copy_rows(&mut run, &tables, &mut cache, &mut copies, &cancel)
                        .await
                }
                Stage::CreatePrimaryKeys | Stage::CreateUniqueKeys | Stage::CreateForeignKeys => {
                    self.create_constraints(&mut run, &tables, &cancel).await
                }
                Stage::CreateIndexes => self.create_indexes(&mut run, &tables, &cancel).await,
                Stage::CreateRoles => self.create_roles(&mut run).await,
            }

            cancelled = run.cancelled;
            stages.push(run.finish());
            if cancelled {
                break;
            }
        }

        let completed_at = Utc::now();
        let failure_count: usize = stages.iter().map(|s: &StageReport| s.failures.len()).sum();
        let status = if cancelled {
            "cancelled"
        } else if failure_count > 0 {
            "completed_with_errors"
        } else {
            "completed"
        };

        let result = MigrationResult {
            run_id,
            status: status.to_string(),
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            started_at,
            completed_at,
            tables_total: tables.len(),
            rows_transferred: copies.iter().map(|c: &TableCopyReport| c.stats.rows).sum(),
            failed_tables: copies
                .iter()
                .filter(|c| c.error.is_some())
                .map(|c| c.table.clone())
                .collect(),
            stages,
            tables: copies,
        };

        info!(
            "Run {} {}: {} rows copied, {} failures",
            result.run_id, result.status, result.rows_transferred, failure_count
        );
        Ok(result)
    }

    async fn execute(&self, run: &mut StageRun, batch: &DdlBatch) {
        match self.target.execute_batch(&batch.to_sql()).await {
            Ok(()) => {
                debug!("Created {}", batch.object);
                run.objects += 1;
            }
            Err(e) => run.fail(&batch.object, &e),
        }
    }

    async fn create_schema(&self, run: &mut StageRun) {
        let batch = ddl::schema_ddl(self.target_schema(), self.config.target.schema_owner());
        self.execute(run, &batch).await;
    }

    async fn create_tables(
        &self,
        run: &mut StageRun,
        tables: &[String],
        cache: &mut HashMap<String, Table>,
        cancel: &CancellationToken,
    ) {
        for name in tables {
            if cancel.is_cancelled() {
                run.cancelled = true;
                return;
            }
            let batch = match self.describe(cache, name).await {
                Ok(table) => ddl::table_ddl(self.target_schema(), table, self.policy.as_ref()),
                Err(e) => Err(e),
            };
            match batch {
                Ok(batch) => self.execute(run, &batch).await,
                Err(e) => run.fail(name.as_str(), &e),
            }
        }
    }

    async fn copy_rows(
        &self,
        run: &mut StageRun,
        tables: &[String],
        cache: &mut HashMap<String, Table>,
        copies: &mut Vec<TableCopyReport>,
        cancel: &CancellationToken,
    ) {
        let engine = self.transfer_engine();
        for name in tables {
            if cancel.is_cancelled() {
                run.cancelled = true;
                return;
            }
            let job = match self.describe(cache, name).await {
                Ok(table) => TransferJob {
                    table: table.clone(),
                    target_schema: self.target_schema().to_string(),
                },
                Err(e) => {
                    run.fail(name.as_str(), &e);
                    continue;
                }
            };

            let table_name = job.table.full_name();
            let mut stats = TransferStats::default();
            let error = match engine.execute_into(&job, &mut stats).await {
                Ok(()) => {
                    run.objects += 1;
                    None
                }
                Err(e) => {
                    run.fail(table_name.as_str(), &e);
                    Some(e.to_string())
                }
            };
            copies.push(TableCopyReport {
                table: table_name,
                stats,
                error,
            });
        }
    }

    async fn create_constraints(
        &self,
        run: &mut StageRun,
        tables: &[String],
        cancel: &CancellationToken,
    ) {
        let Some(kind) = run.stage.constraint_kind() else {
            return;
        };

        for name in tables {
            if cancel.is_cancelled() {
                run.cancelled = true;
                return;
            }
            let constraints = match self
                .source
                .load_constraints(self.source_schema(), name, kind)
                .await
            {
                Ok(constraints) => constraints,
                Err(e) => {
                    run.fail(name.as_str(), &e);
                    continue;
                }
            };
            if constraints.is_empty() {
                debug!("{}: no {} constraints", name, kind.sql_keyword());
                continue;
            }

            for constraint in &constraints {
                match ddl::constraint_ddl(self.target_schema(), name, constraint) {
                    Ok(batch) => self.execute(run, &batch).await,
                    Err(e) => run.fail(format!("{}.{}", name, constraint.name), &e),
                }
            }
        }
    }

    async fn create_indexes(&self, run: &mut StageRun, tables: &[String], cancel: &CancellationToken) {
        for name in tables {
            if cancel.is_cancelled() {
                run.cancelled = true;
                return;
            }
            let indexes = match self.source.load_indexes(self.source_schema(), name).await {
                Ok(indexes) => indexes,
                Err(e) => {
                    run.fail(name.as_str(), &e);
                    continue;
                }
            };
            if indexes.is_empty() {
                debug!("{}: no indexes", name);
                continue;
            }

            for index in &indexes {
                match ddl::index_ddl(self.target_schema(), name, index) {
                    Ok(batch) => self.execute(run, &batch).await,
                    Err(e) => run.fail(format!("{}.{}", name, index.name), &e),
                }
            }
        }
    }

    async fn create_roles(&self, run: &mut StageRun) {
        for (role, password) in &self.config.target.roles {
            let exists = match self.target.role_exists(role).await {
                Ok(exists) => exists,
                Err(e) => {
                    run.fail(role.as_str(), &e);
                    continue;
                }
            };
            let batch = ddl::role_ddl(
                role,
                password.as_deref(),
                exists,
                self.target_schema(),
                &self.config.target.database,
            );
            self.execute(run, &batch).await;
            info!("Role {} {}", role, if exists { "updated" } else { "created" });
        }
    }

    /// Report the statements and copy plans of a run without executing them.
    pub async fn plan(&self) -> Result<DryRunReport> {
        let tables = self.list_tables().await?;
        let tasks = &self.config.tasks;
        let schema = self.target_schema();
        let mut report = DryRunReport {
            tables: tables.clone(),
            statements: Vec::new(),
            copies: Vec::new(),
            failures: Vec::new(),
        };

        if tasks.create_schema {
            report.push(
                Stage::CreateSchema,
                Ok(ddl::schema_ddl(schema, self.config.target.schema_owner())),
            );
        }

        let mut cache = HashMap::new();
        let engine = self.transfer_engine();
        for name in &tables {
            let table = match self.describe(&mut cache, name).await {
                Ok(table) => table.clone(),
                Err(e) => {
                    report.push(Stage::CreateTables, Err(e));
                    continue;
                }
            };
            if tasks.create_tables {
                report.push(
                    Stage::CreateTables,
                    ddl::table_ddl(schema, &table, self.policy.as_ref()),
                );
            }
            if tasks.copy_rows {
                let job = TransferJob {
                    table,
                    target_schema: schema.to_string(),
                };
                match engine.plan(&job, tasks.create_tables).await {
                    Ok(plan) => report.copies.push(plan),
                    Err(e) => report.push(Stage::CopyRows, Err(e)),
                }
            }
        }

        for stage in [
            Stage::CreatePrimaryKeys,
            Stage::CreateUniqueKeys,
            Stage::CreateForeignKeys,
        ] {
            let Some(kind) = stage.constraint_kind() else {
                continue;
            };
            if !stage.enabled(tasks) {
                continue;
            }
            for name in &tables {
                match self.source.load_constraints(self.source_schema(), name, kind).await {
                    Ok(constraints) => {
                        for c in &constraints {
                            report.push(stage, ddl::constraint_ddl(schema, name, c));
                        }
                    }
                    Err(e) => report.push(stage, Err(e)),
                }
            }
        }

        if tasks.create_indexes {
            for name in &tables {
                match self.source.load_indexes(self.source_schema(), name).await {
                    Ok(indexes) => {
                        for index in &indexes {
                            report.push(Stage::CreateIndexes, ddl::index_ddl(schema, name, index));
                        }
                    }
                    Err(e) => report.push(Stage::CreateIndexes, Err(e)),
                }
            }
        }

        if tasks.create_roles {
            for (role, password) in &self.config.target.roles {
                let exists = match self.target.role_exists(role).await {
                    Ok(exists) => exists,
                    Err(e) => {
                        report.failures.push(Failure {
                            object: format!("role {}", role),
                            error: e.to_string(),
                        });
                        continue;
                    }
                };
                report.push(
                    Stage::CreateRoles,
                    Ok(ddl::role_ddl(
                        role,
                        password.as_deref(),
                        exists,
                        schema,
                        &self.config.target.database,
                    )),
                );
            }
        }

        Ok(report)
    }
}

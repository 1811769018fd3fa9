//! Load orchestrator - main workflow coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, DownloadStrategy};
use crate::core::identifier::destination_table_name;
use crate::download::{fetcher_for, DownloadSummary, Downloader, NotebookFilter, NotebookId};
use crate::engine::{
    collect_stats, ConstraintCatalog, HardeningOutcome, HardeningReport, IntegrityResolver,
    LoadScheduler, RunState, SchedulerOptions, SchemaHardener, TableStats, TableStore,
};
use crate::error::{LoadError, Result};
use crate::snapshot::{load_constraints, CsvDirectory, Preprocessor, TableSource};
use crate::target::{MemoryTarget, PgTarget, TargetStore, WriteOptions};

/// How the destination is prepared before loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Fresh load; refuses to touch a destination that already holds the tables.
    Init,
    /// Drop the tables and load them again from the snapshot.
    Refresh,
}

/// Load orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn TableSource>,
    target: Arc<dyn TargetStore>,
}

/// Result of a load run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: LoadMode,

    /// Final status.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Tables written to the destination.
    pub tables_total: usize,

    /// Total rows written.
    pub rows_written: u64,

    /// Rows dropped because a foreign key could not be resolved.
    pub rows_removed: usize,

    /// Outer resolution passes until every constraint was solved.
    pub resolution_passes: usize,

    /// Retention per table, in load order.
    pub tables: Vec<TableStats>,

    /// Keys and foreign keys added.
    pub constraints_applied: usize,

    /// Keys and foreign keys the destination rejected.
    pub constraints_failed: usize,

    /// Details of every rejected key or foreign key.
    pub hardening_failures: Vec<HardeningOutcome>,

    /// Notebook retrieval counts, when a download followed the load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadSummary>,
}

impl LoadResult {
    /// Convert result to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_readable: bool,
    pub source_tables: usize,
    pub declared_constraints: usize,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_version: Option<String>,
    pub target_error: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator reading the configured CSV directory and
    /// writing to PostgreSQL.
    pub async fn new(config: Config) -> Result<Self> {
        let max_conns = config.load.get_max_pg_connections();
        let target = PgTarget::new(&config.target, max_conns).await?;
        let source = CsvDirectory::from_config(&config.source);
        Ok(Self::with_parts(config, Arc::new(source), Arc::new(target)))
    }

    /// Create an orchestrator that loads into an in-memory destination.
    pub fn dry_run(config: Config) -> Self {
        let source = CsvDirectory::from_config(&config.source);
        Self::with_parts(config, Arc::new(source), Arc::new(MemoryTarget::new()))
    }

    pub fn with_parts(
        config: Config,
        source: Arc<dyn TableSource>,
        target: Arc<dyn TargetStore>,
    ) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    /// Run the load. Stops with [`LoadError::Cancelled`] at the next table
    /// boundary once `cancel` fires.
    pub async fn run(&self, mode: LoadMode, cancel: CancellationToken) -> Result<LoadResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let schema = self.config.target.schema.as_str();
        let target = self.target.as_ref();

        info!("Starting load run: {} ({:?})", run_id, mode);

        // Phase 1: Read declarations
        info!(
            "Phase 1: Reading constraint declarations from {:?}",
            self.config.source.constraints_file
        );
        let catalog = load_constraints(&self.config.source.constraints_file)?;
        let tables = self.run_tables(&catalog)?;
        info!(
            "Found {} tables to load from {}",
            tables.len(),
            self.source.describe()
        );

        // Phase 2: Prepare target
        info!(
            "Phase 2: Preparing target database (mode: {:?}, target: {})",
            mode,
            target.db_type()
        );
        self.prepare_target(&tables, mode).await?;

        // Phase 3: Resolve, writing tables as they become final
        info!("Phase 3: Resolving referential integrity");
        let store = TableStore::new(
            Box::new(Arc::clone(&self.source)),
            Preprocessor::from_config(&self.config.preprocess),
        );
        let mut state = RunState::new(store, catalog);
        let mut scheduler = LoadScheduler::new(self.scheduler_options()).with_cancel(cancel.clone());
        let mut resolver = IntegrityResolver::new();

        while !state.catalog.all_solved() {
            resolver.begin_pass(&state);
            for table in resolver.pass_targets(&state) {
                if cancel.is_cancelled() {
                    warn!("Load cancelled during resolution");
                    return Err(LoadError::Cancelled);
                }
                resolver.resolve_table(&mut state, &table, &mut scheduler)?;
                scheduler.flush(&mut state, target).await?;
            }
        }
        info!(
            "Resolution reached fixpoint after {} passes ({} rows removed, {} tables written)",
            resolver.passes(),
            resolver.rows_removed(),
            scheduler.written().len()
        );

        // Phase 4: Write the rest
        info!("Phase 4: Writing remaining tables");
        scheduler.final_sweep(&mut state, target, &tables).await?;
        let stats = collect_stats(&state);

        // Phase 5: Harden
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let hardening = if self.config.load.harden_foreign_keys {
            info!("Phase 5: Adding keys and foreign keys");
            SchemaHardener::new(schema, &self.config.load.primary_key_column)
                .harden(&state, target)
                .await
        } else {
            info!("Phase 5: Skipped (harden_foreign_keys disabled)");
            HardeningReport::default()
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let result = LoadResult {
            run_id,
            mode,
            status: "completed".to_string(),
            duration_seconds: duration,
            started_at,
            completed_at,
            tables_total: scheduler.written().len(),
            rows_written: scheduler.rows_written(),
            rows_removed: resolver.rows_removed(),
            resolution_passes: resolver.passes(),
            tables: stats,
            constraints_applied: hardening.applied(),
            constraints_failed: hardening.failed(),
            hardening_failures: hardening.failures().cloned().collect(),
            download: None,
        };

        info!(
            "Load {}: {} tables, {} rows in {:.1}s ({} constraints failed)",
            result.status,
            result.tables_total,
            result.rows_written,
            result.duration_seconds,
            result.constraints_failed
        );

        Ok(result)
    }

    /// Identifiers of the notebooks selected by the download settings.
    pub async fn notebook_identifiers(&self) -> Result<Vec<NotebookId>> {
        let filter = NotebookFilter::from(&self.config.download);
        self.target
            .notebook_identifiers(&self.config.target.schema, &filter)
            .await
    }

    /// Fetch the selected notebooks into the configured folder.
    pub async fn download(
        &self,
        strategy: DownloadStrategy,
        cancel: CancellationToken,
    ) -> Result<DownloadSummary> {
        let ids = self.notebook_identifiers().await?;
        info!("{} notebooks selected for download", ids.len());

        let settings = &self.config.download;
        let fetcher = fetcher_for(strategy, settings)?;
        let downloader = Downloader::new(
            fetcher,
            &settings.dest_path,
            Duration::from_millis(settings.request_delay_ms),
        );
        downloader.run(ids, cancel).await
    }

    /// Check that the snapshot is readable and the destination reachable.
    pub async fn health_check(config: &Config) -> HealthCheckResult {
        let source = CsvDirectory::from_config(&config.source);
        let source_check = source.list_tables().and_then(|tables| {
            load_constraints(&config.source.constraints_file).map(|c| (tables.len(), c.len()))
        });
        let (source_readable, source_tables, declared_constraints, source_error) =
            match source_check {
                Ok((tables, constraints)) => (true, tables, constraints, None),
                Err(e) => (false, 0, 0, Some(e.to_string())),
            };

        let started = Instant::now();
        let target_check = match PgTarget::new(&config.target, 1).await {
            Ok(pg) => {
                let version = pg.server_version().await;
                pg.close().await;
                version
            }
            Err(e) => Err(e),
        };
        let target_latency_ms = started.elapsed().as_millis() as u64;
        let (target_connected, target_version, target_error) = match target_check {
            Ok(version) => (true, Some(version), None),
            Err(e) => (false, None, Some(e.to_string())),
        };

        HealthCheckResult {
            healthy: source_readable && target_connected,
            source_readable,
            source_tables,
            declared_constraints,
            source_error,
            target_connected,
            target_latency_ms,
            target_version,
            target_error,
        }
    }

    /// Close destination connections.
    pub async fn close(&self) {
        self.target.close().await;
    }

    /// Tables of this run: every declared table, plus the rest of the
    /// snapshot when configured.
    fn run_tables(&self, catalog: &ConstraintCatalog) -> Result<Vec<String>> {
        let available = self.source.list_tables()?;
        let mut tables = catalog.tables();

        let missing: Vec<&String> = tables.iter().filter(|t| !available.contains(t)).collect();
        if !missing.is_empty() {
            return Err(LoadError::Config(format!(
                "declared tables missing from {}: {:?}",
                self.source.describe(),
                missing
            )));
        }

        if self.config.source.include_unconstrained_tables {
            for name in available {
                if !tables.contains(&name) {
                    tables.push(name);
                }
            }
        }
        Ok(tables)
    }

    async fn prepare_target(&self, tables: &[String], mode: LoadMode) -> Result<()> {
        let schema = &self.config.target.schema;
        self.target.create_schema(schema).await?;

        let existing = self.target.existing_tables(schema).await?;
        let clashing: Vec<String> = tables
            .iter()
            .map(|t| destination_table_name(t))
            .filter(|t| existing.contains(t))
            .collect();
        if clashing.is_empty() {
            return Ok(());
        }

        match mode {
            LoadMode::Init => Err(LoadError::Config(format!(
                "schema {} already contains {:?}; use refresh to rebuild",
                schema, clashing
            ))),
            LoadMode::Refresh => {
                for table in &clashing {
                    debug!("Dropping table: {}.{}", schema, table);
                    self.target.drop_table(schema, table).await?;
                }
                info!("Dropped {} existing tables", clashing.len());
                Ok(())
            }
        }
    }

    fn scheduler_options(&self) -> SchedulerOptions {
        let load = &self.config.load;
        SchedulerOptions {
            schema: self.config.target.schema.clone(),
            write_order: load.write_order,
            release: load.release_written_tables,
            write: WriteOptions {
                batch_size: load.batch_size,
                workers: load.get_write_workers(),
            },
        }
    }
}

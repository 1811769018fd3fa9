//! Write eligibility and ordering.
//!
//! The resolver reports each table it settles; the scheduler keeps those as
//! candidates and, at every flush, writes the ones that can no longer lose
//! rows. After the fixpoint a final sweep writes whatever is left, in
//! dependency order where one exists.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::resolver::SettleObserver;
use super::RunState;
use crate::config::WriteOrder;
use crate::core::identifier::destination_table_name;
use crate::error::{LoadError, Result};
use crate::target::{TargetStore, WriteOptions};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Destination schema.
    pub schema: String,
    pub write_order: WriteOrder,
    /// Free the rows of written tables nothing still filters against.
    pub release: bool,
    pub write: WriteOptions,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            write_order: WriteOrder::default(),
            release: true,
            write: WriteOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct LoadScheduler {
    options: SchedulerOptions,
    candidates: Vec<String>,
    written: Vec<String>,
    rows_written: u64,
    cancel: CancellationToken,
}

impl SettleObserver for LoadScheduler {
    fn settled(&mut self, table: &str) {
        if !self.candidates.iter().any(|c| c == table) {
            self.candidates.push(table.to_string());
        }
    }
}

impl LoadScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            candidates: Vec::new(),
            written: Vec::new(),
            rows_written: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Refuse further writes once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tables written so far, in write order.
    pub fn written(&self) -> &[String] {
        &self.written
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Whether `table` may be written now.
    pub fn is_eligible(&self, state: &RunState, table: &str) -> bool {
        if !state.store.is_loaded(table)
            || state.store.is_written(table)
            || !state.catalog.is_settled(table)
        {
            return false;
        }

        state
            .catalog
            .referenced_tables(table)
            .iter()
            .filter(|r| r.as_str() != table)
            .all(|r| match self.options.write_order {
                WriteOrder::Strict => state.store.is_written(r),
                WriteOrder::Relaxed => is_final(state, r, &mut vec![table.to_string()]),
            })
    }

    /// Write every eligible candidate. Returns how many tables were written.
    pub async fn flush(&mut self, state: &mut RunState, target: &dyn TargetStore) -> Result<usize> {
        let mut count = 0;
        loop {
            self.candidates.retain(|t| !state.store.is_written(t));
            let Some(pos) = self
                .candidates
                .iter()
                .position(|t| self.is_eligible(state, t))
            else {
                break;
            };
            let table = self.candidates.remove(pos);
            self.write(state, target, &table).await?;
            count += 1;
        }
        self.release_idle(state);
        Ok(count)
    }

    /// Write every table of `tables` not written yet. Runs after the
    /// fixpoint, so only cycles can block dependency order.
    pub async fn final_sweep(
        &mut self,
        state: &mut RunState,
        target: &dyn TargetStore,
        tables: &[String],
    ) -> Result<usize> {
        for table in tables {
            state.ensure_loaded(table)?;
        }

        let mut pending: Vec<String> = tables
            .iter()
            .filter(|t| !state.store.is_written(t))
            .cloned()
            .collect();
        let mut count = 0;

        while !pending.is_empty() {
            let pos = match pending.iter().position(|t| self.is_eligible(state, t)) {
                Some(pos) => pos,
                None => {
                    warn!(
                        "No dependency order among {:?}, writing {} in declaration order",
                        pending, pending[0]
                    );
                    0
                }
            };
            let table = pending.remove(pos);
            self.write(state, target, &table).await?;
            count += 1;
        }

        self.release_idle(state);
        Ok(count)
    }

    async fn write(&mut self, state: &mut RunState, target: &dyn TargetStore, table: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let dest = destination_table_name(table);
        let schema = &self.options.schema;

        let t = state.store.table(table).ok_or_else(|| {
            LoadError::transfer(table, "rows were released before the table was written")
        })?;
        target.create_table(schema, &dest, &t.columns).await?;
        let written = target
            .write_rows(schema, &dest, &t.columns, &t.rows, &self.options.write)
            .await?;

        state.store.mark_written(table)?;
        self.written.push(table.to_string());
        self.rows_written += written;
        info!("Wrote {}.{} ({} rows)", schema, dest, written);

        if self.options.release && !state.catalog.has_unsolved_consumers(table) {
            state
                .store
                .release(table, &state.catalog.referenced_columns_of(table));
        }
        Ok(())
    }

    fn release_idle(&self, state: &mut RunState) {
        if !self.options.release {
            return;
        }
        for table in &self.written {
            if !state.store.is_released(table) && !state.catalog.has_unsolved_consumers(table) {
                let keep = state.catalog.referenced_columns_of(table);
                if state.store.release(table, &keep) {
                    debug!("{} released after its last consumer settled", table);
                }
            }
        }
    }
}

/// A table is final when it can no longer lose rows: it is written, or it
/// is settled and everything it references is final. `path` holds the
/// tables being checked; meeting one again means a cycle, which is not final.
fn is_final(state: &RunState, table: &str, path: &mut Vec<String>) -> bool {
    if state.store.is_written(table) {
        return true;
    }
    if !state.store.is_loaded(table)
        || !state.catalog.is_settled(table)
        || path.iter().any(|p| p == table)
    {
        return false;
    }

    path.push(table.to_string());
    let result = state
        .catalog
        .referenced_tables(table)
        .iter()
        .filter(|r| r.as_str() != table)
        .all(|r| is_final(state, r, path));
    path.pop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::Constraint;
    use crate::engine::fixtures::*;
    use crate::engine::resolver::IntegrityResolver;
    use crate::target::MemoryTarget;

    async fn target() -> MemoryTarget {
        let target = MemoryTarget::new();
        target.create_schema("public").await.unwrap();
        target
    }

    fn options(write_order: WriteOrder) -> SchedulerOptions {
        SchedulerOptions {
            write_order,
            ..Default::default()
        }
    }

    /// Resolve the way a run does: one walk per target, flushing after each.
    async fn run(
        state: &mut RunState,
        scheduler: &mut LoadScheduler,
        target: &MemoryTarget,
    ) {
        let mut resolver = IntegrityResolver::new();
        while !state.catalog.all_solved() {
            resolver.begin_pass(state);
            for table in resolver.pass_targets(state) {
                resolver.resolve_table(state, &table, scheduler).unwrap();
                scheduler.flush(state, target).await.unwrap();
            }
        }
        let tables = state.catalog.tables();
        scheduler.final_sweep(state, target, &tables).await.unwrap();
    }

    fn dataset_state() -> RunState {
        let versions = id_table(
            "DatasetVersions",
            &["DatasetId"],
            (1..=10)
                .map(|i| vec![Some(i), Some(if i > 8 { 99 } else { i % 5 + 1 })])
                .collect(),
        );
        let votes = id_table(
            "DatasetVotes",
            &["DatasetVersionId", "UserId"],
            (1..=20)
                .map(|i| vec![Some(i), Some(i % 10 + 1), Some(i % 3 + 1)])
                .collect(),
        );
        state(
            vec![plain("Users", 3), plain("Datasets", 5), versions, votes],
            vec![
                Constraint::new("DatasetVotes", "DatasetVersionId", "DatasetVersions", "Id"),
                Constraint::new("DatasetVotes", "UserId", "Users", "Id"),
                Constraint::new("DatasetVersions", "DatasetId", "Datasets", "Id"),
            ],
        )
    }

    #[tokio::test]
    async fn test_unconstrained_table_written_immediately() {
        let mut state = state(
            vec![plain("Users", 100)],
            vec![Constraint::new("Kernels", "AuthorUserId", "Users", "Id")],
        );
        let target = target().await;
        let mut scheduler = LoadScheduler::new(SchedulerOptions::default());

        IntegrityResolver::new()
            .resolve_table(&mut state, "Users", &mut scheduler)
            .unwrap();
        assert_eq!(scheduler.flush(&mut state, &target).await.unwrap(), 1);
        assert_eq!(target.rows("public", "users").unwrap().len(), 100);
        assert_eq!(scheduler.written(), &["Users".to_string()]);
    }

    #[tokio::test]
    async fn test_every_table_written_once_with_final_rows() {
        let mut state = dataset_state();
        let target = target().await;
        let mut scheduler = LoadScheduler::new(SchedulerOptions::default());
        run(&mut state, &mut scheduler, &target).await;

        for table in ["Users", "Datasets", "DatasetVersions", "DatasetVotes"] {
            let dest = destination_table_name(table);
            assert_eq!(target.write_count(&dest), 1, "{} written once", table);
            assert_eq!(
                target.rows("public", &dest).unwrap().len(),
                state.store.row_count(table).unwrap(),
            );
        }
        assert_eq!(target.rows("public", "datasetvotes").unwrap().len(), 16);
        assert_eq!(scheduler.rows_written(), 3 + 5 + 8 + 16);
    }

    #[tokio::test]
    async fn test_strict_order_writes_referenced_tables_first() {
        let mut state = dataset_state();
        let target = target().await;
        let mut scheduler = LoadScheduler::new(options(WriteOrder::Strict));
        run(&mut state, &mut scheduler, &target).await;

        let log = target.write_log();
        let pos = |t: &str| log.iter().position(|l| l == t).unwrap();
        assert!(pos("datasets") < pos("datasetversions"));
        assert!(pos("datasetversions") < pos("datasetvotes"));
        assert!(pos("users") < pos("datasetvotes"));
    }

    #[test]
    fn test_unsettled_table_not_eligible() {
        let mut state = dataset_state();
        state.ensure_loaded("DatasetVotes").unwrap();
        state.ensure_loaded("Users").unwrap();
        let scheduler = LoadScheduler::new(SchedulerOptions::default());

        assert!(scheduler.is_eligible(&state, "Users"));
        assert!(!scheduler.is_eligible(&state, "DatasetVotes"));
    }

    #[tokio::test]
    async fn test_cycle_written_in_final_sweep() {
        let a = id_table("A", &["BId"], vec![vec![Some(1), Some(1)], vec![Some(2), Some(5)]]);
        let b = id_table("B", &["AId"], vec![vec![Some(1), Some(1)]]);
        let mut state = state(
            vec![a, b],
            vec![
                Constraint::new("A", "BId", "B", "Id"),
                Constraint::new("B", "AId", "A", "Id"),
            ],
        );
        let target = target().await;
        let mut scheduler = LoadScheduler::new(SchedulerOptions::default());
        run(&mut state, &mut scheduler, &target).await;

        assert_eq!(scheduler.written().len(), 2);
        assert_eq!(target.write_count("a"), 1);
        assert_eq!(target.write_count("b"), 1);
        assert_eq!(target.rows("public", "a").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_written_tables_released() {
        let mut state = dataset_state();
        let target = target().await;
        let mut scheduler = LoadScheduler::new(SchedulerOptions::default());
        run(&mut state, &mut scheduler, &target).await;

        assert!(state.store.is_released("Users"));
        assert_eq!(state.store.row_count("Users"), Some(3));
        assert_eq!(state.store.key_set("Users", "Id").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal_and_not_marked() {
        let mut state = state(vec![plain("Users", 4)], vec![]);
        let target = target().await;
        target.fail_writes_for("users");
        let mut scheduler = LoadScheduler::new(SchedulerOptions::default());

        let err = scheduler
            .final_sweep(&mut state, &target, &["Users".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Transfer { .. }));
        assert!(!state.store.is_written("Users"));
        assert_eq!(target.rows("public", "users").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_scheduler_writes_nothing() {
        let mut state = state(vec![plain("Users", 4)], vec![]);
        let target = target().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut scheduler = LoadScheduler::new(SchedulerOptions::default()).with_cancel(cancel);

        let err = scheduler
            .final_sweep(&mut state, &target, &["Users".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Cancelled));
        assert!(!state.store.is_written("Users"));
        assert!(target.rows("public", "users").is_none());
    }
}

//! Post-load key and foreign key retrofitting.
//!
//! Runs once every table is written. Each key and foreign key is a separate
//! statement with its own outcome; a rejected one is reported and the pass
//! goes on.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::RunState;
use crate::core::identifier::{constraint_name, destination_table_name};
use crate::target::{ForeignKeyDef, KeyKind, TargetStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardeningKind {
    PrimaryKey,
    Unique,
    ForeignKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HardeningStatus {
    Applied,
    Failed { reason: String },
}

/// Result of one hardening statement.
#[derive(Debug, Clone, Serialize)]
pub struct HardeningOutcome {
    pub kind: HardeningKind,
    /// Destination table name.
    pub table: String,
    pub column: String,
    /// Constraint name.
    pub name: String,
    #[serde(flatten)]
    pub status: HardeningStatus,
}

impl HardeningOutcome {
    pub fn is_applied(&self) -> bool {
        self.status == HardeningStatus::Applied
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HardeningReport {
    pub outcomes: Vec<HardeningOutcome>,
}

impl HardeningReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HardeningOutcome> {
        self.outcomes.iter().filter(|o| !o.is_applied())
    }
}

pub struct SchemaHardener {
    schema: String,
    primary_key_column: String,
}

impl SchemaHardener {
    pub fn new(schema: impl Into<String>, primary_key_column: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            primary_key_column: primary_key_column.into(),
        }
    }

    /// Add primary and unique keys to written tables, then every declared
    /// foreign key.
    pub async fn harden(&self, state: &RunState, target: &dyn TargetStore) -> HardeningReport {
        let mut report = HardeningReport::default();

        for table in state.store.written_tables() {
            let Some(columns) = state.store.columns(&table) else {
                continue;
            };
            let has = |name: &str| columns.iter().any(|c| c.name == name);
            let dest = destination_table_name(&table);

            if has(&self.primary_key_column) {
                let outcome = self
                    .add_key(target, &dest, KeyKind::Primary, &self.primary_key_column)
                    .await;
                report.outcomes.push(outcome);
            }
            for column in state.catalog.referenced_columns_of(&table) {
                if column != self.primary_key_column && has(&column) {
                    let outcome = self.add_key(target, &dest, KeyKind::Unique, &column).await;
                    report.outcomes.push(outcome);
                }
            }
        }

        for c in state.catalog.iter() {
            let fk = ForeignKeyDef {
                name: constraint_name("fk", &destination_table_name(&c.table), &c.foreign_key),
                table: destination_table_name(&c.table),
                column: c.foreign_key.clone(),
                referenced_table: destination_table_name(&c.referenced_table),
                referenced_column: c.referenced_column.clone(),
            };

            let missing = [&c.table, &c.referenced_table]
                .into_iter()
                .find(|t| !state.store.is_written(t));
            let status = match missing {
                Some(t) => HardeningStatus::Failed {
                    reason: format!("table {} was not loaded", t),
                },
                None => match target.add_foreign_key(&self.schema, &fk).await {
                    Ok(()) => HardeningStatus::Applied,
                    Err(e) => HardeningStatus::Failed {
                        reason: e.to_string(),
                    },
                },
            };
            report.outcomes.push(self.record(HardeningKind::ForeignKey, fk.table, fk.column, fk.name, status));
        }

        info!(
            "Hardening finished: {} applied, {} failed",
            report.applied(),
            report.failed()
        );
        report
    }

    async fn add_key(
        &self,
        target: &dyn TargetStore,
        table: &str,
        kind: KeyKind,
        column: &str,
    ) -> HardeningOutcome {
        let name = constraint_name(kind.prefix(), table, column);
        let status = match target.add_key(&self.schema, table, kind, column, &name).await {
            Ok(()) => HardeningStatus::Applied,
            Err(e) => HardeningStatus::Failed {
                reason: e.to_string(),
            },
        };
        let kind = match kind {
            KeyKind::Primary => HardeningKind::PrimaryKey,
            KeyKind::Unique => HardeningKind::Unique,
        };
        self.record(kind, table.to_string(), column.to_string(), name, status)
    }

    fn record(
        &self,
        kind: HardeningKind,
        table: String,
        column: String,
        name: String,
        status: HardeningStatus,
    ) -> HardeningOutcome {
        match &status {
            HardeningStatus::Applied => debug!("Added {} on {}.{}", name, table, column),
            HardeningStatus::Failed { reason } => {
                warn!("Failed to add {} on table {}: {}", name, table, reason)
            }
        }
        HardeningOutcome {
            kind,
            table,
            column,
            name,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::{Constraint, ConstraintMode};
    use crate::engine::fixtures::*;
    use crate::engine::resolver::IntegrityResolver;
    use crate::engine::scheduler::{LoadScheduler, SchedulerOptions};
    use crate::target::MemoryTarget;

    async fn load(state: &mut RunState) -> MemoryTarget {
        let target = MemoryTarget::new();
        target.create_schema("public").await.unwrap();
        let mut scheduler = LoadScheduler::new(SchedulerOptions::default());
        IntegrityResolver::new()
            .resolve_all(state, &mut scheduler)
            .unwrap();
        let tables = state.catalog.tables();
        scheduler.final_sweep(state, &target, &tables).await.unwrap();
        target
    }

    #[tokio::test]
    async fn test_resolved_constraints_harden() {
        let kernels = id_table(
            "Kernels",
            &["AuthorUserId"],
            vec![vec![Some(1), Some(1)], vec![Some(2), Some(9)], vec![Some(3), None]],
        );
        let mut state = state(
            vec![plain("Users", 2), kernels],
            vec![Constraint::new("Kernels", "AuthorUserId", "Users", "Id")],
        );
        let target = load(&mut state).await;

        let report = SchemaHardener::new("public", "Id").harden(&state, &target).await;
        assert_eq!(report.failed(), 0);
        assert_eq!(report.applied(), 3);
        let fk = report
            .outcomes
            .iter()
            .find(|o| o.kind == HardeningKind::ForeignKey)
            .unwrap();
        assert_eq!(fk.name, "fk_kernels_authoruserid");
    }

    #[tokio::test]
    async fn test_harden_only_failure_is_reported_and_pass_continues() {
        let versions = plain("KernelVersions", 3);
        let kernels = id_table(
            "Kernels",
            &["AuthorUserId", "ForkParentKernelVersionId"],
            vec![
                vec![Some(1), Some(1), None],
                vec![Some(2), Some(2), Some(77)],
                vec![Some(3), Some(1), Some(2)],
            ],
        );
        let mut state = state(
            vec![plain("Users", 2), versions, kernels],
            vec![
                Constraint::new("Kernels", "ForkParentKernelVersionId", "KernelVersions", "Id")
                    .with_mode(ConstraintMode::HardenOnly),
                Constraint::new("Kernels", "AuthorUserId", "Users", "Id"),
            ],
        );
        let target = load(&mut state).await;
        assert_eq!(state.store.row_count("Kernels"), Some(3));

        let report = SchemaHardener::new("public", "Id").harden(&state, &target).await;
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].table, "kernels");
        assert_eq!(failures[0].column, "ForkParentKernelVersionId");

        // the constraint declared after the failing one still lands
        assert!(report
            .outcomes
            .iter()
            .any(|o| o.column == "AuthorUserId" && o.is_applied()));
    }

    #[tokio::test]
    async fn test_duplicate_ids_fail_primary_key_only() {
        let users = id_table("Users", &[], vec![vec![Some(1)], vec![Some(1)]]);
        let mut state = state(vec![users], vec![]);
        let target = MemoryTarget::new();
        target.create_schema("public").await.unwrap();
        LoadScheduler::new(SchedulerOptions::default())
            .final_sweep(&mut state, &target, &["Users".to_string()])
            .await
            .unwrap();

        let report = SchemaHardener::new("public", "Id").harden(&state, &target).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[0].kind, HardeningKind::PrimaryKey);
    }

    #[test]
    fn test_outcome_serializes_flat() {
        let outcome = HardeningOutcome {
            kind: HardeningKind::ForeignKey,
            table: "kernels".into(),
            column: "AuthorUserId".into(),
            name: "fk_kernels_authoruserid".into(),
            status: HardeningStatus::Failed {
                reason: "boom".into(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");
        assert_eq!(json["kind"], "foreign_key");
    }
}

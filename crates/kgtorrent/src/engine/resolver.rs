//! Fixpoint resolution of declared foreign keys.
//!
//! Starting from a referencing table, the resolver walks the constraint
//! graph depth-first, cleaning every referenced table before the table that
//! points at it. Cleaning drops rows whose non-null foreign key value is
//! missing from the referenced column, marks the constraint solved, and, if
//! anything was dropped, marks unsolved every other constraint that reads
//! the shrunken table. [`IntegrityResolver::resolve_all`] repeats top-level
//! walks until every constraint is solved. Row counts never grow, so this
//! terminates.
//!
//! The walk uses an explicit frame stack and a visited set that is reset for
//! every top-level walk, so cyclic and self-referencing graphs cannot recurse
//! without bound.

use std::collections::HashSet;

use tracing::{debug, info};

use super::catalog::ConstraintId;
use super::RunState;
use crate::error::Result;

/// Notified whenever a table has been fully cleaned against everything it
/// references during a walk.
pub trait SettleObserver {
    fn settled(&mut self, table: &str);
}

impl SettleObserver for Vec<String> {
    fn settled(&mut self, table: &str) {
        self.push(table.to_string());
    }
}

/// A table being walked: its referenced tables and the next one to handle.
struct Frame {
    table: String,
    referenced: Vec<String>,
    next: usize,
}

enum Step {
    Descend(String),
    Clean(String),
    Settle,
}

#[derive(Debug, Default)]
pub struct IntegrityResolver {
    visited: HashSet<String>,
    passes: usize,
    rows_removed: usize,
}

impl IntegrityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outer passes run by [`resolve_all`](Self::resolve_all) so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Rows dropped so far across all walks.
    pub fn rows_removed(&self) -> usize {
        self.rows_removed
    }

    /// Tables a new outer pass has to walk from.
    pub fn pass_targets(&self, state: &RunState) -> Vec<String> {
        state.catalog.unsolved_referencing_tables()
    }

    /// Start a new outer pass.
    pub fn begin_pass(&mut self, state: &RunState) {
        self.passes += 1;
        debug!(
            "Resolution pass {}: {} unsolved constraints",
            self.passes,
            state.catalog.unsolved_count()
        );
    }

    /// Run outer passes until every resolve-mode constraint is solved.
    pub fn resolve_all<O: SettleObserver>(
        &mut self,
        state: &mut RunState,
        observer: &mut O,
    ) -> Result<()> {
        while !state.catalog.all_solved() {
            self.begin_pass(state);
            for table in self.pass_targets(state) {
                self.resolve_table(state, &table, observer)?;
            }
        }
        info!(
            "Resolution reached fixpoint after {} passes ({} rows removed)",
            self.passes, self.rows_removed
        );
        Ok(())
    }

    /// One top-level walk from `name`. The visited set starts empty.
    pub fn resolve_table<O: SettleObserver>(
        &mut self,
        state: &mut RunState,
        name: &str,
        observer: &mut O,
    ) -> Result<()> {
        self.visited.clear();
        let mut stack = vec![self.enter(state, name)?];

        while let Some(frame) = stack.last_mut() {
            let step = match frame.referenced.get(frame.next) {
                None => Step::Settle,
                Some(r) if !self.visited.contains(r) => Step::Descend(r.clone()),
                Some(r) => {
                    let r = r.clone();
                    frame.next += 1;
                    Step::Clean(r)
                }
            };

            match step {
                Step::Descend(r) => {
                    let child = self.enter(state, &r)?;
                    stack.push(child);
                }
                Step::Clean(r) => {
                    let table = frame.table.clone();
                    self.clean(state, &table, &r)?;
                }
                Step::Settle => {
                    if let Some(done) = stack.pop() {
                        debug!("{} settled", done.table);
                        observer.settled(&done.table);
                    }
                }
            }
        }
        Ok(())
    }

    fn enter(&mut self, state: &mut RunState, name: &str) -> Result<Frame> {
        self.visited.insert(name.to_string());
        state.ensure_loaded(name)?;
        Ok(Frame {
            table: name.to_string(),
            referenced: state.catalog.referenced_tables(name),
            next: 0,
        })
    }

    /// Filter `table` against `referenced` for every unsolved constraint
    /// between them.
    fn clean(&mut self, state: &mut RunState, table: &str, referenced: &str) -> Result<()> {
        for id in state.catalog.unsolved_between(table, referenced) {
            let removed = self.apply_constraint(state, id)?;
            state.catalog.mark_solved(id);
            if removed > 0 {
                let flipped = state.catalog.invalidate_consumers(table, id);
                debug!(
                    "{}: removed {} rows, {} constraints reopened",
                    table, removed, flipped
                );
            }
        }
        Ok(())
    }

    fn apply_constraint(&mut self, state: &mut RunState, id: ConstraintId) -> Result<usize> {
        let Some(c) = state.catalog.get(id).cloned() else {
            return Ok(0);
        };

        let removed = if c.is_self_reference() {
            state
                .store
                .retain_self_consistent(&c.table, &c.foreign_key, &c.referenced_column)?
        } else {
            let keys = state.store.key_set(&c.referenced_table, &c.referenced_column)?;
            state.store.retain_matching(&c.table, &c.foreign_key, &keys)?
        };

        if removed > 0 {
            debug!(
                "{}.{} -> {}.{}: dropped {} unresolvable rows",
                c.table, c.foreign_key, c.referenced_table, c.referenced_column, removed
            );
        }
        self.rows_removed += removed;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::engine::catalog::{Constraint, ConstraintMode};
    use crate::engine::fixtures::*;
    use crate::engine::RunState;

    /// Every non-null foreign key value exists in the referenced column.
    fn assert_sound(state: &RunState) {
        for c in state.catalog.iter().filter(|c| c.resolves()) {
            let keys = state
                .store
                .key_set(&c.referenced_table, &c.referenced_column)
                .unwrap();
            let table = state.store.table(&c.table).unwrap();
            let idx = table.column_index(&c.foreign_key).unwrap();
            for row in &table.rows {
                if let Some(k) = row[idx].key() {
                    assert!(
                        keys.contains(&k),
                        "{}.{} = {:?} dangles",
                        c.table,
                        c.foreign_key,
                        k
                    );
                }
            }
        }
    }

    fn kernels(total: i64, dangling: i64) -> crate::core::schema::Table {
        id_table(
            "Kernels",
            &["AuthorUserId"],
            (1..=total)
                .map(|i| {
                    let author = if i <= dangling { 1000 + i } else { (i % 100) + 1 };
                    vec![Some(i), Some(author)]
                })
                .collect(),
        )
    }

    #[test]
    fn test_table_without_constraints_settles_immediately() {
        let mut state = state(
            vec![plain("Users", 100), kernels(10, 0)],
            vec![Constraint::new("Kernels", "AuthorUserId", "Users", "Id")],
        );
        let mut settled = Vec::new();
        IntegrityResolver::new()
            .resolve_table(&mut state, "Users", &mut settled)
            .unwrap();
        assert_eq!(settled, vec!["Users"]);
        assert_eq!(state.store.row_count("Users"), Some(100));
    }

    #[test]
    fn test_dangling_references_removed() {
        let mut state = state(
            vec![plain("Users", 100), kernels(100, 10)],
            vec![Constraint::new("Kernels", "AuthorUserId", "Users", "Id")],
        );
        let mut settled = Vec::new();
        let mut resolver = IntegrityResolver::new();
        resolver.resolve_all(&mut state, &mut settled).unwrap();

        assert_eq!(state.store.row_count("Kernels"), Some(90));
        assert_eq!(state.store.row_count("Users"), Some(100));
        assert!(state.catalog.all_solved());
        assert_eq!(settled, vec!["Users", "Kernels"]);
        assert_eq!(resolver.rows_removed(), 10);
        assert_sound(&state);
    }

    #[test]
    fn test_null_foreign_keys_kept() {
        let kernels = id_table(
            "Kernels",
            &["AuthorUserId"],
            vec![vec![Some(1), None], vec![Some(2), Some(7)], vec![Some(3), Some(1)]],
        );
        let mut state = state(
            vec![plain("Users", 1), kernels],
            vec![Constraint::new("Kernels", "AuthorUserId", "Users", "Id")],
        );
        IntegrityResolver::new()
            .resolve_all(&mut state, &mut Vec::new())
            .unwrap();
        let ids: Vec<Value> = state
            .store
            .table("Kernels")
            .unwrap()
            .rows
            .iter()
            .map(|r| r[0].clone())
            .collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn test_self_reference_solved_in_one_visit() {
        let tags = id_table(
            "Tags",
            &["ParentTagId"],
            vec![
                vec![Some(1), None],
                vec![Some(2), Some(1)],
                vec![Some(3), Some(42)],
                vec![Some(4), Some(3)],
                vec![Some(5), Some(4)],
                vec![Some(6), Some(2)],
            ],
        );
        let mut state = state(
            vec![tags],
            vec![Constraint::new("Tags", "ParentTagId", "Tags", "Id")],
        );
        let mut resolver = IntegrityResolver::new();
        let mut settled = Vec::new();
        resolver
            .resolve_table(&mut state, "Tags", &mut settled)
            .unwrap();

        assert!(state.catalog.all_solved());
        assert_eq!(state.store.row_count("Tags"), Some(3));
        assert_eq!(settled, vec!["Tags"]);
        assert_sound(&state);
    }

    #[test]
    fn test_shrinking_referenced_table_reopens_consumers() {
        // DatasetVotes -> Users, DatasetVersions; DatasetVersions -> Datasets
        let datasets = plain("Datasets", 5);
        let versions = id_table(
            "DatasetVersions",
            &["DatasetId"],
            (1..=10).map(|i| vec![Some(i), Some(if i > 8 { 99 } else { i % 5 + 1 })]).collect(),
        );
        let votes = id_table(
            "DatasetVotes",
            &["UserId", "DatasetVersionId"],
            (1..=20).map(|i| vec![Some(i), Some(i % 3 + 1), Some(i % 10 + 1)]).collect(),
        );
        let constraints = vec![
            Constraint::new("DatasetVotes", "UserId", "Users", "Id"),
            Constraint::new("DatasetVotes", "DatasetVersionId", "DatasetVersions", "Id"),
            Constraint::new("DatasetVersions", "DatasetId", "Datasets", "Id"),
        ];

        // Cleaning DatasetVersions first reopens DatasetVotes -> DatasetVersions
        let mut state = state(vec![plain("Users", 3), datasets, versions, votes], constraints);
        state.ensure_loaded("DatasetVotes").unwrap();
        state.ensure_loaded("DatasetVersions").unwrap();
        state.catalog.mark_solved(1);

        let mut resolver = IntegrityResolver::new();
        resolver
            .resolve_table(&mut state, "DatasetVersions", &mut Vec::new())
            .unwrap();
        assert_eq!(state.store.row_count("DatasetVersions"), Some(8));
        assert!(!state.catalog.get(1).unwrap().is_solved());

        resolver.resolve_all(&mut state, &mut Vec::new()).unwrap();
        assert!(state.catalog.all_solved());
        assert_eq!(state.store.row_count("DatasetVotes"), Some(16));
        assert_sound(&state);
    }

    #[test]
    fn test_cycle_reaches_fixpoint() {
        // A.BId -> B.Id and B.AId -> A.Id
        let a = id_table(
            "A",
            &["BId"],
            vec![vec![Some(1), Some(1)], vec![Some(2), Some(2)], vec![Some(3), Some(9)]],
        );
        let b = id_table(
            "B",
            &["AId"],
            vec![vec![Some(1), Some(1)], vec![Some(2), Some(3)]],
        );
        let mut state = state(
            vec![a, b],
            vec![
                Constraint::new("A", "BId", "B", "Id"),
                Constraint::new("B", "AId", "A", "Id"),
            ],
        );
        let mut resolver = IntegrityResolver::new();
        resolver.resolve_all(&mut state, &mut Vec::new()).unwrap();

        // A3 dangles, which strands B2, which strands A2
        assert!(state.catalog.all_solved());
        assert_eq!(state.store.row_count("A"), Some(1));
        assert_eq!(state.store.row_count("B"), Some(1));
        assert_sound(&state);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut state = state(
            vec![plain("Users", 50), kernels(60, 7)],
            vec![Constraint::new("Kernels", "AuthorUserId", "Users", "Id")],
        );
        IntegrityResolver::new()
            .resolve_all(&mut state, &mut Vec::new())
            .unwrap();
        let before = state.store.table("Kernels").unwrap().clone();

        // Reopen and walk again: nothing changes
        assert_eq!(state.catalog.invalidate_consumers("Users", usize::MAX), 1);
        let mut again = IntegrityResolver::new();
        again.resolve_all(&mut state, &mut Vec::new()).unwrap();
        assert_eq!(state.store.table("Kernels").unwrap(), &before);
        assert_eq!(again.rows_removed(), 0);
    }

    #[test]
    fn test_harden_only_constraints_are_not_walked() {
        let kernels = id_table(
            "Kernels",
            &["ForkParentKernelVersionId"],
            vec![vec![Some(1), Some(500)], vec![Some(2), None]],
        );
        let mut state = state(
            vec![kernels, plain("KernelVersions", 3)],
            vec![Constraint::new("Kernels", "ForkParentKernelVersionId", "KernelVersions", "Id")
                .with_mode(ConstraintMode::HardenOnly)],
        );
        IntegrityResolver::new()
            .resolve_all(&mut state, &mut Vec::new())
            .unwrap();
        assert!(!state.store.is_loaded("Kernels"));
    }

    #[test]
    fn test_counts_never_increase() {
        let mut state = state(
            vec![plain("Users", 10), kernels(30, 12)],
            vec![Constraint::new("Kernels", "AuthorUserId", "Users", "Id")],
        );
        IntegrityResolver::new()
            .resolve_all(&mut state, &mut Vec::new())
            .unwrap();
        for table in state.store.loaded_tables() {
            assert!(state.store.row_count(table) <= state.store.initial_rows(table));
        }
    }
}

//! Declared foreign-key constraints and their solved flags.

use serde::{Deserialize, Serialize};

/// How a declared constraint takes part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    /// Walked by the resolver, then hardened in the destination.
    #[default]
    Resolve,

    /// Only added to the destination schema; rows are never filtered for it.
    HardenOnly,
}

/// One declared foreign key: `table.foreign_key -> referenced_table.referenced_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub table: String,
    pub foreign_key: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub mode: ConstraintMode,
    solved: bool,
}

impl Constraint {
    pub fn new(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_key: foreign_key.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
            mode: ConstraintMode::Resolve,
            solved: false,
        }
    }

    pub fn with_mode(mut self, mode: ConstraintMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_solved(&self) -> bool {
        self.solved
    }

    /// Whether the resolver walks this constraint.
    pub fn resolves(&self) -> bool {
        self.mode == ConstraintMode::Resolve
    }

    pub fn is_self_reference(&self) -> bool {
        self.table == self.referenced_table
    }
}

/// Index of a constraint inside its catalog.
pub type ConstraintId = usize;

/// The constraint list for one run, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ConstraintCatalog {
    constraints: Vec<Constraint>,
}

impl ConstraintCatalog {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn get(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(id)
    }

    /// Every table named on either side of any constraint, first mention first.
    pub fn tables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in &self.constraints {
            for name in [&c.table, &c.referenced_table] {
                if !out.iter().any(|t| t == name) {
                    out.push(name.clone());
                }
            }
        }
        out
    }

    /// True when every resolve-mode constraint is solved.
    pub fn all_solved(&self) -> bool {
        self.constraints
            .iter()
            .filter(|c| c.resolves())
            .all(|c| c.solved)
    }

    pub fn unsolved_count(&self) -> usize {
        self.constraints
            .iter()
            .filter(|c| c.resolves() && !c.solved)
            .count()
    }

    /// Distinct referencing tables of unsolved constraints, in declaration order.
    pub fn unsolved_referencing_tables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in self.constraints.iter().filter(|c| c.resolves() && !c.solved) {
            if !out.contains(&c.table) {
                out.push(c.table.clone());
            }
        }
        out
    }

    /// Distinct tables referenced by `table` through resolve-mode constraints.
    pub fn referenced_tables(&self, table: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in self
            .constraints
            .iter()
            .filter(|c| c.resolves() && c.table == table)
        {
            if !out.contains(&c.referenced_table) {
                out.push(c.referenced_table.clone());
            }
        }
        out
    }

    /// Unsolved resolve-mode constraints from `table` to `referenced`.
    pub fn unsolved_between(&self, table: &str, referenced: &str) -> Vec<ConstraintId> {
        self.constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.resolves() && !c.solved && c.table == table && c.referenced_table == referenced
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// True when every resolve-mode constraint of `table` is solved.
    pub fn is_settled(&self, table: &str) -> bool {
        self.constraints
            .iter()
            .filter(|c| c.resolves() && c.table == table)
            .all(|c| c.solved)
    }

    pub fn mark_solved(&mut self, id: ConstraintId) {
        if let Some(c) = self.constraints.get_mut(id) {
            c.solved = true;
        }
    }

    /// `table` lost rows: every other resolve-mode constraint pointing at it
    /// must be checked again. Returns how many flags flipped.
    pub fn invalidate_consumers(&mut self, table: &str, except: ConstraintId) -> usize {
        let mut flipped = 0;
        for (id, c) in self.constraints.iter_mut().enumerate() {
            if id != except && c.resolves() && c.referenced_table == table && c.solved {
                c.solved = false;
                flipped += 1;
            }
        }
        flipped
    }

    /// True while some unsolved constraint from another table still reads `table`.
    pub fn has_unsolved_consumers(&self, table: &str) -> bool {
        self.constraints
            .iter()
            .any(|c| c.resolves() && !c.solved && c.referenced_table == table)
    }

    /// Distinct columns of `table` that any constraint references.
    pub fn referenced_columns_of(&self, table: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in self
            .constraints
            .iter()
            .filter(|c| c.referenced_table == table)
        {
            if !out.contains(&c.referenced_column) {
                out.push(c.referenced_column.clone());
            }
        }
        out
    }

    /// Every column of `table` named by a constraint, on either side.
    pub fn required_columns(&self, table: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in &self.constraints {
            if c.table == table && !out.contains(&c.foreign_key) {
                out.push(c.foreign_key.clone());
            }
            if c.referenced_table == table && !out.contains(&c.referenced_column) {
                out.push(c.referenced_column.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ConstraintCatalog {
        ConstraintCatalog::new(vec![
            Constraint::new("DatasetVotes", "UserId", "Users", "Id"),
            Constraint::new("DatasetVotes", "DatasetVersionId", "DatasetVersions", "Id"),
            Constraint::new("DatasetVersions", "DatasetId", "Datasets", "Id"),
            Constraint::new("Tags", "ParentTagId", "Tags", "Id"),
            Constraint::new("Kernels", "ForkParentKernelVersionId", "KernelVersions", "Id")
                .with_mode(ConstraintMode::HardenOnly),
        ])
    }

    #[test]
    fn test_tables_in_mention_order() {
        assert_eq!(
            catalog().tables(),
            vec![
                "DatasetVotes",
                "Users",
                "DatasetVersions",
                "Datasets",
                "Tags",
                "Kernels",
                "KernelVersions"
            ]
        );
    }

    #[test]
    fn test_harden_only_ignored_by_resolution_queries() {
        let c = catalog();
        assert_eq!(c.unsolved_count(), 4);
        assert!(!c.unsolved_referencing_tables().contains(&"Kernels".to_string()));
        assert!(c.referenced_tables("Kernels").is_empty());
        assert!(c.is_settled("Kernels"));
    }

    #[test]
    fn test_invalidate_consumers_skips_current() {
        let mut c = catalog();
        for id in 0..c.len() {
            c.mark_solved(id);
        }
        assert!(c.all_solved());

        let flipped = c.invalidate_consumers("DatasetVersions", 2);
        assert_eq!(flipped, 1);
        assert!(!c.get(1).unwrap().is_solved());
        assert!(c.has_unsolved_consumers("DatasetVersions"));
        assert!(!c.has_unsolved_consumers("Users"));
    }

    #[test]
    fn test_unsolved_between() {
        let c = catalog();
        assert_eq!(c.unsolved_between("DatasetVotes", "DatasetVersions"), vec![1]);
        assert_eq!(c.unsolved_between("Tags", "Tags"), vec![3]);
        assert!(c.unsolved_between("Kernels", "KernelVersions").is_empty());
    }

    #[test]
    fn test_required_columns() {
        let c = catalog();
        assert_eq!(c.required_columns("DatasetVersions"), vec!["Id", "DatasetId"]);
        assert_eq!(c.required_columns("Tags"), vec!["ParentTagId", "Id"]);
        assert_eq!(c.referenced_columns_of("KernelVersions"), vec!["Id"]);
    }
}

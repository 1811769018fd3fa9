//! Referential-integrity resolution and dependency-ordered loading.
//!
//! - [`store`]: loaded tables, row filtering, release of written tables
//! - [`catalog`]: declared constraints with solved flags
//! - [`resolver`]: fixpoint row filtering over the constraint graph
//! - [`scheduler`]: write eligibility and ordering
//! - [`stats`]: per-table retention
//! - [`hardener`]: post-load key and foreign key retrofitting

pub mod catalog;
pub mod hardener;
pub mod resolver;
pub mod scheduler;
pub mod stats;
pub mod store;

pub use catalog::{Constraint, ConstraintCatalog, ConstraintMode};
pub use hardener::{
    HardeningKind, HardeningOutcome, HardeningReport, HardeningStatus, SchemaHardener,
};
pub use resolver::{IntegrityResolver, SettleObserver};
pub use scheduler::{LoadScheduler, SchedulerOptions};
pub use stats::{collect_stats, TableStats};
pub use store::TableStore;

use crate::error::{LoadError, Result};

/// Mutable state of one run: the tables and the constraint flags.
///
/// Created at run start, threaded by `&mut` through the resolver and the
/// scheduler, dropped at run end.
pub struct RunState {
    pub store: TableStore,
    pub catalog: ConstraintCatalog,
}

impl RunState {
    pub fn new(store: TableStore, catalog: ConstraintCatalog) -> Self {
        Self { store, catalog }
    }

    /// Load `name` if needed and check that every column the catalog names
    /// on it exists.
    pub fn ensure_loaded(&mut self, name: &str) -> Result<()> {
        if !self.store.ensure_loaded(name)? {
            return Ok(());
        }

        let Some(columns) = self.store.columns(name) else {
            return Ok(());
        };
        for required in self.catalog.required_columns(name) {
            if !columns.iter().any(|c| c.name == required) {
                return Err(LoadError::Config(format!(
                    "table {} has no column {} named by the constraints file",
                    name, required
                )));
            }
        }
        Ok(())
    }
}

//! # kgtorrent
//!
//! Loads a Meta Kaggle snapshot into PostgreSQL with its foreign keys enforced.
//!
//! The snapshot declares foreign keys it does not honour. This library:
//!
//! - **Resolves** declared constraints to a fixpoint, dropping rows whose
//!   foreign key points at nothing
//! - **Loads** each table once, as soon as it can no longer lose rows, using
//!   the PostgreSQL COPY protocol
//! - **Hardens** the destination afterwards with primary, unique and foreign keys
//! - **Downloads** the notebooks the loaded tables describe
//!
//! ## Example
//!
//! ```rust,no_run
//! use kgtorrent::{Config, LoadMode, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> kgtorrent::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let cancel = tokio_util::sync::CancellationToken::new();
//!     let result = orchestrator.run(LoadMode::Init, cancel).await?;
//!     println!("Loaded {} rows", result.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod download;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod snapshot;
pub mod target;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, DownloadStrategy, LoadConfig, SourceConfig, TargetConfig, WriteOrder};
pub use download::{DownloadSummary, NotebookId};
pub use engine::{HardeningReport, IntegrityResolver, LoadScheduler, RunState, TableStats};
pub use error::{LoadError, Result};
pub use orchestrator::{HealthCheckResult, LoadMode, LoadResult, Orchestrator};
pub use snapshot::{CsvDirectory, MemorySource, TableSource};
pub use target::{MemoryTarget, PgTarget, TargetStore};

//! Notebook retrieval.
//!
//! Identifiers of the notebooks to fetch are read back from the loaded
//! destination ([`TargetStore::notebook_identifiers`]). The destination
//! folder is reconciled first: notebooks already present are skipped and
//! `.ipynb` files that match no identifier are deleted. Each remaining
//! notebook is fetched with a [`NotebookFetcher`]; a failed item is counted
//! and logged, never fatal.
//!
//! [`TargetStore::notebook_identifiers`]: crate::target::TargetStore::notebook_identifiers

pub mod api;
pub mod http;

pub use api::ApiFetcher;
pub use http::HttpFetcher;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DownloadConfig, DownloadStrategy};
use crate::error::{LoadError, Result};

/// Extension of downloaded notebooks.
pub const NOTEBOOK_EXTENSION: &str = "ipynb";

/// One notebook to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NotebookId {
    /// `Users.UserName` of the author.
    pub owner: String,
    /// `Kernels.CurrentUrlSlug`.
    pub slug: String,
    /// `Kernels.CurrentKernelVersionId`.
    pub version_id: i64,
}

impl NotebookId {
    pub fn new(owner: impl Into<String>, slug: impl Into<String>, version_id: i64) -> Self {
        Self {
            owner: owner.into(),
            slug: slug.into(),
            version_id,
        }
    }

    /// `{owner}_{slug}.ipynb`
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.owner, self.slug, NOTEBOOK_EXTENSION)
    }
}

/// Which notebooks to select from the loaded tables.
#[derive(Debug, Clone)]
pub struct NotebookFilter {
    /// Accepted `KernelLanguages.Name` values.
    pub languages: Vec<String>,
    /// Minimum `KernelVersions.TotalLines`.
    pub min_lines: i64,
}

impl From<&DownloadConfig> for NotebookFilter {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            languages: config.languages.clone(),
            min_lines: config.min_lines,
        }
    }
}

/// Retrieves the content of one notebook.
#[async_trait]
pub trait NotebookFetcher: Send + Sync {
    async fn fetch(&self, id: &NotebookId) -> Result<Vec<u8>>;

    /// Strategy name for logging.
    fn name(&self) -> &str;
}

/// Build the fetcher for a strategy.
pub fn fetcher_for(
    strategy: DownloadStrategy,
    config: &DownloadConfig,
) -> Result<Box<dyn NotebookFetcher>> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    Ok(match strategy {
        DownloadStrategy::Http => Box::new(HttpFetcher::new(timeout)?),
        DownloadStrategy::Api => Box::new(ApiFetcher::from_environment(timeout)?),
    })
}

/// True when `dir` holds no notebook (a missing folder counts as empty).
pub fn folder_is_empty(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(NOTEBOOK_EXTENSION) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Outcome of reconciling the destination folder with the identifiers.
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Identifiers with no file yet.
    pub pending: Vec<NotebookId>,
    /// Identifiers already downloaded.
    pub skipped: usize,
    /// Files deleted because they match no identifier.
    pub removed: usize,
}

/// Delete notebooks that match no identifier and drop identifiers that are
/// already on disk.
pub fn reconcile_destination(dir: &Path, ids: Vec<NotebookId>) -> Result<Reconciled> {
    let wanted: HashSet<(&str, &str)> = ids
        .iter()
        .map(|id| (id.owner.as_str(), id.slug.as_str()))
        .collect();

    let mut present: HashSet<(String, String)> = HashSet::new();
    let mut removed = 0;

    if dir.exists() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(NOTEBOOK_EXTENSION) {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let parts: Vec<&str> = stem.split('_').collect();
            match parts.as_slice() {
                [owner, slug] if wanted.contains(&(*owner, *slug)) => {
                    present.insert((owner.to_string(), slug.to_string()));
                }
                _ => {
                    debug!("Removing {} (matches no notebook)", path.display());
                    std::fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
    }

    let total = ids.len();
    let pending: Vec<NotebookId> = ids
        .into_iter()
        .filter(|id| !present.contains(&(id.owner.clone(), id.slug.clone())))
        .collect();

    Ok(Reconciled {
        skipped: total - pending.len(),
        pending,
        removed,
    })
}

/// Counts reported at the end of a download session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub requested: usize,
    pub skipped: usize,
    pub removed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Fetches notebooks one by one into a folder.
pub struct Downloader {
    fetcher: Box<dyn NotebookFetcher>,
    dest: PathBuf,
    delay: Duration,
}

impl Downloader {
    pub fn new(fetcher: Box<dyn NotebookFetcher>, dest: impl Into<PathBuf>, delay: Duration) -> Self {
        Self {
            fetcher,
            dest: dest.into(),
            delay,
        }
    }

    /// Reconcile the folder, then fetch every pending notebook.
    /// Stops between items once `cancel` fires.
    pub async fn run(&self, ids: Vec<NotebookId>, cancel: CancellationToken) -> Result<DownloadSummary> {
        std::fs::create_dir_all(&self.dest)?;

        let requested = ids.len();
        let reconciled = reconcile_destination(&self.dest, ids)?;
        let mut summary = DownloadSummary {
            requested,
            skipped: reconciled.skipped,
            removed: reconciled.removed,
            ..Default::default()
        };

        info!(
            "Downloading {} notebooks with the {} strategy ({} already present, {} removed)",
            reconciled.pending.len(),
            self.fetcher.name(),
            summary.skipped,
            summary.removed
        );

        for (i, id) in reconciled.pending.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            match self.fetch_one(id).await {
                Ok(()) => {
                    summary.succeeded += 1;
                    debug!("Downloaded {}/{} (ID: {})", id.owner, id.slug, id.version_id);
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("Failed to download {}/{}: {}", id.owner, id.slug, e);
                }
            }

            if i + 1 < reconciled.pending.len() && !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = cancel.cancelled() => {
                        summary.cancelled = true;
                        break;
                    }
                }
            }
        }

        if summary.cancelled {
            warn!("Download cancelled after {} notebooks", summary.succeeded + summary.failed);
        }
        info!(
            "Download completed: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );
        Ok(summary)
    }

    async fn fetch_one(&self, id: &NotebookId) -> Result<()> {
        let content = self.fetcher.fetch(id).await?;
        if content.is_empty() {
            return Err(LoadError::transfer(id.file_name(), "empty notebook body"));
        }
        tokio::fs::write(self.dest.join(id.file_name()), content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockFetcher {
        fail_slug: &'static str,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotebookFetcher for MockFetcher {
        async fn fetch(&self, id: &NotebookId) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push(id.slug.clone());
            if id.slug == self.fail_slug {
                return Err(LoadError::transfer(id.file_name(), "404"));
            }
            Ok(b"{\"cells\": []}".to_vec())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn ids() -> Vec<NotebookId> {
        vec![
            NotebookId::new("alice", "eda", 10),
            NotebookId::new("bob", "titanic", 11),
            NotebookId::new("carol", "broken", 12),
        ]
    }

    #[test]
    fn test_file_name() {
        assert_eq!(NotebookId::new("alice", "eda", 1).file_name(), "alice_eda.ipynb");
    }

    #[test]
    fn test_folder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(folder_is_empty(&dir.path().join("missing")).unwrap());
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();
        assert!(folder_is_empty(dir.path()).unwrap());
        std::fs::write(dir.path().join("alice_eda.ipynb"), "{}").unwrap();
        assert!(!folder_is_empty(dir.path()).unwrap());
    }

    #[test]
    fn test_reconcile_skips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice_eda.ipynb"), "{}").unwrap();
        std::fs::write(dir.path().join("dave_gone.ipynb"), "{}").unwrap();
        std::fs::write(dir.path().join("not_a_valid_name.ipynb"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let r = reconcile_destination(dir.path(), ids()).unwrap();
        assert_eq!(r.skipped, 1);
        assert_eq!(r.removed, 2);
        assert_eq!(r.pending.len(), 2);
        assert!(dir.path().join("alice_eda.ipynb").exists());
        assert!(!dir.path().join("dave_gone.ipynb").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_run_counts_failures_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher {
            fail_slug: "titanic",
            calls: Mutex::new(Vec::new()),
        };
        let downloader = Downloader::new(Box::new(fetcher), dir.path(), Duration::ZERO);

        let summary = downloader.run(ids(), CancellationToken::new()).await.unwrap();
        assert_eq!(summary.requested, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.cancelled);
        assert!(dir.path().join("carol_broken.ipynb").exists());
        assert!(!dir.path().join("bob_titanic.ipynb").exists());
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher {
            fail_slug: "",
            calls: Mutex::new(Vec::new()),
        };
        let downloader = Downloader::new(Box::new(fetcher), dir.path(), Duration::ZERO);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = downloader.run(ids(), cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.succeeded, 0);
    }
}

//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Snapshot location (Meta Kaggle CSV directory and constraint declarations).
    pub source: SourceConfig,

    /// Destination database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Resolution and write behavior.
    #[serde(default)]
    pub load: LoadConfig,

    /// Load-time table fixes.
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Notebook retrieval.
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.load = self.load.with_auto_tuning(&resources);
        self
    }
}

/// Snapshot source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory holding one CSV file per entity.
    pub path: PathBuf,

    /// CSV file declaring the foreign-key constraints.
    pub constraints_file: PathBuf,

    /// Also load CSV files that no constraint mentions (default: false).
    #[serde(default)]
    pub include_unconstrained_tables: bool,

    /// Columns whose name ends with this suffix are parsed as timestamps (default: "Date").
    #[serde(default = "default_date_suffix")]
    pub date_suffix: String,

    /// chrono formats tried in order when parsing date columns.
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,

    /// Rows sampled for column type inference. Whole file if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer_rows: Option<usize>,
}

impl SourceConfig {
    /// Source with every optional setting at its default.
    pub fn new(path: impl Into<PathBuf>, constraints_file: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            constraints_file: constraints_file.into(),
            include_unconstrained_tables: false,
            date_suffix: default_date_suffix(),
            date_formats: default_date_formats(),
            infer_rows: None,
        }
    }
}

/// Destination database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl TargetConfig {
    /// Target with every optional setting at its default.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_pg_port(),
            database: database.into(),
            user: user.into(),
            password: String::new(),
            schema: default_public_schema(),
            ssl_mode: default_disable(),
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Resolution and write behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Rows per COPY batch (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Parallel COPY connections per table. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_workers: Option<usize>,

    /// Maximum PostgreSQL connections. Auto-tuned based on write workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pg_connections: Option<usize>,

    /// When a table may be written relative to the tables it references.
    #[serde(default)]
    pub write_order: WriteOrder,

    /// Free the rows of written tables nothing still depends on (default: true).
    #[serde(default = "default_true")]
    pub release_written_tables: bool,

    /// Retrofit primary, unique and foreign keys after loading (default: true).
    #[serde(default = "default_true")]
    pub harden_foreign_keys: bool,

    /// Column that becomes the primary key when present (default: "Id").
    #[serde(default = "default_primary_key_column")]
    pub primary_key_column: String,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            write_workers: None,
            max_pg_connections: None,
            write_order: WriteOrder::default(),
            release_written_tables: true,
            harden_foreign_keys: true,
            primary_key_column: default_primary_key_column(),
        }
    }
}

impl LoadConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // Writers: half the cores, 1-8 range
        let workers = match self.write_workers {
            Some(w) => w,
            None => {
                let w = (cores / 2).clamp(1, 8);
                self.write_workers = Some(w);
                w
            }
        };

        // One spare connection for DDL and hardening
        let conns = match self.max_pg_connections {
            Some(c) => c,
            None => {
                let c = (workers + 1).clamp(2, 16);
                self.max_pg_connections = Some(c);
                c
            }
        };

        info!(
            "Auto-tuned config: write_workers={}, pg_conns={}, batch_size={}",
            workers, conns, self.batch_size
        );

        self
    }

    pub fn get_write_workers(&self) -> usize {
        self.write_workers.unwrap_or(2)
    }

    pub fn get_max_pg_connections(&self) -> usize {
        self.max_pg_connections
            .unwrap_or_else(|| self.get_write_workers() + 1)
    }
}

/// Write ordering relative to referenced tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrder {
    /// Referenced tables must have reached their final row count.
    #[default]
    Relaxed,

    /// Referenced tables must already be written.
    Strict,
}

/// Load-time table fixes applied before stats are taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Drop duplicate rows on a key column, keeping the first occurrence.
    #[serde(default = "default_dedupe")]
    pub dedupe: Vec<DedupeRule>,

    /// Round float columns and null out non-finite values.
    #[serde(default = "default_rounding")]
    pub round: Vec<RoundRule>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            dedupe: default_dedupe(),
            round: default_rounding(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeRule {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRule {
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default = "default_round_digits")]
    pub digits: u32,
}

/// Notebook retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Folder receiving `{owner}_{slug}.ipynb` files.
    #[serde(default = "default_dest_path")]
    pub dest_path: PathBuf,

    /// Retrieval strategy (default: http).
    #[serde(default)]
    pub strategy: DownloadStrategy,

    /// Kernel language names to keep.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Minimum KernelVersions.TotalLines (default: 20).
    #[serde(default = "default_min_lines")]
    pub min_lines: i64,

    /// Pause between requests in milliseconds (default: 1000).
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Per-request timeout in seconds (default: 5).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dest_path: default_dest_path(),
            strategy: DownloadStrategy::default(),
            languages: default_languages(),
            min_lines: default_min_lines(),
            request_delay_ms: default_request_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// How notebooks are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStrategy {
    /// Plain HTTP GET of the kernel version's script content.
    #[default]
    Http,

    /// Kaggle REST API `kernels/pull` with account credentials.
    Api,
}

impl std::str::FromStr for DownloadStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "http_get" => Ok(DownloadStrategy::Http),
            "api" => Ok(DownloadStrategy::Api),
            other => Err(format!("unknown download strategy '{}'", other)),
        }
    }
}

impl fmt::Display for DownloadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadStrategy::Http => write!(f, "http"),
            DownloadStrategy::Api => write!(f, "api"),
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    10_000
}

fn default_primary_key_column() -> String {
    "Id".to_string()
}

fn default_date_suffix() -> String {
    "Date".to_string()
}

/// Meta Kaggle writes `MM/DD/YYYY[ HH:MM:SS]`; ISO forms are accepted as well.
pub fn default_date_formats() -> Vec<String> {
    [
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_dedupe() -> Vec<DedupeRule> {
    vec![DedupeRule {
        table: "ForumMessageVotes".to_string(),
        column: "Id".to_string(),
    }]
}

fn default_rounding() -> Vec<RoundRule> {
    vec![RoundRule {
        table: "Submissions".to_string(),
        columns: vec![
            "PublicScoreLeaderboardDisplay".to_string(),
            "PublicScoreFullPrecision".to_string(),
            "PrivateScoreLeaderboardDisplay".to_string(),
            "PrivateScoreFullPrecision".to_string(),
        ],
        digits: default_round_digits(),
    }]
}

fn default_round_digits() -> u32 {
    3
}

fn default_dest_path() -> PathBuf {
    PathBuf::from("notebooks")
}

fn default_languages() -> Vec<String> {
    vec!["IPython Notebook HTML".to_string()]
}

fn default_min_lines() -> i64 {
    20
}

fn default_request_delay_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    5
}

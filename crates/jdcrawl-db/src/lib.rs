use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::{env, str::FromStr, time::Duration};
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

// Path relative to crates/jdcrawl-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub busy_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_connections: read_u32("JDCRAWL_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            min_connections: read_u32("JDCRAWL_DB_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS),
            acquire_timeout_secs: read_u64(
                "JDCRAWL_DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            ),
            busy_timeout_secs: read_u64("JDCRAWL_DB_BUSY_TIMEOUT_SECS", DEFAULT_BUSY_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("stored row is invalid: {0}")]
    InvalidRow(#[from] jdcrawl_core::CoreError),
    #[error(
        "stale checkpoint advance for {pair}: cursor is at page {current}, \
         caller completed page {attempted}"
    )]
    StaleAdvance {
        pair: String,
        current: u32,
        attempted: u32,
    },
    #[error("crawl job {pair} cannot move from '{from}' to '{to}'")]
    InvalidJobTransition {
        pair: String,
        from: String,
        to: &'static str,
    },
    #[error("crawl run {id} is not in expected status '{expected_status}'")]
    InvalidCrawlRunTransition {
        id: i64,
        expected_status: &'static str,
    },
}

/// Open a SQLite pool for the given URL, creating the database file if needed.
///
/// The journal runs in WAL mode with `synchronous = FULL` so a committed
/// checkpoint survives a crash of the process or the host.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the URL is invalid or the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(options)
        .await
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize, sqlx::migrate::MigrateError> {
    // The _sqlx_migrations table does not exist on a fresh database; treat
    // absence as zero applied.
    let applied_before: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    MIGRATOR.run(pool).await?;

    let applied_after: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

fn read_u32(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn read_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn page_to_i64(page: u32) -> i64 {
    i64::from(page)
}

pub(crate) fn page_from_i64(page: i64) -> u32 {
    u32::try_from(page.max(0)).unwrap_or(u32::MAX)
}


pub mod checkpoints;
pub mod crawl_jobs;
pub mod crawl_runs;

pub use checkpoints::{advance_cursor, get_cursor, list_cursors};
pub use crawl_jobs::{
    count_jobs_by_status, enqueue_jobs, get_job, list_jobs, mark_job, CrawlJobRow,
};
pub use crawl_runs::{
    complete_crawl_run, create_crawl_run, fail_crawl_run, get_crawl_run, list_crawl_runs,
    start_crawl_run, CrawlRunRow, RunTotals,
};

//! Database operations for `crawl_runs`: one row per orchestrator invocation.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `crawl_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrawlRunRow {
    pub id: i64,
    pub public_id: String,
    pub trigger_source: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pairs_total: i64,
    pub pairs_done: i64,
    pub pairs_failed: i64,
    pub pairs_paused: i64,
    pub records_emitted: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Final counters written when a run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub pairs_total: i64,
    pub pairs_done: i64,
    pub pairs_failed: i64,
    pub pairs_paused: i64,
    pub records_emitted: i64,
}

const RUN_COLUMNS: &str = "id, public_id, trigger_source, status, started_at, completed_at, \
     pairs_total, pairs_done, pairs_failed, pairs_paused, records_emitted, error_message, created_at";

/// Creates a new crawl run in `queued` status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert or fetch fails.
pub async fn create_crawl_run(
    pool: &SqlitePool,
    trigger_source: &str,
) -> Result<CrawlRunRow, DbError> {
    let public_id = Uuid::new_v4().to_string();

    let row = sqlx::query_as::<_, CrawlRunRow>(&format!(
        "INSERT INTO crawl_runs (public_id, trigger_source, status, created_at) \
         VALUES (?1, ?2, 'queued', ?3) \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(public_id)
    .bind(trigger_source)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Marks a run as `running` and sets `started_at`.
///
/// # Errors
///
/// Returns [`DbError::InvalidCrawlRunTransition`] if the run is not `queued`,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn start_crawl_run(pool: &SqlitePool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE crawl_runs SET status = 'running', started_at = ?1 \
         WHERE id = ?2 AND status = 'queued'",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidCrawlRunTransition {
            id,
            expected_status: "queued",
        });
    }

    Ok(())
}

/// Marks a run as `succeeded` and records its totals.
///
/// # Errors
///
/// Returns [`DbError::InvalidCrawlRunTransition`] if the run is not `running`,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn complete_crawl_run(
    pool: &SqlitePool,
    id: i64,
    totals: RunTotals,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE crawl_runs \
         SET status = 'succeeded', completed_at = ?1, pairs_total = ?2, pairs_done = ?3, \
             pairs_failed = ?4, pairs_paused = ?5, records_emitted = ?6 \
         WHERE id = ?7 AND status = 'running'",
    )
    .bind(Utc::now())
    .bind(totals.pairs_total)
    .bind(totals.pairs_done)
    .bind(totals.pairs_failed)
    .bind(totals.pairs_paused)
    .bind(totals.records_emitted)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidCrawlRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Marks a run as `failed` with an error message.
///
/// # Errors
///
/// Returns [`DbError::InvalidCrawlRunTransition`] if the run is not `running`,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn fail_crawl_run(
    pool: &SqlitePool,
    id: i64,
    error_message: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE crawl_runs SET status = 'failed', completed_at = ?1, error_message = ?2 \
         WHERE id = ?3 AND status = 'running'",
    )
    .bind(Utc::now())
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidCrawlRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Fetches a single run by its internal `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists with the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_crawl_run(pool: &SqlitePool, id: i64) -> Result<CrawlRunRow, DbError> {
    let row = sqlx::query_as::<_, CrawlRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM crawl_runs WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns the most recent `limit` runs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_crawl_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<CrawlRunRow>, DbError> {
    let rows = sqlx::query_as::<_, CrawlRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM crawl_runs ORDER BY id DESC LIMIT ?1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

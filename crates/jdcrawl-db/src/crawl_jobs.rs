//! Database operations for `crawl_jobs`: per-pair crawl status.

use chrono::{DateTime, Utc};
use jdcrawl_core::{CrawlJob, FeedType, JobStatus, Pair, ProductId};
use sqlx::SqlitePool;

use crate::DbError;

/// A row from the `crawl_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrawlJobRow {
    pub product_id: String,
    pub feed_type: String,
    pub status: String,
    pub failure_reason: Option<String>,
    /// Number of times a run has moved this job into `in_progress`.
    pub attempts: i64,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&CrawlJobRow> for CrawlJob {
    type Error = DbError;

    fn try_from(row: &CrawlJobRow) -> Result<Self, Self::Error> {
        Ok(CrawlJob {
            product_id: ProductId::new(row.product_id.clone())?,
            feed_type: row.feed_type.parse::<FeedType>()?,
            status: JobStatus::from_parts(&row.status, row.failure_reason.as_deref())?,
        })
    }
}

/// Inserts a `pending` job for every pair that has no job yet. Existing jobs,
/// whatever their status, are left untouched.
///
/// Returns the number of newly created jobs.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the transaction fails.
pub async fn enqueue_jobs(pool: &SqlitePool, pairs: &[Pair]) -> Result<u64, DbError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut created = 0u64;

    for pair in pairs {
        let result = sqlx::query(
            "INSERT INTO crawl_jobs (product_id, feed_type, status, updated_at) \
             VALUES (?1, ?2, 'pending', ?3) \
             ON CONFLICT (product_id, feed_type) DO NOTHING",
        )
        .bind(pair.product_id.as_str())
        .bind(pair.feed_type.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        created += result.rows_affected();
    }

    tx.commit().await?;
    Ok(created)
}

/// Fetches the job for `pair`, if one has been enqueued.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_job(pool: &SqlitePool, pair: &Pair) -> Result<Option<CrawlJobRow>, DbError> {
    let row = sqlx::query_as::<_, CrawlJobRow>(
        "SELECT product_id, feed_type, status, failure_reason, attempts, updated_at \
         FROM crawl_jobs WHERE product_id = ?1 AND feed_type = ?2",
    )
    .bind(pair.product_id.as_str())
    .bind(pair.feed_type.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Sets the status of `pair`'s job, creating the job if it does not exist.
///
/// An existing job only moves along [`JobStatus::can_transition_to`]; the
/// check and the write are one conditional statement. Moving into
/// `in_progress` increments `attempts`. The failure reason is stored for
/// `failed` and cleared for every other status.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] if the job's current status
/// may not move to `status`, or [`DbError::Sqlx`] if the write fails.
pub async fn mark_job(pool: &SqlitePool, pair: &Pair, status: &JobStatus) -> Result<(), DbError> {
    let bump = i64::from(matches!(status, JobStatus::InProgress));

    let result = sqlx::query(
        "INSERT INTO crawl_jobs (product_id, feed_type, status, failure_reason, attempts, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (product_id, feed_type) DO UPDATE \
         SET status = excluded.status, \
             failure_reason = excluded.failure_reason, \
             attempts = crawl_jobs.attempts + ?5, \
             updated_at = excluded.updated_at \
         WHERE instr(?7, ',' || crawl_jobs.status || ',') > 0",
    )
    .bind(pair.product_id.as_str())
    .bind(pair.feed_type.as_str())
    .bind(status.as_str())
    .bind(status.reason())
    .bind(bump)
    .bind(Utc::now())
    .bind(allowed_predecessors(status))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let from = get_job(pool, pair)
            .await?
            .map_or_else(|| "missing".to_owned(), |row| row.status);
        return Err(DbError::InvalidJobTransition {
            pair: pair.to_string(),
            from,
            to: status.as_str(),
        });
    }

    Ok(())
}

/// Comma-delimited statuses that may move to `next`, e.g. `,pending,failed,`.
fn allowed_predecessors(next: &JobStatus) -> String {
    let mut list = String::from(",");
    for from in [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Done,
        JobStatus::Failed(String::new()),
    ] {
        if from.can_transition_to(next) {
            list.push_str(from.as_str());
            list.push(',');
        }
    }
    list
}

/// Lists jobs, optionally restricted to one status string
/// (`pending`, `in_progress`, `done`, `failed`).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_jobs(
    pool: &SqlitePool,
    status: Option<&str>,
) -> Result<Vec<CrawlJobRow>, DbError> {
    let rows = sqlx::query_as::<_, CrawlJobRow>(
        "SELECT product_id, feed_type, status, failure_reason, attempts, updated_at \
         FROM crawl_jobs \
         WHERE ?1 IS NULL OR status = ?1 \
         ORDER BY product_id, feed_type",
    )
    .bind(status)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns `(status, count)` for every status that has at least one job.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_jobs_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>, DbError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM crawl_jobs GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

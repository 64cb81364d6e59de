//! Checkpoint store: one durable cursor per `(product_id, feed_type)` pair.
//!
//! The cursor's `next_page_index` is the single source of truth for resume.
//! It only moves through [`advance_cursor`], which is a conditional write: the
//! caller must name the page it just completed, and the write succeeds only if
//! that page is exactly the cursor's current `next_page_index`.

use chrono::{DateTime, Utc};
use jdcrawl_core::{Cursor, FeedType, Pair, ProductId};
use sqlx::SqlitePool;

use crate::{page_from_i64, page_to_i64, DbError};

#[derive(Debug, Clone, sqlx::FromRow)]
struct CursorRow {
    product_id: String,
    feed_type: String,
    next_page_index: i64,
    last_updated_at: DateTime<Utc>,
}

impl TryFrom<CursorRow> for Cursor {
    type Error = DbError;

    fn try_from(row: CursorRow) -> Result<Self, Self::Error> {
        Ok(Cursor {
            product_id: ProductId::new(row.product_id)?,
            feed_type: row.feed_type.parse::<FeedType>()?,
            next_page_index: page_from_i64(row.next_page_index),
            last_updated_at: Some(row.last_updated_at),
        })
    }
}

/// Returns the stored cursor for `pair`, or a fresh zero cursor if the pair
/// has never been advanced.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::InvalidRow`]
/// if the stored row cannot be decoded.
pub async fn get_cursor(pool: &SqlitePool, pair: &Pair) -> Result<Cursor, DbError> {
    let row = sqlx::query_as::<_, CursorRow>(
        "SELECT product_id, feed_type, next_page_index, last_updated_at \
         FROM cursors WHERE product_id = ?1 AND feed_type = ?2",
    )
    .bind(pair.product_id.as_str())
    .bind(pair.feed_type.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Cursor::try_from(row),
        None => Ok(Cursor::fresh(pair.product_id.clone(), pair.feed_type)),
    }
}

/// Atomically records that `completed_page_index` has been fully emitted.
///
/// Succeeds only when `completed_page_index` equals the cursor's current
/// `next_page_index`, after which the cursor points at
/// `completed_page_index + 1`. Any other value fails with
/// [`DbError::StaleAdvance`] and leaves the cursor untouched.
///
/// Each branch is a single conditional statement, so two writers racing on
/// the same pair cannot both succeed.
///
/// # Errors
///
/// Returns [`DbError::StaleAdvance`] on a compare mismatch, or
/// [`DbError::Sqlx`] if the write fails.
pub async fn advance_cursor(
    pool: &SqlitePool,
    pair: &Pair,
    completed_page_index: u32,
) -> Result<Cursor, DbError> {
    let now = Utc::now();
    let next = page_to_i64(completed_page_index) + 1;

    let result = if completed_page_index == 0 {
        // First advance may need to create the row; an existing row only
        // moves if it is still at zero.
        sqlx::query(
            "INSERT INTO cursors (product_id, feed_type, next_page_index, last_updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (product_id, feed_type) DO UPDATE \
             SET next_page_index = excluded.next_page_index, \
                 last_updated_at = excluded.last_updated_at \
             WHERE cursors.next_page_index = 0",
        )
        .bind(pair.product_id.as_str())
        .bind(pair.feed_type.as_str())
        .bind(next)
        .bind(now)
        .execute(pool)
        .await?
    } else {
        sqlx::query(
            "UPDATE cursors SET next_page_index = ?1, last_updated_at = ?2 \
             WHERE product_id = ?3 AND feed_type = ?4 AND next_page_index = ?5",
        )
        .bind(next)
        .bind(now)
        .bind(pair.product_id.as_str())
        .bind(pair.feed_type.as_str())
        .bind(page_to_i64(completed_page_index))
        .execute(pool)
        .await?
    };

    if result.rows_affected() == 0 {
        let current = get_cursor(pool, pair).await?;
        tracing::error!(
            pair = %pair,
            current = current.next_page_index,
            attempted = completed_page_index,
            "rejected stale checkpoint advance"
        );
        return Err(DbError::StaleAdvance {
            pair: pair.to_string(),
            current: current.next_page_index,
            attempted: completed_page_index,
        });
    }

    Ok(Cursor {
        product_id: pair.product_id.clone(),
        feed_type: pair.feed_type,
        next_page_index: page_from_i64(next),
        last_updated_at: Some(now),
    })
}

/// Lists every stored cursor, ordered by product then feed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::InvalidRow`]
/// if a stored row cannot be decoded.
pub async fn list_cursors(pool: &SqlitePool) -> Result<Vec<Cursor>, DbError> {
    let rows = sqlx::query_as::<_, CursorRow>(
        "SELECT product_id, feed_type, next_page_index, last_updated_at \
         FROM cursors ORDER BY product_id, feed_type",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Cursor::try_from).collect()
}
